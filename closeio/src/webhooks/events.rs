//! Webhook actions and the notifications they produce.
//!
//! Close reports every change as an `(object_type, action)` pair. [`Action`] is the canonical
//! verb after synonym folding; [`Notification`] is what listeners receive.

use serde::Serialize;

use crate::value::NativeValue;

/// Catch-all key, emitted for every delivered event.
pub const EVENT_KEY: &str = "closeio_event";
pub const CREATE_KEY: &str = "closeio_create";
pub const UPDATE_KEY: &str = "closeio_update";
pub const DELETE_KEY: &str = "closeio_delete";
pub const MERGE_KEY: &str = "closeio_merge";

/// Canonical webhook action.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    Created,
    Updated,
    Deleted,
    Merged,
    /// An action outside the four canonical verbs, kept verbatim
    Other(String),
}

impl Action {
    /// Fold the legacy (`create`) and current (`created`) spellings onto one verb.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "create" | "created" => Self::Created,
            "update" | "updated" => Self::Updated,
            "delete" | "deleted" => Self::Deleted,
            "merge" | "merged" => Self::Merged,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Merged => "merged",
            Self::Other(raw) => raw,
        }
    }

    /// Key of the generic notification for this action, if it has one.
    pub fn generic_key(&self) -> Option<&'static str> {
        match self {
            Self::Created => Some(CREATE_KEY),
            Self::Updated => Some(UPDATE_KEY),
            Self::Deleted => Some(DELETE_KEY),
            Self::Merged => Some(MERGE_KEY),
            Self::Other(_) => None,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

/// Key of the model-and-action specific notification, e.g. `lead_created`.
pub fn specific_key(object_type: &str, action: &Action) -> String {
    format!("{}_{}", object_type, action)
}

/// The payload shape tied to an action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ActionPayload {
    /// Created and updated events carry the whole object
    Instance { instance: NativeValue },
    /// Deleted events carry only the id; `Null` when the payload had none
    Deleted { instance_id: NativeValue },
    Merged {
        source_id: NativeValue,
        destination_id: NativeValue,
    },
}

impl ActionPayload {
    /// Reduce `payload` to the shape `action` calls for. `None` for non-canonical actions.
    pub fn for_action(action: &Action, payload: &NativeValue) -> Option<Self> {
        let field = |name: &str| payload.get(name).cloned().unwrap_or(NativeValue::Null);

        match action {
            Action::Created | Action::Updated => Some(Self::Instance {
                instance: payload.clone(),
            }),
            Action::Deleted => Some(Self::Deleted { instance_id: field("id") }),
            Action::Merged => Some(Self::Merged {
                source_id: field("source_id"),
                destination_id: field("destination_id"),
            }),
            Action::Other(_) => None,
        }
    }
}

/// Body of a [`Notification`], by emission step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NotificationPayload {
    /// Sent under `{object_type}_{action}`
    Specific(ActionPayload),
    /// Sent under `closeio_create` and friends
    Generic {
        model: String,
        #[serde(flatten)]
        payload: ActionPayload,
    },
    /// Sent under `closeio_event`, always with the full object
    Event {
        model: String,
        event: String,
        instance: NativeValue,
    },
}

/// A keyed message delivered to every listener registered under `key`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub key: String,
    pub payload: NotificationPayload,
}

impl Notification {
    /// The object type, for generic and catch-all notifications.
    pub fn model(&self) -> Option<&str> {
        match &self.payload {
            NotificationPayload::Generic { model, .. } | NotificationPayload::Event { model, .. } => Some(model),
            NotificationPayload::Specific(_) => None,
        }
    }

    /// The full object, when the notification carries one.
    pub fn instance(&self) -> Option<&NativeValue> {
        match &self.payload {
            NotificationPayload::Specific(ActionPayload::Instance { instance })
            | NotificationPayload::Generic {
                payload: ActionPayload::Instance { instance },
                ..
            }
            | NotificationPayload::Event { instance, .. } => Some(instance),
            _ => None,
        }
    }

    pub fn action_payload(&self) -> Option<&ActionPayload> {
        match &self.payload {
            NotificationPayload::Specific(payload) | NotificationPayload::Generic { payload, .. } => Some(payload),
            NotificationPayload::Event { .. } => None,
        }
    }
}
