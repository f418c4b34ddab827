//! Routing of normalized webhook events to registered listeners.
//!
//! Every event produces up to three notifications, always in this order:
//!
//! 1. `{object_type}_{action}` (e.g. `lead_created`) with the action's payload shape
//! 2. the generic `closeio_create` / `closeio_update` / `closeio_delete` / `closeio_merge`,
//!    with the model added
//! 3. `closeio_event`, with the model, the action and the full object
//!
//! Steps 1 and 2 only happen for the four canonical actions. A key with no listeners is skipped.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::value::to_native;
use crate::webhooks::envelope::WebhookEnvelope;
use crate::webhooks::events::{ActionPayload, EVENT_KEY, Notification, NotificationPayload, specific_key};

/// A listener callback.
pub type Handler = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Handle returned by [`Listeners::register`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Key → handlers registry. Handlers under one key run in registration order.
#[derive(Default)]
pub struct Listeners {
    next_id: u64,
    handlers: HashMap<String, Vec<(ListenerId, Handler)>>,
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<&str, usize> = self.handlers.iter().map(|(k, v)| (k.as_str(), v.len())).collect();
        f.debug_struct("Listeners").field("handlers", &counts).finish()
    }
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, key: impl Into<String>, handler: F) -> ListenerId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.handlers.entry(key.into()).or_default().push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn unregister(&mut self, id: ListenerId) -> bool {
        let mut removed = false;
        self.handlers.retain(|_, handlers| {
            let before = handlers.len();
            handlers.retain(|(handler_id, _)| *handler_id != id);
            removed |= handlers.len() != before;
            !handlers.is_empty()
        });
        removed
    }

    pub fn listener_count(&self, key: &str) -> usize {
        self.handlers.get(key).map_or(0, Vec::len)
    }

    /// Invoke every handler registered under the notification's key.
    pub fn notify(&self, notification: &Notification) {
        let Some(handlers) = self.handlers.get(&notification.key) else {
            trace!(key = %notification.key, "No listeners registered");
            return;
        };

        for (_, handler) in handlers {
            handler(notification);
        }
    }

    /// Emit every notification for `envelope`, returning them in emission order.
    pub fn dispatch(&self, envelope: &WebhookEnvelope) -> Vec<Notification> {
        let notifications = notifications(envelope);
        for notification in &notifications {
            self.notify(notification);
        }

        debug!(
            object_type = %envelope.object_type,
            action = %envelope.action,
            emitted = notifications.len(),
            "Dispatched webhook event"
        );
        notifications
    }
}

/// The notifications an event produces, in emission order.
pub fn notifications(envelope: &WebhookEnvelope) -> Vec<Notification> {
    let instance = to_native(envelope.payload.clone());
    let model = envelope.object_type.clone();
    let mut out = Vec::with_capacity(3);

    if let (Some(payload), Some(generic_key)) = (
        ActionPayload::for_action(&envelope.action, &instance),
        envelope.action.generic_key(),
    ) {
        out.push(Notification {
            key: specific_key(&model, &envelope.action),
            payload: NotificationPayload::Specific(payload.clone()),
        });
        out.push(Notification {
            key: generic_key.to_string(),
            payload: NotificationPayload::Generic {
                model: model.clone(),
                payload,
            },
        });
    }

    out.push(Notification {
        key: EVENT_KEY.to_string(),
        payload: NotificationPayload::Event {
            model,
            event: envelope.action.to_string(),
            instance,
        },
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::NativeValue;
    use crate::webhooks::events::{Action, CREATE_KEY, DELETE_KEY, MERGE_KEY, UPDATE_KEY};
    use chrono::NaiveDate;
    use serde_json::json;
    use std::sync::Mutex;

    fn envelope(action: &str, object_type: &str, payload: serde_json::Value) -> WebhookEnvelope {
        WebhookEnvelope {
            action: Action::parse(action),
            object_type: object_type.to_string(),
            payload,
        }
    }

    /// Registers a recorder under each key, returning the shared log of seen keys.
    fn recorder(listeners: &mut Listeners, keys: &[&str]) -> Arc<Mutex<Vec<Notification>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        for key in keys {
            let seen = seen.clone();
            listeners.register(*key, move |n: &Notification| seen.lock().unwrap().push(n.clone()));
        }
        seen
    }

    #[test]
    fn test_created_emits_in_order() {
        let mut listeners = Listeners::new();
        let seen = recorder(&mut listeners, &[EVENT_KEY, CREATE_KEY, "lead_created"]);

        listeners.dispatch(&envelope("create", "lead", json!({"id": "lead_1", "date_": "2014-01-01"})));

        let seen = seen.lock().unwrap();
        let keys: Vec<&str> = seen.iter().map(|n| n.key.as_str()).collect();
        assert_eq!(keys, vec!["lead_created", CREATE_KEY, EVENT_KEY]);

        let instance = NativeValue::from(json!({"id": "lead_1", "date_": "2014-01-01"}));
        assert_eq!(
            seen[0].payload,
            NotificationPayload::Specific(ActionPayload::Instance {
                instance: instance.clone()
            })
        );
        assert_eq!(seen[1].model(), Some("lead"));
        assert_eq!(seen[1].instance(), Some(&instance));
        assert_eq!(
            seen[2].payload,
            NotificationPayload::Event {
                model: "lead".to_string(),
                event: "created".to_string(),
                instance: instance.clone(),
            }
        );

        // The payload is normalized before it reaches listeners
        assert_eq!(
            seen[2].instance().and_then(|i| i.get("date_")).and_then(NativeValue::as_date),
            NaiveDate::from_ymd_opt(2014, 1, 1)
        );
    }

    #[test]
    fn test_unknown_action_only_emits_catch_all() {
        let emitted = notifications(&envelope("testevent", "testmodel", json!({"data": 1})));

        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].key, EVENT_KEY);
        assert_eq!(
            emitted[0].payload,
            NotificationPayload::Event {
                model: "testmodel".to_string(),
                event: "testevent".to_string(),
                instance: NativeValue::from(json!({"data": 1})),
            }
        );
    }

    #[test]
    fn test_deleted_and_merged_payloads() {
        let deleted = notifications(&envelope("deleted", "contact", json!({"id": "cont_1", "name": "Ann"})));
        assert_eq!(deleted[0].key, "contact_deleted");
        assert_eq!(
            deleted[0].action_payload(),
            Some(&ActionPayload::Deleted {
                instance_id: "cont_1".into()
            })
        );
        assert_eq!(deleted[1].key, DELETE_KEY);
        // Catch-all keeps the full object
        assert_eq!(deleted[2].instance().and_then(|i| i.get_str("name")), Some("Ann"));

        let merged = notifications(&envelope("merge", "lead", json!({"source_id": "lead_a", "destination_id": "lead_b"})));
        let keys: Vec<&str> = merged.iter().map(|n| n.key.as_str()).collect();
        assert_eq!(keys, vec!["lead_merged", MERGE_KEY, EVENT_KEY]);
        assert_eq!(
            serde_json::to_value(&merged[1].payload).unwrap(),
            json!({"model": "lead", "source_id": "lead_a", "destination_id": "lead_b"})
        );
    }

    #[test]
    fn test_handlers_for_one_key_run_in_registration_order() {
        let mut listeners = Listeners::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            listeners.register(UPDATE_KEY, move |_: &Notification| order.lock().unwrap().push(n));
        }

        listeners.dispatch(&envelope("updated", "opportunity", json!({"id": "oppo_1"})));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_unregister() {
        let mut listeners = Listeners::new();
        let seen = Arc::new(Mutex::new(0));
        let counter = seen.clone();
        let id = listeners.register(EVENT_KEY, move |_: &Notification| *counter.lock().unwrap() += 1);

        assert_eq!(listeners.listener_count(EVENT_KEY), 1);
        assert!(listeners.unregister(id));
        assert!(!listeners.unregister(id));
        assert_eq!(listeners.listener_count(EVENT_KEY), 0);

        // Dispatch with nobody listening still reports what was emitted
        let emitted = listeners.dispatch(&envelope("created", "lead", json!({})));
        assert_eq!(emitted.len(), 3);
        assert_eq!(*seen.lock().unwrap(), 0);
    }
}
