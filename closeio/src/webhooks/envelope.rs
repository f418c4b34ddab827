//! Normalization of the two inbound webhook shapes.
//!
//! Legacy deliveries put the action at the top level:
//!
//! ```json
//! {"event": "create", "model": "lead", "data": {"id": "lead_1"}}
//! ```
//!
//! Current deliveries wrap everything in an `event` object:
//!
//! ```json
//! {"subscription_id": "whsub_1", "event": {"action": "created", "object_type": "lead", "data": {"id": "lead_1"}}}
//! ```

use serde_json::{Map, Value};

use crate::errors::{Error, Result};
use crate::webhooks::events::Action;

/// An inbound event reduced to action, object type and payload.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEnvelope {
    pub action: Action,
    pub object_type: String,
    /// The changed object, still in wire form
    pub payload: Value,
}

impl WebhookEnvelope {
    pub fn normalize(body: &Value) -> Result<Self> {
        normalize(body)
    }
}

/// Detect the shape of `body` and extract its action, object type and payload.
pub fn normalize(body: &Value) -> Result<WebhookEnvelope> {
    let Value::Object(root) = body else {
        return Err(Error::malformed_webhook("body must be a JSON object"));
    };

    match root.get("event") {
        Some(Value::String(action)) => Ok(WebhookEnvelope {
            action: Action::parse(action),
            object_type: required_str(root, "model")?,
            payload: required(root, "data")?,
        }),
        Some(Value::Object(event)) => Ok(WebhookEnvelope {
            action: Action::parse(&required_str(event, "action")?),
            object_type: required_str(event, "object_type")?,
            payload: required(event, "data")?,
        }),
        Some(_) => Err(Error::malformed_webhook("`event` must be a string or an object")),
        None => Err(Error::malformed_webhook("missing `event`")),
    }
}

fn required(map: &Map<String, Value>, key: &str) -> Result<Value> {
    map.get(key)
        .cloned()
        .ok_or_else(|| Error::malformed_webhook(format!("missing `{key}`")))
}

fn required_str(map: &Map<String, Value>, key: &str) -> Result<String> {
    match map.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(Error::malformed_webhook(format!("`{key}` must be a string"))),
        None => Err(Error::malformed_webhook(format!("missing `{key}`"))),
    }
}
