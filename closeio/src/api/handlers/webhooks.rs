//! HTTP handler for inbound Close webhook deliveries.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
};
use bytes::Bytes;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::{
    AppState,
    errors::{Error, Result},
    webhooks::{SignatureHeaders, WebhookEnvelope, signing},
};

/// Receive one webhook delivery.
///
/// When signature keys are configured the delivery is verified first. A delivery that fails
/// verification is logged and still dispatched, unless `webhooks.enforce_signatures` is set.
///
/// Responds 200 with an empty body once every listener has run, 400 when the body is not JSON
/// or lacks the envelope fields, 401 for an unverified delivery under enforcement, and 500 when
/// the signature keys are misconfigured.
#[instrument(skip_all)]
pub async fn receive_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<StatusCode> {
    if let Some(keys) = &state.signature_keys {
        let signature = SignatureHeaders::from_headers(&headers);
        if !signing::verify(&body, &signature, keys.as_ref())? {
            warn!(
                has_hash = signature.hash.is_some(),
                has_timestamp = signature.timestamp.is_some(),
                "Close webhook signature could not be verified"
            );
            if state.config.webhooks.enforce_signatures {
                return Err(Error::InvalidSignature);
            }
        }
    }

    let payload: Value =
        serde_json::from_slice(&body).map_err(|e| Error::malformed_webhook(format!("body is not valid JSON: {e}")))?;
    let envelope = WebhookEnvelope::normalize(&payload)?;

    let emitted = state.listeners.dispatch(&envelope);
    info!(
        object_type = %envelope.object_type,
        action = %envelope.action,
        notifications = emitted.len(),
        "Close webhook delivered"
    );

    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Config,
        webhooks::{Listeners, Notification, SecretLookup, SignatureKeys, sign_payload},
    };
    use axum::{Router, routing::post};
    use axum_test::TestServer;
    use std::sync::{Arc, Mutex};

    const KEY: &str = "b9260244ef33625f9b4b26a27db08758cdd39478b852c73f2d33ab042eb8abb4";

    fn server(config: Config, listeners: Listeners) -> TestServer {
        let signature_keys = config
            .webhooks
            .signature_keys
            .clone()
            .map(|raw| Arc::new(SignatureKeys::new(Some(raw))) as Arc<dyn SecretLookup>);
        let state = AppState::builder()
            .config(config)
            .listeners(Arc::new(listeners))
            .maybe_signature_keys(signature_keys)
            .build();

        let router = Router::new().route("/hook", post(receive_webhook)).with_state(state);
        TestServer::new(router).unwrap()
    }

    fn recording_listeners() -> (Listeners, Arc<Mutex<Vec<String>>>) {
        let mut listeners = Listeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        listeners.register("closeio_event", move |n: &Notification| {
            recorder.lock().unwrap().push(n.key.clone())
        });
        (listeners, seen)
    }

    fn enforcing_config() -> Config {
        let mut config = Config::default();
        config.webhooks.signature_keys = Some(serde_json::json!({"whsub_1": KEY}).to_string());
        config.webhooks.enforce_signatures = true;
        config
    }

    #[test_log::test(tokio::test)]
    async fn test_unsigned_delivery_without_keys_is_dispatched() {
        let (listeners, seen) = recording_listeners();
        let server = server(Config::default(), listeners);

        let response = server
            .post("/hook")
            .json(&serde_json::json!({"event": "create", "model": "lead", "data": {"id": "lead_1"}}))
            .await;

        response.assert_status_ok();
        assert_eq!(response.text(), "");
        assert_eq!(*seen.lock().unwrap(), vec!["closeio_event".to_string()]);
    }

    #[test_log::test(tokio::test)]
    async fn test_invalid_json_is_bad_request() {
        let (listeners, seen) = recording_listeners();
        let server = server(Config::default(), listeners);

        let response = server.post("/hook").text("asdf").await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_enforced_signature_accepts_valid_delivery() {
        let (listeners, seen) = recording_listeners();
        let server = server(enforcing_config(), listeners);

        let body = r#"{"subscription_id": "whsub_1", "event": {"action": "updated", "object_type": "lead", "data": {"id": "lead_1"}}}"#;
        let hash = sign_payload("1700000000", body.as_bytes(), KEY).unwrap();

        let response = server
            .post("/hook")
            .add_header("close-sig-hash", hash)
            .add_header("close-sig-timestamp", "1700000000")
            .text(body)
            .await;

        response.assert_status_ok();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_enforced_signature_rejects_forged_delivery() {
        let (listeners, seen) = recording_listeners();
        let server = server(enforcing_config(), listeners);

        let response = server
            .post("/hook")
            .add_header("close-sig-hash", "0".repeat(64))
            .add_header("close-sig-timestamp", "1700000000")
            .json(&serde_json::json!({"subscription_id": "whsub_1", "event": "create", "model": "lead", "data": {}}))
            .await;

        response.assert_status(StatusCode::UNAUTHORIZED);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_misconfigured_keys_are_server_error() {
        let (listeners, _seen) = recording_listeners();
        let mut config = Config::default();
        config.webhooks.signature_keys = Some("[1, 2, 3]".to_string());
        let server = server(config, listeners);

        let response = server
            .post("/hook")
            .json(&serde_json::json!({"subscription_id": "whsub_1", "event": "create", "model": "lead", "data": {}}))
            .await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.text(), "Internal server error");
    }
}
