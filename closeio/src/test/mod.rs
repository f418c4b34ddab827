//! End-to-end tests through the full router.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use chrono::NaiveDate;
use serde_json::json;

use crate::{
    AppState, Application, Config,
    value::NativeValue,
    webhooks::{ActionPayload, Listeners, Notification, NotificationPayload, SecretLookup, sign_payload},
};

const KEY: &str = "b9260244ef33625f9b4b26a27db08758cdd39478b852c73f2d33ab042eb8abb4";
const SUBSCRIPTION: &str = "whsub_mBTylJxRXaBOXcuQmgUdmL";

type Seen = Arc<Mutex<Vec<Notification>>>;

fn record(listeners: &mut Listeners, key: &str) -> Seen {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    listeners.register(key, move |n: &Notification| recorder.lock().unwrap().push(n.clone()));
    seen
}

fn record_all(listeners: &mut Listeners, keys: &[&str]) -> Arc<Mutex<Vec<String>>> {
    let order = Arc::new(Mutex::new(Vec::new()));
    for key in keys {
        let recorder = order.clone();
        listeners.register(*key, move |n: &Notification| recorder.lock().unwrap().push(n.key.clone()));
    }
    order
}

#[test_log::test(tokio::test)]
async fn test_lead_created_emits_notifications_in_order() {
    let mut listeners = Listeners::new();
    let order = record_all(&mut listeners, &["closeio_event", "closeio_create", "lead_created"]);
    let specific = record(&mut listeners, "lead_created");
    let server = Application::new(Config::default(), listeners).unwrap().into_test_server();

    let response = server
        .post("/webhooks/closeio")
        .json(&json!({
            "event": {
                "action": "created",
                "object_type": "lead",
                "data": {"id": "lead_1", "date_created": "2019-05-13T12:46:36.123456+00:00", "next_call": "2019-05-20"}
            }
        }))
        .await;

    response.assert_status_ok();
    assert_eq!(*order.lock().unwrap(), vec!["lead_created", "closeio_create", "closeio_event"]);

    let seen = specific.lock().unwrap();
    let instance = seen[0].instance().unwrap();
    assert!(instance.get("date_created").and_then(NativeValue::as_datetime).is_some());
    assert_eq!(
        instance.get("next_call").and_then(NativeValue::as_date),
        NaiveDate::from_ymd_opt(2019, 5, 20)
    );
}

#[test_log::test(tokio::test)]
async fn test_legacy_delete_carries_instance_id() {
    let mut listeners = Listeners::new();
    let generic = record(&mut listeners, "closeio_delete");
    let server = Application::new(Config::default(), listeners).unwrap().into_test_server();

    server
        .post("/webhooks/closeio")
        .json(&json!({"event": "delete", "model": "opportunity", "data": {"id": "oppo_1"}}))
        .await
        .assert_status_ok();

    let seen = generic.lock().unwrap();
    assert_eq!(seen.len(), 1);
    match &seen[0].payload {
        NotificationPayload::Generic {
            model,
            payload: ActionPayload::Deleted { instance_id },
        } => {
            assert_eq!(model, "opportunity");
            assert_eq!(instance_id.as_str(), Some("oppo_1"));
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[test_log::test(tokio::test)]
async fn test_unknown_action_only_emits_catch_all() {
    let mut listeners = Listeners::new();
    let order = record_all(&mut listeners, &["closeio_event", "lead_completed"]);
    let server = Application::new(Config::default(), listeners).unwrap().into_test_server();

    server
        .post("/webhooks/closeio")
        .json(&json!({"event": {"action": "completed", "object_type": "lead", "data": {"id": "lead_1"}}}))
        .await
        .assert_status_ok();

    assert_eq!(*order.lock().unwrap(), vec!["closeio_event"]);
}

#[test_log::test(tokio::test)]
async fn test_custom_path_and_non_json_body() {
    let mut config = Config::default();
    config.webhooks.path = "/hooks/close".to_string();
    let mut listeners = Listeners::new();
    let order = record_all(&mut listeners, &["closeio_event"]);
    let server = Application::new(config, listeners).unwrap().into_test_server();

    server
        .post("/webhooks/closeio")
        .json(&json!({"event": "create", "model": "lead", "data": {}}))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    server
        .post("/hooks/close")
        .text("not json")
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    server
        .post("/hooks/close")
        .json(&json!({"model": "lead", "data": {}}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    assert!(order.lock().unwrap().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_signed_delivery_with_custom_key_store() {
    let mut config = Config::default();
    config.webhooks.enforce_signatures = true;

    let mut listeners = Listeners::new();
    let order = record_all(&mut listeners, &["closeio_event"]);

    let keys: HashMap<String, String> = HashMap::from([(SUBSCRIPTION.to_string(), KEY.to_string())]);
    let state = AppState::builder()
        .config(config)
        .listeners(Arc::new(listeners))
        .signature_keys(Arc::new(keys) as Arc<dyn SecretLookup>)
        .build();
    let server = Application::from_state(state).into_test_server();

    let body = json!({
        "subscription_id": SUBSCRIPTION,
        "event": {"action": "updated", "object_type": "contact", "data": {"id": "cont_1"}}
    })
    .to_string();
    let hash = sign_payload("1557751596", body.as_bytes(), KEY).unwrap();

    server
        .post("/webhooks/closeio")
        .add_header("close-sig-hash", hash)
        .add_header("close-sig-timestamp", "1557751596")
        .text(body.clone())
        .await
        .assert_status_ok();

    server
        .post("/webhooks/closeio")
        .add_header("close-sig-timestamp", "1557751596")
        .text(body)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    assert_eq!(*order.lock().unwrap(), vec!["closeio_event"]);
}
