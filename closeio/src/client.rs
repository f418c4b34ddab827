//! Close API client.
//!
//! [`CloseIo`] is a thin layer over a [`Transport`]: every call runs through
//! [`CloseIo::execute`], which sends the request, classifies any failure and converts the
//! response to [`NativeValue`]. Collections come back as lazy streams.

use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use serde_json::Value;
use tracing::instrument;

use crate::config::ApiConfig;
use crate::errors::{Error, Result, classify};
use crate::pagination::{self, CursorParams, OffsetParams};
use crate::transport::{ApiRequest, HttpTransport, Transport};
use crate::value::{NativeValue, to_native, to_native_stream, to_wire};

/// A lazily paged collection of API objects.
pub type Items = BoxStream<'static, Result<NativeValue>>;

/// Filters sent as query parameters alongside paging parameters.
pub type Filters<'a> = &'a [(&'a str, NativeValue)];

#[derive(Clone)]
pub struct CloseIo {
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for CloseIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloseIo").finish_non_exhaustive()
    }
}

impl CloseIo {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Client backed by the reqwest transport.
    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(HttpTransport::new(config)?)))
    }

    /// Send a request through the pipeline: transport, then classification, then conversion.
    #[instrument(skip_all, fields(method = %request.method, path = %request.path))]
    pub async fn execute(&self, request: ApiRequest) -> Result<NativeValue> {
        self.transport.send(request).await.map(to_native).map_err(classify)
    }

    pub async fn get(&self, path: &str, filters: Filters<'_>) -> Result<NativeValue> {
        self.execute(ApiRequest::get(path).with_query(query_pairs(filters))).await
    }

    pub async fn post(&self, path: &str, body: &NativeValue) -> Result<NativeValue> {
        self.execute(ApiRequest::post(path, to_wire(body))).await
    }

    pub async fn put(&self, path: &str, body: &NativeValue) -> Result<NativeValue> {
        self.execute(ApiRequest::put(path, to_wire(body))).await
    }

    pub async fn delete(&self, path: &str) -> Result<NativeValue> {
        self.execute(ApiRequest::delete(path)).await
    }

    /// Every object of an offset-paged resource. `_skip` and `_limit` filters are ignored.
    pub fn paginate(&self, path: &str, filters: Filters<'_>) -> Items {
        let transport = self.transport.clone();
        let path = path.to_string();
        let filters = without_keys(query_pairs(filters), &["_skip", "_limit"]);

        let pages = pagination::paginate(move |params: OffsetParams| {
            let request = ApiRequest::get(path.clone())
                .with_query(filters.clone())
                .with_query(params.query());
            send_raw(transport.clone(), request)
        });
        to_native_stream(pages).boxed()
    }

    /// Every object of a cursor-paged resource. `_cursor` and `_limit` filters are ignored.
    pub fn paginate_via_cursor(&self, path: &str, filters: Filters<'_>) -> Items {
        let transport = self.transport.clone();
        let path = path.to_string();
        let filters = without_keys(query_pairs(filters), &["_cursor", "_limit"]);

        let pages = pagination::paginate_via_cursor(move |params: CursorParams| {
            let request = ApiRequest::get(path.clone())
                .with_query(filters.clone())
                .with_query(params.query());
            send_raw(transport.clone(), request)
        });
        to_native_stream(pages).boxed()
    }

    /// The user the API key belongs to.
    pub async fn me(&self) -> Result<NativeValue> {
        self.get("me/", &[]).await
    }

    pub async fn get_lead(&self, lead_id: &str) -> Result<NativeValue> {
        self.get(&format!("lead/{lead_id}/"), &[]).await
    }

    pub async fn create_lead(&self, fields: &NativeValue) -> Result<NativeValue> {
        self.post("lead/", fields).await
    }

    pub async fn update_lead(&self, lead_id: &str, fields: &NativeValue) -> Result<NativeValue> {
        self.put(&format!("lead/{lead_id}/"), fields).await
    }

    pub async fn delete_lead(&self, lead_id: &str) -> Result<NativeValue> {
        self.delete(&format!("lead/{lead_id}/")).await
    }

    /// Leads matching a search `query`, restricted to `fields` when non-empty.
    pub fn get_leads(&self, query: Option<&str>, fields: &[&str]) -> Items {
        let mut filters = Vec::new();
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            filters.push(("query", NativeValue::from(query)));
        }
        if !fields.is_empty() {
            filters.push(("_fields", NativeValue::from(fields.join(","))));
        }
        self.paginate("lead/", &filters)
    }

    pub fn get_opportunities(&self, filters: Filters<'_>) -> Items {
        self.paginate("opportunity/", filters)
    }

    /// Tasks, newest first unless `_order_by` is given.
    pub fn get_tasks(&self, filters: Filters<'_>) -> Items {
        let mut filters = filters.to_vec();
        if !filters.iter().any(|(key, _)| *key == "_order_by") {
            filters.push(("_order_by", NativeValue::from("-date_created")));
        }
        self.paginate("task/", &filters)
    }

    /// Create a task on a lead. `due_date` is sent as an ISO date, or `null` when absent.
    pub async fn create_task(
        &self,
        lead_id: &str,
        assigned_to: &str,
        text: &str,
        due_date: Option<NativeValue>,
        is_complete: bool,
    ) -> Result<NativeValue> {
        let body = NativeValue::Object(
            [
                ("lead_id", NativeValue::from(lead_id)),
                ("assigned_to", NativeValue::from(assigned_to)),
                ("text", NativeValue::from(text)),
                ("due_date", due_date.unwrap_or(NativeValue::Null)),
                ("is_complete", NativeValue::from(is_complete)),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
        );
        self.post("task/", &body).await
    }

    /// Activities, restricted to `fields` when non-empty.
    pub fn get_activities(&self, filters: Filters<'_>, fields: &[&str]) -> Items {
        let mut filters = filters.to_vec();
        if !fields.is_empty() {
            filters.push(("_fields", NativeValue::from(fields.join(","))));
        }
        self.paginate("activity/", &filters)
    }

    /// The organization's event log, paged by cursor.
    pub fn get_event_logs(&self, filters: Filters<'_>) -> Items {
        self.paginate_via_cursor("event/", filters)
    }

    pub fn get_lead_statuses(&self) -> Items {
        self.paginate("status/lead/", &[])
    }

    /// The lead status whose label is exactly `label`.
    pub async fn find_lead_status(&self, label: &str) -> Result<NativeValue> {
        let mut statuses = self.get_lead_statuses();
        while let Some(status) = statuses.try_next().await? {
            if status.get_str("label") == Some(label) {
                return Ok(status);
            }
        }

        Err(Error::Api {
            message: format!("Lead-Status with label \"{label}\" could not be found!"),
            context: None,
        })
    }
}

async fn send_raw(transport: Arc<dyn Transport>, request: ApiRequest) -> Result<Value> {
    transport.send(request).await.map_err(classify)
}

/// Render filters as query pairs. Booleans become `true`/`false`, temporal values ISO-8601.
/// `Null` filters are left out.
fn query_pairs(filters: Filters<'_>) -> Vec<(String, String)> {
    filters
        .iter()
        .filter_map(|(key, value)| {
            let text = match to_wire(value) {
                Value::Null => return None,
                Value::String(s) => s,
                other => other.to_string(),
            };
            Some((key.to_string(), text))
        })
        .collect()
}

fn without_keys(mut pairs: Vec<(String, String)>, keys: &[&str]) -> Vec<(String, String)> {
    pairs.retain(|(key, _)| !keys.contains(&key.as_str()));
    pairs
}
