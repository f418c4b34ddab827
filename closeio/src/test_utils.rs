//! Test utilities (available with `test-utils` feature).
//!
//! [`MemoryTransport`] stands in for the Close API: it keeps objects in named collections,
//! serves offset and cursor pages over them, and records every request it receives.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::errors::RequestContext;
use crate::pagination::{CURSOR_PAGE_LIMIT, OFFSET_PAGE_LIMIT};
use crate::transport::{ApiRequest, Method, Transport, TransportFailure};

const CURSOR_PREFIX: &str = "cur_";

#[derive(Debug, Default)]
struct MemoryState {
    /// Collection path (without trailing slash) → objects in insertion order
    collections: BTreeMap<String, Vec<Value>>,
    /// Fixed responses for non-collection paths such as `me`
    resources: BTreeMap<String, Value>,
    failures: VecDeque<TransportFailure>,
    requests: Vec<ApiRequest>,
    next_id: u64,
}

impl MemoryState {
    fn generate_id(&mut self, collection: &str) -> String {
        self.next_id += 1;
        let prefix = collection.rsplit('/').next().unwrap_or(collection);
        format!("{prefix}_mem{}", self.next_id)
    }

    fn find(&self, collection: &str, id: &str) -> Option<usize> {
        self.collections
            .get(collection)?
            .iter()
            .position(|obj| obj.get("id").and_then(Value::as_str) == Some(id))
    }
}

/// In-memory [`Transport`] for exercising the client without a network.
#[derive(Debug)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// An empty store whose `me/` resource describes a test user.
    pub fn new() -> Self {
        let transport = Self {
            state: Mutex::new(MemoryState::default()),
        };
        transport.set_resource(
            "me",
            json!({"id": "user_memory", "email": "test@example.com", "organizations": []}),
        );
        transport
    }

    /// Add an object to a collection, assigning an id if it has none. Returns the id.
    pub fn insert(&self, collection: &str, mut object: Value) -> String {
        let mut state = self.state.lock().unwrap();
        let collection = collection.trim_matches('/').to_string();
        let id = match object.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                let id = state.generate_id(&collection);
                if let Some(fields) = object.as_object_mut() {
                    fields.insert("id".to_string(), Value::String(id.clone()));
                }
                id
            }
        };
        state.collections.entry(collection).or_default().push(object);
        id
    }

    /// Serve `value` for GET requests to `path`.
    pub fn set_resource(&self, path: &str, value: Value) {
        let mut state = self.state.lock().unwrap();
        state.resources.insert(path.trim_matches('/').to_string(), value);
    }

    /// Make the next request fail with `failure` instead of touching the store.
    pub fn fail_next(&self, failure: TransportFailure) {
        self.state.lock().unwrap().failures.push_back(failure);
    }

    /// Objects currently stored in `collection`.
    pub fn objects(&self, collection: &str) -> Vec<Value> {
        let state = self.state.lock().unwrap();
        state
            .collections
            .get(collection.trim_matches('/'))
            .cloned()
            .unwrap_or_default()
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    fn handle(state: &mut MemoryState, request: &ApiRequest) -> Result<Value, TransportFailure> {
        let path = request.path.trim_matches('/');

        if request.method == Method::Get
            && let Some(resource) = state.resources.get(path)
        {
            return Ok(resource.clone());
        }

        // A path naming a known collection, or a single segment, addresses a collection.
        // Anything else is `{collection}/{id}`.
        let is_collection = state.collections.contains_key(path) || !path.contains('/');
        if is_collection {
            return match request.method {
                Method::Get if request.query_param("_cursor").is_some() => cursor_page(state, path, request),
                Method::Get => Ok(offset_page(state, path, request)),
                Method::Post => {
                    let mut object = body_object(request)?;
                    let id = state.generate_id(path);
                    object.insert("id".to_string(), Value::String(id));
                    let object = Value::Object(object);
                    state.collections.entry(path.to_string()).or_default().push(object.clone());
                    Ok(object)
                }
                Method::Put | Method::Delete => Err(failure(405, "Method not allowed on a collection")),
            };
        }

        let (collection, id) = path.rsplit_once('/').unwrap_or(("", path));
        let Some(index) = state.find(collection, id) else {
            return Err(failure(404, &format!("Object {id} not found in {collection}")));
        };
        let objects = state.collections.entry(collection.to_string()).or_default();

        match request.method {
            Method::Get => Ok(objects[index].clone()),
            Method::Put => {
                let changes = body_object(request)?;
                if let Some(fields) = objects[index].as_object_mut() {
                    fields.extend(changes);
                }
                Ok(objects[index].clone())
            }
            Method::Delete => {
                objects.remove(index);
                Ok(json!({}))
            }
            Method::Post => Err(failure(405, "Method not allowed on an object")),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, request: ApiRequest) -> Result<Value, TransportFailure> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());

        let result = match state.failures.pop_front() {
            Some(failure) => Err(failure),
            None => Self::handle(&mut state, &request),
        };

        result.map_err(|mut failure| {
            failure.request.get_or_insert_with(|| echo(&request));
            failure
        })
    }
}

fn offset_page(state: &MemoryState, collection: &str, request: &ApiRequest) -> Value {
    let skip = parse_param(request, "_skip").unwrap_or(0);
    let limit = parse_param(request, "_limit").unwrap_or(OFFSET_PAGE_LIMIT);
    let objects = state.collections.get(collection).map(Vec::as_slice).unwrap_or_default();

    let data: Vec<Value> = objects.iter().skip(skip).take(limit).cloned().collect();
    json!({"data": data, "has_more": skip + limit < objects.len()})
}

fn cursor_page(state: &MemoryState, collection: &str, request: &ApiRequest) -> Result<Value, TransportFailure> {
    let cursor = request.query_param("_cursor").unwrap_or_default();
    let start = if cursor.is_empty() {
        0
    } else {
        cursor
            .strip_prefix(CURSOR_PREFIX)
            .and_then(|n| n.parse::<usize>().ok())
            .ok_or_else(|| failure(400, "Invalid _cursor"))?
    };
    let limit = parse_param(request, "_limit").unwrap_or(CURSOR_PAGE_LIMIT);
    let objects = state.collections.get(collection).map(Vec::as_slice).unwrap_or_default();

    let end = (start + limit).min(objects.len());
    let data = objects.get(start..end).unwrap_or_default().to_vec();
    let cursor_next = if end < objects.len() {
        format!("{CURSOR_PREFIX}{end}")
    } else {
        String::new()
    };
    Ok(json!({"data": data, "cursor_next": cursor_next}))
}

fn parse_param(request: &ApiRequest, key: &str) -> Option<usize> {
    request.query_param(key).and_then(|v| v.parse().ok())
}

fn body_object(request: &ApiRequest) -> Result<Map<String, Value>, TransportFailure> {
    match &request.body {
        Some(Value::Object(fields)) => Ok(fields.clone()),
        _ => Err(failure(400, "Request body must be a JSON object")),
    }
}

fn failure(status: u16, message: &str) -> TransportFailure {
    TransportFailure::http(status, json!({"error": message}).to_string())
}

fn echo(request: &ApiRequest) -> RequestContext {
    let query: Vec<String> = request.query.iter().map(|(k, v)| format!("{k}={v}")).collect();
    let url = if query.is_empty() {
        format!("memory:///{}", request.path)
    } else {
        format!("memory:///{}?{}", request.path, query.join("&"))
    };
    RequestContext {
        url,
        body: request.body.as_ref().map(Value::to_string),
    }
}
