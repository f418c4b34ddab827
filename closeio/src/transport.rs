//! The outbound HTTP capability the adapter runs on top of.
//!
//! [`Transport`] is deliberately small: send one request, get back a parsed JSON body or a
//! [`TransportFailure`] carrying whatever the failure exposed (status, body, request echo).
//! [`HttpTransport`] is the reqwest implementation used against the real API.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::ApiConfig;
use crate::errors::RequestContext;

/// HTTP verb of an [`ApiRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// One call against the API, relative to the transport's base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Resource path such as `lead/` or `lead/lead_123/`
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_query<K, V>(mut self, query: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.query.extend(query.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Last value for `key` in the query string.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

/// A failed call as seen by the transport, before classification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportFailure {
    /// The transport's own description of the failure
    pub message: String,
    pub status: Option<u16>,
    /// Raw response body, when a response was received
    pub body: Option<String>,
    pub request: Option<RequestContext>,
}

impl TransportFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// A failure carrying an HTTP status and response body.
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        Self {
            message: format!("HTTP status {status}"),
            status: Some(status),
            body: Some(body.into()),
            request: None,
        }
    }
}

/// Sends requests to the Close API.
///
/// Implementations own authentication, TLS, timeouts and connection-level retries; the
/// adapter never retries on its own.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<Value, TransportFailure>;
}

/// The reqwest implementation of [`Transport`].
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    api_key: String,
    max_retries: u32,
}

impl HttpTransport {
    pub fn new(config: &ApiConfig) -> anyhow::Result<Self> {
        install_crypto_provider();
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            base_url: ensure_slash(&config.base_url),
            api_key: config.api_key.clone().unwrap_or_default(),
            max_retries: config.max_retries,
        })
    }

    fn url_for(&self, request: &ApiRequest) -> Result<Url, TransportFailure> {
        let mut url = self
            .base_url
            .join(request.path.trim_start_matches('/'))
            .map_err(|e| TransportFailure::new(format!("Failed to construct URL for {}: {}", request.path, e)))?;

        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }
        Ok(url)
    }
}

/// Install the process-wide rustls provider reqwest is built against. Safe to call repeatedly.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Makes sure a url has a trailing slash, so `join` appends instead of replacing the last segment.
fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let mut path = new_url.path().to_string();
        path.push('/');
        new_url.set_path(&path);
        new_url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip_all, fields(method = %request.method, path = %request.path))]
    async fn send(&self, request: ApiRequest) -> Result<Value, TransportFailure> {
        let url = self.url_for(&request)?;
        let echo = RequestContext {
            url: url.to_string(),
            body: request.body.as_ref().map(Value::to_string),
        };

        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut attempt = 0;
        let response = loop {
            let mut builder = self
                .client
                .request(method.clone(), url.clone())
                .basic_auth(&self.api_key, Some(""));
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            match builder.send().await {
                Ok(response) => break response,
                Err(e) if e.is_connect() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(attempt, max_retries = self.max_retries, "Connection to Close API failed, retrying: {}", e);
                }
                Err(e) => {
                    return Err(TransportFailure {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                        body: None,
                        request: Some(echo),
                    });
                }
            }
        };

        let status = response.status();
        let text = response.text().await.map_err(|e| TransportFailure {
            message: format!("Failed to read response body: {e}"),
            status: Some(status.as_u16()),
            body: None,
            request: Some(echo.clone()),
        })?;

        debug!(status = status.as_u16(), bytes = text.len(), "Close API responded");

        if !status.is_success() {
            return Err(TransportFailure {
                message: format!("HTTP status {status}"),
                status: Some(status.as_u16()),
                body: Some(text),
                request: Some(echo),
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&text).map_err(|e| TransportFailure {
            message: format!("Response body is not valid JSON: {e}"),
            status: Some(status.as_u16()),
            body: Some(text),
            request: Some(echo),
        })
    }
}
