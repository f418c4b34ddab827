//! Domain error taxonomy and the transport failure classifier.
//!
//! Everything that crosses the transport boundary is funnelled through [`classify`], so callers
//! only ever observe [`Error`], never a raw reqwest or HTTP failure.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error as ThisError;
use tracing::Level;

use crate::transport::TransportFailure;

/// Throttle metadata returned by the Close API alongside a 429.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    /// e.g. "API call count exceeded for this 30 second window"
    pub message: String,
    /// Seconds remaining before this enforcement window ends.
    pub rate_reset: f64,
    /// Request limit enforced for this endpoint.
    pub rate_limit: f64,
    /// Number of seconds in the enforcement window.
    pub rate_window: f64,
    pub rate_limit_type: String,
}

/// The request a failure belongs to. Kept for diagnostics, never part of the message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub url: String,
    pub body: Option<String>,
}

impl std::fmt::Display for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "url: {}\nbody: {}", self.url, self.body.as_deref().unwrap_or(""))
    }
}

#[derive(ThisError, Debug)]
pub enum Error {
    /// The API rejected a request, or the request never completed
    #[error("{message}")]
    Api { message: String, context: Option<RequestContext> },

    /// The API throttled the caller; back off for `rate_reset` seconds
    #[error("{}", .0.message)]
    RateLimit(RateLimitInfo),

    /// A page or envelope did not have the expected shape
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Secret store or subscription key is unusable
    #[error("Improperly configured: {message}")]
    Configuration { message: String },

    /// Inbound webhook payload lacks required fields
    #[error("Malformed webhook: {message}")]
    MalformedWebhook { message: String },

    /// Webhook signature did not verify and the endpoint enforces signatures
    #[error("Webhook signature could not be verified")]
    InvalidSignature,

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol { message: message.into() }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration { message: message.into() }
    }

    pub fn malformed_webhook(message: impl Into<String>) -> Self {
        Error::MalformedWebhook { message: message.into() }
    }

    /// Request URL and body of the failed call, when the transport reported them.
    pub fn context(&self) -> Option<&RequestContext> {
        match self {
            Error::Api { context, .. } => context.as_ref(),
            _ => None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Api { .. } => StatusCode::BAD_GATEWAY,
            Error::RateLimit(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::Protocol { .. } => StatusCode::BAD_GATEWAY,
            Error::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::MalformedWebhook { .. } => StatusCode::BAD_REQUEST,
            Error::InvalidSignature => StatusCode::UNAUTHORIZED,
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Severity this error is logged at when it becomes an HTTP response.
    pub fn log_level(&self) -> Level {
        match self {
            Error::Configuration { .. } | Error::Other(_) => Level::ERROR,
            Error::Api { .. } | Error::RateLimit(_) | Error::Protocol { .. } | Error::MalformedWebhook { .. } => {
                Level::WARN
            }
            Error::InvalidSignature => Level::INFO,
        }
    }

    /// Returns a user-safe error message, without leaking configuration details
    pub fn user_message(&self) -> String {
        match self {
            Error::Configuration { .. } | Error::Other(_) => "Internal server error".to_string(),
            Error::InvalidSignature => "Invalid webhook signature".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let level = self.log_level();
        if level == Level::ERROR {
            tracing::error!("Internal service error: {:#}", self);
        } else if level == Level::WARN {
            tracing::warn!("Request failed: {}", self);
        } else {
            tracing::info!("Authorization error: {}", self);
        }

        (self.status_code(), self.user_message()).into_response()
    }
}

/// Type alias for adapter operation results
pub type Result<T> = std::result::Result<T, Error>;

/// Map a transport failure onto the domain taxonomy.
///
/// Rules, first match wins: structured rate-limit payload, JSON body `error` field, raw body
/// text, the failure's own message.
pub fn classify(failure: TransportFailure) -> Error {
    let TransportFailure {
        message,
        status,
        body,
        request,
    } = failure;

    let parsed = body.as_deref().and_then(|b| serde_json::from_str::<Value>(b).ok());

    if let Some(info) = parsed.as_ref().and_then(rate_limit_info) {
        tracing::debug!(status = ?status, rate_reset = info.rate_reset, "Classified rate limit response");
        return Error::RateLimit(info);
    }

    let message = match (parsed.as_ref().and_then(|v| v.get("error")), body) {
        (Some(Value::String(error)), _) => error.clone(),
        (Some(error), _) => error.to_string(),
        (None, Some(body)) => body,
        (None, None) => message,
    };

    Error::Api {
        message,
        context: request,
    }
}

/// Rate limit fields live under `error` in Close responses; accept them at the top level too.
fn rate_limit_info(body: &Value) -> Option<RateLimitInfo> {
    let candidate = match body.get("error") {
        Some(error @ Value::Object(_)) => error,
        _ => body,
    };

    let has_all_fields = ["message", "rate_reset", "rate_limit", "rate_window", "rate_limit_type"]
        .iter()
        .all(|field| candidate.get(field).is_some());
    if !has_all_fields {
        return None;
    }

    serde_json::from_value(candidate.clone()).ok()
}
