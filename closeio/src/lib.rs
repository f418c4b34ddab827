//! # closeio: Close CRM API adapter and webhook receiver
//!
//! `closeio` talks to the [Close](https://close.com) REST API and receives the webhooks Close
//! sends back. It covers the wire protocol between the two: value normalization, pagination,
//! error classification, and webhook verification and routing.
//!
//! ## Overview
//!
//! ### Outbound
//!
//! Every call goes through one pipeline in [`CloseIo::execute`]: the [`transport::Transport`]
//! sends the request, any failure is mapped onto the [`errors::Error`] taxonomy by
//! [`errors::classify`], and the response body is converted with [`value::to_native`] so
//! ISO-8601 strings arrive as chrono values. Collections are exposed as lazy streams by the
//! [`pagination`] module: offset paging for most resources, cursor paging for the event log.
//!
//! ### Inbound
//!
//! The webhook endpoint ([`api::handlers::webhooks`]) verifies the `close-sig-hash` signature
//! against per-subscription keys ([`webhooks::signing`]), normalizes the legacy and enveloped
//! payload shapes ([`webhooks::envelope`]), and hands the event to the [`webhooks::Listeners`]
//! registry, which emits a specific, a generic and a catch-all notification in that order.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use closeio::{Application, Config, webhooks::Listeners};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = closeio::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     closeio::telemetry::init_telemetry()?;
//!
//!     let mut listeners = Listeners::new();
//!     listeners.register("lead_created", |n| println!("new lead: {:?}", n.instance()));
//!
//!     Application::new(config, listeners)?
//!         .serve(async {
//!             tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!         })
//!         .await
//! }
//! ```
//!
//! Querying the API:
//!
//! ```no_run
//! use futures::TryStreamExt;
//! # async fn example(config: closeio::config::ApiConfig) -> anyhow::Result<()> {
//! let client = closeio::CloseIo::from_config(&config)?;
//! let leads: Vec<_> = client.get_leads(Some("status:Potential"), &["id", "display_name"]).try_collect().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod client;
pub mod config;
pub mod errors;
pub mod pagination;
pub mod telemetry;
pub mod transport;
pub mod value;
pub mod webhooks;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

#[cfg(test)]
mod test;

use axum::{Router, routing::post};
use bon::Builder;
pub use client::CloseIo;
pub use config::Config;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, info};

use crate::webhooks::{Listeners, SecretLookup, SignatureKeys};

/// State shared across request handlers.
///
/// - `config`: Application configuration loaded from file and environment
/// - `listeners`: Webhook listener registry, fixed once the server starts
/// - `signature_keys`: Key store for webhook verification; `None` skips verification
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .listeners(Arc::new(listeners))
///     .maybe_signature_keys(keys)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub listeners: Arc<Listeners>,
    pub signature_keys: Option<Arc<dyn SecretLookup>>,
}

/// Build the router: the webhook receiver on `config.webhooks.path`, plus request tracing.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(&state.config.webhooks.path, post(api::handlers::webhooks::receive_webhook))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

/// The webhook server.
///
/// # Lifecycle
///
/// 1. **Create**: [`Application::new`] wires configuration, key store and listeners into a router
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and handles deliveries until the
///    shutdown future resolves
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    /// Create an application that verifies signatures with the configured keys, if any.
    pub fn new(config: Config, listeners: Listeners) -> anyhow::Result<Self> {
        debug!("Starting webhook receiver with configuration: {:#?}", config);
        config.validate()?;

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

        Ok(Self::from_state(state))
    }

    /// Create an application from prepared state, e.g. with a custom [`SecretLookup`].
    pub fn from_state(state: AppState) -> Self {
        let config = state.config.clone();
        Self {
            router: build_router(state),
            config,
        }
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Webhook receiver listening on http://{}{}",
            bind_addr, self.config.webhooks.path
        );

        axum::serve(listener, self.router).with_graceful_shutdown(shutdown).await?;

        info!("Webhook receiver stopped");
        Ok(())
    }
}
