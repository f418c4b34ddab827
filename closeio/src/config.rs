//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `CLOSEIO_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `CLOSEIO_` override YAML values
//! 3. **CLOSEIO_WEBHOOK_SIGNATURE_KEYS** - Special case: overrides `webhooks.signature_keys` if set
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `CLOSEIO_API__MAX_RETRIES=3` sets the `api.max_retries` field.
//!
//! ## Signature keys
//!
//! Each webhook subscription has its own signing key. Keys are provided as a JSON object mapping
//! subscription IDs to hex-encoded keys, exactly as returned when the subscription was created:
//!
//! ```bash
//! CLOSEIO_WEBHOOK_SIGNATURE_KEYS='{"whsub_1": "b9260244ef33...", "whsub_2": "0f1e2d..."}'
//! ```
//!
//! The value is kept as raw text and only parsed when a webhook arrives, so a malformed value
//! surfaces as a configuration error on the request that needed it.

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::errors::Error;

/// Environment variable holding the subscription → signature key mapping.
pub const SIGNATURE_KEYS_ENV: &str = "CLOSEIO_WEBHOOK_SIGNATURE_KEYS";

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "CLOSEIO_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Outbound Close API settings
    pub api: ApiConfig,
    /// Inbound webhook endpoint settings
    pub webhooks: WebhooksConfig,
}

/// Settings for the outbound HTTP transport.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiConfig {
    /// Base URL of the Close REST API
    pub base_url: Url,
    /// API key, sent as the basic auth username
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Retries for requests that fail to connect (default: 5)
    pub max_retries: u32,
    /// Per-request timeout (default: 30s)
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("https://app.close.io/api/v1/").expect("default base URL is valid"),
            api_key: None,
            max_retries: 5,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Settings for the inbound webhook endpoint.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebhooksConfig {
    /// Route the webhook handler is mounted on (default: `/webhooks/closeio`)
    pub path: String,
    /// Raw JSON object mapping subscription IDs to hex signature keys. When unset, signatures
    /// are not checked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_keys: Option<String>,
    /// Reject deliveries whose signature does not verify, instead of logging and delivering them
    pub enforce_signatures: bool,
}

// Secrets are printed as `<redacted>` so the config can be logged at startup.
fn redacted(secret: &Option<String>) -> Option<&'static str> {
    secret.as_ref().map(|_| "<redacted>")
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &redacted(&self.api_key))
            .field("max_retries", &self.max_retries)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl std::fmt::Debug for WebhooksConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhooksConfig")
            .field("path", &self.path)
            .field("signature_keys", &redacted(&self.signature_keys))
            .field("enforce_signatures", &self.enforce_signatures)
            .finish()
    }
}

impl Default for WebhooksConfig {
    fn default() -> Self {
        Self {
            path: "/webhooks/closeio".to_string(),
            signature_keys: None,
            enforce_signatures: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            api: ApiConfig::default(),
            webhooks: WebhooksConfig::default(),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        // The signature key mapping keeps the name it has always had
        if let Ok(keys) = std::env::var(SIGNATURE_KEYS_ENV) {
            config.webhooks.signature_keys = Some(keys);
        }

        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("CLOSEIO_").split("__").ignore(&["CONFIG", "WEBHOOK_SIGNATURE_KEYS"]))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<(), Error> {
        if !self.webhooks.path.starts_with('/') {
            return Err(Error::configuration(format!(
                "Config validation: webhooks.path must start with '/', got '{}'",
                self.webhooks.path
            )));
        }

        if self.webhooks.enforce_signatures && self.webhooks.signature_keys.is_none() {
            return Err(Error::configuration(format!(
                "Config validation: webhooks.enforce_signatures is enabled but no signature keys are configured. \
                 Set {SIGNATURE_KEYS_ENV} or webhooks.signature_keys."
            )));
        }

        if self.api.timeout.is_zero() {
            return Err(Error::configuration("Config validation: api.timeout must be greater than zero"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn args(path: &str) -> Args {
        Args {
            config: path.to_string(),
            validate: false,
        }
    }

    #[test]
    fn test_defaults_without_file() {
        Jail::expect_with(|_jail| {
            let config = Config::load(&args("missing.yaml"))?;

            assert_eq!(config.port, 3001);
            assert_eq!(config.api.base_url.as_str(), "https://app.close.io/api/v1/");
            assert_eq!(config.api.max_retries, 5);
            assert_eq!(config.api.timeout, Duration::from_secs(30));
            assert_eq!(config.webhooks.path, "/webhooks/closeio");
            assert!(config.webhooks.signature_keys.is_none());
            assert!(!config.webhooks.enforce_signatures);

            Ok(())
        });
    }

    #[test]
    fn test_yaml_values() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
port: 9000
api:
  api_key: api_abc
  max_retries: 2
  timeout: 10s
webhooks:
  path: /hooks/close
"#,
            )?;

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.port, 9000);
            assert_eq!(config.api.api_key.as_deref(), Some("api_abc"));
            assert_eq!(config.api.max_retries, 2);
            assert_eq!(config.api.timeout, Duration::from_secs(10));
            assert_eq!(config.webhooks.path, "/hooks/close");

            Ok(())
        });
    }

    #[test]
    fn test_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
host: 0.0.0.0
api:
  max_retries: 2
"#,
            )?;

            jail.set_env("CLOSEIO_HOST", "127.0.0.1");
            jail.set_env("CLOSEIO_API__MAX_RETRIES", "7");

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.host, "127.0.0.1");
            assert_eq!(config.api.max_retries, 7);

            Ok(())
        });
    }

    #[test]
    fn test_signature_keys_env_var() {
        Jail::expect_with(|jail| {
            jail.set_env(SIGNATURE_KEYS_ENV, r#"{"whsub_1": "abcd"}"#);

            let config = Config::load(&args("missing.yaml"))?;
            assert_eq!(config.webhooks.signature_keys.as_deref(), Some(r#"{"whsub_1": "abcd"}"#));

            Ok(())
        });
    }

    #[test]
    fn test_unknown_field_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "webhooks:\n  secret: nope\n")?;

            assert!(Config::load(&args("test.yaml")).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_validation_enforce_without_keys() {
        let mut config = Config::default();
        config.webhooks.enforce_signatures = true;

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("no signature keys are configured"));

        config.webhooks.signature_keys = Some("{}".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_relative_path() {
        let mut config = Config::default();
        config.webhooks.path = "webhooks".to_string();

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("must start with '/'"));
    }

    #[test]
    fn test_debug_output_redacts_secrets() {
        let mut config = Config::default();
        config.api.api_key = Some("api_6Ppv3sJ1lUQNK".to_string());
        config.webhooks.signature_keys = Some(r#"{"whsub_1": "b9260244ef33625f"}"#.to_string());

        let printed = format!("{config:#?}");
        assert!(!printed.contains("api_6Ppv3sJ1lUQNK"));
        assert!(!printed.contains("b9260244ef33625f"));
        assert!(printed.contains("<redacted>"));
        assert!(printed.contains("/webhooks/closeio"));
    }
}
