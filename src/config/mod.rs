//! Client configuration.
//!
//! `Config` holds the retry, pool and stream settings of a wrapper client.
//! `Settings` adds the target address and TLS material and can be loaded
//! from YAML files or environment variables.

mod duration_ms;

use std::time::Duration;

use serde::Deserialize;
use tonic::transport::{Certificate, ClientTlsConfig};

use crate::error::WrapperError;
use crate::transport::DialOptions;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "grpc-wrapper.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "GRPC_WRAPPER_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "GRPC_WRAPPER";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "GRPC_WRAPPER_LOG";

/// Retry, pool and stream settings.
///
/// Every field except `interruptible_backoff` is required: nothing is
/// defaulted, and [`Config::validate`] rejects values the client cannot run
/// with.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    /// Timeout for each dial, at construction and on stream reconnect.
    #[serde(rename = "dial_timeout_ms", with = "duration_ms")]
    pub dial_timeout: Duration,
    /// Fresh deadline given to every short call attempt.
    #[serde(rename = "call_timeout_ms", with = "duration_ms")]
    pub call_timeout: Duration,
    /// Retries after the first attempt (`max_retries + 1` attempts total).
    pub max_retries: u32,
    /// Multiplier applied to the short call backoff after each retry.
    pub backoff_factor: f64,
    /// Number of pooled short call connections.
    pub pool_size: usize,
    /// Reconnects allowed for the managed stream.
    pub stream_retry: u32,
    /// Fixed delay before each stream reconnect.
    #[serde(rename = "stream_backoff_ms", with = "duration_ms")]
    pub stream_backoff: Duration,
    /// Let caller cancellation cut a short call backoff sleep short.
    #[serde(default)]
    pub interruptible_backoff: bool,
}

impl Config {
    /// Check the settings before any connection is dialed.
    pub fn validate(&self) -> Result<(), WrapperError> {
        if self.pool_size == 0 {
            return Err(WrapperError::InvalidConfig(
                "pool_size must be at least 1".to_string(),
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(WrapperError::InvalidConfig(format!(
                "backoff_factor must be a finite value >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        Ok(())
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self {
            dial_timeout: Duration::from_secs(1),
            call_timeout: Duration::from_secs(1),
            max_retries: 2,
            backoff_factor: 2.0,
            pool_size: 3,
            stream_retry: 2,
            stream_backoff: Duration::from_millis(50),
            interruptible_backoff: false,
        }
    }
}

/// TLS material for the dial options.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// PEM file with the CA certificate that signed the server certificate.
    pub ca_cert_path: Option<String>,
    /// Domain name to verify the server certificate against.
    pub domain_name: Option<String>,
}

impl TlsSettings {
    /// Build a tonic TLS config, reading the CA certificate if one is set.
    pub fn to_tls_config(&self) -> std::io::Result<ClientTlsConfig> {
        let mut tls = ClientTlsConfig::new();
        if let Some(path) = &self.ca_cert_path {
            let pem = std::fs::read(path)?;
            tls = tls.ca_certificate(Certificate::from_pem(pem));
        }
        if let Some(domain) = &self.domain_name {
            tls = tls.domain_name(domain.clone());
        }
        Ok(tls)
    }
}

/// Full client settings: target, client config and TLS.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Server address (`host:port`, URI or Unix socket path).
    pub address: String,
    /// Client configuration.
    pub client: Config,
    /// TLS settings. `None` dials plaintext.
    #[serde(default)]
    pub tls: Option<TlsSettings>,
}

impl Settings {
    /// Load settings from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `DEFAULT_CONFIG_FILE` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.client.validate()?;
        Ok(settings)
    }

    /// Dial options derived from these settings.
    pub fn dial_options(&self) -> std::io::Result<DialOptions> {
        let mut options = DialOptions::default();
        if let Some(tls) = &self.tls {
            options = options.with_tls(tls.to_tls_config()?);
        }
        Ok(options)
    }
}
