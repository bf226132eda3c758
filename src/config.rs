//! Webhook configuration loaded from environment variables.

use std::time::Duration;

use thiserror::Error;

/// Default path to webhook TLS certificate
pub const WEBHOOK_CERT_PATH: &str = "/etc/webhook/certs/tls.crt";
/// Default path to webhook TLS private key
pub const WEBHOOK_KEY_PATH: &str = "/etc/webhook/certs/tls.key";
/// Default webhook server port
pub const WEBHOOK_PORT: u16 = 9443;
/// Default health server port
pub const HEALTH_PORT: u16 = 8080;
/// Default bound on the namespace lookup
pub const NAMESPACE_LOOKUP_TIMEOUT_SECS: u64 = 5;

/// Errors raised while reading configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime configuration of the webhook process
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebhookConfig {
    /// TLS admission port
    pub webhook_port: u16,
    /// PEM certificate path
    pub cert_path: String,
    /// PEM key path
    pub key_path: String,
    /// Probe and metrics port
    pub health_port: u16,
    /// Bound on the namespace lookup of a single review
    pub lookup_timeout: Duration,
    /// The cluster seccomp profile allows userfaultfd for every workload
    pub seccomp_allows_userfaultfd: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            webhook_port: WEBHOOK_PORT,
            cert_path: WEBHOOK_CERT_PATH.to_string(),
            key_path: WEBHOOK_KEY_PATH.to_string(),
            health_port: HEALTH_PORT,
            lookup_timeout: Duration::from_secs(NAMESPACE_LOOKUP_TIMEOUT_SECS),
            seccomp_allows_userfaultfd: false,
        }
    }
}

impl WebhookConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using `lookup` to resolve variable names; unset variables keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let timeout_secs = parse_or(
            &lookup,
            "NAMESPACE_LOOKUP_TIMEOUT_SECS",
            NAMESPACE_LOOKUP_TIMEOUT_SECS,
        )?;
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "NAMESPACE_LOOKUP_TIMEOUT_SECS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            webhook_port: parse_or(&lookup, "WEBHOOK_PORT", defaults.webhook_port)?,
            cert_path: lookup("WEBHOOK_CERT_PATH").unwrap_or(defaults.cert_path),
            key_path: lookup("WEBHOOK_KEY_PATH").unwrap_or(defaults.key_path),
            health_port: parse_or(&lookup, "HEALTH_PORT", defaults.health_port)?,
            lookup_timeout: Duration::from_secs(timeout_secs),
            seccomp_allows_userfaultfd: parse_or(
                &lookup,
                "PSA_SECCOMP_ALLOWS_USERFAULTFD",
                defaults.seccomp_allows_userfaultfd,
            )?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::Invalid {
                name,
                value: value.clone(),
                reason: e.to_string(),
            }),
    }
}
