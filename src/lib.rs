//! migration-policy-webhook library crate
//!
//! This module exports the MigrationPolicy CRD, the admission logic, and the
//! servers that expose it.

pub mod cluster;
pub mod config;
pub mod crd;
pub mod health;
pub mod quantity;
pub mod webhooks;

pub use config::{ConfigError, WebhookConfig};
pub use health::HealthState;
pub use webhooks::{
    AdmitContext, Decision, MigrationPolicyAdmitter, ReviewRequest, VALIDATE_PATH, WebhookError,
    WebhookState, create_webhook_router, run_webhook_server,
};
