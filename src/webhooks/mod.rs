//! Webhook module for validating MigrationPolicy admission requests.
//!
//! - `admitter`: request → decision (resource check, decode, policies)
//! - `policies`: the individual field checks
//! - `server`: the HTTPS endpoint

pub mod admitter;
pub mod error;
pub mod field;
pub mod policies;
mod server;

pub use admitter::{AdmitContext, Decision, MigrationPolicyAdmitter, ReviewRequest};
pub use error::{AdmitError, ReviewError};
pub use policies::{Cause, CauseType, ValidationContext};
pub use server::{VALIDATE_PATH, WebhookError, WebhookState, create_webhook_router, run_webhook_server};

// Re-export kube-rs admission types for contract testing
pub use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
