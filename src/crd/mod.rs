//! Custom Resource Definitions (CRDs) reviewed by the webhook.
//!
//! - `MigrationPolicy`: constraints and permissions for live VM migration

mod migration_policy;

pub use migration_policy::*;
