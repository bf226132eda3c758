//! Validation policies for MigrationPolicy admission.
//!
//! Every policy runs on every review so the caller sees all problems at
//! once. Each contributes at most one cause, in this order:
//! - `completion_timeout`: `spec.completionTimeoutPerGiB` must not be negative
//! - `bandwidth`: `spec.bandwidthPerMigration` must not be negative
//! - `post_copy`: `spec.allowPostCopy` needs a privileged namespace or a
//!   cluster that allows userfaultfd everywhere
//!
//! Only `post_copy` touches the cluster, and only when post-copy is requested.

pub mod bandwidth;
pub mod completion_timeout;
pub mod post_copy;

use tokio::time::Instant;

use super::error::Result;
use super::field::FieldPath;
use crate::cluster::{ClusterCapabilities, NamespaceLookup};
use crate::crd::MigrationPolicy;
use crate::quantity::ParsedQuantity;

/// Message used for the numeric lower-bound checks
pub const MUST_NOT_BE_NEGATIVE: &str = "must not be negative";

/// Kind tag of a cause
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CauseType {
    /// The value of a field is not acceptable
    FieldValueInvalid,
}

impl CauseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CauseType::FieldValueInvalid => "FieldValueInvalid",
        }
    }
}

/// One field-scoped validation problem
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cause {
    pub cause_type: CauseType,
    pub message: String,
    pub field: String,
}

impl Cause {
    /// Create a `FieldValueInvalid` cause
    pub fn invalid(field: &FieldPath, message: &str) -> Self {
        Self {
            cause_type: CauseType::FieldValueInvalid,
            message: message.to_string(),
            field: field.to_string(),
        }
    }
}

/// Root of all field paths reported by the policies
pub fn spec_path() -> FieldPath {
    FieldPath::new("spec")
}

/// Context for validation
pub struct ValidationContext<'a> {
    /// The decoded policy under review
    pub policy: &'a MigrationPolicy,
    /// `spec.bandwidthPerMigration`, already parsed during decode
    pub bandwidth: Option<&'a ParsedQuantity>,
    /// Namespace the policy is being written to
    pub namespace: &'a str,
    /// Deadline for any cluster call made on behalf of this review
    pub deadline: Instant,
    /// Read-only namespace access
    pub namespaces: &'a dyn NamespaceLookup,
    /// Cluster-wide security capabilities
    pub capabilities: &'a dyn ClusterCapabilities,
}

/// Run all validation policies and collect their causes in order.
///
/// An infrastructure failure in any policy aborts the review.
pub async fn validate_all(ctx: &ValidationContext<'_>) -> Result<Vec<Cause>> {
    let mut causes = Vec::new();

    causes.extend(completion_timeout::validate(ctx));
    causes.extend(bandwidth::validate(ctx));
    causes.extend(post_copy::validate(ctx).await?);

    Ok(causes)
}
