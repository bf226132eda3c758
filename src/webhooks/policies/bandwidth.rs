//! Bandwidth validation policy.
//!
//! Validates:
//! - `spec.bandwidthPerMigration`, when set, is zero or positive
//!
//! Only the sign of the quantity is inspected, so values outside the
//! `i64` range are classified without converting them.

use super::{Cause, MUST_NOT_BE_NEGATIVE, ValidationContext, spec_path};

/// Validate the per-migration bandwidth cap
pub fn validate(ctx: &ValidationContext<'_>) -> Option<Cause> {
    let bandwidth = ctx.bandwidth?;

    if bandwidth.sign().is_negative() {
        return Some(Cause::invalid(
            &spec_path().child("bandwidthPerMigration"),
            MUST_NOT_BE_NEGATIVE,
        ));
    }

    None
}
