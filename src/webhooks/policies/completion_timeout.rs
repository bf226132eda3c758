//! Completion timeout validation policy.
//!
//! Validates:
//! - `spec.completionTimeoutPerGiB`, when set, is zero or positive

use super::{Cause, MUST_NOT_BE_NEGATIVE, ValidationContext, spec_path};

/// Validate the per-GiB completion timeout
pub fn validate(ctx: &ValidationContext<'_>) -> Option<Cause> {
    let timeout = ctx.policy.spec.completion_timeout_per_gib?;

    if timeout < 0 {
        return Some(Cause::invalid(
            &spec_path().child("completionTimeoutPerGiB"),
            MUST_NOT_BE_NEGATIVE,
        ));
    }

    None
}
