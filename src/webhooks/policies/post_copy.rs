//! Post-copy privilege validation policy.
//!
//! Post-copy migration relies on userfaultfd, which the restricted and
//! baseline Pod Security levels do not permit. When a policy enables it:
//! - the target namespace is fetched (a failure aborts the review)
//! - the cause is added unless the cluster allows userfaultfd everywhere
//!   or the namespace enforces the `privileged` level

use k8s_openapi::api::core::v1::Namespace;
use tokio::time::Instant;
use tracing::debug;

use super::{Cause, ValidationContext, spec_path};
use crate::cluster::is_namespace_privileged;
use crate::webhooks::error::{AdmitError, Result};

/// Message reported when post-copy is requested for an unprivileged namespace
pub const POST_COPY_UNPRIVILEGED: &str = "PostCopy is not allowed if the namespace is unprivileged";

/// Validate that post-copy is only enabled where it can run
pub async fn validate(ctx: &ValidationContext<'_>) -> Result<Option<Cause>> {
    if !ctx.policy.spec.post_copy_requested() {
        return Ok(None);
    }

    let namespace = lookup_namespace(ctx).await?;

    let allowed_globally = ctx.capabilities.allows_privileged_post_copy_globally();
    let privileged = is_namespace_privileged(&namespace);
    debug!(
        namespace = %ctx.namespace,
        allowed_globally,
        privileged,
        "Evaluated post-copy permission"
    );

    if allowed_globally || privileged {
        return Ok(None);
    }

    Ok(Some(Cause::invalid(
        &spec_path().child("allowPostCopy"),
        POST_COPY_UNPRIVILEGED,
    )))
}

/// Fetch the target namespace within the review deadline.
///
/// An already expired deadline fails without calling the lookup.
async fn lookup_namespace(ctx: &ValidationContext<'_>) -> Result<Namespace> {
    if Instant::now() >= ctx.deadline {
        return Err(AdmitError::DeadlineExceeded(ctx.namespace.to_string()));
    }

    match tokio::time::timeout_at(ctx.deadline, ctx.namespaces.get_namespace(ctx.namespace)).await
    {
        Ok(Ok(namespace)) => Ok(namespace),
        Ok(Err(source)) => Err(AdmitError::NamespaceLookup {
            namespace: ctx.namespace.to_string(),
            source,
        }),
        Err(_) => Err(AdmitError::DeadlineExceeded(ctx.namespace.to_string())),
    }
}
