//! MigrationPolicy Custom Resource Definition.
//!
//! A MigrationPolicy describes the constraints and permissions applied to
//! live migrations of the virtual machines it selects: per-GiB completion
//! budget, bandwidth cap, and which transfer modes are allowed.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group of the MigrationPolicy resource
pub const MIGRATION_POLICY_GROUP: &str = "migrations.kubevirt.io";

/// Plural resource name used in admission requests
pub const MIGRATION_POLICY_RESOURCE: &str = "migrationpolicies";

/// MigrationPolicy is a cluster-scoped custom resource selecting VMIs by label.
///
/// Example:
/// ```yaml
/// apiVersion: migrations.kubevirt.io/v1alpha1
/// kind: MigrationPolicy
/// metadata:
///   name: fast-lane
/// spec:
///   bandwidthPerMigration: 500Mi
///   completionTimeoutPerGiB: 150
///   allowPostCopy: false
///   selectors:
///     namespaceSelector:
///       tier: gold
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "migrations.kubevirt.io",
    version = "v1alpha1",
    kind = "MigrationPolicy",
    plural = "migrationpolicies",
    status = "MigrationPolicyStatus",
    printcolumn = r#"{"name":"Bandwidth", "type":"string", "jsonPath":".spec.bandwidthPerMigration"}"#,
    printcolumn = r#"{"name":"PostCopy", "type":"boolean", "jsonPath":".spec.allowPostCopy"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPolicySpec {
    /// Allow the hypervisor to throttle guest vCPUs so a busy VM converges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_auto_converge: Option<bool>,

    /// Bandwidth cap for each migration (e.g. "64Mi"). Zero means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth_per_migration: Option<Quantity>,

    /// Seconds allowed per GiB of migrated memory before the migration is aborted.
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "completionTimeoutPerGiB")]
    pub completion_timeout_per_gib: Option<i64>,

    /// Allow switching to post-copy once pre-copy fails to converge.
    /// Requires userfaultfd, which unprivileged namespaces cannot use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_post_copy: Option<bool>,

    /// Allow pausing the workload when the migration would otherwise time out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_workload_disruption: Option<bool>,

    /// Label selectors deciding which VMIs this policy applies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selectors: Option<Selectors>,
}

/// Label selectors of a MigrationPolicy.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Selectors {
    /// Labels the VMI's namespace must carry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<BTreeMap<String, String>>,

    /// Labels the VMI itself must carry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_machine_instance_selector: Option<BTreeMap<String, String>>,
}

/// Status of a MigrationPolicy. Currently carries no fields.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct MigrationPolicyStatus {}

impl MigrationPolicySpec {
    /// Whether post-copy is explicitly enabled
    pub fn post_copy_requested(&self) -> bool {
        self.allow_post_copy == Some(true)
    }
}
