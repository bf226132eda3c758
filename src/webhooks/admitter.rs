//! MigrationPolicy admitter.
//!
//! Turns one admission request into one [`Decision`]:
//! 1. the request must target `migrations.kubevirt.io/migrationpolicies`
//! 2. the object must decode into a [`MigrationPolicy`]
//! 3. every policy in [`super::policies`] runs and causes are collected
//!
//! Steps 1 and 2, and any namespace lookup failure in step 3, yield an
//! error decision. Causes from step 3 yield a denial.

use std::sync::Arc;
use std::time::Duration;

use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::response::{StatusCause, StatusDetails};
use kube::core::{DynamicObject, GroupVersionResource};
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use super::error::{AdmitError, Result, ReviewError};
use super::policies::{Cause, ValidationContext, validate_all};
use crate::cluster::{ClusterCapabilities, NamespaceLookup};
use crate::crd::{MIGRATION_POLICY_GROUP, MIGRATION_POLICY_RESOURCE, MigrationPolicy};
use crate::quantity::ParsedQuantity;

/// Status reason attached to denials
pub const REASON_INVALID: &str = "Invalid";
/// HTTP-style status code attached to denials
pub const CODE_UNPROCESSABLE_ENTITY: u16 = 422;
/// HTTP-style status code attached to error decisions
pub const CODE_BAD_REQUEST: u16 = 400;

/// Per-request context supplied by the caller
#[derive(Clone, Copy, Debug)]
pub struct AdmitContext {
    deadline: Instant,
}

impl AdmitContext {
    /// Context whose deadline is `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
        }
    }

    /// Context with an explicit deadline
    pub fn with_deadline(deadline: Instant) -> Self {
        Self { deadline }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

/// Outcome of an admission review
#[derive(Debug)]
pub enum Decision {
    /// The policy is accepted
    Allowed,
    /// The policy content is invalid; causes are in check order
    Denied(Vec<Cause>),
    /// The review could not be carried out
    Errored(AdmitError),
}

impl Decision {
    /// Label used for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Allowed => "allowed",
            Decision::Denied(_) => "denied",
            Decision::Errored(_) => "errored",
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    /// Fill in an admission response built from the request.
    ///
    /// Denials carry every cause under `status.details.causes` and the
    /// joined messages in `status.message`. Errors carry only a message.
    pub fn into_response(self, response: AdmissionResponse) -> AdmissionResponse {
        match self {
            Decision::Allowed => response,
            Decision::Denied(causes) => {
                let message = causes
                    .iter()
                    .map(|cause| cause.message.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut response = response.deny(message);
                response.result.reason = REASON_INVALID.to_string();
                response.result.code = CODE_UNPROCESSABLE_ENTITY;
                response.result.details = Some(StatusDetails {
                    name: String::new(),
                    group: String::new(),
                    kind: String::new(),
                    uid: String::new(),
                    causes: causes.into_iter().map(StatusCause::from).collect(),
                    retry_after_seconds: 0,
                });
                response
            }
            Decision::Errored(error) => {
                let mut response = response.deny(error.to_string());
                response.result.code = CODE_BAD_REQUEST;
                response
            }
        }
    }
}

impl From<Cause> for StatusCause {
    fn from(cause: Cause) -> Self {
        StatusCause {
            reason: cause.cause_type.as_str().to_string(),
            message: cause.message,
            field: cause.field,
        }
    }
}

/// An admission request whose object is still undecoded JSON.
///
/// The envelope is parsed on its own so a malformed object still yields a
/// response that echoes the request uid.
#[derive(Clone, Debug)]
pub struct ReviewRequest {
    /// The request with `object` and `oldObject` stripped
    pub request: AdmissionRequest<DynamicObject>,
    /// The object under review, exactly as sent
    pub object: Option<Value>,
}

impl ReviewRequest {
    /// Parse an `AdmissionReview` body
    pub fn from_slice(body: &[u8]) -> std::result::Result<Self, ReviewError> {
        Self::from_value(serde_json::from_slice(body)?)
    }

    /// Split an `AdmissionReview` value into envelope and raw object
    pub fn from_value(mut review: Value) -> std::result::Result<Self, ReviewError> {
        let object = review
            .pointer_mut("/request/object")
            .map(Value::take)
            .filter(|object| !object.is_null());
        if let Some(old_object) = review.pointer_mut("/request/oldObject") {
            *old_object = Value::Null;
        }

        let review: AdmissionReview<DynamicObject> = serde_json::from_value(review)?;
        Ok(Self {
            request: review.try_into()?,
            object,
        })
    }
}

/// A decoded policy together with its parsed bandwidth
#[derive(Debug)]
pub struct DecodedPolicy {
    pub policy: MigrationPolicy,
    pub bandwidth: Option<ParsedQuantity>,
}

/// Validates MigrationPolicy writes
#[derive(Clone)]
pub struct MigrationPolicyAdmitter {
    namespaces: Arc<dyn NamespaceLookup>,
    capabilities: Arc<dyn ClusterCapabilities>,
}

impl MigrationPolicyAdmitter {
    /// Create an admitter from its collaborators
    pub fn new(
        namespaces: Arc<dyn NamespaceLookup>,
        capabilities: Arc<dyn ClusterCapabilities>,
    ) -> Self {
        Self {
            namespaces,
            capabilities,
        }
    }

    /// Review a request and decide
    pub async fn admit(&self, review: &ReviewRequest, ctx: &AdmitContext) -> Decision {
        match self.collect_causes(review, ctx).await {
            Ok(causes) if causes.is_empty() => Decision::Allowed,
            Ok(causes) => Decision::Denied(causes),
            Err(error) => Decision::Errored(error),
        }
    }

    /// Review a request and build the matching response
    pub async fn review(&self, review: &ReviewRequest, ctx: &AdmitContext) -> AdmissionResponse {
        self.admit(review, ctx)
            .await
            .into_response(AdmissionResponse::from(&review.request))
    }

    async fn collect_causes(
        &self,
        review: &ReviewRequest,
        ctx: &AdmitContext,
    ) -> Result<Vec<Cause>> {
        let request = &review.request;
        check_resource(&request.resource)?;

        let object = review.object.as_ref().ok_or(AdmitError::MissingObject)?;
        let decoded = decode(object)?;

        let namespace = decoded
            .policy
            .metadata
            .namespace
            .as_deref()
            .or(request.namespace.as_deref())
            .unwrap_or_default();
        debug!(
            uid = %request.uid,
            namespace = %namespace,
            "Decoded MigrationPolicy"
        );

        let validation = ValidationContext {
            policy: &decoded.policy,
            bandwidth: decoded.bandwidth.as_ref(),
            namespace,
            deadline: ctx.deadline,
            namespaces: self.namespaces.as_ref(),
            capabilities: self.capabilities.as_ref(),
        };

        validate_all(&validation).await
    }
}

/// Ensure the request targets MigrationPolicy
pub fn check_resource(resource: &GroupVersionResource) -> Result<()> {
    if resource.group != MIGRATION_POLICY_GROUP || resource.resource != MIGRATION_POLICY_RESOURCE {
        return Err(AdmitError::UnexpectedResource {
            group: resource.group.clone(),
            version: resource.version.clone(),
            resource: resource.resource.clone(),
        });
    }
    Ok(())
}

/// Decode the reviewed object into a MigrationPolicy.
///
/// A missing or null `spec` decodes as an empty one. A numeric
/// `bandwidthPerMigration` (allowed by the int-or-string schema) is read as
/// its decimal string form.
pub fn decode(object: &Value) -> Result<DecodedPolicy> {
    let mut value = object.clone();
    if let Some(fields) = value.as_object_mut() {
        let spec = fields.entry("spec").or_insert(Value::Null);
        if spec.is_null() {
            *spec = Value::Object(Default::default());
        }
    }
    if let Some(field) = value.pointer_mut("/spec/bandwidthPerMigration") {
        if field.is_number() {
            *field = Value::String(field.to_string());
        }
    }

    let policy: MigrationPolicy = serde_json::from_value(value)?;
    let bandwidth = policy
        .spec
        .bandwidth_per_migration
        .as_ref()
        .map(|quantity| ParsedQuantity::parse(&quantity.0))
        .transpose()?;

    Ok(DecodedPolicy { policy, bandwidth })
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::cluster::{InMemoryNamespaces, SeccompCapabilities, psa};
    use serde_json::json;

    fn admitter(allowed_globally: bool) -> MigrationPolicyAdmitter {
        let namespaces = InMemoryNamespaces::new()
            .with_namespace("privileged-ns", [(psa::ENFORCE_LABEL, "privileged")])
            .with_namespace("restricted-ns", [(psa::ENFORCE_LABEL, "restricted")]);
        MigrationPolicyAdmitter::new(
            Arc::new(namespaces),
            Arc::new(SeccompCapabilities::new(allowed_globally)),
        )
    }

    fn request(group: &str, resource: &str, object: Option<Value>) -> ReviewRequest {
        ReviewRequest::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": group, "version": "v1alpha1", "kind": "MigrationPolicy"},
                "resource": {"group": group, "version": "v1alpha1", "resource": resource},
                "name": "policy",
                "namespace": "restricted-ns",
                "operation": "CREATE",
                "userInfo": {"username": "admin"},
                "object": object,
                "oldObject": null,
                "dryRun": false
            }
        }))
        .unwrap()
    }

    fn policy_request(spec: Value) -> ReviewRequest {
        request(
            MIGRATION_POLICY_GROUP,
            MIGRATION_POLICY_RESOURCE,
            Some(json!({
                "apiVersion": "migrations.kubevirt.io/v1alpha1",
                "kind": "MigrationPolicy",
                "metadata": {"name": "policy"},
                "spec": spec
            })),
        )
    }

    fn ctx() -> AdmitContext {
        AdmitContext::with_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_valid_policy_allowed() {
        let req = policy_request(json!({
            "completionTimeoutPerGiB": 150,
            "bandwidthPerMigration": "500Mi",
            "allowPostCopy": false,
            "allowAutoConverge": true
        }));
        let decision = admitter(false).admit(&req, &ctx()).await;
        assert!(decision.is_allowed(), "{decision:?}");
    }

    #[tokio::test]
    async fn test_negative_timeout_denied() {
        let req = policy_request(json!({"completionTimeoutPerGiB": -1}));
        let Decision::Denied(causes) = admitter(false).admit(&req, &ctx()).await else {
            panic!("expected denial");
        };
        assert_eq!(causes.len(), 1);
        assert_eq!(causes[0].field, "spec.completionTimeoutPerGiB");
    }

    #[tokio::test]
    async fn test_negative_bandwidth_denied() {
        for bandwidth in [json!("-100Mi"), json!("-0.5"), json!(-5)] {
            let req = policy_request(json!({"bandwidthPerMigration": bandwidth}));
            let Decision::Denied(causes) = admitter(false).admit(&req, &ctx()).await else {
                panic!("expected denial for {bandwidth}");
            };
            assert_eq!(causes.len(), 1);
            assert_eq!(causes[0].field, "spec.bandwidthPerMigration");
        }
    }

    #[tokio::test]
    async fn test_numeric_bandwidth_allowed() {
        let req = policy_request(json!({"bandwidthPerMigration": 1048576}));
        assert!(admitter(false).admit(&req, &ctx()).await.is_allowed());
    }

    #[tokio::test]
    async fn test_post_copy_in_request_namespace() {
        let req = policy_request(json!({"allowPostCopy": true}));
        let Decision::Denied(causes) = admitter(false).admit(&req, &ctx()).await else {
            panic!("expected denial");
        };
        assert_eq!(causes[0].field, "spec.allowPostCopy");

        assert!(admitter(true).admit(&req, &ctx()).await.is_allowed());
    }

    #[tokio::test]
    async fn test_metadata_namespace_takes_precedence() {
        let req = request(
            MIGRATION_POLICY_GROUP,
            MIGRATION_POLICY_RESOURCE,
            Some(json!({
                "apiVersion": "migrations.kubevirt.io/v1alpha1",
                "kind": "MigrationPolicy",
                "metadata": {"name": "policy", "namespace": "privileged-ns"},
                "spec": {"allowPostCopy": true}
            })),
        );
        assert!(admitter(false).admit(&req, &ctx()).await.is_allowed());
    }

    #[tokio::test]
    async fn test_unexpected_resource_errors() {
        let req = request("kubevirt.io", "virtualmachines", None);
        let decision = admitter(false).admit(&req, &ctx()).await;
        let Decision::Errored(error) = decision else {
            panic!("expected error");
        };
        assert_eq!(
            error.to_string(),
            "unexpected resource kubevirt.io/v1alpha1/virtualmachines"
        );

        // group matches, resource does not
        let req = request(MIGRATION_POLICY_GROUP, "migrations", None);
        assert!(matches!(
            admitter(false).admit(&req, &ctx()).await,
            Decision::Errored(AdmitError::UnexpectedResource { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_object_errors() {
        let req = request(MIGRATION_POLICY_GROUP, MIGRATION_POLICY_RESOURCE, None);
        assert!(matches!(
            admitter(false).admit(&req, &ctx()).await,
            Decision::Errored(AdmitError::MissingObject)
        ));
    }

    #[tokio::test]
    async fn test_undecodable_object_errors() {
        let req = policy_request(json!({"completionTimeoutPerGiB": "soon"}));
        assert!(matches!(
            admitter(false).admit(&req, &ctx()).await,
            Decision::Errored(AdmitError::Decode(_))
        ));

        let req = policy_request(json!({"bandwidthPerMigration": "fast"}));
        assert!(matches!(
            admitter(false).admit(&req, &ctx()).await,
            Decision::Errored(AdmitError::InvalidQuantity(_))
        ));
    }

    #[tokio::test]
    async fn test_denied_response_shape() {
        let req = policy_request(json!({
            "completionTimeoutPerGiB": -1,
            "bandwidthPerMigration": "-1Gi"
        }));
        let response = admitter(false).review(&req, &ctx()).await;
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["allowed"], json!(false));
        assert_eq!(value["uid"], json!("705ab4f5-6393-11e8-b7cc-42010a800002"));
        assert_eq!(
            value["status"]["message"],
            json!("must not be negative, must not be negative")
        );
        assert_eq!(value["status"]["reason"], json!("Invalid"));
        assert_eq!(value["status"]["code"], json!(422));
        assert_eq!(
            value["status"]["details"]["causes"],
            json!([
                {
                    "reason": "FieldValueInvalid",
                    "message": "must not be negative",
                    "field": "spec.completionTimeoutPerGiB"
                },
                {
                    "reason": "FieldValueInvalid",
                    "message": "must not be negative",
                    "field": "spec.bandwidthPerMigration"
                }
            ])
        );
    }

    #[tokio::test]
    async fn test_error_response_shape() {
        let req = request("kubevirt.io", "virtualmachines", None);
        let response = admitter(false).review(&req, &ctx()).await;
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["allowed"], json!(false));
        assert_eq!(value["status"]["code"], json!(400));
        assert!(value["status"]["details"].is_null());
    }

    #[tokio::test]
    async fn test_allowed_response_shape() {
        let req = policy_request(json!({}));
        let response = admitter(false).review(&req, &ctx()).await;
        assert!(response.allowed);
    }

    #[tokio::test]
    async fn test_missing_or_null_spec_allowed() {
        for object in [
            json!({
                "apiVersion": "migrations.kubevirt.io/v1alpha1",
                "kind": "MigrationPolicy",
                "metadata": {"name": "policy"}
            }),
            json!({
                "apiVersion": "migrations.kubevirt.io/v1alpha1",
                "kind": "MigrationPolicy",
                "metadata": {"name": "policy"},
                "spec": null
            }),
        ] {
            let req = request(MIGRATION_POLICY_GROUP, MIGRATION_POLICY_RESOURCE, Some(object));
            let decision = admitter(false).admit(&req, &ctx()).await;
            assert!(decision.is_allowed(), "{decision:?}");
        }
    }

    #[tokio::test]
    async fn test_malformed_object_is_decode_error() {
        for object in [
            json!("garbage"),
            json!({"metadata": {"name": 5}, "spec": {}}),
        ] {
            let req = request(MIGRATION_POLICY_GROUP, MIGRATION_POLICY_RESOURCE, Some(object));
            assert_eq!(req.request.uid, "705ab4f5-6393-11e8-b7cc-42010a800002");

            let response = admitter(false).review(&req, &ctx()).await;
            assert!(!response.allowed);
            assert_eq!(response.uid, "705ab4f5-6393-11e8-b7cc-42010a800002");
            assert_eq!(response.result.code, CODE_BAD_REQUEST);
            assert!(
                response
                    .result
                    .message
                    .starts_with("failed to decode MigrationPolicy")
            );
        }
    }

    #[test]
    fn test_review_envelope_errors() {
        assert!(matches!(
            ReviewRequest::from_slice(b"{not json"),
            Err(ReviewError::Parse(_))
        ));
        let no_request = json!({"apiVersion": "admission.k8s.io/v1", "kind": "AdmissionReview"});
        assert!(matches!(
            ReviewRequest::from_value(no_request),
            Err(ReviewError::Convert(_))
        ));
    }

    #[test]
    fn test_decision_labels() {
        assert_eq!(Decision::Allowed.label(), "allowed");
        assert_eq!(Decision::Denied(vec![]).label(), "denied");
        assert_eq!(
            Decision::Errored(AdmitError::MissingObject).label(),
            "errored"
        );
    }
}
