// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Unit tests for migration-policy-webhook.
//!
//! These tests run without a Kubernetes cluster. Namespaces come from an
//! in-memory lookup and reviews travel through the real axum router.

#[allow(dead_code)]
#[path = "../common/fixtures.rs"]
mod fixtures;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use fixtures::{MigrationPolicyBuilder, REVIEW_UID, review_json};
use migration_policy_webhook::cluster::{InMemoryNamespaces, SeccompCapabilities, psa};
use migration_policy_webhook::{
    HealthState, MigrationPolicyAdmitter, VALIDATE_PATH, WebhookState, create_webhook_router,
};

fn namespaces() -> InMemoryNamespaces {
    InMemoryNamespaces::new()
        .with_namespace("virt-privileged", [(psa::ENFORCE_LABEL, "privileged")])
        .with_namespace("virt-baseline", [(psa::ENFORCE_LABEL, "baseline")])
        .with_namespace("unlabelled", std::iter::empty::<(&str, &str)>())
}

fn admitter(allows_userfaultfd: bool) -> MigrationPolicyAdmitter {
    MigrationPolicyAdmitter::new(
        Arc::new(namespaces()),
        Arc::new(SeccompCapabilities::new(allows_userfaultfd)),
    )
}

fn webhook_state(allows_userfaultfd: bool, health: Option<Arc<HealthState>>) -> Arc<WebhookState> {
    Arc::new(WebhookState::new(
        admitter(allows_userfaultfd),
        Duration::from_secs(2),
        health,
    ))
}

async fn post_raw(state: Arc<WebhookState>, body: Vec<u8>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(VALIDATE_PATH)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();

    let response = create_webhook_router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn post(state: Arc<WebhookState>, review: Value) -> (StatusCode, Value) {
    post_raw(state, serde_json::to_vec(&review).unwrap()).await
}

mod routing_tests {
    use super::*;

    #[tokio::test]
    async fn test_valid_policy_allowed() {
        let review = MigrationPolicyBuilder::new("fast-lane")
            .bandwidth("500Mi")
            .completion_timeout(150)
            .allow_auto_converge(true)
            .select_namespace("tier", "gold")
            .review("virt-baseline");

        let (status, body) = post(webhook_state(false, None), review).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["apiVersion"], json!("admission.k8s.io/v1"));
        assert_eq!(body["kind"], json!("AdmissionReview"));
        assert_eq!(body["response"]["uid"], json!(REVIEW_UID));
        assert_eq!(body["response"]["allowed"], json!(true));
    }

    #[tokio::test]
    async fn test_all_checks_reported_in_order() {
        let review = MigrationPolicyBuilder::new("broken")
            .completion_timeout(-10)
            .bandwidth("-1Gi")
            .allow_post_copy(true)
            .review("virt-baseline");

        let (status, body) = post(webhook_state(false, None), review).await;
        assert_eq!(status, StatusCode::OK);

        let response = &body["response"];
        assert_eq!(response["allowed"], json!(false));
        assert_eq!(response["status"]["code"], json!(422));
        assert_eq!(response["status"]["reason"], json!("Invalid"));
        assert_eq!(
            response["status"]["message"],
            json!(
                "must not be negative, must not be negative, \
                 PostCopy is not allowed if the namespace is unprivileged"
            )
        );

        let fields: Vec<&str> = response["status"]["details"]["causes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|cause| {
                assert_eq!(cause["reason"], json!("FieldValueInvalid"));
                cause["field"].as_str().unwrap()
            })
            .collect();
        assert_eq!(
            fields,
            [
                "spec.completionTimeoutPerGiB",
                "spec.bandwidthPerMigration",
                "spec.allowPostCopy"
            ]
        );
    }

    #[tokio::test]
    async fn test_post_copy_by_namespace_level() {
        for (namespace, allowed) in [
            ("virt-privileged", true),
            ("virt-baseline", false),
            ("unlabelled", false),
        ] {
            let review = MigrationPolicyBuilder::default()
                .allow_post_copy(true)
                .review(namespace);
            let (_, body) = post(webhook_state(false, None), review).await;
            assert_eq!(
                body["response"]["allowed"],
                json!(allowed),
                "namespace {namespace}"
            );
        }
    }

    #[tokio::test]
    async fn test_post_copy_allowed_when_cluster_permits_userfaultfd() {
        let review = MigrationPolicyBuilder::default()
            .allow_post_copy(true)
            .review("virt-baseline");
        let (_, body) = post(webhook_state(true, None), review).await;
        assert_eq!(body["response"]["allowed"], json!(true));
    }

    #[tokio::test]
    async fn test_unknown_namespace_is_error_decision() {
        let review = MigrationPolicyBuilder::default()
            .allow_post_copy(true)
            .review("does-not-exist");
        let (status, body) = post(webhook_state(true, None), review).await;

        assert_eq!(status, StatusCode::OK);
        let response = &body["response"];
        assert_eq!(response["allowed"], json!(false));
        assert_eq!(response["status"]["code"], json!(400));
        assert!(response["status"]["details"].is_null());
        assert!(
            response["status"]["message"]
                .as_str()
                .unwrap()
                .contains("does-not-exist")
        );
    }

    #[tokio::test]
    async fn test_numeric_bandwidth() {
        let mut review = MigrationPolicyBuilder::default().review("virt-baseline");
        review["request"]["object"]["spec"]["bandwidthPerMigration"] = json!(-1024);
        let (_, body) = post(webhook_state(false, None), review).await;
        assert_eq!(body["response"]["allowed"], json!(false));
        assert_eq!(
            body["response"]["status"]["details"]["causes"][0]["field"],
            json!("spec.bandwidthPerMigration")
        );
    }

    #[tokio::test]
    async fn test_unexpected_resource_is_error_decision() {
        let review = review_json(
            "kubevirt.io",
            "virtualmachineinstances",
            "CREATE",
            "virt-baseline",
            Some(json!({"apiVersion": "kubevirt.io/v1", "kind": "VirtualMachineInstance"})),
        );
        let (status, body) = post(webhook_state(false, None), review).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"]["allowed"], json!(false));
        assert_eq!(body["response"]["status"]["code"], json!(400));
        assert_eq!(
            body["response"]["status"]["message"],
            json!("unexpected resource kubevirt.io/v1alpha1/virtualmachineinstances")
        );
    }

    #[tokio::test]
    async fn test_undecodable_object_echoes_uid() {
        for object in [json!("garbage"), json!({"metadata": {"name": 5}, "spec": {}})] {
            let review = review_json(
                "migrations.kubevirt.io",
                "migrationpolicies",
                "CREATE",
                "virt-baseline",
                Some(object.clone()),
            );
            let (status, body) = post(webhook_state(false, None), review).await;

            assert_eq!(status, StatusCode::OK, "object {object}");
            assert_eq!(body["apiVersion"], json!("admission.k8s.io/v1"));
            let response = &body["response"];
            assert_eq!(response["uid"], json!(REVIEW_UID));
            assert_eq!(response["allowed"], json!(false));
            assert_eq!(response["status"]["code"], json!(400));
            assert!(response["status"]["details"].is_null());
            assert!(
                response["status"]["message"]
                    .as_str()
                    .unwrap()
                    .starts_with("failed to decode MigrationPolicy")
            );
        }
    }

    #[tokio::test]
    async fn test_policy_without_spec_allowed() {
        for spec in [None, Some(Value::Null)] {
            let mut object = json!({
                "apiVersion": "migrations.kubevirt.io/v1alpha1",
                "kind": "MigrationPolicy",
                "metadata": {"name": "bare"}
            });
            if let Some(spec) = spec {
                object["spec"] = spec;
            }
            let review = review_json(
                "migrations.kubevirt.io",
                "migrationpolicies",
                "CREATE",
                "virt-baseline",
                Some(object),
            );
            let (status, body) = post(webhook_state(false, None), review).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["response"]["allowed"], json!(true));
        }
    }

    #[tokio::test]
    async fn test_delete_is_allowed() {
        let review = review_json(
            "migrations.kubevirt.io",
            "migrationpolicies",
            "DELETE",
            "virt-baseline",
            None,
        );
        let (status, body) = post(webhook_state(false, None), review).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"]["allowed"], json!(true));
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let (status, body) = post_raw(webhook_state(false, None), b"{not json".to_vec()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["response"]["allowed"], json!(false));
    }

    #[tokio::test]
    async fn test_review_without_request_is_bad_request() {
        let review = json!({"apiVersion": "admission.k8s.io/v1", "kind": "AdmissionReview"});
        let (status, _) = post(webhook_state(false, None), review).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_decisions_recorded_in_metrics() {
        let health = Arc::new(HealthState::new());
        let state = webhook_state(false, Some(health.clone()));

        let allowed = MigrationPolicyBuilder::default().review("virt-baseline");
        let denied = MigrationPolicyBuilder::default()
            .completion_timeout(-1)
            .review("virt-baseline");
        post(state.clone(), allowed).await;
        post(state, denied).await;

        let metrics = health.metrics.encode();
        assert!(metrics.contains("migration_policy_admissions_total{decision=\"allowed\"} 1"));
        assert!(metrics.contains("migration_policy_admissions_total{decision=\"denied\"} 1"));
    }
}

mod admitter_tests {
    use super::*;
    use migration_policy_webhook::webhooks::AdmitError;
    use migration_policy_webhook::{AdmitContext, Decision, ReviewRequest};

    fn request(review: Value) -> ReviewRequest {
        ReviewRequest::from_value(review).unwrap()
    }

    #[tokio::test]
    async fn test_expired_deadline_is_error_decision() {
        let req = request(
            MigrationPolicyBuilder::default()
                .allow_post_copy(true)
                .review("virt-privileged"),
        );
        let ctx = AdmitContext::with_deadline(tokio::time::Instant::now());

        let decision = admitter(false).admit(&req, &ctx).await;
        assert!(matches!(
            decision,
            Decision::Errored(AdmitError::DeadlineExceeded(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_deadline_ignored_without_post_copy() {
        let req = request(
            MigrationPolicyBuilder::default()
                .allow_post_copy(false)
                .review("virt-baseline"),
        );
        let ctx = AdmitContext::with_deadline(tokio::time::Instant::now());
        assert!(admitter(false).admit(&req, &ctx).await.is_allowed());
    }

    #[tokio::test]
    async fn test_metadata_namespace_wins_over_request_namespace() {
        let req = request(
            MigrationPolicyBuilder::default()
                .namespace("virt-privileged")
                .allow_post_copy(true)
                .review("virt-baseline"),
        );
        let ctx = AdmitContext::with_timeout(Duration::from_secs(1));
        assert!(admitter(false).admit(&req, &ctx).await.is_allowed());
    }
}
