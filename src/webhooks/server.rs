//! Admission webhook server.
//!
//! Provides the HTTPS endpoint the API server calls for MigrationPolicy
//! writes.
//!
//! To enable the webhook:
//! 1. Provision a serving certificate (e.g. with cert-manager)
//! 2. Create a ValidatingWebhookConfiguration for
//!    `migrations.kubevirt.io/v1alpha1/migrationpolicies` CREATE and UPDATE
//!    pointing at [`VALIDATE_PATH`]
//! 3. Mount the TLS secret at the configured certificate paths
//!
//! The webhook server starts automatically when certificates are present.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post};
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionResponse, AdmissionReview, Operation};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::health::HealthState;
use crate::webhooks::admitter::{AdmitContext, Decision, MigrationPolicyAdmitter, ReviewRequest};

/// Path served for MigrationPolicy validation
pub const VALIDATE_PATH: &str = "/migration-policy-validate-create";

/// Shared state for webhook handlers
pub struct WebhookState {
    /// The validator
    pub admitter: MigrationPolicyAdmitter,
    /// Bound on the namespace lookup made for each review
    pub lookup_timeout: Duration,
    /// Optional health state for metrics
    pub health_state: Option<Arc<HealthState>>,
}

impl WebhookState {
    pub fn new(
        admitter: MigrationPolicyAdmitter,
        lookup_timeout: Duration,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            admitter,
            lookup_timeout,
            health_state,
        }
    }
}

/// Reply used when the body is not a usable AdmissionReview
fn invalid_review(message: String) -> (StatusCode, Json<AdmissionReview<DynamicObject>>) {
    (
        StatusCode::BAD_REQUEST,
        Json(AdmissionResponse::invalid(message).into_review()),
    )
}

/// Create the webhook router
pub fn create_webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(VALIDATE_PATH, post(validate_migration_policy))
        .with_state(state)
}

/// MigrationPolicy admission webhook handler
async fn validate_migration_policy(
    State(state): State<Arc<WebhookState>>,
    body: Bytes,
) -> impl IntoResponse {
    let started = std::time::Instant::now();

    let review = match ReviewRequest::from_slice(&body) {
        Ok(review) => review,
        Err(e) => {
            error!(error = %e, "Failed to parse AdmissionReview body");
            return invalid_review(e.to_string());
        }
    };
    let request = &review.request;

    let uid = &request.uid;
    debug!(
        uid = %uid,
        operation = ?request.operation,
        namespace = ?request.namespace,
        name = ?request.name,
        "Processing admission request"
    );

    // DELETE operations carry no object to validate
    if request.operation == Operation::Delete {
        info!(uid = %uid, "Admission request allowed (DELETE)");
        return (
            StatusCode::OK,
            Json(AdmissionResponse::from(request).into_review()),
        );
    }

    let ctx = AdmitContext::with_timeout(state.lookup_timeout);
    let decision = state.admitter.admit(&review, &ctx).await;

    match &decision {
        Decision::Allowed => info!(uid = %uid, "Admission request allowed"),
        Decision::Denied(causes) => {
            let fields: Vec<&str> = causes.iter().map(|c| c.field.as_str()).collect();
            warn!(uid = %uid, causes = ?fields, "Admission request denied");
        }
        Decision::Errored(e) => {
            error!(uid = %uid, kind = e.kind(), error = %e, "Admission request failed");
        }
    }

    if let Some(ref health) = state.health_state {
        health
            .metrics
            .record_admission(decision.label(), started.elapsed().as_secs_f64());
    }

    (
        StatusCode::OK,
        Json(
            decision
                .into_response(AdmissionResponse::from(request))
                .into_review(),
        ),
    )
}

/// Errors that can occur when running the webhook server
#[derive(Debug, Error)]
pub enum WebhookError {
    /// TLS configuration error
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
    /// Server error
    #[error("Webhook server error: {0}")]
    Server(String),
}

/// Run the webhook server with TLS
///
/// Binds to `0.0.0.0:<port>` and serves [`VALIDATE_PATH`]. The health
/// state, when present, is marked ready once the listener is bound.
///
/// # Arguments
/// * `state` - Shared handler state
/// * `port` - Listening port
/// * `cert_path` - Path to TLS certificate file (PEM format)
/// * `key_path` - Path to TLS private key file (PEM format)
pub async fn run_webhook_server(
    state: Arc<WebhookState>,
    port: u16,
    cert_path: &str,
    key_path: &str,
) -> Result<(), WebhookError> {
    let health_state = state.health_state.clone();
    let app = create_webhook_router(state);

    let config = RustlsConfig::from_pem_file(PathBuf::from(cert_path), PathBuf::from(key_path))
        .await
        .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let handle = Handle::new();
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            if let Some(bound) = handle.listening().await {
                info!(addr = %bound, path = VALIDATE_PATH, "Webhook server listening with TLS");
                if let Some(health) = health_state {
                    health.set_ready(true).await;
                }
            }
        });
    }

    axum_server::bind_rustls(addr, config)
        .handle(handle)
        .serve(app.into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))?;

    Ok(())
}
