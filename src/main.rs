//! migration-policy-webhook - Validating admission webhook for KubeVirt
//! MigrationPolicy resources.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Loads configuration and creates the Kubernetes client
//! - Starts the health server and, when certificates exist, the webhook server

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use tokio::signal;
use tracing::{error, info};

use migration_policy_webhook::cluster::{KubeNamespaceLookup, SeccompCapabilities};
use migration_policy_webhook::health::{HealthState, run_health_server};
use migration_policy_webhook::{
    MigrationPolicyAdmitter, WebhookConfig, WebhookState, run_webhook_server,
};

/// Grace period for in-flight reviews to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("migration_policy_webhook=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .json()
        .init();

    info!("Starting migration-policy-webhook");

    let config = WebhookConfig::from_env()?;
    info!(
        webhook_port = config.webhook_port,
        health_port = config.health_port,
        lookup_timeout_secs = config.lookup_timeout.as_secs(),
        seccomp_allows_userfaultfd = config.seccomp_allows_userfaultfd,
        "Loaded configuration"
    );

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // Create shared health state
    let health_state = Arc::new(HealthState::new());

    // Start health server immediately so liveness works before TLS is up
    let health_handle = {
        let health_state = health_state.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let admitter = MigrationPolicyAdmitter::new(
        Arc::new(KubeNamespaceLookup::new(client)),
        Arc::new(SeccompCapabilities::new(config.seccomp_allows_userfaultfd)),
    );
    let webhook_state = Arc::new(WebhookState::new(
        admitter,
        config.lookup_timeout,
        Some(health_state.clone()),
    ));

    // Start webhook server if certificates are available
    let webhook_handle =
        if Path::new(&config.cert_path).exists() && Path::new(&config.key_path).exists() {
            info!("TLS certificates found, starting webhook server");
            let port = config.webhook_port;
            let cert_path = config.cert_path.clone();
            let key_path = config.key_path.clone();
            // Readiness is signalled by the server once its listener is bound
            Some(tokio::spawn(async move {
                if let Err(e) = run_webhook_server(webhook_state, port, &cert_path, &key_path).await
                {
                    error!("Webhook server error: {}", e);
                }
            }))
        } else {
            error!(
                cert_path = %config.cert_path,
                key_path = %config.key_path,
                "Webhook certificates not found, webhook server disabled"
            );
            None
        };

    // Wait for any task to complete (or fail), or shutdown signal
    tokio::select! {
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        result = async {
            match webhook_handle {
                Some(handle) => handle.await,
                None => std::future::pending().await,
            }
        } => {
            if let Err(e) = result {
                error!("Webhook server task panicked: {}", e);
            }
        }
        // Handle graceful shutdown on SIGTERM or SIGINT
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");

            // Mark as not ready so the Service stops routing reviews here
            health_state.set_ready(false).await;
            info!("Marked webhook as not ready");

            info!(
                "Waiting {}s for in-flight reviews to complete...",
                SHUTDOWN_GRACE_PERIOD_SECS
            );
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)).await;

            info!("Grace period complete, shutting down");
        }
    }

    info!("Webhook stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the process cannot shut
/// down gracefully without them.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
