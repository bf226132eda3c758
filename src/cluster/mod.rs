//! Cluster collaborators consulted by the admitter.
//!
//! The admitter never talks to the API server directly. It is handed:
//! - a [`NamespaceLookup`] for the single read-only namespace fetch
//! - a [`ClusterCapabilities`] answering the cluster-wide post-copy question
//!
//! Both are traits so tests can substitute in-memory fakes.

pub mod psa;

use std::collections::HashMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::ObjectMeta;
use kube::{Api, Client};
use thiserror::Error;

pub use psa::is_namespace_privileged;

/// Errors returned by a namespace lookup
#[derive(Debug, Error)]
pub enum LookupError {
    /// The namespace does not exist
    #[error("namespaces \"{0}\" not found")]
    NotFound(String),

    /// Any other API failure
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

/// Read-only access to Namespace objects
#[async_trait]
pub trait NamespaceLookup: Send + Sync {
    /// Fetch the namespace with the given name
    async fn get_namespace(&self, name: &str) -> Result<Namespace, LookupError>;
}

/// Cluster-wide security capabilities
pub trait ClusterCapabilities: Send + Sync {
    /// Whether the cluster seccomp profile allows userfaultfd for every
    /// workload, making post-copy safe regardless of namespace level.
    fn allows_privileged_post_copy_globally(&self) -> bool;
}

/// Namespace lookup backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeNamespaceLookup {
    api: Api<Namespace>,
}

impl KubeNamespaceLookup {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl NamespaceLookup for KubeNamespaceLookup {
    async fn get_namespace(&self, name: &str) -> Result<Namespace, LookupError> {
        self.api.get(name).await.map_err(|e| match e {
            kube::Error::Api(ref api_err) if api_err.code == 404 => {
                LookupError::NotFound(name.to_string())
            }
            other => LookupError::Kube(other),
        })
    }
}

/// Namespace lookup over a fixed set of labelled namespaces.
///
/// Useful for tests and for running the webhook without an API server.
#[derive(Clone, Debug, Default)]
pub struct InMemoryNamespaces {
    namespaces: HashMap<String, Namespace>,
}

impl InMemoryNamespaces {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a namespace with the given labels
    pub fn with_namespace<I, K, V>(mut self, name: &str, labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .into_iter()
                        .map(|(k, v)| (k.into(), v.into()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        };
        self.namespaces.insert(name.to_string(), namespace);
        self
    }
}

#[async_trait]
impl NamespaceLookup for InMemoryNamespaces {
    async fn get_namespace(&self, name: &str) -> Result<Namespace, LookupError> {
        self.namespaces
            .get(name)
            .cloned()
            .ok_or_else(|| LookupError::NotFound(name.to_string()))
    }
}

/// Cluster capabilities taken from the loaded webhook configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SeccompCapabilities {
    /// The cluster seccomp profile permits userfaultfd
    pub allows_userfaultfd: bool,
}

impl SeccompCapabilities {
    pub fn new(allows_userfaultfd: bool) -> Self {
        Self { allows_userfaultfd }
    }
}

impl ClusterCapabilities for SeccompCapabilities {
    fn allows_privileged_post_copy_globally(&self) -> bool {
        self.allows_userfaultfd
    }
}
