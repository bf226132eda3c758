//! Pod Security Admission classification of namespaces.
//!
//! The enforcement level of a namespace is read from its
//! `pod-security.kubernetes.io/enforce` label. Only an exact
//! `privileged` value counts as privileged; a missing or unknown
//! label does not.

use k8s_openapi::api::core::v1::Namespace;

/// Namespace label carrying the enforced Pod Security Standard
pub const ENFORCE_LABEL: &str = "pod-security.kubernetes.io/enforce";

/// Pod Security Standard levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Unrestricted; host-level mechanisms are available
    Privileged,
    /// Prevents known privilege escalations
    Baseline,
    /// Current pod hardening best practices
    Restricted,
}

impl Level {
    /// Parse a label value. Matching is exact, as the API server does.
    pub fn from_label(value: &str) -> Option<Self> {
        match value {
            "privileged" => Some(Level::Privileged),
            "baseline" => Some(Level::Baseline),
            "restricted" => Some(Level::Restricted),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Privileged => "privileged",
            Level::Baseline => "baseline",
            Level::Restricted => "restricted",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enforcement level declared on the namespace, if any
pub fn enforcement_level(namespace: &Namespace) -> Option<Level> {
    namespace
        .metadata
        .labels
        .as_ref()?
        .get(ENFORCE_LABEL)
        .and_then(|value| Level::from_label(value))
}

/// Whether the namespace enforces the `privileged` level
pub fn is_namespace_privileged(namespace: &Namespace) -> bool {
    enforcement_level(namespace) == Some(Level::Privileged)
}
