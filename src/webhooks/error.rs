//! Protocol and infrastructure failures of an admission review.
//!
//! These never describe a problem with the submitted policy's content;
//! they become an error response with an opaque message instead of a
//! list of field causes.

use thiserror::Error;

use crate::cluster::LookupError;
use crate::quantity::QuantityError;

/// Error type for a single admission review
#[derive(Error, Debug)]
pub enum AdmitError {
    /// The request was routed here for another resource type
    #[error("unexpected resource {group}/{version}/{resource}")]
    UnexpectedResource {
        group: String,
        version: String,
        resource: String,
    },

    /// The request carries no object to review
    #[error("missing object in admission request")]
    MissingObject,

    /// The object does not decode into a MigrationPolicy
    #[error("failed to decode MigrationPolicy: {0}")]
    Decode(#[from] serde_json::Error),

    /// `spec.bandwidthPerMigration` is not a valid quantity
    #[error("failed to decode MigrationPolicy: spec.bandwidthPerMigration: {0}")]
    InvalidQuantity(#[from] QuantityError),

    /// The namespace lookup failed
    #[error("failed to get namespace {namespace:?}: {source}")]
    NamespaceLookup {
        namespace: String,
        #[source]
        source: LookupError,
    },

    /// The request deadline passed before the namespace lookup finished
    #[error("namespace lookup deadline exceeded for {0:?}")]
    DeadlineExceeded(String),
}

impl AdmitError {
    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            AdmitError::UnexpectedResource { .. } => "UnexpectedResource",
            AdmitError::MissingObject => "MissingObject",
            AdmitError::Decode(_) | AdmitError::InvalidQuantity(_) => "Decode",
            AdmitError::NamespaceLookup { .. } => "NamespaceLookup",
            AdmitError::DeadlineExceeded(_) => "DeadlineExceeded",
        }
    }
}

/// The body is not a usable AdmissionReview envelope.
///
/// Unlike [`AdmitError`] there is no request uid to answer with, so these
/// are rejected at the HTTP level.
#[derive(Error, Debug)]
pub enum ReviewError {
    #[error("Invalid AdmissionReview: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid AdmissionReview: {0}")]
    Convert(#[from] kube::core::admission::ConvertAdmissionReviewError),
}

/// Result type alias for admission operations
pub type Result<T> = std::result::Result<T, AdmitError>;
