//! Error types for the remote VM connector.

use thiserror::Error;

/// Errors reported by the virtualization platform collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    /// The remote object no longer exists.
    #[error("remote object not found: {0}")]
    NotFound(String),

    /// A property of the remote object could not be read.
    #[error("property unavailable: {0}")]
    PropertyUnavailable(String),

    /// The platform rejected the request.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Any other failure from the vendor SDK.
    #[error("remote error: {0}")]
    Remote(String),
}

/// Errors surfaced by an [`AsyncTask`](crate::AsyncTask).
///
/// Submission failures are kept apart from failures of the remote
/// operation itself: the former mean nothing happened on the platform.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The remote call could not even be started.
    #[error("failed to submit '{description}': {source}")]
    SubmitFailed {
        description: String,
        #[source]
        source: ConnectorError,
    },

    /// The remote operation was submitted and then failed.
    #[error("'{description}' failed: {message}")]
    Failed { description: String, message: String },

    /// The task was cancelled before it completed.
    #[error("'{description}' was cancelled")]
    Cancelled { description: String },
}

impl TaskError {
    /// Returns true if the remote call never started.
    pub fn is_submit_failure(&self) -> bool {
        matches!(self, Self::SubmitFailed { .. })
    }
}
