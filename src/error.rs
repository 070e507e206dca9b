//! Error types for pr-engine

use crate::types::{CommitId, RequestId};
use thiserror::Error;

/// Errors returned by the integration engine
#[derive(Debug, Error)]
pub enum Error {
    /// Operation is not allowed in the request's current state
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Pull request does not exist in the store
    #[error("pull request #{0} not found")]
    RequestNotFound(RequestId),

    /// Branch could not be resolved in its repository
    #[error("branch '{branch}' not found in repository '{repository}'")]
    BranchNotFound {
        /// Repository name
        repository: String,
        /// Branch name
        branch: String,
    },

    /// A git command failed
    #[error("git {command} failed: {message}")]
    Git {
        /// Git subcommand that failed (e.g. "merge")
        command: String,
        /// stderr of the failed command
        message: String,
    },

    /// Compare-and-swap ref update lost a race
    #[error(
        "ref '{ref_name}' changed concurrently: expected {expected}, found {}",
        actual.as_ref().map_or("nothing", CommitId::as_str)
    )]
    RefConflict {
        /// Ref that was being updated
        ref_name: String,
        /// Value the caller expected
        expected: String,
        /// Value actually found (None if the ref is absent)
        actual: Option<CommitId>,
    },

    /// Request was modified by another writer since it was loaded. Safe to
    /// retry the whole operation.
    #[error("pull request #{0} was modified concurrently")]
    ConcurrentModification(RequestId),

    /// Persistence layer failure
    #[error("store error: {0}")]
    Store(String),

    /// Configuration could not be loaded
    #[error("config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant violation
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for an [`Error::IllegalState`]
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    /// Whether running the failed operation again may succeed
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentModification(_) | Self::RefConflict { .. }
        )
    }
}
