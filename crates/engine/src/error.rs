//! Faults raised inside the generation critical section.

use rustedchat_core::error::BackendError;
use std::time::Duration;

#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    /// The backend stayed busy past the configured wait. Nothing was mutated.
    #[error("generation lock not acquired within {0:?}")]
    LockTimeout(Duration),

    /// Shaping the history failed; the request was aborted.
    #[error("history mutation failed: {0}")]
    Mutation(String),

    /// The backend call (or token counting) failed.
    #[error("backend failed: {0}")]
    Backend(#[from] BackendError),
}
