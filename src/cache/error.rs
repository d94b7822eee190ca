use thiserror::Error;

use crate::application::repos::RepoError;

/// Failure reported by a sorted-set store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {message}")]
    Unavailable { message: String },
    #[error("script `{sha}` is not loaded in the store")]
    NoScript { sha: String },
    #[error("unexpected store reply: {message}")]
    Protocol { message: String },
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PopularError {
    #[error("sorted-set store unavailable")]
    StoreUnavailable(#[source] StoreError),
    #[error("failed to register script `{name}`")]
    ScriptLoadFailure {
        name: String,
        #[source]
        source: StoreError,
    },
    #[error("popularity cache used before initialize()")]
    NotInitialized,
    #[error("script `{name}` expects {expected} keys, got {actual}")]
    ScriptArity {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("failed to recompute scores from the source of record")]
    RecomputeSourceFailure(#[from] RepoError),
}

impl From<StoreError> for PopularError {
    fn from(error: StoreError) -> Self {
        Self::StoreUnavailable(error)
    }
}
