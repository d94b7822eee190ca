//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::ScoreEntry;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Authoritative source used to rebuild a ranking after a cold miss.
///
/// Implementations aggregate every action of `action_type` recorded against
/// the children of `scope_id` and return one entry per child. Ordering of the
/// returned entries is not significant; the cache sorts them.
#[async_trait]
pub trait ScoreSource: Send + Sync {
    async fn compute_scores(
        &self,
        scope_id: &str,
        action_type: &str,
    ) -> Result<Vec<ScoreEntry>, RepoError>;
}
