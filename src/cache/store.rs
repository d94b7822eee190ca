//! Sorted-set store adapter.
//!
//! Wraps a backend speaking sorted-set semantics and exposes the three
//! operations the popularity engine needs: a conditional increment executed
//! as a registered script, a reverse ranged read that distinguishes a missing
//! key from an empty page, and a bulk write.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::entities::ScoreEntry;

use super::error::{PopularError, StoreError};
use super::keys::ScoreKey;
use super::scripts::{ScriptBackend, ScriptHandle, ScriptRegistry, ScriptReply};

/// Name under which the increment script is registered.
pub const CONDITIONAL_INCR_SCRIPT_NAME: &str = "POPULAR_INCR_SCRIPT";

/// Increments `KEYS[2]` by `ARGV[1]` in the sorted set `KEYS[1]`, but only
/// when that set already has members. Replies nil otherwise.
pub const CONDITIONAL_INCR_SCRIPT: &str = r#"
if redis.call('ZCARD', KEYS[1]) ~= 0 then
  return redis.call('ZINCRBY', KEYS[1], ARGV[1], KEYS[2])
end
"#;

/// Number of keys the increment script takes (set key, member).
pub const CONDITIONAL_INCR_NUM_KEYS: usize = 2;

/// Sorted-set primitives exposed by a store backend.
#[async_trait]
pub trait SortedSetBackend: Send + Sync {
    /// Read up to `limit` members by descending score after skipping `offset`.
    ///
    /// Returns `None` when the key does not exist at all.
    async fn range_desc_by_score(
        &self,
        key: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Option<Vec<ScoreEntry>>, StoreError>;

    /// Add or replace every entry in one atomic write. Empty input is a no-op.
    async fn bulk_set(&self, key: &str, entries: &[ScoreEntry]) -> Result<(), StoreError>;
}

/// Result of a ranged read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedRange {
    /// No set exists under the key.
    Absent,
    /// The set exists; the page may still be empty.
    Present(Vec<ScoreEntry>),
}

#[derive(Clone)]
pub struct SortedSetStore {
    scripts: Arc<dyn ScriptBackend>,
    sets: Arc<dyn SortedSetBackend>,
}

impl SortedSetStore {
    pub fn new<B>(backend: Arc<B>) -> Self
    where
        B: ScriptBackend + SortedSetBackend + 'static,
    {
        Self {
            scripts: backend.clone(),
            sets: backend,
        }
    }

    pub fn script_registry(&self) -> ScriptRegistry {
        ScriptRegistry::new(self.scripts.clone())
    }

    /// Increment `member` by `delta` when the set exists.
    ///
    /// Returns the new score, or `None` when the set was absent and nothing
    /// was written.
    pub async fn conditional_increment(
        &self,
        script: &ScriptHandle,
        key: &ScoreKey,
        member: &str,
        delta: i64,
    ) -> Result<Option<i64>, PopularError> {
        let keys = [key.as_str().to_string(), member.to_string()];
        let args = [delta.to_string()];

        match script.call(&keys, &args).await? {
            ScriptReply::Nil => Ok(None),
            ScriptReply::Integer(score) => Ok(Some(score)),
            ScriptReply::Text(raw) => parse_score(&raw).map(Some).map_err(PopularError::from),
        }
    }

    pub async fn range_desc_by_score(
        &self,
        key: &ScoreKey,
        limit: usize,
        offset: usize,
    ) -> Result<CachedRange, PopularError> {
        let range = self
            .sets
            .range_desc_by_score(key.as_str(), limit, offset)
            .await?;

        Ok(match range {
            Some(entries) => CachedRange::Present(entries),
            None => CachedRange::Absent,
        })
    }

    pub async fn bulk_set(&self, key: &ScoreKey, entries: &[ScoreEntry]) -> Result<(), PopularError> {
        if entries.is_empty() {
            return Ok(());
        }
        self.sets
            .bulk_set(key.as_str(), entries)
            .await
            .map_err(PopularError::from)
    }
}

/// Parse a score reply. Sorted-set scores are doubles on the wire; integral
/// values come back without a fractional part.
pub(crate) fn parse_score(raw: &str) -> Result<i64, StoreError> {
    let trimmed = raw.trim();
    if let Ok(value) = trimmed.parse::<i64>() {
        return Ok(value);
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .map(|value| value.round() as i64)
        .ok_or_else(|| StoreError::protocol(format!("score `{raw}` is not numeric")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_integral_and_float_scores() {
        assert_eq!(parse_score("3").unwrap(), 3);
        assert_eq!(parse_score("-1").unwrap(), -1);
        assert_eq!(parse_score("4.0").unwrap(), 4);
        assert!(parse_score("inf").is_err());
        assert!(parse_score("abc").is_err());
    }

    #[test]
    fn increment_script_is_guarded_by_cardinality() {
        assert!(CONDITIONAL_INCR_SCRIPT.contains("ZCARD"));
        assert!(CONDITIONAL_INCR_SCRIPT.contains("ZINCRBY"));
    }
}
