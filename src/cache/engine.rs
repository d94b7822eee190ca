//! Popularity cache engine.
//!
//! Per key, a ranking is either absent from the store or populated. Reads
//! that find the key absent on the first page rebuild the ranking from the
//! [`ScoreSource`], answer from the rebuilt data, and persist it in the
//! background. Writes only ever touch populated rankings; an absent ranking
//! heals on its next first-page read.
//!
//! A background persist carries a snapshot taken before it lands, so an
//! increment applied to the same key in between is overwritten for the
//! members in that snapshot. Rankings are only rebuilt from a cold key, where
//! no increment should precede the first read.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use metrics::{counter, histogram};
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use crate::application::repos::ScoreSource;
use crate::domain::entities::{RankedSlice, ScoreEntry};
use crate::domain::types::ItemType;

use super::error::PopularError;
use super::keys::ScoreKey;
use super::lock::{rw_read, rw_write};
use super::scripts::ScriptHandle;
use super::store::{
    CONDITIONAL_INCR_NUM_KEYS, CONDITIONAL_INCR_SCRIPT, CONDITIONAL_INCR_SCRIPT_NAME, CachedRange,
    SortedSetStore,
};

const SOURCE: &str = "cache::engine";

pub(crate) const METRIC_RANKING_HIT: &str = "popcache_ranking_hit_total";
pub(crate) const METRIC_RANKING_MISS: &str = "popcache_ranking_miss_total";
pub(crate) const METRIC_RANKING_DEEP_MISS: &str = "popcache_ranking_deep_miss_total";
pub(crate) const METRIC_RECOMPUTE_MS: &str = "popcache_recompute_ms";
pub(crate) const METRIC_PERSIST_FAILED: &str = "popcache_persist_failed_total";

pub struct PopularityCache {
    store: SortedSetStore,
    source: Arc<dyn ScoreSource>,
    increment: RwLock<Option<ScriptHandle>>,
    init_guard: Mutex<()>,
    persists: TaskTracker,
}

impl PopularityCache {
    pub fn new(store: SortedSetStore, source: Arc<dyn ScoreSource>) -> Self {
        Self {
            store,
            source,
            increment: RwLock::new(None),
            init_guard: Mutex::new(()),
            persists: TaskTracker::new(),
        }
    }

    /// Register the increment script. Safe to call repeatedly.
    ///
    /// A failed registration leaves the engine uninitialized; writes are
    /// refused until a later call succeeds.
    pub async fn initialize(&self) -> Result<(), PopularError> {
        let _guard = self.init_guard.lock().await;

        let registered = self
            .store
            .script_registry()
            .register(
                CONDITIONAL_INCR_SCRIPT_NAME,
                CONDITIONAL_INCR_SCRIPT,
                CONDITIONAL_INCR_NUM_KEYS,
            )
            .await;

        match registered {
            Ok(handle) => {
                info!(
                    target = "popcache::cache::engine",
                    script = handle.name(),
                    sha = handle.sha(),
                    "popularity cache initialized"
                );
                *rw_write(&self.increment, SOURCE, "initialize") = Some(handle);
                Ok(())
            }
            Err(err) => {
                error!(
                    target = "popcache::cache::engine",
                    error = %err,
                    "failed to register increment script"
                );
                *rw_write(&self.increment, SOURCE, "initialize.reset") = None;
                Err(err)
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        rw_read(&self.increment, SOURCE, "is_initialized").is_some()
    }

    /// Wait for every background persist spawned so far.
    ///
    /// Callers owning the runtime await this before dropping it; a dropped
    /// runtime cancels persists still waiting on the store.
    pub async fn shutdown(&self) {
        self.persists.close();
        self.persists.wait().await;
        self.persists.reopen();
        debug!(
            target = "popcache::cache::engine",
            "background persists drained"
        );
    }

    /// Apply `delta` to `member_id` in the ranking for the given key.
    ///
    /// Returns the new score, or `None` when the ranking is not populated; no
    /// recompute happens on this path.
    #[instrument(skip(self), fields(key = tracing::field::Empty))]
    pub async fn adjust(
        &self,
        category: &str,
        item_type: ItemType,
        item_id: &str,
        member_id: &str,
        delta: i64,
    ) -> Result<Option<i64>, PopularError> {
        let script = rw_read(&self.increment, SOURCE, "adjust")
            .clone()
            .ok_or(PopularError::NotInitialized)?;

        let key = ScoreKey::derive(category, item_type, item_id);
        tracing::Span::current().record("key", key.as_str());

        let score = self
            .store
            .conditional_increment(&script, &key, member_id, delta)
            .await?;

        if score.is_none() {
            debug!(
                target = "popcache::cache::engine",
                key = %key,
                "ranking not populated, increment skipped"
            );
        }

        Ok(score)
    }

    pub async fn on_action_created(
        &self,
        category: &str,
        item_type: ItemType,
        item_id: &str,
        member_id: &str,
    ) -> Result<Option<i64>, PopularError> {
        self.adjust(category, item_type, item_id, member_id, 1)
            .await
    }

    pub async fn on_action_deleted(
        &self,
        category: &str,
        item_type: ItemType,
        item_id: &str,
        member_id: &str,
    ) -> Result<Option<i64>, PopularError> {
        self.adjust(category, item_type, item_id, member_id, -1)
            .await
    }

    /// Read `limit` ranked entries starting at `offset`.
    #[instrument(skip(self), fields(key = tracing::field::Empty))]
    pub async fn get_ranking(
        &self,
        category: &str,
        item_type: ItemType,
        item_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<RankedSlice, PopularError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let key = ScoreKey::derive(category, item_type, item_id);
        tracing::Span::current().record("key", key.as_str());

        match self.store.range_desc_by_score(&key, limit, offset).await? {
            CachedRange::Present(entries) => {
                counter!(METRIC_RANKING_HIT).increment(1);
                Ok(entries)
            }
            CachedRange::Absent if offset > 0 => {
                // Deep pages are only served from a populated ranking.
                counter!(METRIC_RANKING_DEEP_MISS).increment(1);
                debug!(
                    target = "popcache::cache::engine",
                    key = %key,
                    offset,
                    "cold ranking requested past the first page"
                );
                Ok(Vec::new())
            }
            CachedRange::Absent => {
                counter!(METRIC_RANKING_MISS).increment(1);
                self.recompute(key, item_id, category, limit, offset).await
            }
        }
    }

    async fn recompute(
        &self,
        key: ScoreKey,
        scope_id: &str,
        action_type: &str,
        limit: usize,
        offset: usize,
    ) -> Result<RankedSlice, PopularError> {
        let started_at = Instant::now();
        let computed = self.source.compute_scores(scope_id, action_type).await?;
        let ranking = rank(computed);
        histogram!(METRIC_RECOMPUTE_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

        info!(
            target = "popcache::cache::engine",
            key = %key,
            entries = ranking.len(),
            "recomputed cold ranking"
        );

        let slice: RankedSlice = ranking.iter().skip(offset).take(limit).cloned().collect();

        if !ranking.is_empty() {
            let store = self.store.clone();
            self.persists.spawn(async move {
                if let Err(err) = store.bulk_set(&key, &ranking).await {
                    counter!(METRIC_PERSIST_FAILED).increment(1);
                    warn!(
                        target = "popcache::cache::engine",
                        key = %key,
                        error = %err,
                        "failed to persist recomputed ranking"
                    );
                }
            });
        }

        Ok(slice)
    }
}

/// Merge duplicate ids and order by descending count.
///
/// The sort is stable, so ties keep the order in which the source produced
/// them.
fn rank(entries: Vec<ScoreEntry>) -> Vec<ScoreEntry> {
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(entries.len());
    let mut ranking: Vec<ScoreEntry> = Vec::with_capacity(entries.len());

    for entry in entries {
        match positions.get(&entry.item_id) {
            Some(&index) => ranking[index].count += entry.count,
            None => {
                positions.insert(entry.item_id.clone(), ranking.len());
                ranking.push(entry);
            }
        }
    }

    ranking.sort_by(|a, b| b.count.cmp(&a.count));
    ranking
}
