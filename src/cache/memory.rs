//! In-process sorted-set backend.
//!
//! Emulates the subset of the sorted-set store the popularity cache relies
//! on. Scripts are tracked by digest like the real store; executing one
//! requires a native implementation registered for its source, and the
//! conditional increment ships pre-installed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

use crate::domain::entities::ScoreEntry;

use super::error::StoreError;
use super::scripts::{ScriptBackend, ScriptReply, script_sha1};
use super::store::{CONDITIONAL_INCR_SCRIPT, SortedSetBackend};

pub type Sets = DashMap<String, HashMap<String, i64>>;

/// Native stand-in for a server-side script.
pub type NativeScript = fn(&Sets, &[String], &[String]) -> Result<ScriptReply, StoreError>;

pub struct MemoryStore {
    sets: Sets,
    natives: DashMap<String, NativeScript>,
    loaded: DashSet<String>,
    loads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        let store = Self {
            sets: DashMap::new(),
            natives: DashMap::new(),
            loaded: DashSet::new(),
            loads: AtomicUsize::new(0),
        };
        store.install_native(CONDITIONAL_INCR_SCRIPT, conditional_increment);
        store
    }

    /// Make `source` executable once it has been loaded.
    pub fn install_native(&self, source: &str, script: NativeScript) {
        self.natives.insert(script_sha1(source), script);
    }

    /// Number of `script_load` calls served so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.sets.get(key).is_some_and(|set| !set.is_empty())
    }

    pub fn score(&self, key: &str, member: &str) -> Option<i64> {
        self.sets.get(key)?.get(member).copied()
    }

    /// Drop every set and loaded script.
    pub fn flush(&self) {
        self.sets.clear();
        self.loaded.clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScriptBackend for MemoryStore {
    async fn script_exists(&self, sha: &str) -> Result<bool, StoreError> {
        Ok(self.loaded.contains(&sha.to_ascii_lowercase()))
    }

    async fn script_load(&self, source: &str) -> Result<String, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let sha = script_sha1(source);
        self.loaded.insert(sha.clone());
        Ok(sha)
    }

    async fn eval_sha(
        &self,
        sha: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<ScriptReply, StoreError> {
        let sha = sha.to_ascii_lowercase();
        if !self.loaded.contains(&sha) {
            return Err(StoreError::NoScript { sha });
        }
        let script = *self
            .natives
            .get(&sha)
            .ok_or_else(|| StoreError::protocol(format!("no native implementation for `{sha}`")))?;
        script(&self.sets, keys, args)
    }
}

#[async_trait]
impl SortedSetBackend for MemoryStore {
    async fn range_desc_by_score(
        &self,
        key: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Option<Vec<ScoreEntry>>, StoreError> {
        let Some(set) = self.sets.get(key) else {
            return Ok(None);
        };
        if set.is_empty() {
            return Ok(None);
        }

        let mut entries: Vec<ScoreEntry> = set
            .iter()
            .map(|(member, score)| ScoreEntry::new(member.clone(), *score))
            .collect();
        drop(set);

        // Reverse reads order ties by member, descending.
        entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| b.item_id.cmp(&a.item_id)));

        Ok(Some(entries.into_iter().skip(offset).take(limit).collect()))
    }

    async fn bulk_set(&self, key: &str, entries: &[ScoreEntry]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut set = self.sets.entry(key.to_string()).or_default();
        for entry in entries {
            set.insert(entry.item_id.clone(), entry.count);
        }
        Ok(())
    }
}

fn conditional_increment(
    sets: &Sets,
    keys: &[String],
    args: &[String],
) -> Result<ScriptReply, StoreError> {
    let [key, member] = keys else {
        return Err(StoreError::protocol("increment script takes two keys"));
    };
    let delta: i64 = args
        .first()
        .ok_or_else(|| StoreError::protocol("increment script takes a delta"))?
        .parse()
        .map_err(|err| StoreError::protocol(format!("invalid delta: {err}")))?;

    match sets.get_mut(key) {
        Some(mut set) if !set.is_empty() => {
            let score = set.entry(member.clone()).or_insert(0);
            *score = score.checked_add(delta).ok_or_else(|| {
                StoreError::protocol(format!("increment would overflow the score of `{member}`"))
            })?;
            Ok(ScriptReply::Text(score.to_string()))
        }
        _ => Ok(ScriptReply::Nil),
    }
}
