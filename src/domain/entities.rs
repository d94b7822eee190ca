//! Domain records shared between the cache engine and its collaborators.

use serde::Serialize;

/// A member of a ranking with its aggregated score.
///
/// Counts are not clamped: a decrement on a member with score zero leaves
/// it negative until the next recompute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreEntry {
    pub item_id: String,
    pub count: i64,
}

impl ScoreEntry {
    pub fn new(item_id: impl Into<String>, count: i64) -> Self {
        Self {
            item_id: item_id.into(),
            count,
        }
    }
}

/// Entries ordered by descending count, each item id at most once.
pub type RankedSlice = Vec<ScoreEntry>;
