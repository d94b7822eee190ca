//! Score key scheme.
//!
//! Keys are persisted in the sorted-set store and must stay resolvable across
//! process restarts, so the format below is part of the storage contract.

use std::fmt;

use crate::domain::types::ItemType;

const KEY_PREFIX: &str = "popular";

/// Sorted-set key for one `(category, item type, item id)` ranking.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScoreKey(String);

impl ScoreKey {
    /// Derive the key as `popular.<category>.<item type>[<item id>]`.
    ///
    /// Category and item type are lower-cased; the item id is kept verbatim.
    pub fn derive(category: &str, item_type: ItemType, item_id: &str) -> Self {
        Self(format!(
            "{KEY_PREFIX}.{}.{}[{item_id}]",
            category.to_lowercase(),
            item_type.as_str().to_lowercase(),
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ScoreKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_documented_format() {
        let key = ScoreKey::derive("LIKE", ItemType::Assets, "asset-1");
        assert_eq!(key.as_str(), "popular.like.assets[asset-1]");
    }

    #[test]
    fn category_case_does_not_affect_key() {
        let upper = ScoreKey::derive("FLAG", ItemType::Assets, "a");
        let lower = ScoreKey::derive("flag", ItemType::Assets, "a");
        let mixed = ScoreKey::derive("Flag", ItemType::Assets, "a");
        assert_eq!(upper, lower);
        assert_eq!(lower, mixed);
    }

    #[test]
    fn item_id_is_not_case_folded() {
        let a = ScoreKey::derive("like", ItemType::Assets, "Abc");
        let b = ScoreKey::derive("like", ItemType::Assets, "abc");
        assert_ne!(a, b);
    }

    #[test]
    fn distinct_triples_produce_distinct_keys() {
        let keys = [
            ScoreKey::derive("like", ItemType::Assets, "1"),
            ScoreKey::derive("flag", ItemType::Assets, "1"),
            ScoreKey::derive("like", ItemType::Comments, "1"),
            ScoreKey::derive("like", ItemType::Assets, "2"),
        ];
        for (i, left) in keys.iter().enumerate() {
            for right in keys.iter().skip(i + 1) {
                assert_ne!(left, right);
            }
        }
    }
}
