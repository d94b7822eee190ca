//! Popularity Cache
//!
//! Keeps one ranking per `(category, item type, item id)` in a sorted-set
//! store and rebuilds it from the source of record on a cold first-page read.
//!
//! - **keys**: deterministic key scheme shared with every process using the store
//! - **scripts**: digest-addressed script registration
//! - **store**: sorted-set adapter (conditional increment, ranged read, bulk set)
//! - **engine**: the read/write state machine

mod engine;
mod error;
mod keys;
mod lock;
pub mod memory;
mod scripts;
mod store;

pub use engine::PopularityCache;
pub use error::{PopularError, StoreError};
pub use keys::ScoreKey;
pub use memory::MemoryStore;
pub use scripts::{ScriptBackend, ScriptHandle, ScriptRegistry, ScriptReply, script_sha1};
pub use store::{
    CONDITIONAL_INCR_NUM_KEYS, CONDITIONAL_INCR_SCRIPT, CONDITIONAL_INCR_SCRIPT_NAME, CachedRange,
    SortedSetBackend, SortedSetStore,
};
