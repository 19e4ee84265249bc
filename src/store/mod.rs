//! Persistent hash-array-mapped trie.
//!
//! The context store must support O(1) snapshots and O(log n) updates while
//! never mutating a version that someone else may still observe. Every update
//! copies only the path from the root to the touched slot and shares all other
//! subtrees with the previous version.

mod iter;
mod map;
mod node;

use thiserror::Error;

pub use iter::Iter;
pub use map::PersistentMap;

/// Errors that can occur during store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Removal of a key that is not present.
    #[error("Key not found in persistent store")]
    KeyNotFound,
}
