//! Embedding search indexes.
//!
//! Both implementations store entries in an [`EntryTable`] and differ only in
//! how they guard it and when they touch disk:
//! - [`BlockingEmbeddingIndex`]: `parking_lot` reader-writer lock, reference
//!   counted, every single-entry edit mirrored to disk immediately
//! - [`CooperativeEmbeddingIndex`]: `tokio` reader-writer lock, in-memory until
//!   an explicit bulk save, with an unchecked-id sweep for indexing passes

mod blocking;
mod contract;
mod cooperative;
mod entries;
mod search;

pub use blocking::BlockingEmbeddingIndex;
pub use contract::{AsyncEmbeddingSearchIndex, EmbeddingSearchIndex};
pub use cooperative::{CooperativeEmbeddingIndex, CooperativeMatches, CooperativeState};
pub use entries::{EntryTable, IndexEntry, Removed};
pub use search::{CloseMatches, find_closest};
