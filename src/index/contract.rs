//! Operations every embedding index offers.
//!
//! Two flavours of the same contract exist because callers live in two
//! concurrency models: [`EmbeddingSearchIndex`] blocks the calling thread on
//! its lock and I/O, [`AsyncEmbeddingSearchIndex`] suspends the calling task.

use std::future::Future;

use crate::error::IndexResult;
use crate::vector::{Embedding, EntityId, ScoredText, estimate_limit_by_memory};

/// Thread-blocking index contract.
pub trait EmbeddingSearchIndex {
    /// Current entry count.
    fn size(&self) -> usize;

    /// Embedding dimensionality fixed at creation.
    fn dimensions(&self) -> usize;

    /// Current capacity limit.
    fn limit(&self) -> Option<usize>;

    /// Sets or clears the capacity limit, evicting from the highest position
    /// until the index fits.
    fn set_limit(&self, limit: Option<usize>) -> IndexResult<()>;

    /// Membership test. During an indexing pass this also marks `id` as seen.
    fn contains(&self, id: &str) -> bool;

    /// Inserts new ids or bumps occurrence counts of known ones.
    ///
    /// Once the limit is reached the remaining pairs are dropped without error.
    fn add_entries<I>(&self, pairs: I, count_occurrence: bool) -> IndexResult<()>
    where
        I: IntoIterator<Item = (EntityId, Embedding)>;

    fn lookup(&self, id: &str) -> Option<Embedding>;

    /// Removes every entry from memory. Files on disk are left alone.
    fn clear(&self);

    /// Marks every stored id as unchecked.
    fn on_indexing_start(&self);

    /// Evicts every id not passed to [`contains`](Self::contains) since
    /// [`on_indexing_start`](Self::on_indexing_start).
    fn on_indexing_finish(&self) -> IndexResult<()>;

    /// Up to `top_k` hits, best first. Equal scores keep position order.
    fn find_closest(
        &self,
        query: &Embedding,
        top_k: usize,
        threshold: Option<f32>,
    ) -> Vec<ScoredText>;

    /// Every hit above `threshold`, unordered and computed lazily.
    fn stream_find_close(
        &self,
        query: &Embedding,
        threshold: Option<f32>,
    ) -> impl Iterator<Item = ScoredText> + '_;

    fn save_to_disk(&self) -> IndexResult<()>;

    fn load_from_disk(&self) -> IndexResult<()>;

    fn estimate_memory_usage(&self) -> u64 {
        crate::vector::estimate_memory_usage(self.dimensions(), self.size())
    }

    fn estimate_limit_by_memory(&self, bytes: u64) -> usize {
        estimate_limit_by_memory(self.dimensions(), bytes)
    }

    /// True iff no limit is set or the index is below it.
    fn check_can_add_entry(&self) -> bool {
        self.limit().is_none_or(|limit| self.size() < limit)
    }
}

/// Task-suspending index contract.
///
/// Same semantics as [`EmbeddingSearchIndex`]; lock waits and disk I/O are
/// suspension points instead of blocking the thread.
pub trait AsyncEmbeddingSearchIndex: Send + Sync {
    /// Iterator returned by [`stream_find_close`](Self::stream_find_close).
    type Matches: Iterator<Item = ScoredText> + Send;

    fn size(&self) -> impl Future<Output = usize> + Send;

    fn dimensions(&self) -> usize;

    fn limit(&self) -> impl Future<Output = Option<usize>> + Send;

    fn set_limit(&self, limit: Option<usize>) -> impl Future<Output = ()> + Send;

    fn contains(&self, id: &str) -> impl Future<Output = bool> + Send;

    fn add_entries<I>(
        &self,
        pairs: I,
        count_occurrence: bool,
    ) -> impl Future<Output = IndexResult<()>> + Send
    where
        I: IntoIterator<Item = (EntityId, Embedding)> + Send,
        I::IntoIter: Send;

    fn lookup(&self, id: &str) -> impl Future<Output = Option<Embedding>> + Send;

    fn clear(&self) -> impl Future<Output = ()> + Send;

    fn on_indexing_start(&self) -> impl Future<Output = ()> + Send;

    fn on_indexing_finish(&self) -> impl Future<Output = ()> + Send;

    fn find_closest(
        &self,
        query: &Embedding,
        top_k: usize,
        threshold: Option<f32>,
    ) -> impl Future<Output = IndexResult<Vec<ScoredText>>> + Send;

    fn stream_find_close(
        &self,
        query: &Embedding,
        threshold: Option<f32>,
    ) -> impl Future<Output = Self::Matches> + Send;

    fn save_to_disk(&self) -> impl Future<Output = IndexResult<()>> + Send;

    fn load_from_disk(&self) -> impl Future<Output = IndexResult<()>> + Send;

    fn estimate_memory_usage(&self) -> impl Future<Output = u64> + Send;

    fn estimate_limit_by_memory(&self, bytes: u64) -> usize {
        estimate_limit_by_memory(self.dimensions(), bytes)
    }

    fn check_can_add_entry(&self) -> impl Future<Output = bool> + Send;
}
