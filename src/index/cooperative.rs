//! In-memory-first index for bulk indexing passes.
//!
//! Guarded by a `tokio` reader-writer lock: waiting for the lock suspends the
//! task instead of blocking a worker thread. Disk access happens only in
//! `save_to_disk`/`load_from_disk`, always on the whole map, and runs on the
//! blocking pool so the lock holder yields while the I/O is in flight.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedRwLockReadGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::IndexResult;
use crate::index::contract::AsyncEmbeddingSearchIndex;
use crate::index::entries::EntryTable;
use crate::index::search::{self, CloseMatches};
use crate::vector::{Embedding, EntityId, IndexFileStore, ScoredText, VectorDimension};

#[derive(Debug, Default)]
pub struct CooperativeState {
    table: EntryTable,
    limit: Option<usize>,
}

impl CooperativeState {
    fn at_limit(&self) -> bool {
        self.limit.is_some_and(|limit| self.table.len() >= limit)
    }

    fn evict_to_limit(&mut self) -> usize {
        let Some(limit) = self.limit else {
            return 0;
        };
        let mut evicted = 0;
        while self.table.len() > limit {
            let Some(last) = self.table.last_id().cloned() else {
                break;
            };
            self.table.swap_remove(&last);
            evicted += 1;
        }
        evicted
    }
}

/// Lazy scan returned by [`CooperativeEmbeddingIndex::stream_find_close`].
pub type CooperativeMatches = CloseMatches<OwnedRwLockReadGuard<CooperativeState, EntryTable>>;

#[derive(Debug)]
pub struct CooperativeEmbeddingIndex {
    state: Arc<RwLock<CooperativeState>>,
    /// Ids not yet seen by `contains` during the current indexing pass
    unchecked: Mutex<HashSet<EntityId>>,
    store: IndexFileStore,
    cancel: CancellationToken,
}

impl CooperativeEmbeddingIndex {
    pub fn new(root: impl Into<PathBuf>, dimension: VectorDimension) -> Self {
        Self {
            state: Arc::new(RwLock::new(CooperativeState::default())),
            unchecked: Mutex::new(HashSet::new()),
            store: IndexFileStore::new(root, dimension),
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_settings(settings: &Settings) -> IndexResult<Self> {
        let dimension = VectorDimension::new(settings.dimensions)?;
        Ok(Self::new(settings.index_path.clone(), dimension).with_limit(settings.effective_limit()))
    }

    /// Sets the limit without evicting. Meant for construction; once a stream
    /// holds the state, use [`set_limit`](AsyncEmbeddingSearchIndex::set_limit).
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        match Arc::get_mut(&mut self.state) {
            Some(state) => state.get_mut().limit = limit,
            None => warn!(?limit, "state is shared by an open stream, limit not applied"),
        }
        self
    }

    /// Uses `cancel` to abort bulk save/load.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn store(&self) -> &IndexFileStore {
        &self.store
    }

    /// Occurrence count of `id`, if present.
    pub async fn ref_count(&self, id: &str) -> Option<u32> {
        self.state.read().await.table.get(id).map(|entry| entry.ref_count)
    }

    /// Ids in storage order.
    pub async fn ids(&self) -> Vec<EntityId> {
        self.state.read().await.table.ids().to_vec()
    }
}

impl AsyncEmbeddingSearchIndex for CooperativeEmbeddingIndex {
    type Matches = CooperativeMatches;

    async fn size(&self) -> usize {
        self.state.read().await.table.len()
    }

    fn dimensions(&self) -> usize {
        self.store.dimension().get()
    }

    async fn limit(&self) -> Option<usize> {
        self.state.read().await.limit
    }

    async fn set_limit(&self, limit: Option<usize>) {
        let mut state = self.state.write().await;
        state.limit = limit;
        let evicted = state.evict_to_limit();
        if evicted > 0 {
            debug!(evicted, ?limit, "evicted entries to fit limit");
        }
    }

    async fn contains(&self, id: &str) -> bool {
        let present = self.state.read().await.table.contains(id);
        self.unchecked.lock().remove(id);
        present
    }

    async fn add_entries<I>(&self, pairs: I, count_occurrence: bool) -> IndexResult<()>
    where
        I: IntoIterator<Item = (EntityId, Embedding)> + Send,
        I::IntoIter: Send,
    {
        let dimension = self.store.dimension();
        let mut state = self.state.write().await;

        for (id, embedding) in pairs {
            if state.at_limit() {
                break;
            }
            dimension.validate(&embedding)?;
            if state.table.contains(&id) {
                if count_occurrence {
                    state.table.increment(&id);
                }
            } else {
                state.table.push(id, embedding, 1);
            }
        }
        Ok(())
    }

    async fn lookup(&self, id: &str) -> Option<Embedding> {
        self.state
            .read()
            .await
            .table
            .get(id)
            .map(|entry| entry.embedding.clone())
    }

    async fn clear(&self) {
        self.state.write().await.table.clear();
        self.unchecked.lock().clear();
    }

    async fn on_indexing_start(&self) {
        let ids = self.ids().await;
        let mut unchecked = self.unchecked.lock();
        unchecked.clear();
        unchecked.extend(ids);
    }

    async fn on_indexing_finish(&self) {
        let stale: Vec<EntityId> = self.unchecked.lock().drain().collect();
        if stale.is_empty() {
            return;
        }

        let mut state = self.state.write().await;
        let removed = stale
            .iter()
            .filter(|id| state.table.swap_remove(id).is_some())
            .count();
        if removed > 0 {
            info!(removed, "evicted entries not seen during indexing");
        }
    }

    async fn find_closest(
        &self,
        query: &Embedding,
        top_k: usize,
        threshold: Option<f32>,
    ) -> IndexResult<Vec<ScoredText>> {
        let guard = self.state.clone().read_owned().await;
        let query = query.clone();
        let hits = tokio::task::spawn_blocking(move || {
            search::find_closest(&guard.table, &query, top_k, threshold)
        })
        .await?;
        Ok(hits)
    }

    async fn stream_find_close(&self, query: &Embedding, threshold: Option<f32>) -> Self::Matches {
        let guard = self.state.clone().read_owned().await;
        let guard = OwnedRwLockReadGuard::map(guard, |state| &state.table);
        CloseMatches::new(guard, query.clone(), threshold)
    }

    async fn save_to_disk(&self) -> IndexResult<()> {
        let state = self.state.read().await;
        let ids = state.table.ids().to_vec();
        let embeddings = state.table.embeddings();
        let store = self.store.clone();
        let cancel = self.cancel.clone();

        tokio::task::spawn_blocking(move || store.save_index(&ids, &embeddings, &cancel)).await??;
        drop(state);
        Ok(())
    }

    async fn load_from_disk(&self) -> IndexResult<()> {
        let mut state = self.state.write().await;
        let store = self.store.clone();
        let cancel = self.cancel.clone();

        let Some(persisted) =
            tokio::task::spawn_blocking(move || store.load_index(&cancel)).await??
        else {
            return Ok(());
        };

        let limit = state.limit.unwrap_or(usize::MAX);
        let mut table = EntryTable::new();
        for (id, embedding) in persisted.into_pairs().take(limit) {
            if !table.contains(&id) {
                table.push(id, embedding, 1);
            }
        }

        state.table = table;
        Ok(())
    }

    async fn estimate_memory_usage(&self) -> u64 {
        crate::vector::estimate_memory_usage(self.dimensions(), self.size().await)
    }

    async fn check_can_add_entry(&self) -> bool {
        !self.state.read().await.at_limit()
    }
}
