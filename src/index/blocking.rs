//! Reference-counted index kept in step with its files on disk.
//!
//! Single-entry edits ([`BlockingEmbeddingIndex::add_entry`],
//! [`BlockingEmbeddingIndex::delete_entry`], [`BlockingEmbeddingIndex::update_entry`])
//! write one vector record plus the id list while holding the exclusive lock.
//! Bulk operations (`add_entries`, `clear`, a limited or deduplicating
//! `load_from_disk`) only touch memory. They mark the files stale, and the next
//! single-entry edit rewrites both files from memory before its own write.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Settings;
use crate::error::IndexResult;
use crate::index::contract::EmbeddingSearchIndex;
use crate::index::entries::EntryTable;
use crate::index::search::{self, CloseMatches};
use crate::vector::{Embedding, EntityId, IndexFileStore, ScoredText, VectorDimension};

#[derive(Debug, Default)]
struct BlockingState {
    table: EntryTable,
    limit: Option<usize>,
    /// Memory changed without the files following
    files_stale: AtomicBool,
}

impl BlockingState {
    fn at_limit(&self) -> bool {
        self.limit.is_some_and(|limit| self.table.len() >= limit)
    }

    fn mark_stale(&self) {
        self.files_stale.store(true, Ordering::Release);
    }
}

/// Disk-synchronized embedding index guarded by a reader-writer lock.
///
/// Readers (`size`, `contains`, `find_closest`, `stream_find_close`,
/// `save_to_disk`) share the lock; every mutation takes it exclusively and
/// performs its file I/O before releasing it.
#[derive(Debug)]
pub struct BlockingEmbeddingIndex {
    state: RwLock<BlockingState>,
    /// Ids not yet seen by `contains` during the current indexing pass
    unchecked: Mutex<HashSet<EntityId>>,
    store: IndexFileStore,
    cancel: CancellationToken,
}

impl BlockingEmbeddingIndex {
    /// Creates an empty index whose files live under `root`.
    pub fn new(root: impl Into<PathBuf>, dimension: VectorDimension) -> Self {
        Self {
            state: RwLock::new(BlockingState::default()),
            unchecked: Mutex::new(HashSet::new()),
            store: IndexFileStore::new(root, dimension),
            cancel: CancellationToken::new(),
        }
    }

    /// Creates an index from configuration without loading anything.
    pub fn from_settings(settings: &Settings) -> IndexResult<Self> {
        let dimension = VectorDimension::new(settings.dimensions)?;
        Ok(Self::new(settings.index_path.clone(), dimension).with_limit(settings.effective_limit()))
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.state.get_mut().limit = limit;
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
    pub fn ref_count(&self, id: &str) -> Option<u32> {
        self.state.read().table.get(id).map(|entry| entry.ref_count)
    }

    /// Ids in storage order.
    pub fn ids(&self) -> Vec<EntityId> {
        self.state.read().table.ids().to_vec()
    }

    /// Registers one occurrence of `id`.
    ///
    /// A fresh id is written to the next record slot and the id list is
    /// rewritten. A known id only gains a reference; its stored embedding is
    /// assumed unchanged. Returns `false` if a fresh id was refused because the
    /// index is full.
    pub fn add_entry(&self, id: impl Into<EntityId>, embedding: Embedding) -> IndexResult<bool> {
        self.store.dimension().validate(&embedding)?;
        let mut state = self.state.write();
        self.add_locked(&mut state, id.into(), embedding)
    }

    /// Drops one occurrence of `id`, removing it once none remain.
    pub fn delete_entry(&self, id: &str) -> IndexResult<()> {
        let mut state = self.state.write();
        self.delete_locked(&mut state, id, false)
    }

    /// Replaces `id` with `new_id`.
    ///
    /// When `id` has a single occurrence and `new_id` is unused, the record is
    /// overwritten in place and only the id list is rewritten. Otherwise this is
    /// a delete of `id` followed by an add of `new_id`.
    pub fn update_entry(
        &self,
        id: &str,
        new_id: impl Into<EntityId>,
        embedding: Embedding,
    ) -> IndexResult<()> {
        self.store.dimension().validate(&embedding)?;
        let new_id = new_id.into();
        let mut state = self.state.write();

        let in_place = state
            .table
            .get(id)
            .filter(|entry| entry.ref_count == 1 && !state.table.contains(&new_id))
            .map(|entry| entry.position);

        if let Some(position) = in_place {
            self.sync_locked(&state)?;
            self.store.set(position, &embedding)?;
            state.table.rename(id, new_id, embedding);
            self.store.save_ids(state.table.ids())?;
            debug!(position, "renamed entry in place");
            return Ok(());
        }

        self.delete_locked(&mut state, id, false)?;
        self.add_locked(&mut state, new_id, embedding)?;
        Ok(())
    }

    /// Keeps only ids in `counts`, adopting those counts, then rewrites both files.
    pub fn filter_ids_to(&self, counts: &HashMap<EntityId, u32>) -> IndexResult<()> {
        let mut state = self.state.write();
        let before = state.table.len();
        state.table.retain_with_counts(counts);
        debug!(before, after = state.table.len(), "filtered ids");
        self.save_locked(&state)
    }

    fn add_locked(
        &self,
        state: &mut BlockingState,
        id: EntityId,
        embedding: Embedding,
    ) -> IndexResult<bool> {
        if state.table.increment(&id).is_some() {
            return Ok(true);
        }
        if state.at_limit() {
            debug!(%id, "index full, entry not admitted");
            return Ok(false);
        }

        self.sync_locked(state)?;
        let position = state.table.len();
        self.store.set(position, &embedding)?;
        state.table.push(id, embedding, 1);
        self.store.save_ids(state.table.ids())?;
        Ok(true)
    }

    /// Decrements `id`, or removes it outright when `all` is set.
    fn delete_locked(&self, state: &mut BlockingState, id: &str, all: bool) -> IndexResult<()> {
        let Some(entry) = state.table.get(id) else {
            return Ok(());
        };
        let position = entry.position;

        if !all && entry.ref_count > 1 {
            state.table.decrement(id);
            return Ok(());
        }

        self.sync_locked(state)?;
        self.store.remove_at_index(position)?;
        if let Some(removed) = state.table.swap_remove(id) {
            debug!(id, position, moved = ?removed.moved, "removed entry");
        }
        self.store.save_ids(state.table.ids())
    }

    fn save_locked(&self, state: &BlockingState) -> IndexResult<()> {
        let table = &state.table;
        self.store
            .save_index(table.ids(), &table.embeddings(), &self.cancel)?;
        state.files_stale.store(false, Ordering::Release);
        Ok(())
    }

    /// Rewrites both files from memory if they no longer mirror it record for
    /// record. Must run before any incremental write.
    fn sync_locked(&self, state: &BlockingState) -> IndexResult<()> {
        let stale = state.files_stale.load(Ordering::Acquire)
            || self.store.record_count()? != state.table.len();
        if stale {
            debug!(
                entries = state.table.len(),
                "files out of step with memory, rewriting before incremental write"
            );
            self.save_locked(state)?;
        }
        Ok(())
    }
}

impl EmbeddingSearchIndex for BlockingEmbeddingIndex {
    fn size(&self) -> usize {
        self.state.read().table.len()
    }

    fn dimensions(&self) -> usize {
        self.store.dimension().get()
    }

    fn limit(&self) -> Option<usize> {
        self.state.read().limit
    }

    fn set_limit(&self, limit: Option<usize>) -> IndexResult<()> {
        let mut state = self.state.write();
        state.limit = limit;

        if let Some(limit) = limit {
            while state.table.len() > limit {
                let Some(last) = state.table.last_id().cloned() else {
                    break;
                };
                self.delete_locked(&mut state, &last, true)?;
            }
        }
        Ok(())
    }

    fn contains(&self, id: &str) -> bool {
        let present = self.state.read().table.contains(id);
        self.unchecked.lock().remove(id);
        present
    }

    fn add_entries<I>(&self, pairs: I, count_occurrence: bool) -> IndexResult<()>
    where
        I: IntoIterator<Item = (EntityId, Embedding)>,
    {
        let dimension = self.store.dimension();
        let mut state = self.state.write();

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
                state.mark_stale();
            }
        }
        Ok(())
    }

    fn lookup(&self, id: &str) -> Option<Embedding> {
        self.state
            .read()
            .table
            .get(id)
            .map(|entry| entry.embedding.clone())
    }

    fn clear(&self) {
        let mut state = self.state.write();
        state.table.clear();
        state.mark_stale();
        drop(state);
        self.unchecked.lock().clear();
    }

    fn on_indexing_start(&self) {
        let state = self.state.read();
        let mut unchecked = self.unchecked.lock();
        unchecked.clear();
        unchecked.extend(state.table.ids().iter().cloned());
    }

    fn on_indexing_finish(&self) -> IndexResult<()> {
        let stale: Vec<EntityId> = self.unchecked.lock().drain().collect();
        if stale.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write();
        let mut removed = 0usize;
        for id in &stale {
            if state.table.swap_remove(id).is_some() {
                removed += 1;
            }
        }
        if removed == 0 {
            return Ok(());
        }

        info!(removed, "evicted entries not seen during indexing");
        self.save_locked(&state)
    }

    fn find_closest(
        &self,
        query: &Embedding,
        top_k: usize,
        threshold: Option<f32>,
    ) -> Vec<ScoredText> {
        let state = self.state.read();
        search::find_closest(&state.table, query, top_k, threshold)
    }

    fn stream_find_close(
        &self,
        query: &Embedding,
        threshold: Option<f32>,
    ) -> impl Iterator<Item = ScoredText> + '_ {
        let guard = RwLockReadGuard::map(self.state.read(), |state| &state.table);
        CloseMatches::new(guard, query.clone(), threshold)
    }

    fn save_to_disk(&self) -> IndexResult<()> {
        let state = self.state.read();
        self.save_locked(&state)
    }

    fn load_from_disk(&self) -> IndexResult<()> {
        let mut state = self.state.write();
        let Some(persisted) = self.store.load_index(&self.cancel)? else {
            return Ok(());
        };

        let persisted_len = persisted.len();
        let limit = state.limit.unwrap_or(usize::MAX);
        let mut table = EntryTable::new();
        for (id, embedding) in persisted.into_pairs().take(limit) {
            if table.contains(&id) {
                debug!(%id, "duplicate id in id file, keeping first occurrence");
                continue;
            }
            table.push(id, embedding, 1);
        }

        // A dropped record shifts later positions, so the files no longer line up
        let stale = table.len() != persisted_len;
        if stale {
            debug!(
                loaded = table.len(),
                persisted = persisted_len,
                "loaded a subset of the persisted index"
            );
        }
        state.table = table;
        state.files_stale.store(stale, Ordering::Release);
        Ok(())
    }
}
