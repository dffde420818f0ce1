//! Dense, position-ordered entry table.
//!
//! Both directions of the index (position -> id and id -> entry) live in one
//! type. Every mutation goes through a method here, so `entries[id].position == p`
//! holds exactly when `ids[p] == id`. Removal is a swap-remove, mirroring the
//! swap-and-truncate layout of the vector file.

use std::collections::HashMap;

use crate::vector::{Embedding, EntityId};

/// One stored item.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// Current slot in the dense storage order
    pub position: usize,
    /// Number of registered occurrences of this id
    pub ref_count: u32,
    pub embedding: Embedding,
}

/// Outcome of a swap-remove.
#[derive(Debug, Clone, PartialEq)]
pub struct Removed {
    pub entry: IndexEntry,
    /// Id that was moved from the last slot into the freed position, if any
    pub moved: Option<EntityId>,
}

#[derive(Debug, Default, Clone)]
pub struct EntryTable {
    ids: Vec<EntityId>,
    entries: HashMap<EntityId, IndexEntry>,
}

impl EntryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&IndexEntry> {
        self.entries.get(id)
    }

    pub fn id_at(&self, position: usize) -> Option<&EntityId> {
        self.ids.get(position)
    }

    /// Id at the highest position.
    pub fn last_id(&self) -> Option<&EntityId> {
        self.ids.last()
    }

    /// Ids in position order.
    pub fn ids(&self) -> &[EntityId] {
        &self.ids
    }

    /// `(id, entry)` pairs in position order.
    pub fn iter(&self) -> impl Iterator<Item = (&EntityId, &IndexEntry)> + '_ {
        self.ids.iter().map(move |id| (id, &self.entries[id]))
    }

    /// Embeddings in position order.
    pub fn embeddings(&self) -> Vec<Embedding> {
        self.iter().map(|(_, entry)| entry.embedding.clone()).collect()
    }

    /// Appends a fresh id at the next position and returns that position.
    ///
    /// The caller must have checked the id is absent.
    pub fn push(&mut self, id: EntityId, embedding: Embedding, ref_count: u32) -> usize {
        debug_assert!(!self.entries.contains_key(&id), "duplicate id {id}");
        let position = self.ids.len();
        self.ids.push(id.clone());
        self.entries.insert(
            id,
            IndexEntry {
                position,
                ref_count,
                embedding,
            },
        );
        self.debug_check_slot(position);
        position
    }

    /// Bumps the occurrence count and returns the new value.
    pub fn increment(&mut self, id: &str) -> Option<u32> {
        let entry = self.entries.get_mut(id)?;
        entry.ref_count += 1;
        Some(entry.ref_count)
    }

    /// Drops one occurrence and returns the remaining count. Does not remove
    /// the entry when the count reaches zero.
    pub fn decrement(&mut self, id: &str) -> Option<u32> {
        let entry = self.entries.get_mut(id)?;
        entry.ref_count = entry.ref_count.saturating_sub(1);
        Some(entry.ref_count)
    }

    /// Removes `id`, moving the last entry into its slot.
    pub fn swap_remove(&mut self, id: &str) -> Option<Removed> {
        let entry = self.entries.remove(id)?;
        let position = entry.position;
        debug_assert_eq!(self.ids[position].as_ref(), id);

        self.ids.swap_remove(position);
        let moved = self.ids.get(position).cloned();
        if let Some(moved_id) = &moved {
            if let Some(moved_entry) = self.entries.get_mut(moved_id) {
                moved_entry.position = position;
            }
        }

        debug_assert!(!self.entries.contains_key(id));
        self.debug_check_slot(position);
        Some(Removed { entry, moved })
    }

    /// Relabels `old` as `new` in place, replacing its embedding.
    ///
    /// Returns the shared position, or `None` if `old` is absent or `new` is taken.
    pub fn rename(&mut self, old: &str, new: EntityId, embedding: Embedding) -> Option<usize> {
        if self.entries.contains_key(&new) {
            return None;
        }
        let mut entry = self.entries.remove(old)?;
        let position = entry.position;
        entry.embedding = embedding;
        self.ids[position] = new.clone();
        debug_assert!(!self.entries.contains_key(old));
        self.entries.insert(new, entry);
        self.debug_check_slot(position);
        Some(position)
    }

    /// Keeps only ids present in `counts`, taking their counts from it.
    ///
    /// Survivors keep their relative order and are compacted to `0..n`.
    /// Ids mapped to a zero count are dropped.
    pub fn retain_with_counts(&mut self, counts: &HashMap<EntityId, u32>) {
        let ids = std::mem::take(&mut self.ids);
        let mut entries = std::mem::take(&mut self.entries);

        for id in ids {
            let Some(&count) = counts.get(&id) else {
                continue;
            };
            if count == 0 {
                continue;
            }
            if let Some(mut entry) = entries.remove(&id) {
                entry.position = self.ids.len();
                entry.ref_count = count;
                self.ids.push(id.clone());
                self.entries.insert(id, entry);
            }
        }

        self.debug_check();
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.entries.clear();
    }

    /// Verifies both directions agree at `position` (if occupied) in debug builds.
    fn debug_check_slot(&self, position: usize) {
        if cfg!(debug_assertions) {
            assert_eq!(self.ids.len(), self.entries.len(), "map sizes diverged");
            if let Some(id) = self.ids.get(position) {
                assert_eq!(
                    self.entries.get(id).map(|e| e.position),
                    Some(position),
                    "id {id} not at position {position}"
                );
            }
        }
    }

    /// Verifies the whole bidirectional invariant in debug builds.
    fn debug_check(&self) {
        if cfg!(debug_assertions) {
            assert_eq!(self.ids.len(), self.entries.len(), "map sizes diverged");
            for (position, id) in self.ids.iter().enumerate() {
                let entry = self.entries.get(id);
                assert_eq!(
                    entry.map(|e| e.position),
                    Some(position),
                    "id {id} not at position {position}"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn id(s: &str) -> EntityId {
        Arc::from(s)
    }

    fn emb(v: f32) -> Embedding {
        Embedding::from(vec![v, v])
    }

    fn table(names: &[&str]) -> EntryTable {
        let mut table = EntryTable::new();
        for (i, name) in names.iter().enumerate() {
            table.push(id(name), emb(i as f32), 1);
        }
        table
    }

    fn assert_consistent(table: &EntryTable) {
        for (position, id) in table.ids().iter().enumerate() {
            assert_eq!(table.get(id).unwrap().position, position);
            assert_eq!(table.id_at(position), Some(id));
        }
    }

    #[test]
    fn test_push_assigns_dense_positions() {
        let table = table(&["a", "b", "c"]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.get("c").unwrap().position, 2);
        assert_eq!(table.last_id().map(|s| s.as_ref()), Some("c"));
        assert_consistent(&table);
    }

    #[test]
    fn test_swap_remove_middle() {
        let mut table = table(&["a", "b", "c", "d"]);

        let removed = table.swap_remove("b").unwrap();
        assert_eq!(removed.entry.position, 1);
        assert_eq!(removed.moved.as_deref(), Some("d"));

        assert_eq!(table.get("d").unwrap().position, 1);
        assert_eq!(table.get("d").unwrap().embedding, emb(3.0));
        assert!(!table.contains("b"));
        assert_consistent(&table);
    }

    #[test]
    fn test_drain_from_tail_and_front() {
        let names: Vec<String> = (0..2_000).map(|i| format!("e{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut table = table(&refs);

        while table.len() > 1_000 {
            let last = table.last_id().cloned().unwrap();
            table.swap_remove(&last).unwrap();
        }
        for name in &names[..500] {
            table.swap_remove(name).unwrap();
        }

        assert_eq!(table.len(), 500);
        assert_consistent(&table);
    }

    #[test]
    fn test_swap_remove_last() {
        let mut table = table(&["a", "b"]);

        let removed = table.swap_remove("b").unwrap();
        assert_eq!(removed.moved, None);
        assert_eq!(table.len(), 1);
        assert_consistent(&table);

        assert!(table.swap_remove("missing").is_none());
    }

    #[test]
    fn test_reference_counts() {
        let mut table = table(&["x"]);
        assert_eq!(table.increment("x"), Some(2));
        assert_eq!(table.decrement("x"), Some(1));
        assert_eq!(table.decrement("x"), Some(0));
        assert_eq!(table.decrement("x"), Some(0));
        assert_eq!(table.increment("y"), None);
    }

    #[test]
    fn test_rename_in_place() {
        let mut table = table(&["a", "b", "c"]);

        assert_eq!(table.rename("b", id("z"), emb(9.0)), Some(1));
        assert!(!table.contains("b"));
        assert_eq!(table.get("z").unwrap().position, 1);
        assert_eq!(table.get("z").unwrap().embedding, emb(9.0));
        assert_consistent(&table);

        // Target taken or source missing
        assert_eq!(table.rename("a", id("c"), emb(1.0)), None);
        assert_eq!(table.rename("missing", id("q"), emb(1.0)), None);
        assert!(table.contains("a"));
    }

    #[test]
    fn test_retain_with_counts_compacts() {
        let mut table = table(&["a", "b", "c", "d"]);
        let counts: HashMap<EntityId, u32> =
            [(id("d"), 3), (id("b"), 2), (id("c"), 0), (id("zzz"), 1)]
                .into_iter()
                .collect();

        table.retain_with_counts(&counts);

        let names: Vec<&str> = table.ids().iter().map(|s| s.as_ref()).collect();
        assert_eq!(names, vec!["b", "d"]);
        assert_eq!(table.get("b").unwrap().ref_count, 2);
        assert_eq!(table.get("d").unwrap().ref_count, 3);
        assert_consistent(&table);
    }

    #[test]
    fn test_iter_in_position_order() {
        let mut table = table(&["a", "b", "c"]);
        table.swap_remove("a");
        let order: Vec<&str> = table.iter().map(|(id, _)| id.as_ref()).collect();
        assert_eq!(order, vec!["c", "b"]);
        assert_eq!(table.embeddings(), vec![emb(2.0), emb(1.0)]);
    }
}
