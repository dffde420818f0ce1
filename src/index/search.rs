//! Similarity search over an [`EntryTable`].
//!
//! Scores are dot products, i.e. cosine similarity for L2-normalized
//! embeddings. A threshold keeps only hits with `score > threshold`.

use std::iter::FusedIterator;
use std::ops::Deref;

use rayon::prelude::*;

use crate::index::entries::EntryTable;
use crate::vector::{Embedding, ScoredText};

fn passes(score: f32, threshold: Option<f32>) -> bool {
    !score.is_nan() && threshold.is_none_or(|t| score > t)
}

/// Top `top_k` hits by descending score.
///
/// The sort is stable over position order, so equal scores come out with the
/// lower position first.
pub fn find_closest(
    table: &EntryTable,
    query: &Embedding,
    top_k: usize,
    threshold: Option<f32>,
) -> Vec<ScoredText> {
    if top_k == 0 || table.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(usize, f32)> = table
        .ids()
        .par_iter()
        .enumerate()
        .filter_map(|(position, id)| {
            let entry = table.get(id)?;
            let score = entry.embedding.dot(query);
            passes(score, threshold).then_some((position, score))
        })
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(top_k);

    scored
        .into_iter()
        .filter_map(|(position, score)| {
            table
                .id_at(position)
                .map(|id| ScoredText::new(id.clone(), score))
        })
        .collect()
}

/// Lazy, unordered, single-pass scan over every entry above the threshold.
///
/// Holds the read guard it was built from until dropped, so writers wait for
/// the scan to finish or be abandoned.
pub struct CloseMatches<G> {
    guard: G,
    query: Embedding,
    threshold: Option<f32>,
    cursor: usize,
}

impl<G> CloseMatches<G>
where
    G: Deref<Target = EntryTable>,
{
    pub fn new(guard: G, query: Embedding, threshold: Option<f32>) -> Self {
        Self {
            guard,
            query,
            threshold,
            cursor: 0,
        }
    }
}

impl<G> Iterator for CloseMatches<G>
where
    G: Deref<Target = EntryTable>,
{
    type Item = ScoredText;

    fn next(&mut self) -> Option<ScoredText> {
        while let Some(id) = self.guard.id_at(self.cursor) {
            self.cursor += 1;
            let Some(entry) = self.guard.get(id) else {
                continue;
            };
            let score = entry.embedding.dot(&self.query);
            if passes(score, self.threshold) {
                return Some(ScoredText::new(id.clone(), score));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.guard.len().saturating_sub(self.cursor)))
    }
}

impl<G> FusedIterator for CloseMatches<G> where G: Deref<Target = EntryTable> {}

impl<G> std::fmt::Debug for CloseMatches<G>
where
    G: Deref<Target = EntryTable>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloseMatches")
            .field("cursor", &self.cursor)
            .field("len", &self.guard.len())
            .field("threshold", &self.threshold)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn table(rows: &[(&str, [f32; 2])]) -> EntryTable {
        let mut table = EntryTable::new();
        for (id, v) in rows {
            table.push(Arc::from(*id), Embedding::from(v.to_vec()).normalized(), 1);
        }
        table
    }

    fn names(hits: &[ScoredText]) -> Vec<&str> {
        hits.iter().map(|h| h.id.as_ref()).collect()
    }

    #[test]
    fn test_find_closest_orders_by_score() {
        let table = table(&[("A", [1.0, 0.0]), ("B", [0.0, 1.0]), ("C", [0.9, 0.1])]);
        let query = Embedding::from(vec![1.0, 0.0]);

        let hits = find_closest(&table, &query, 2, None);
        assert_eq!(names(&hits), vec!["A", "C"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);

        let all = find_closest(&table, &query, 10, None);
        assert_eq!(names(&all), vec!["A", "C", "B"]);
    }

    #[test]
    fn test_find_closest_threshold_is_strict() {
        let table = table(&[("A", [1.0, 0.0]), ("B", [0.0, 1.0])]);
        let query = Embedding::from(vec![1.0, 0.0]);

        let hits = find_closest(&table, &query, 10, Some(0.0));
        assert_eq!(names(&hits), vec!["A"]);

        assert!(find_closest(&table, &query, 10, Some(1.0)).is_empty());
        assert!(find_closest(&table, &query, 0, None).is_empty());
    }

    #[test]
    fn test_ties_keep_position_order() {
        let table = table(&[("first", [0.0, 1.0]), ("second", [0.0, 1.0]), ("third", [0.0, 1.0])]);
        let query = Embedding::from(vec![0.0, 1.0]);

        let hits = find_closest(&table, &query, 3, None);
        assert_eq!(names(&hits), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_close_matches_is_lazy_and_finite() {
        let table = table(&[("A", [1.0, 0.0]), ("B", [0.0, 1.0]), ("C", [0.9, 0.1])]);
        let query = Embedding::from(vec![1.0, 0.0]);

        let mut matches = CloseMatches::new(&table, query.clone(), Some(0.5));
        assert_eq!(matches.next().map(|h| h.id), Some(Arc::<str>::from("A")));
        assert_eq!(matches.next().map(|h| h.id), Some(Arc::<str>::from("C")));
        assert_eq!(matches.next(), None);
        assert_eq!(matches.next(), None);

        let unfiltered: Vec<_> = CloseMatches::new(&table, query, None).collect();
        assert_eq!(unfiltered.len(), 3);
    }
}
