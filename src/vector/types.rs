//! Type-safe wrappers and core types for embedding storage and search.
//!
//! This module provides newtypes following the project's strict type safety
//! guidelines. All types implement necessary traits for ergonomic usage while
//! preventing primitive obsession.

use std::sync::Arc;

use serde::Serialize;

use crate::error::{IndexError, IndexResult};

/// Default embedding dimensionality for new indexes.
pub const DEFAULT_DIMENSIONS: usize = 128;

/// Number of bytes per f32 value.
pub const BYTES_PER_F32: usize = 4;

/// Identifier of one embedded item (a symbol, a file, ...).
///
/// Shared between the position and id directions of an index so each id
/// string is allocated once.
pub type EntityId = Arc<str>;

/// A fixed-length embedding vector.
///
/// Backed by `Arc<[f32]>`, so clones share the buffer. That keeps snapshots
/// taken for background persistence cheap.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Arc<[f32]>);

impl Embedding {
    /// Wraps raw values without normalizing them.
    #[must_use]
    pub fn new(values: impl Into<Arc<[f32]>>) -> Self {
        Self(values.into())
    }

    /// Number of components.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.0.len()
    }

    /// Borrows the raw components.
    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.0
    }

    /// Dot product. For L2-normalized inputs this is the cosine similarity.
    ///
    /// Extra trailing components of the longer vector are ignored.
    #[must_use]
    pub fn dot(&self, other: &Embedding) -> f32 {
        self.0.iter().zip(other.0.iter()).map(|(a, b)| a * b).sum()
    }

    /// L2 norm.
    #[must_use]
    pub fn norm(&self) -> f32 {
        self.0.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Returns a unit-length copy. A zero vector stays zero.
    #[must_use]
    pub fn normalized(&self) -> Embedding {
        let norm = self.norm();
        if norm == 0.0 {
            return self.clone();
        }
        Embedding(self.0.iter().map(|v| v / norm).collect())
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self(values.into())
    }
}

impl From<&[f32]> for Embedding {
    fn from(values: &[f32]) -> Self {
        Self(values.into())
    }
}

/// Type-safe wrapper for vector dimensions.
///
/// Ensures runtime validation of embedding dimensions to prevent
/// dimension mismatches during operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Creates a new `VectorDimension` with validation.
    ///
    /// Returns an error if the dimension is zero.
    pub fn new(dim: usize) -> IndexResult<Self> {
        if dim == 0 {
            return Err(IndexError::InvalidDimension {
                dimension: 0,
                reason: "Vector dimension cannot be zero",
            });
        }
        Ok(Self(dim))
    }

    /// The standard 128-dimensional configuration.
    #[must_use]
    pub const fn default_128() -> Self {
        Self(DEFAULT_DIMENSIONS)
    }

    /// Returns the underlying dimension value.
    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Size of one stored record in bytes.
    #[must_use]
    pub const fn record_size(&self) -> usize {
        self.0 * BYTES_PER_F32
    }

    /// Validates that an embedding has the expected dimension.
    pub fn validate(&self, embedding: &Embedding) -> IndexResult<()> {
        if embedding.dimensions() != self.0 {
            return Err(IndexError::DimensionMismatch {
                expected: self.0,
                actual: embedding.dimensions(),
            });
        }
        Ok(())
    }
}

impl Default for VectorDimension {
    fn default() -> Self {
        Self::default_128()
    }
}

/// A search hit: the id and its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredText {
    pub id: EntityId,
    pub score: f32,
}

impl ScoredText {
    pub fn new(id: EntityId, score: f32) -> Self {
        Self { id, score }
    }
}

/// Bytes needed to hold `entries` embeddings of `dimensions` components.
#[must_use]
pub fn estimate_memory_usage(dimensions: usize, entries: usize) -> u64 {
    (entries as u64) * (dimensions * BYTES_PER_F32) as u64
}

/// How many embeddings of `dimensions` components fit into `bytes`.
#[must_use]
pub fn estimate_limit_by_memory(dimensions: usize, bytes: u64) -> usize {
    let per_entry = (dimensions * BYTES_PER_F32).max(1) as u64;
    (bytes / per_entry) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_dimension() {
        let dim = VectorDimension::new(384).unwrap();
        assert_eq!(dim.get(), 384);
        assert_eq!(dim.record_size(), 384 * 4);

        assert_eq!(VectorDimension::default().get(), 128);

        // Invalid dimension
        assert!(VectorDimension::new(0).is_err());

        // Validation
        assert!(dim.validate(&Embedding::from(vec![0.1; 384])).is_ok());
        assert!(matches!(
            dim.validate(&Embedding::from(vec![0.1; 100])),
            Err(IndexError::DimensionMismatch {
                expected: 384,
                actual: 100
            })
        ));
    }

    #[test]
    fn test_normalized_and_dot() {
        let e = Embedding::from(vec![3.0, 4.0]);
        assert!((e.norm() - 5.0).abs() < 1e-6);

        let unit = e.normalized();
        assert!((unit.norm() - 1.0).abs() < 1e-6);
        assert!((unit.dot(&unit) - 1.0).abs() < 1e-6);

        let zero = Embedding::from(vec![0.0, 0.0]);
        assert_eq!(zero.normalized(), zero);

        let x = Embedding::from(vec![1.0, 0.0]);
        let y = Embedding::from(vec![0.0, 1.0]);
        assert_eq!(x.dot(&y), 0.0);
    }

    #[test]
    fn test_clone_shares_buffer() {
        let e = Embedding::from(vec![1.0; 8]);
        let c = e.clone();
        assert!(std::ptr::eq(e.values().as_ptr(), c.values().as_ptr()));
    }

    #[test]
    fn test_memory_estimates() {
        assert_eq!(estimate_memory_usage(128, 10), 5120);
        assert_eq!(estimate_limit_by_memory(128, 5120), 10);
        assert_eq!(estimate_limit_by_memory(128, 5119), 9);
        assert_eq!(estimate_limit_by_memory(128, 0), 0);
    }
}
