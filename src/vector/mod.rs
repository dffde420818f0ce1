//! Embedding values and their on-disk representation.
//!
//! # Architecture
//! Embeddings are fixed-dimension f32 vectors. An index persists them as a
//! flat record file next to a JSON id list, so a single record can be read or
//! overwritten in place without touching the rest of the store.

mod storage;
mod types;

// Re-export core types for public API
pub use storage::{EMBEDDINGS_FILE_NAME, IDS_FILE_NAME, IndexFileStore, PersistedIndex};
pub use types::{
    BYTES_PER_F32, DEFAULT_DIMENSIONS, Embedding, EntityId, ScoredText, VectorDimension,
    estimate_limit_by_memory, estimate_memory_usage,
};
