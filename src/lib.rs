/// The main library module for embindex
pub mod config;
pub mod error;
pub mod index;
pub mod logging;
pub mod vector;

// Explicit exports for better API clarity
pub use config::Settings;
pub use error::{IndexError, IndexResult};
pub use index::{
    AsyncEmbeddingSearchIndex, BlockingEmbeddingIndex, CooperativeEmbeddingIndex,
    EmbeddingSearchIndex, EntryTable, IndexEntry,
};
pub use vector::{Embedding, EntityId, IndexFileStore, ScoredText, VectorDimension};
