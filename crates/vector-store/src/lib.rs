//! # Consolidator Vector Store
//!
//! Embedding-backed similarity search for extracted functions.
//!
//! ## Architecture
//!
//! ```text
//! context keywords
//!     │
//!     ├──> EmbeddingModel (HTTP endpoint / stub / off)
//!     │      └─> Vec<f32>
//!     │
//!     ├──> VectorIndex (brute-force cosine, keyed by function id)
//!     │
//!     └──> VectorStore (.consolidator/index.json, schema versioned)
//! ```
//!
//! Callers go through the [`SimilarityIndex`] trait. When the embedder cannot be
//! reached at startup the index reports `available() == false` and callers fall
//! back to structural keys for the rest of the run.
//!
//! ## Example
//!
//! ```no_run
//! use consolidator_vector_store::{EmbeddingModel, Metadata, SimilarityIndex, StoreIndex};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> consolidator_vector_store::Result<()> {
//!     let embedder = Arc::new(EmbeddingModel::stub());
//!     let index = StoreIndex::open(Path::new(".consolidator/index.json"), embedder, false).await;
//!
//!     index.upsert("util.py::load", "config load yaml", Metadata::new()).await?;
//!     let similar = index.query("config load yaml", 0.85, 5).await?;
//!     println!("{similar:?}");
//!
//!     index.persist().await
//! }
//! ```

mod embeddings;
mod error;
pub mod paths;
mod similarity;
mod store;
mod types;
mod vector_index;

pub use embeddings::{
    EmbeddingConfig, EmbeddingMode, EmbeddingModel, EmbeddingProvider, STUB_DIMENSION,
};
pub use error::{Result, VectorStoreError};
pub use similarity::{SimilarityIndex, StoreIndex, UnavailableIndex};
pub use store::{VectorStore, VECTOR_STORE_SCHEMA_VERSION};
pub use types::{Metadata, SearchHit, StoredDocument};
pub use vector_index::VectorIndex;
