use crate::embeddings::EmbeddingModel;
use crate::error::{Result, VectorStoreError};
use crate::store::VectorStore;
use crate::types::Metadata;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Nearest-neighbour lookup used for semantic clustering.
///
/// `available()` is decided once when the index is opened and does not change
/// for the rest of the run.
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    fn available(&self) -> bool;

    async fn upsert(&self, id: &str, text: &str, metadata: Metadata) -> Result<()>;

    /// Stored ids with similarity ≥ `threshold`, closest first, at most `top_k`
    async fn query(&self, text: &str, threshold: f32, top_k: usize) -> Result<Vec<String>>;

    async fn remove(&self, id: &str) -> Result<()>;

    /// Flush to durable storage, if any
    async fn persist(&self) -> Result<()> {
        Ok(())
    }
}

/// [`SimilarityIndex`] over a persistent [`VectorStore`]
pub struct StoreIndex {
    store: Mutex<VectorStore>,
    available: bool,
}

impl StoreIndex {
    /// Open the store at `path` and probe the embedder once.
    ///
    /// A disabled or unreachable embedder yields an index whose `available()`
    /// is false.
    pub async fn open(path: &Path, embedder: Arc<EmbeddingModel>, fresh: bool) -> Self {
        let available = if embedder.is_enabled() {
            match embedder.probe().await {
                Ok(dimension) => {
                    log::info!(
                        "Embedding model '{}' ready ({dimension} dimensions)",
                        embedder.model_id()
                    );
                    true
                }
                Err(e) => {
                    log::warn!("Embedding backend unavailable, using structural keys: {e}");
                    false
                }
            }
        } else {
            log::info!("Embeddings disabled, using structural keys");
            false
        };

        let store = if fresh || !available {
            VectorStore::new(path, embedder)
        } else {
            VectorStore::open(path, embedder).await
        };

        Self {
            store: Mutex::new(store),
            available,
        }
    }

    pub async fn len(&self) -> usize {
        self.store.lock().await.len()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(VectorStoreError::Unavailable(
                "embedding backend did not answer at startup".to_string(),
            ))
        }
    }
}

#[async_trait]
impl SimilarityIndex for StoreIndex {
    fn available(&self) -> bool {
        self.available
    }

    async fn upsert(&self, id: &str, text: &str, metadata: Metadata) -> Result<()> {
        self.ensure_available()?;
        self.store.lock().await.upsert(id, text, metadata).await
    }

    async fn query(&self, text: &str, threshold: f32, top_k: usize) -> Result<Vec<String>> {
        self.ensure_available()?;
        let hits = self.store.lock().await.query(text, threshold, top_k).await?;
        Ok(hits.into_iter().map(|hit| hit.id).collect())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.store.lock().await.remove(id);
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        if !self.available {
            return Ok(());
        }
        self.store.lock().await.save().await
    }
}

/// Index used when no similarity backend is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableIndex;

#[async_trait]
impl SimilarityIndex for UnavailableIndex {
    fn available(&self) -> bool {
        false
    }

    async fn upsert(&self, _id: &str, _text: &str, _metadata: Metadata) -> Result<()> {
        Err(VectorStoreError::Unavailable("no similarity backend".to_string()))
    }

    async fn query(&self, _text: &str, _threshold: f32, _top_k: usize) -> Result<Vec<String>> {
        Err(VectorStoreError::Unavailable("no similarity backend".to_string()))
    }

    async fn remove(&self, _id: &str) -> Result<()> {
        Ok(())
    }
}
