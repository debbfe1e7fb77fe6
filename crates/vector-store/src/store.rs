use crate::embeddings::EmbeddingModel;
use crate::error::{Result, VectorStoreError};
use crate::types::{Metadata, SearchHit, StoredDocument};
use crate::vector_index::VectorIndex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const VECTOR_STORE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedVectorStore {
    schema_version: u32,
    model_id: String,
    documents: BTreeMap<String, StoredDocument>,
}

/// Persistent id → (text, metadata, vector) store with cosine search
pub struct VectorStore {
    documents: BTreeMap<String, StoredDocument>,
    index: VectorIndex,
    embedder: Arc<EmbeddingModel>,
    path: PathBuf,
}

impl VectorStore {
    pub fn new(path: impl AsRef<Path>, embedder: Arc<EmbeddingModel>) -> Self {
        log::debug!("Initializing VectorStore at {:?}", path.as_ref());
        Self {
            documents: BTreeMap::new(),
            index: VectorIndex::new(),
            embedder,
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Load a saved store.
    ///
    /// Vectors written by a different embedding model are discarded.
    pub async fn load(path: impl AsRef<Path>, embedder: Arc<EmbeddingModel>) -> Result<Self> {
        let path = path.as_ref();
        log::info!("Loading VectorStore from {path:?}");
        let bytes = tokio::fs::read(path).await?;
        let persisted: PersistedVectorStore = serde_json::from_slice(&bytes)?;
        if persisted.schema_version != VECTOR_STORE_SCHEMA_VERSION {
            return Err(VectorStoreError::IndexError(format!(
                "Unsupported vector store schema_version {} (expected {})",
                persisted.schema_version, VECTOR_STORE_SCHEMA_VERSION
            )));
        }

        let mut store = Self::new(path, embedder);
        if persisted.model_id != store.embedder.model_id() {
            log::warn!(
                "Vector store was built with '{}', current model is '{}'; starting empty",
                persisted.model_id,
                store.embedder.model_id()
            );
            return Ok(store);
        }

        for (id, document) in persisted.documents {
            store.index.add(&id, &document.vector)?;
            store.documents.insert(id, document);
        }
        log::info!("Loaded {} vectors", store.documents.len());
        Ok(store)
    }

    /// Load from `path` when it exists and is readable, otherwise start empty.
    pub async fn open(path: impl AsRef<Path>, embedder: Arc<EmbeddingModel>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::new(path, embedder);
        }
        match Self::load(path, embedder.clone()).await {
            Ok(store) => store,
            Err(e) => {
                log::warn!("Ignoring unreadable vector store {path:?}: {e}");
                Self::new(path, embedder)
            }
        }
    }

    /// Insert or replace `id`. The stored vector is reused when `text` is unchanged.
    pub async fn upsert(&mut self, id: &str, text: &str, metadata: Metadata) -> Result<()> {
        if let Some(existing) = self.documents.get_mut(id) {
            if existing.text == text {
                existing.metadata = metadata;
                return Ok(());
            }
        }

        let vector = self.embedder.embed(text).await?;
        self.index.add(id, &vector)?;
        self.documents.insert(
            id.to_string(),
            StoredDocument {
                id: id.to_string(),
                text: text.to_string(),
                metadata,
                vector,
            },
        );
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.index.remove(id);
        self.documents.remove(id).is_some()
    }

    /// Up to `top_k` stored ids whose similarity to `text` is at least `threshold`
    pub async fn query(&self, text: &str, threshold: f32, top_k: usize) -> Result<Vec<SearchHit>> {
        if self.index.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        log::trace!("Querying for '{text}' (threshold: {threshold}, top_k: {top_k})");

        let query_vector = self.embedder.embed(text).await?;
        let hits = self
            .index
            .search(&query_vector, top_k, threshold)?
            .into_iter()
            .map(|(id, score)| SearchHit { id, score })
            .collect();
        Ok(hits)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&StoredDocument> {
        self.documents.get(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Write to a temp file and rename it over the target
    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let persisted = PersistedVectorStore {
            schema_version: VECTOR_STORE_SCHEMA_VERSION,
            model_id: self.embedder.model_id().to_string(),
            documents: self.documents.clone(),
        };
        let bytes = serde_json::to_vec(&persisted)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        log::debug!("Saved {} vectors to {:?}", self.documents.len(), self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn meta(file: &str) -> Metadata {
        Metadata::from([("file_path".to_string(), file.to_string())])
    }

    #[tokio::test]
    async fn test_upsert_and_query() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = VectorStore::new(
            temp_dir.path().join("index.json"),
            Arc::new(EmbeddingModel::stub()),
        );

        store
            .upsert("a.py::load", "config load parse yaml", meta("a.py"))
            .await
            .unwrap();
        store
            .upsert("b.py::load", "config load parse yaml", meta("b.py"))
            .await
            .unwrap();
        store
            .upsert("c.py::send", "retry socket timeout", meta("c.py"))
            .await
            .unwrap();
        assert_eq!(store.len(), 3);

        let ids: Vec<_> = store
            .query("config load parse yaml", 0.85, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|hit| hit.id)
            .collect();
        assert_eq!(ids, vec!["a.py::load", "b.py::load"]);
    }

    #[tokio::test]
    async fn upsert_replaces_and_reuses_vectors() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = VectorStore::new(
            temp_dir.path().join("index.json"),
            Arc::new(EmbeddingModel::stub()),
        );

        store.upsert("f", "alpha beta", meta("x.py")).await.unwrap();
        let first = store.get("f").unwrap().vector.clone();

        store.upsert("f", "alpha beta", meta("y.py")).await.unwrap();
        assert_eq!(store.get("f").unwrap().vector, first);
        assert_eq!(store.get("f").unwrap().metadata, meta("y.py"));

        store.upsert("f", "gamma delta", meta("y.py")).await.unwrap();
        assert_ne!(store.get("f").unwrap().vector, first);
        assert_eq!(store.len(), 1);

        assert!(store.remove("f"));
        assert!(store.query("gamma delta", 0.0, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state").join("index.json");
        let embedder = Arc::new(EmbeddingModel::stub());

        let mut store = VectorStore::new(&path, embedder.clone());
        store.upsert("f", "alpha beta", meta("x.py")).await.unwrap();
        store.save().await.unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = VectorStore::load(&path, embedder).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get("f"), store.get("f"));
    }

    #[tokio::test]
    async fn corrupt_file_opens_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.json");
        tokio::fs::write(&path, b"{ not json").await.unwrap();

        let store = VectorStore::open(&path, Arc::new(EmbeddingModel::stub())).await;
        assert!(store.is_empty());
    }
}
