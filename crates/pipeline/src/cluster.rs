use crate::error::Result;
use consolidator_extractor::{hash_prefix, Function};
use consolidator_vector_store::SimilarityIndex;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Complexity points per structural bucket
const COMPLEXITY_BUCKET: u32 = 5;
const STRUCTURAL_HASH_LEN: usize = 8;
const SEMANTIC_KEY_LEN: usize = 16;

/// How cluster keys are derived; chosen once per run
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClusterStrategy {
    /// Nearest-neighbour lookup in the similarity index
    Semantic { threshold: f32, top_k: usize },
    /// `(name, arg_count, complexity bucket, keyword hash)`
    Structural,
}

impl ClusterStrategy {
    #[must_use]
    pub fn select(
        index_available: bool,
        keywords_enabled: bool,
        threshold: f32,
        top_k: usize,
    ) -> Self {
        if index_available && keywords_enabled {
            Self::Semantic { threshold, top_k }
        } else {
            Self::Structural
        }
    }

    #[must_use]
    pub const fn is_semantic(&self) -> bool {
        matches!(self, Self::Semantic { .. })
    }
}

impl fmt::Display for ClusterStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Semantic { threshold, top_k } => {
                write!(f, "semantic (threshold {threshold}, top_k {top_k})")
            }
            Self::Structural => f.write_str("structural"),
        }
    }
}

/// A group of functions believed to implement the same thing
#[derive(Debug, Clone, Serialize)]
pub struct Cluster {
    pub key: String,
    pub members: Vec<Function>,
    pub canonical: Function,
}

impl Cluster {
    fn new(key: String, first: Function) -> Self {
        Self {
            key,
            canonical: first.clone(),
            members: vec![first],
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Distinct files the members come from, sorted
    #[must_use]
    pub fn file_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.members.iter().map(|m| m.file_path.clone()).collect();
        paths.sort();
        paths.dedup();
        paths
    }

    /// Members stay ordered by location so restored and fresh runs agree.
    fn add(&mut self, function: Function) {
        if function.canonical_cmp(&self.canonical) == Ordering::Less {
            self.canonical = function.clone();
        }
        let slot = self
            .members
            .binary_search_by(|m| location_cmp(m, &function))
            .unwrap_or_else(|slot| slot);
        self.members.insert(slot, function);
    }

    fn remove(&mut self, id: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m.id != id);
        if self.members.len() == before {
            return false;
        }
        if self.canonical.id == id {
            if let Some(best) = self.members.iter().min_by(|a, b| a.canonical_cmp(b)) {
                self.canonical = best.clone();
            }
        }
        true
    }
}

fn location_cmp(a: &Function, b: &Function) -> Ordering {
    a.file_path
        .cmp(&b.file_path)
        .then_with(|| a.line_number.cmp(&b.line_number))
        .then_with(|| a.id.cmp(&b.id))
}

/// `struct:{name}:{arg_count}:{complexity/5}:{hash8(context_keywords)}`
#[must_use]
pub fn structural_key(function: &Function) -> String {
    format!(
        "struct:{}:{}:{}:{}",
        function.name,
        function.arg_count(),
        function.complexity / COMPLEXITY_BUCKET,
        hash_prefix(&function.context_keywords, STRUCTURAL_HASH_LEN)
    )
}

/// Key minted for a semantic cluster no existing member could donate
#[must_use]
pub fn semantic_key(context_keywords: &str) -> String {
    format!("sem:{}", hash_prefix(context_keywords, SEMANTIC_KEY_LEN))
}

/// Assigns functions to clusters and tracks the canonical candidate of each
pub struct ClusterBuilder {
    strategy: ClusterStrategy,
    index: Arc<dyn SimilarityIndex>,
    clusters: BTreeMap<String, Cluster>,
    memberships: HashMap<String, String>,
}

impl ClusterBuilder {
    pub fn new(strategy: ClusterStrategy, index: Arc<dyn SimilarityIndex>) -> Self {
        Self {
            strategy,
            index,
            clusters: BTreeMap::new(),
            memberships: HashMap::new(),
        }
    }

    #[must_use]
    pub const fn strategy(&self) -> ClusterStrategy {
        self.strategy
    }

    /// Assign `function` with the run's strategy and return its key.
    ///
    /// A function that already has a key keeps it. Errors come only from the
    /// similarity index; callers fall back to [`Self::assign_structural`].
    pub async fn assign(&mut self, function: &Function) -> Result<String> {
        if let Some(key) = self.memberships.get(&function.id) {
            return Ok(key.clone());
        }

        let key = match self.strategy {
            ClusterStrategy::Semantic { threshold, top_k } => {
                self.semantic_key_for(function, threshold, top_k).await?
            }
            ClusterStrategy::Structural => structural_key(function),
        };
        self.insert(&key, function.clone());
        Ok(key)
    }

    /// Assign by structural key regardless of strategy
    pub fn assign_structural(&mut self, function: &Function) -> String {
        let key = structural_key(function);
        self.insert(&key, function.clone());
        key
    }

    async fn semantic_key_for(
        &self,
        function: &Function,
        threshold: f32,
        top_k: usize,
    ) -> Result<String> {
        if function.context_keywords.is_empty() {
            return Ok(structural_key(function));
        }

        // One extra slot since the function usually finds itself
        let neighbours = self
            .index
            .query(&function.context_keywords, threshold, top_k + 1)
            .await?;

        let donor = neighbours
            .iter()
            .filter(|id| **id != function.id)
            .find_map(|id| self.memberships.get(id));

        Ok(match donor {
            Some(key) => key.clone(),
            None => semantic_key(&function.context_keywords),
        })
    }

    /// Put `function` under `key`, moving it out of any previous cluster.
    pub fn insert(&mut self, key: &str, function: Function) {
        if let Some(previous) = self.memberships.get(&function.id).cloned() {
            if previous == key {
                return;
            }
            self.remove(&function.id);
        }

        self.memberships.insert(function.id.clone(), key.to_string());
        match self.clusters.get_mut(key) {
            Some(cluster) => cluster.add(function),
            None => {
                self.clusters
                    .insert(key.to_string(), Cluster::new(key.to_string(), function));
            }
        }
    }

    /// Drop a function; empty clusters disappear.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(key) = self.memberships.remove(id) else {
            return false;
        };
        if let Some(cluster) = self.clusters.get_mut(&key) {
            cluster.remove(id);
            if cluster.is_empty() {
                self.clusters.remove(&key);
            }
        }
        true
    }

    #[must_use]
    pub fn cluster(&self, key: &str) -> Option<&Cluster> {
        self.clusters.get(key)
    }

    /// All clusters ordered by key
    pub fn clusters(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.values()
    }

    /// Clusters with more than one member, ordered by key
    #[must_use]
    pub fn multi_member_clusters(&self) -> Vec<Cluster> {
        self.clusters
            .values()
            .filter(|c| c.len() > 1)
            .cloned()
            .collect()
    }

    /// Function id → cluster key, sorted by id
    #[must_use]
    pub fn memberships(&self) -> BTreeMap<String, String> {
        self.memberships
            .iter()
            .map(|(id, key)| (id.clone(), key.clone()))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consolidator_extractor::ExtractionPath;
    use consolidator_vector_store::{EmbeddingModel, Metadata, StoreIndex, UnavailableIndex};
    use pretty_assertions::assert_eq;

    fn function(
        file: &str,
        name: &str,
        args: &[&str],
        complexity: u32,
        keywords: &str,
    ) -> Function {
        Function {
            id: format!("{file}::{name}"),
            name: name.to_string(),
            file_path: file.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
            line_number: 1,
            end_line: 3,
            docstring: None,
            complexity,
            content_hash: "h".to_string(),
            context_keywords: keywords.to_string(),
            semantic_hash: None,
            extraction: ExtractionPath::Formal,
        }
    }

    fn structural() -> ClusterBuilder {
        ClusterBuilder::new(ClusterStrategy::Structural, Arc::new(UnavailableIndex))
    }

    #[test]
    fn strategy_requires_index_and_keywords() {
        assert!(ClusterStrategy::select(true, true, 0.85, 5).is_semantic());
        assert_eq!(ClusterStrategy::select(false, true, 0.85, 5), ClusterStrategy::Structural);
        assert_eq!(ClusterStrategy::select(true, false, 0.85, 5), ClusterStrategy::Structural);
    }

    #[test]
    fn structural_key_buckets_complexity() {
        let f = function("a.py", "foo", &["x"], 7, "alpha beta");
        let key = structural_key(&f);
        assert!(key.starts_with("struct:foo:1:1:"), "{key}");
        assert_eq!(key.len(), "struct:foo:1:1:".len() + 8);

        let g = function("b.py", "foo", &["y"], 9, "alpha beta");
        assert_eq!(structural_key(&f), structural_key(&g));
    }

    #[tokio::test]
    async fn different_arity_lands_in_different_clusters() {
        let mut builder = structural();
        let a = builder.assign(&function("a.py", "foo", &["x"], 1, "")).await.unwrap();
        let b = builder
            .assign(&function("b.py", "foo", &["x", "y"], 1, ""))
            .await
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(builder.len(), 2);
        assert!(builder.multi_member_clusters().is_empty());
    }

    #[tokio::test]
    async fn assign_is_idempotent() {
        let mut builder = structural();
        let f = function("a.py", "foo", &["x"], 1, "alpha");
        let first = builder.assign(&f).await.unwrap();
        let second = builder.assign(&f).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(builder.cluster(&first).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn canonical_tracks_best_member() {
        let mut builder = structural();
        let plain = function("b.py", "load", &["p"], 2, "load path");
        let mut documented = function("a.py", "load", &["p"], 3, "load path");
        documented.docstring = Some("Load a path.".to_string());

        let key = builder.assign(&plain).await.unwrap();
        assert_eq!(builder.cluster(&key).unwrap().canonical.id, plain.id);

        builder.assign(&documented).await.unwrap();
        let cluster = builder.cluster(&key).unwrap();
        assert_eq!(cluster.len(), 2);
        assert_eq!(cluster.canonical.id, documented.id);
        assert_eq!(cluster.file_paths(), vec!["a.py", "b.py"]);

        builder.remove(&documented.id);
        assert_eq!(builder.cluster(&key).unwrap().canonical.id, plain.id);
        builder.remove(&plain.id);
        assert!(builder.cluster(&key).is_none());
    }

    #[tokio::test]
    async fn insert_moves_between_clusters() {
        let mut builder = structural();
        let f = function("a.py", "foo", &[], 1, "");
        builder.insert("k1", f.clone());
        builder.insert("k2", f.clone());
        assert!(builder.cluster("k1").is_none());
        assert_eq!(builder.memberships().get(&f.id).map(String::as_str), Some("k2"));
    }

    #[tokio::test]
    async fn semantic_neighbours_donate_their_key() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(
            StoreIndex::open(
                &dir.path().join("index.json"),
                Arc::new(EmbeddingModel::stub()),
                true,
            )
            .await,
        );
        let f1 = function("a.py", "read_config", &["path"], 2, "config load parse yaml");
        let f2 = function("b.py", "load_settings", &["p"], 4, "config load parse yaml");
        let f3 = function("c.py", "send", &["sock"], 1, "retry socket timeout");
        for f in [&f1, &f2, &f3] {
            index
                .upsert(&f.id, &f.context_keywords, Metadata::new())
                .await
                .unwrap();
        }

        let mut builder = ClusterBuilder::new(ClusterStrategy::select(true, true, 0.85, 5), index);
        let k1 = builder.assign(&f1).await.unwrap();
        let k2 = builder.assign(&f2).await.unwrap();
        let k3 = builder.assign(&f3).await.unwrap();

        assert_eq!(k1, semantic_key("config load parse yaml"));
        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
    }

    #[tokio::test]
    async fn semantic_without_keywords_uses_structural_key() {
        let mut builder = ClusterBuilder::new(
            ClusterStrategy::Semantic {
                threshold: 0.85,
                top_k: 5,
            },
            Arc::new(UnavailableIndex),
        );
        let f = function("a.py", "foo", &["x"], 1, "");
        assert_eq!(builder.assign(&f).await.unwrap(), structural_key(&f));

        let g = function("a.py", "bar", &["x"], 1, "alpha");
        assert!(builder.assign(&g).await.is_err());
        assert_eq!(builder.assign_structural(&g), structural_key(&g));
    }
}
