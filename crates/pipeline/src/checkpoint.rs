use crate::cluster::ClusterBuilder;
use crate::error::Result;
use consolidator_extractor::{Function, ParseError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

pub const CHECKPOINT_SCHEMA_VERSION: u32 = 1;

/// Everything a later run needs to resume without redoing finished work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Files whose functions are recorded below
    #[serde(default)]
    pub processed_files: BTreeSet<String>,

    /// `[cluster_key, [file_path, ...]]` pairs, ordered by key
    #[serde(default)]
    pub function_clusters: Vec<(String, Vec<String>)>,

    /// Stored as `"{path}:{line}: {message}"` strings
    #[serde(default, with = "parse_error_strings")]
    pub syntax_errors: Vec<ParseError>,

    /// file path → sha256 of the content that was extracted
    #[serde(default)]
    pub file_hashes: BTreeMap<String, String>,

    #[serde(default)]
    pub functions: BTreeMap<String, Vec<Function>>,

    /// function id → cluster key
    #[serde(default)]
    pub memberships: BTreeMap<String, String>,
}

const fn default_schema_version() -> u32 {
    CHECKPOINT_SCHEMA_VERSION
}

impl Default for CheckpointState {
    fn default() -> Self {
        Self {
            schema_version: CHECKPOINT_SCHEMA_VERSION,
            processed_files: BTreeSet::new(),
            function_clusters: Vec::new(),
            syntax_errors: Vec::new(),
            file_hashes: BTreeMap::new(),
            functions: BTreeMap::new(),
            memberships: BTreeMap::new(),
        }
    }
}

impl CheckpointState {
    /// Drop everything recorded for `path`; returns the ids of its functions.
    pub fn forget_file(&mut self, path: &str) -> Vec<String> {
        self.processed_files.remove(path);
        self.file_hashes.remove(path);
        self.syntax_errors.retain(|e| e.file_path != path);

        let ids: Vec<String> = self
            .functions
            .remove(path)
            .unwrap_or_default()
            .into_iter()
            .map(|f| f.id)
            .collect();
        for id in &ids {
            self.memberships.remove(id);
        }
        ids
    }

    /// Record a finished extraction.
    ///
    /// Only successful extractions are marked processed, so failed files are
    /// retried by the next run.
    pub fn record_file(
        &mut self,
        path: &str,
        content_hash: Option<&str>,
        functions: Vec<Function>,
        errors: Vec<ParseError>,
        processed: bool,
    ) {
        self.syntax_errors.extend(errors);
        if !processed {
            return;
        }
        self.processed_files.insert(path.to_string());
        if let Some(hash) = content_hash {
            self.file_hashes.insert(path.to_string(), hash.to_string());
        }
        self.functions.insert(path.to_string(), functions);
    }

    /// All recorded functions, ordered by file then position
    pub fn all_functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.values().flatten()
    }

    #[must_use]
    pub fn function_count(&self) -> usize {
        self.functions.values().map(Vec::len).sum()
    }

    /// Snapshot cluster layout and memberships from `builder`.
    pub fn set_clusters(&mut self, builder: &ClusterBuilder) {
        self.function_clusters = builder
            .clusters()
            .map(|cluster| (cluster.key.clone(), cluster.file_paths()))
            .collect();
        self.memberships = builder.memberships();
    }
}

/// Reads and writes [`CheckpointState`] as JSON
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing, unreadable, corrupt or foreign-version files yield an empty state.
    pub async fn load(&self) -> CheckpointState {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No checkpoint at {:?}", self.path);
                return CheckpointState::default();
            }
            Err(e) => {
                log::warn!("Cannot read checkpoint {:?}, starting fresh: {e}", self.path);
                return CheckpointState::default();
            }
        };

        match serde_json::from_slice::<CheckpointState>(&bytes) {
            Ok(state) if state.schema_version == CHECKPOINT_SCHEMA_VERSION => {
                log::info!(
                    "Resuming from checkpoint: {} processed files",
                    state.processed_files.len()
                );
                state
            }
            Ok(state) => {
                log::warn!(
                    "Checkpoint schema_version {} is not supported (expected {}), starting fresh",
                    state.schema_version,
                    CHECKPOINT_SCHEMA_VERSION
                );
                CheckpointState::default()
            }
            Err(e) => {
                log::warn!("Checkpoint {:?} is corrupt, starting fresh: {e}", self.path);
                CheckpointState::default()
            }
        }
    }

    /// Write to a temp file next to the target, then rename over it.
    pub async fn save(&self, state: &CheckpointState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        log::debug!(
            "Checkpoint saved ({} files) to {:?}",
            state.processed_files.len(),
            self.path
        );
        Ok(())
    }
}

mod parse_error_strings {
    use consolidator_extractor::ParseError;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        errors: &[ParseError],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(errors.iter().map(ToString::to_string))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<ParseError>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|raw| raw.parse::<ParseError>().map_err(D::Error::custom))
            .collect()
    }
}
