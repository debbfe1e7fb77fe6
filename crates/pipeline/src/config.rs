use crate::error::{ConsolidateError, Result};
use crate::llm::LlmProvider;
use consolidator_vector_store::paths::{checkpoint_path_for_root, index_path_for_root};
use consolidator_vector_store::{EmbeddingConfig, EmbeddingMode, EmbeddingProvider};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file looked up in the project root when `--config` is not given
pub const CONFIG_FILE_NAME: &str = "consolidator.toml";

/// Top-level configuration, read from TOML then overridden by environment and flags
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidatorConfig {
    pub scan: ScanConfig,
    pub clustering: ClusteringConfig,
    pub pipeline: PipelineConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub formatter: FormatterConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// File name globs; a file is scanned when any of them matches
    pub include: Vec<String>,
    /// Directory names skipped wherever they appear below the root
    pub exclude: Vec<String>,
    pub max_files: Option<usize>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            include: vec!["*.py".to_string()],
            exclude: [
                ".git",
                ".hg",
                ".tox",
                ".venv",
                "venv",
                "__pycache__",
                "node_modules",
                "build",
                "dist",
                "site-packages",
                ".consolidator",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            max_files: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Minimum cosine similarity for two functions to share a cluster
    pub threshold: f32,
    pub top_k: usize,
    /// Keyword extraction on/off; off forces structural keys
    pub keywords: bool,
    pub max_keywords: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            threshold: 0.85,
            top_k: 5,
            keywords: true,
            max_keywords: consolidator_extractor::DEFAULT_MAX_KEYWORDS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_workers: usize,
    /// Clusters proposed per checkpointed batch
    pub batch_size: usize,
    /// Defaults to `<root>/.consolidator/checkpoint.json`
    pub checkpoint_path: Option<PathBuf>,
    /// Defaults to `<root>/.consolidator/index.json`
    pub index_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            batch_size: 8,
            checkpoint_path: None,
            index_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub enabled: bool,
    pub provider: LlmProvider,
    pub endpoint: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: LlmProvider::default(),
            endpoint: "http://localhost:11434".to_string(),
            model: "qwen2.5-coder:7b".to_string(),
            api_key: None,
            temperature: 0.2,
            max_tokens: 2048,
            timeout_ms: 120_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatterConfig {
    pub enabled: bool,
    /// Program and arguments; source is piped through stdin
    pub command: Vec<String>,
    pub timeout_ms: u64,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: vec!["black".to_string(), "-q".to_string(), "-".to_string()],
            timeout_ms: 30_000,
        }
    }
}

impl ConsolidatorConfig {
    /// Parse a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// `explicit` when given, else `<root>/consolidator.toml` when present, else defaults
    pub fn discover(root: &Path, explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let candidate = root.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Self::load(&candidate);
        }
        Ok(Self::default())
    }

    /// Apply `CONSOLIDATOR_*` environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(raw) = get("CONSOLIDATOR_MAX_WORKERS") {
            self.pipeline.max_workers = parse_env("CONSOLIDATOR_MAX_WORKERS", &raw)?;
        }
        if let Some(raw) = get("CONSOLIDATOR_BATCH_SIZE") {
            self.pipeline.batch_size = parse_env("CONSOLIDATOR_BATCH_SIZE", &raw)?;
        }
        if let Some(raw) = get("CONSOLIDATOR_THRESHOLD") {
            self.clustering.threshold = parse_env("CONSOLIDATOR_THRESHOLD", &raw)?;
        }
        if let Some(raw) = get("CONSOLIDATOR_EMBEDDING_MODE") {
            self.embedding.mode = raw.parse::<EmbeddingMode>()?;
        }
        if let Some(raw) = get("CONSOLIDATOR_EMBEDDING_PROVIDER") {
            self.embedding.provider = raw.parse::<EmbeddingProvider>()?;
        }
        if let Some(endpoint) = get("CONSOLIDATOR_EMBEDDING_ENDPOINT") {
            self.embedding.endpoint = endpoint;
        }
        if let Some(model) = get("CONSOLIDATOR_EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Some(key) = get("CONSOLIDATOR_EMBEDDING_API_KEY") {
            self.embedding.api_key = Some(key);
        }
        if let Some(raw) = get("CONSOLIDATOR_LLM_PROVIDER") {
            self.llm.provider = raw.parse::<LlmProvider>()?;
        }
        if let Some(endpoint) = get("CONSOLIDATOR_LLM_ENDPOINT") {
            self.llm.endpoint = endpoint;
        }
        if let Some(model) = get("CONSOLIDATOR_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(key) = get("CONSOLIDATOR_LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(command) = get("CONSOLIDATOR_FORMATTER") {
            self.formatter.command = command.split_whitespace().map(str::to_string).collect();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.max_workers == 0 {
            return Err(ConsolidateError::Config("max_workers must be > 0".to_string()));
        }
        if self.pipeline.batch_size == 0 {
            return Err(ConsolidateError::Config("batch_size must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.clustering.threshold) {
            return Err(ConsolidateError::Config(format!(
                "threshold ({}) must be within [0, 1]",
                self.clustering.threshold
            )));
        }
        if self.clustering.top_k == 0 {
            return Err(ConsolidateError::Config("top_k must be > 0".to_string()));
        }
        if self.scan.include.iter().all(|p| p.trim().is_empty()) {
            return Err(ConsolidateError::Config(
                "scan.include needs at least one pattern".to_string(),
            ));
        }
        if self.scan.max_files == Some(0) {
            return Err(ConsolidateError::Config("max_files must be > 0".to_string()));
        }
        if self.formatter.enabled && self.formatter.command.is_empty() {
            return Err(ConsolidateError::Config(
                "formatter.command is empty; set formatter.enabled = false instead".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn checkpoint_path(&self, root: &Path) -> PathBuf {
        self.pipeline
            .checkpoint_path
            .as_ref()
            .map_or_else(|| checkpoint_path_for_root(root), |p| resolve(root, p))
    }

    #[must_use]
    pub fn index_path(&self, root: &Path) -> PathBuf {
        self.pipeline
            .index_path
            .as_ref()
            .map_or_else(|| index_path_for_root(root), |p| resolve(root, p))
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse::<T>()
        .map_err(|_| ConsolidateError::Config(format!("{key}: cannot parse '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = ConsolidatorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.pipeline.max_workers, 4);
        assert!((config.clustering.threshold - 0.85).abs() < f32::EPSILON);
        assert_eq!(config.scan.include, vec!["*.py"]);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: ConsolidatorConfig = toml::from_str(
            r#"
[pipeline]
max_workers = 2

[embedding]
mode = "stub"

[llm]
provider = "openai"
model = "gpt-4o-mini"
"#,
        )
        .unwrap();

        assert_eq!(config.pipeline.max_workers, 2);
        assert_eq!(config.pipeline.batch_size, 8);
        assert_eq!(config.embedding.mode, EmbeddingMode::Stub);
        assert_eq!(config.llm.provider, LlmProvider::OpenAi);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.scan, ScanConfig::default());
    }

    #[test]
    fn environment_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("CONSOLIDATOR_MAX_WORKERS", "6"),
            ("CONSOLIDATOR_EMBEDDING_MODE", "off"),
            ("CONSOLIDATOR_LLM_MODEL", "llama3"),
            ("CONSOLIDATOR_FORMATTER", "ruff format -"),
            ("CONSOLIDATOR_THRESHOLD", "  "),
        ]);
        let mut config = ConsolidatorConfig::default();
        config
            .apply_env_from(|key| env.get(key).map(ToString::to_string))
            .unwrap();

        assert_eq!(config.pipeline.max_workers, 6);
        assert_eq!(config.embedding.mode, EmbeddingMode::Off);
        assert_eq!(config.llm.model, "llama3");
        assert_eq!(config.formatter.command, vec!["ruff", "format", "-"]);
        assert!((config.clustering.threshold - 0.85).abs() < f32::EPSILON);
    }

    #[test]
    fn malformed_environment_value_is_an_error() {
        let mut config = ConsolidatorConfig::default();
        let err = config
            .apply_env_from(|key| (key == "CONSOLIDATOR_BATCH_SIZE").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("CONSOLIDATOR_BATCH_SIZE"));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = ConsolidatorConfig::default();
        config.pipeline.max_workers = 0;
        assert!(config.validate().is_err());

        let mut config = ConsolidatorConfig::default();
        config.clustering.threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = ConsolidatorConfig::default();
        config.scan.include.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn discover_prefers_root_file_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            ConsolidatorConfig::discover(dir.path(), None).unwrap(),
            ConsolidatorConfig::default()
        );

        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[pipeline]\nbatch_size = 3\n").unwrap();
        let config = ConsolidatorConfig::discover(dir.path(), None).unwrap();
        assert_eq!(config.pipeline.batch_size, 3);
    }

    #[test]
    fn state_paths_resolve_against_root() {
        let root = Path::new("/repo");
        let mut config = ConsolidatorConfig::default();
        assert_eq!(
            config.checkpoint_path(root),
            PathBuf::from("/repo/.consolidator/checkpoint.json")
        );
        config.pipeline.index_path = Some(PathBuf::from("state/vectors.json"));
        assert_eq!(
            config.index_path(root),
            PathBuf::from("/repo/state/vectors.json")
        );
    }
}
