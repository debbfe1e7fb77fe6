use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConsolidateError>;

#[derive(Error, Debug)]
pub enum ConsolidateError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Extractor error: {0}")]
    ExtractorError(#[from] consolidator_extractor::ExtractorError),

    #[error("Vector store error: {0}")]
    VectorStoreError(#[from] consolidator_vector_store::VectorStoreError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid glob pattern: {0}")]
    GlobError(#[from] globset::Error),

    #[error("Invalid project path: {0}")]
    InvalidPath(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Formatter failed: {0}")]
    Formatter(String),

    #[error("Task failed: {0}")]
    Task(String),
}
