//! # Consolidator Pipeline
//!
//! Finds near-duplicate Python functions in a project and asks a generative
//! model for one consolidated implementation per duplicate group.
//!
//! ## Stages
//!
//! ```text
//! SourceScanner ──> FunctionExtractor (worker pool) ──> SimilarityIndex
//!                                                            │
//!        CheckpointStore <── ClusterBuilder <────────────────┘
//!               │                 │
//!               │                 └──> ConsolidationAdvisor (batches)
//!               │                              │
//!               └────────── ConsolidationReport <┘
//! ```
//!
//! Every stage is resumable: processed files, extracted functions and cluster
//! memberships live in the checkpoint, so a second run over an unchanged tree
//! re-extracts nothing.
//!
//! ## Example
//!
//! ```no_run
//! use consolidator_pipeline::{ConsolidatorConfig, PipelineOrchestrator};
//!
//! # async fn run() -> consolidator_pipeline::Result<()> {
//! let config = ConsolidatorConfig::default();
//! let orchestrator = PipelineOrchestrator::from_config("/path/to/project", config, false).await?;
//! let report = orchestrator.run().await?;
//! println!("{}", report.summary_line());
//! # Ok(())
//! # }
//! ```

mod advisor;
mod checkpoint;
mod cluster;
mod config;
mod error;
mod formatter;
mod llm;
mod orchestrator;
mod report;
mod scanner;
mod stats;

pub use advisor::{ConsolidationAdvisor, ConsolidationResult};
pub use checkpoint::{CheckpointState, CheckpointStore, CHECKPOINT_SCHEMA_VERSION};
pub use cluster::{semantic_key, structural_key, Cluster, ClusterBuilder, ClusterStrategy};
pub use config::{
    ClusteringConfig, ConsolidatorConfig, FormatterConfig, LlmConfig, PipelineConfig, ScanConfig,
    CONFIG_FILE_NAME,
};
pub use error::{ConsolidateError, Result};
pub use formatter::{CommandFormatter, FormatResult, Formatter, NoopFormatter};
pub use llm::{strip_code_fences, GenerateOptions, Generator, HttpGenerator, LlmProvider};
pub use orchestrator::{PipelineOrchestrator, Stage, StageOutcome, StageStatus};
pub use report::{
    ClusterReport, ConsolidationReport, DuplicateFileGroup, MemberSummary, REPORT_FILE_NAME,
};
pub use scanner::{scan, SourceScanner};
pub use stats::RunStats;
