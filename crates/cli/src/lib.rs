use anyhow::{Context as AnyhowContext, Result};
use clap::{Parser, ValueEnum};
use consolidator_pipeline::{ConsolidatorConfig, PipelineOrchestrator};
use consolidator_vector_store::EmbeddingMode;
use std::io::{self, Write};
use std::path::PathBuf;

fn print_stdout(text: &str) -> Result<()> {
    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.write_all(b"\n"))
        .and_then(|_| stdout.flush())
    {
        if err.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}

#[derive(Parser)]
#[command(name = "consolidator")]
#[command(
    about = "Find duplicate Python functions and propose consolidated versions",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// Project directory to scan
    root: PathBuf,

    /// Stop scanning after this many files
    #[arg(long)]
    max_files: Option<usize>,

    /// Write code_consolidation_report.md into the project directory
    #[arg(long)]
    report: bool,

    /// Also write the report as JSON to this path
    #[arg(long, value_name = "PATH")]
    json: Option<PathBuf>,

    /// Config file (defaults to <DIR>/consolidator.toml when present)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Extraction and generation workers
    #[arg(long)]
    max_workers: Option<usize>,

    /// Clusters per checkpointed batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Minimum similarity for semantic clusters (0..=1)
    #[arg(long)]
    threshold: Option<f32>,

    /// Override the embedding backend
    #[arg(long, value_enum)]
    embed_mode: Option<EmbedMode>,

    /// Skip the generation stage
    #[arg(long)]
    no_llm: bool,

    /// Ignore the checkpoint and the stored index
    #[arg(long)]
    fresh: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Copy, Clone, ValueEnum)]
enum EmbedMode {
    Http,
    Stub,
    Off,
}

impl EmbedMode {
    const fn as_domain(self) -> EmbeddingMode {
        match self {
            EmbedMode::Http => EmbeddingMode::Http,
            EmbedMode::Stub => EmbeddingMode::Stub,
            EmbedMode::Off => EmbeddingMode::Off,
        }
    }
}

impl Cli {
    /// File, then environment, then flags
    fn resolve_config(&self) -> Result<ConsolidatorConfig> {
        let mut config = ConsolidatorConfig::discover(&self.root, self.config.as_deref())
            .context("Failed to load configuration")?;
        config
            .apply_env()
            .context("Invalid CONSOLIDATOR_* environment override")?;

        if let Some(max_files) = self.max_files {
            config.scan.max_files = Some(max_files);
        }
        if let Some(workers) = self.max_workers {
            config.pipeline.max_workers = workers;
        }
        if let Some(batch_size) = self.batch_size {
            config.pipeline.batch_size = batch_size;
        }
        if let Some(threshold) = self.threshold {
            config.clustering.threshold = threshold;
        }
        if let Some(mode) = self.embed_mode {
            config.embedding.mode = mode.as_domain();
        }
        if self.no_llm {
            config.llm.enabled = false;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

pub async fn main_entry() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    if !cli.root.is_dir() {
        anyhow::bail!("Project directory {} does not exist", cli.root.display());
    }
    let root = cli
        .root
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", cli.root.display()))?;

    let config = cli.resolve_config()?;
    log::debug!(
        "Config: {} workers, batch {}, threshold {}, embeddings {}",
        config.pipeline.max_workers,
        config.pipeline.batch_size,
        config.clustering.threshold,
        config.embedding.mode
    );

    let orchestrator = PipelineOrchestrator::from_config(&root, config, cli.fresh)
        .await
        .context("Failed to set up the pipeline")?;
    let report = orchestrator
        .run()
        .await
        .with_context(|| format!("Consolidation of {} failed", root.display()))?;

    if cli.report {
        let path = report
            .write_markdown(&root)
            .await
            .context("Failed to write the Markdown report")?;
        log::info!("Markdown report: {}", path.display());
    }
    if let Some(path) = &cli.json {
        report
            .write_json(path)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    print_stdout(&report.summary_line())
}
