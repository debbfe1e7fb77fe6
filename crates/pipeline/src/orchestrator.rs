//! Stage runner: Load → Cluster → Process → Done.
//!
//! The orchestrator owns the [`CheckpointState`] and is the only writer of the
//! checkpoint and the similarity index. Workers hand results back by message
//! (extraction) or by slot index (proposals).

use crate::advisor::{ConsolidationAdvisor, ConsolidationResult};
use crate::checkpoint::{CheckpointState, CheckpointStore};
use crate::cluster::{structural_key, Cluster, ClusterBuilder, ClusterStrategy};
use crate::config::ConsolidatorConfig;
use crate::error::{ConsolidateError, Result};
use crate::formatter::{CommandFormatter, Formatter, NoopFormatter};
use crate::llm::{GenerateOptions, HttpGenerator};
use crate::report::{ClusterReport, ConsolidationReport, DuplicateFileGroup, MemberSummary};
use crate::scanner::SourceScanner;
use crate::stats::RunStats;
use consolidator_extractor::{
    sha256_hex, FileExtraction, Function, FunctionExtractor, KeywordExtractor, LexicalKeywords,
    NoKeywords, ParseError,
};
use consolidator_vector_store::{EmbeddingModel, Metadata, SimilarityIndex, StoreIndex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Load,
    Cluster,
    Process,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Load => "load",
            Self::Cluster => "cluster",
            Self::Process => "process",
            Self::Done => "done",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed,
    Skipped,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: Stage,
    pub status: StageStatus,
    pub message: Option<String>,
    pub duration_ms: u64,
}

impl StageOutcome {
    fn new(
        stage: Stage,
        status: StageStatus,
        message: impl Into<String>,
        started: Instant,
    ) -> Self {
        Self {
            stage,
            status,
            message: Some(message.into()),
            duration_ms: elapsed_ms(started),
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == StageStatus::Completed
    }
}

enum LoadOutcome {
    Unchanged,
    Extracted(FileExtraction),
}

pub struct PipelineOrchestrator {
    root: PathBuf,
    config: ConsolidatorConfig,
    index: Arc<dyn SimilarityIndex>,
    extractor: FunctionExtractor,
    advisor: Option<Arc<ConsolidationAdvisor>>,
    checkpoint: CheckpointStore,
    fresh: bool,
}

impl PipelineOrchestrator {
    /// `advisor: None` skips the Process stage.
    pub fn new(
        root: impl Into<PathBuf>,
        config: ConsolidatorConfig,
        index: Arc<dyn SimilarityIndex>,
        advisor: Option<Arc<ConsolidationAdvisor>>,
        fresh: bool,
    ) -> Self {
        let root = root.into();
        let keywords: Arc<dyn KeywordExtractor> = if config.clustering.keywords {
            Arc::new(LexicalKeywords::new(config.clustering.max_keywords))
        } else {
            Arc::new(NoKeywords)
        };
        let checkpoint = CheckpointStore::new(config.checkpoint_path(&root));

        Self {
            root,
            extractor: FunctionExtractor::new(keywords),
            index,
            advisor,
            checkpoint,
            config,
            fresh,
        }
    }

    /// Wire up the HTTP collaborators described by `config`.
    ///
    /// Fails only on invalid configuration; unreachable backends are detected
    /// later and degrade the run.
    pub async fn from_config(
        root: impl Into<PathBuf>,
        config: ConsolidatorConfig,
        fresh: bool,
    ) -> Result<Self> {
        let root = root.into();
        let embedder = Arc::new(EmbeddingModel::new(&config.embedding)?);
        let index = Arc::new(StoreIndex::open(&config.index_path(&root), embedder, fresh).await);

        let advisor = if config.llm.enabled {
            let generator = Arc::new(HttpGenerator::new(&config.llm)?);
            let formatter: Arc<dyn Formatter> = if config.formatter.enabled {
                match CommandFormatter::new(
                    &config.formatter.command,
                    Duration::from_millis(config.formatter.timeout_ms),
                ) {
                    Some(formatter) => Arc::new(formatter),
                    None => Arc::new(NoopFormatter),
                }
            } else {
                Arc::new(NoopFormatter)
            };
            let advisor =
                ConsolidationAdvisor::new(generator, formatter, GenerateOptions::from(&config.llm))
                    .with_source_root(&root);
            Some(Arc::new(advisor))
        } else {
            None
        };

        Ok(Self::new(root, config, index, advisor, fresh))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn checkpoint_path(&self) -> &Path {
        self.checkpoint.path()
    }

    /// Run every stage and build the report.
    ///
    /// Only a missing root or an unusable include pattern is an error; every
    /// other failure is recorded in the report.
    pub async fn run(&self) -> Result<ConsolidationReport> {
        let started = Instant::now();
        if !self.root.is_dir() {
            return Err(ConsolidateError::InvalidPath(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }

        let scanner = SourceScanner::new(
            &self.root,
            &self.config.scan.include,
            &self.config.scan.exclude,
            self.config.scan.max_files,
        )?;

        let mut state = if self.fresh {
            log::info!("Fresh run, ignoring checkpoint at {:?}", self.checkpoint.path());
            CheckpointState::default()
        } else {
            self.checkpoint.load().await
        };
        let mut stats = RunStats::new();
        let mut stages = Vec::new();

        let files: Vec<(PathBuf, String)> = scanner
            .scan()
            .into_iter()
            .map(|path| {
                let rel = scanner.relative_path(&path);
                (path, rel)
            })
            .collect();
        stats.files_scanned = files.len();

        log::info!("Stage: load ({} files)", files.len());
        let (load, fresh_ids, index_healthy) = self.load(&files, &mut state, &mut stats).await;
        stages.push(load);
        self.flush(&state).await;

        log::info!("Stage: cluster");
        let strategy = ClusterStrategy::select(
            index_healthy,
            self.config.clustering.keywords,
            self.config.clustering.threshold,
            self.config.clustering.top_k,
        );
        let (cluster, builder) = self.cluster(strategy, &fresh_ids, &mut state).await;
        stats.functions = state.function_count();
        stats.clusters = builder.len();
        let multi = builder.multi_member_clusters();
        stats.multi_member_clusters = multi.len();
        stages.push(cluster);
        self.flush(&state).await;

        log::info!("Stage: process ({} candidate clusters)", multi.len());
        let (process, results) = self.process(&multi, &state).await;
        stages.push(process);

        let load_ok = stages.iter().any(|s| s.stage == Stage::Load && s.is_completed());
        let cluster_ok = stages
            .iter()
            .any(|s| s.stage == Stage::Cluster && s.is_completed());

        let clusters: Vec<ClusterReport> = multi
            .iter()
            .zip(results)
            .map(|(cluster, result)| cluster_report(cluster, result))
            .collect();
        let failures = clusters.iter().filter(|c| c.is_failure()).count();

        stats.time_ms = elapsed_ms(started);
        stages.push(StageOutcome {
            stage: Stage::Done,
            status: StageStatus::Completed,
            message: None,
            duration_ms: stats.time_ms,
        });
        log::info!("Stage: done in {:.2}s", started.elapsed().as_secs_f64());

        let mut parse_errors = state.syntax_errors.clone();
        parse_errors.sort_by(|a, b| {
            a.file_path
                .cmp(&b.file_path)
                .then_with(|| a.line_number.cmp(&b.line_number))
                .then_with(|| a.message.cmp(&b.message))
        });

        Ok(ConsolidationReport {
            root: self.root.clone(),
            strategy: strategy.to_string(),
            stats,
            stages,
            clusters,
            parse_errors,
            duplicate_files: duplicate_files(&state),
            success: load_ok && cluster_ok && failures == 0,
        })
    }

    /// Extract new or changed files and bring the index up to date.
    ///
    /// Returns the stage outcome, the ids of freshly extracted functions and
    /// whether the index can still be queried this run.
    async fn load(
        &self,
        files: &[(PathBuf, String)],
        state: &mut CheckpointState,
        stats: &mut RunStats,
    ) -> (StageOutcome, HashSet<String>, bool) {
        let started = Instant::now();
        let mut stale_ids = self.purge_missing(files, state);

        let semaphore = Arc::new(Semaphore::new(self.config.pipeline.max_workers.max(1)));
        let mut tasks = JoinSet::new();
        for (path, rel) in files {
            let known = state
                .processed_files
                .contains(rel)
                .then(|| state.file_hashes.get(rel).cloned())
                .flatten();
            let semaphore = semaphore.clone();
            let extractor = self.extractor.clone();
            let path = path.clone();
            let rel = rel.clone();

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (rel, Err("worker pool closed".to_string()));
                };
                let file_path = rel.clone();
                let outcome = tokio::task::spawn_blocking(move || {
                    extract_file(&extractor, &path, &file_path, known.as_deref())
                })
                .await
                .map_err(|e| e.to_string());
                (rel, outcome)
            });
        }

        let mut finished = Vec::with_capacity(files.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => finished.push(result),
                Err(e) => log::warn!("Extraction task failed: {e}"),
            }
        }
        // Completion order is arbitrary; apply in path order
        finished.sort_by(|a, b| a.0.cmp(&b.0));

        let mut fresh_ids = HashSet::new();
        for (rel, outcome) in finished {
            match outcome {
                Ok(LoadOutcome::Unchanged) => {
                    log::debug!("Unchanged: {rel}");
                    stats.files_unchanged += 1;
                }
                Ok(LoadOutcome::Extracted(extraction)) => {
                    stale_ids.extend(state.forget_file(&rel));
                    let processed = !extraction.is_failure();
                    if processed {
                        stats.files_loaded += 1;
                        log::debug!("Loaded {rel}: {} functions", extraction.functions.len());
                    } else {
                        stats.files_failed += 1;
                        log::warn!("Extraction failed for {rel}");
                    }
                    fresh_ids.extend(extraction.functions.iter().map(|f| f.id.clone()));
                    state.record_file(
                        &rel,
                        extraction.content_hash.as_deref(),
                        extraction.functions,
                        extraction.errors,
                        processed,
                    );
                }
                Err(e) => {
                    stats.files_failed += 1;
                    stale_ids.extend(state.forget_file(&rel));
                    log::warn!("Extraction of {rel} panicked: {e}");
                    state.record_file(
                        &rel,
                        None,
                        Vec::new(),
                        vec![ParseError::new(&rel, format!("extraction panicked: {e}"), None)],
                        false,
                    );
                }
            }
        }

        // Ids that came back under the same name keep their index entry
        let live: HashSet<&str> = state.all_functions().map(|f| f.id.as_str()).collect();
        for id in stale_ids.iter().filter(|id| !live.contains(id.as_str())) {
            if let Err(e) = self.index.remove(id).await {
                log::debug!("Failed to remove {id} from the index: {e}");
            }
        }

        let summary = format!(
            "{} loaded, {} unchanged, {} failed",
            stats.files_loaded, stats.files_unchanged, stats.files_failed
        );

        let index_healthy = match self.index_functions(state).await {
            Ok(indexed) => {
                if indexed > 0 {
                    log::debug!("Indexed {indexed} functions");
                }
                self.index.available()
            }
            Err(e) => {
                log::warn!("Index write failed, falling back to structural keys: {e}");
                let outcome = StageOutcome::new(
                    Stage::Load,
                    StageStatus::Failed,
                    format!("{summary}; index write failed: {e}"),
                    started,
                );
                return (outcome, fresh_ids, false);
            }
        };

        (
            StageOutcome::new(Stage::Load, StageStatus::Completed, summary, started),
            fresh_ids,
            index_healthy,
        )
    }

    /// Forget files that are recorded but no longer scanned.
    fn purge_missing(
        &self,
        files: &[(PathBuf, String)],
        state: &mut CheckpointState,
    ) -> Vec<String> {
        let scanned: HashSet<&str> = files.iter().map(|(_, rel)| rel.as_str()).collect();
        let known: BTreeSet<String> = state
            .processed_files
            .iter()
            .cloned()
            .chain(state.syntax_errors.iter().map(|e| e.file_path.clone()))
            .collect();

        let mut removed = Vec::new();
        for path in known.iter().filter(|p| !scanned.contains(p.as_str())) {
            log::debug!("No longer present: {path}");
            removed.extend(state.forget_file(path));
        }
        removed
    }

    /// Upsert every function with keywords; unchanged text reuses its vector.
    async fn index_functions(&self, state: &CheckpointState) -> Result<usize> {
        if !self.index.available() || !self.config.clustering.keywords {
            return Ok(0);
        }

        let mut indexed = 0;
        for function in state.all_functions() {
            if function.context_keywords.is_empty() {
                continue;
            }
            self.index
                .upsert(&function.id, &function.context_keywords, metadata(function))
                .await?;
            indexed += 1;
        }
        self.index.persist().await?;
        Ok(indexed)
    }

    async fn cluster(
        &self,
        strategy: ClusterStrategy,
        fresh_ids: &HashSet<String>,
        state: &mut CheckpointState,
    ) -> (StageOutcome, ClusterBuilder) {
        let started = Instant::now();
        let mut builder = ClusterBuilder::new(strategy, self.index.clone());
        log::info!("Cluster strategy: {strategy}");

        let mut restored = 0usize;
        let mut pending = Vec::new();
        for function in state.all_functions() {
            let previous = state
                .memberships
                .get(&function.id)
                .filter(|_| !fresh_ids.contains(&function.id));
            match previous {
                Some(key) if restorable(strategy, function, key) => {
                    builder.insert(key, function.clone());
                    restored += 1;
                }
                _ => pending.push(function.clone()),
            }
        }

        let mut degraded = 0usize;
        for function in &pending {
            if let Err(e) = builder.assign(function).await {
                log::warn!(
                    "Similarity lookup failed for {}, using structural key: {e}",
                    function.id
                );
                builder.assign_structural(function);
                degraded += 1;
            }
        }

        state.set_clusters(&builder);

        let mut message = format!(
            "{} assigned, {restored} restored, {} clusters",
            pending.len(),
            builder.len()
        );
        if degraded > 0 {
            message.push_str(&format!(", {degraded} fell back to structural keys"));
        }
        (
            StageOutcome::new(Stage::Cluster, StageStatus::Completed, message, started),
            builder,
        )
    }

    /// Propose consolidations in batches; results land in their cluster's slot.
    async fn process(
        &self,
        clusters: &[Cluster],
        state: &CheckpointState,
    ) -> (StageOutcome, Vec<Option<ConsolidationResult>>) {
        let started = Instant::now();
        let mut results: Vec<Option<ConsolidationResult>> = vec![None; clusters.len()];

        let Some(advisor) = &self.advisor else {
            return (
                StageOutcome::new(
                    Stage::Process,
                    StageStatus::Skipped,
                    "generation disabled",
                    started,
                ),
                results,
            );
        };
        if clusters.is_empty() {
            return (
                StageOutcome::new(
                    Stage::Process,
                    StageStatus::Completed,
                    "no duplicate clusters",
                    started,
                ),
                results,
            );
        }

        let batch_size = self.config.pipeline.batch_size.max(1);
        let semaphore = Arc::new(Semaphore::new(self.config.pipeline.max_workers.max(1)));
        let batches = clusters.len().div_ceil(batch_size);
        log::info!(
            "Proposing {} clusters in {batches} batches with {}",
            clusters.len(),
            advisor.generator_name()
        );

        for (batch_no, range) in (0..clusters.len())
            .step_by(batch_size)
            .map(|start| start..(start + batch_size).min(clusters.len()))
            .enumerate()
        {
            log::debug!("Processing batch {}/{batches}", batch_no + 1);
            let mut tasks = JoinSet::new();
            for slot in range.clone() {
                let cluster = clusters[slot].clone();
                let advisor = advisor.clone();
                let semaphore = semaphore.clone();
                tasks.spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        let closed = ConsolidationResult::failed(&cluster, "worker pool closed");
                        return (slot, Ok(closed));
                    };
                    // Inner task so a panic surfaces as a JoinError for this slot only
                    let proposal = tokio::spawn(async move { advisor.propose(&cluster).await });
                    (slot, proposal.await)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((slot, Ok(result))) => results[slot] = Some(result),
                    Ok((slot, Err(e))) => {
                        log::warn!("Proposal for cluster {} panicked: {e}", clusters[slot].key);
                        results[slot] = Some(ConsolidationResult::failed(
                            &clusters[slot],
                            format!("proposal panicked: {e}"),
                        ));
                    }
                    Err(e) => log::warn!("Proposal task failed: {e}"),
                }
            }
            for slot in range {
                if results[slot].is_none() {
                    results[slot] = Some(ConsolidationResult::failed(
                        &clusters[slot],
                        "proposal task did not complete",
                    ));
                }
            }

            self.flush(state).await;
        }

        let ok = results
            .iter()
            .flatten()
            .filter(|r| r.is_success())
            .count();
        let message = format!("{ok}/{} clusters consolidated", clusters.len());
        (
            StageOutcome::new(Stage::Process, StageStatus::Completed, message, started),
            results,
        )
    }

    /// Save the checkpoint; failures are logged, the run goes on.
    async fn flush(&self, state: &CheckpointState) {
        if let Err(e) = self.checkpoint.save(state).await {
            log::warn!("Failed to save checkpoint {:?}: {e}", self.checkpoint.path());
        }
    }
}

fn extract_file(
    extractor: &FunctionExtractor,
    path: &Path,
    file_path: &str,
    known_hash: Option<&str>,
) -> LoadOutcome {
    match std::fs::read(path) {
        Ok(bytes) => {
            if known_hash.is_some_and(|known| known == sha256_hex(&bytes)) {
                return LoadOutcome::Unchanged;
            }
            LoadOutcome::Extracted(extractor.extract_source(file_path, &bytes))
        }
        // Let the extractor record the read failure
        Err(_) => LoadOutcome::Extracted(extractor.extract(path, file_path)),
    }
}

/// A remembered key is reused only when the current strategy could produce it.
fn restorable(strategy: ClusterStrategy, function: &Function, key: &str) -> bool {
    match strategy {
        ClusterStrategy::Structural => key == structural_key(function),
        ClusterStrategy::Semantic { .. } => {
            key.starts_with("sem:") || key == structural_key(function)
        }
    }
}

fn metadata(function: &Function) -> Metadata {
    Metadata::from([
        ("file_path".to_string(), function.file_path.clone()),
        ("name".to_string(), function.name.clone()),
        ("line".to_string(), function.line_number.to_string()),
    ])
}

fn cluster_report(cluster: &Cluster, result: Option<ConsolidationResult>) -> ClusterReport {
    ClusterReport {
        key: cluster.key.clone(),
        canonical_id: cluster.canonical.id.clone(),
        members: cluster
            .members
            .iter()
            .map(|m| MemberSummary {
                id: m.id.clone(),
                signature: m.signature(),
                location: m.location(),
                complexity: m.complexity,
                has_docstring: m.has_docstring(),
            })
            .collect(),
        result,
    }
}

fn duplicate_files(state: &CheckpointState) -> Vec<DuplicateFileGroup> {
    let mut by_hash: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (path, hash) in &state.file_hashes {
        by_hash.entry(hash.as_str()).or_default().push(path.clone());
    }
    by_hash
        .into_iter()
        .filter(|(_, files)| files.len() > 1)
        .map(|(hash, files)| DuplicateFileGroup {
            content_hash: hash.to_string(),
            files,
        })
        .collect()
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use consolidator_vector_store::UnavailableIndex;
    use pretty_assertions::assert_eq;

    fn orchestrator(root: &Path) -> PipelineOrchestrator {
        PipelineOrchestrator::new(
            root,
            ConsolidatorConfig::default(),
            Arc::new(UnavailableIndex),
            None,
            false,
        )
    }

    #[tokio::test]
    async fn missing_root_is_fatal() {
        let temp = tempfile::tempdir().unwrap();
        let err = orchestrator(&temp.path().join("nope")).run().await.unwrap_err();
        assert!(matches!(err, ConsolidateError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn empty_tree_succeeds_without_clusters() {
        let temp = tempfile::tempdir().unwrap();
        let report = orchestrator(temp.path()).run().await.unwrap();
        assert!(report.success);
        assert_eq!(report.stats.files_scanned, 0);
        assert_eq!(
            report.stage(Stage::Process).map(|s| s.status),
            Some(StageStatus::Skipped)
        );
        assert!(temp.path().join(".consolidator/checkpoint.json").exists());
    }

    #[tokio::test]
    async fn identical_files_are_reported_as_duplicates() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("a.py"), "def f(x):\n    return x\n").unwrap();
        std::fs::write(temp.path().join("b.py"), "def f(x):\n    return x\n").unwrap();
        std::fs::write(temp.path().join("c.py"), "def g():\n    pass\n").unwrap();

        let report = orchestrator(temp.path()).run().await.unwrap();
        assert_eq!(report.duplicate_files.len(), 1);
        assert_eq!(report.duplicate_files[0].files, vec!["a.py", "b.py"]);
        assert_eq!(report.clusters.len(), 1);
        assert_eq!(report.strategy, "structural");
    }

    #[test]
    fn restorable_follows_strategy() {
        let f = Function {
            id: "a.py::f".to_string(),
            name: "f".to_string(),
            file_path: "a.py".to_string(),
            args: vec![],
            line_number: 1,
            end_line: 1,
            docstring: None,
            complexity: 1,
            content_hash: "h".to_string(),
            context_keywords: "alpha".to_string(),
            semantic_hash: None,
            extraction: Default::default(),
        };
        let semantic = ClusterStrategy::Semantic {
            threshold: 0.85,
            top_k: 5,
        };
        assert!(restorable(ClusterStrategy::Structural, &f, &structural_key(&f)));
        assert!(!restorable(ClusterStrategy::Structural, &f, "sem:0123"));
        assert!(restorable(semantic, &f, "sem:0123"));
        assert!(restorable(semantic, &f, &structural_key(&f)));
    }
}
