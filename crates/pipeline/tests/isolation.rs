use async_trait::async_trait;
use consolidator_pipeline::{
    ConsolidateError, ConsolidationAdvisor, ConsolidatorConfig, GenerateOptions, Generator,
    NoopFormatter, PipelineOrchestrator, Result, Stage, StageStatus,
};
use consolidator_vector_store::UnavailableIndex;
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Succeeds for `load`, errors for `save`, panics for `boom`
struct Picky {
    calls: AtomicUsize,
}

#[async_trait]
impl Generator for Picky {
    async fn generate(&self, prompt: &str, _options: &GenerateOptions) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if prompt.contains("def boom(") {
            panic!("generator exploded");
        }
        if prompt.contains("def save(") {
            return Err(ConsolidateError::Generation("model refused".to_string()));
        }
        Ok("```python\ndef load(path):\n    return open(path).read()\n```".to_string())
    }

    fn name(&self) -> String {
        "picky".to_string()
    }
}

const MODULE: &str = "\
def load(path):
    return open(path).read()


def save(path, data):
    open(path, 'w').write(data)


def boom(count):
    return count * 2
";

fn project() -> TempDir {
    let temp = TempDir::new().expect("tempdir");
    std::fs::write(temp.path().join("first.py"), MODULE).expect("write first");
    std::fs::write(temp.path().join("second.py"), MODULE).expect("write second");
    temp
}

fn orchestrator(root: &Path, generator: Arc<Picky>) -> PipelineOrchestrator {
    let mut config = ConsolidatorConfig::default();
    config.pipeline.batch_size = 1;
    config.pipeline.max_workers = 2;
    let advisor = ConsolidationAdvisor::new(
        generator,
        Arc::new(NoopFormatter),
        GenerateOptions::default(),
    )
    .with_source_root(root);
    PipelineOrchestrator::new(
        root,
        config,
        Arc::new(UnavailableIndex),
        Some(Arc::new(advisor)),
        false,
    )
}

#[tokio::test]
async fn one_failing_cluster_does_not_affect_siblings() {
    let temp = project();
    let generator = Arc::new(Picky {
        calls: AtomicUsize::new(0),
    });
    let report = orchestrator(temp.path(), generator.clone())
        .run()
        .await
        .expect("run");

    assert_eq!(report.clusters.len(), 3);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 3);

    let by_name = |name: &str| {
        report
            .clusters
            .iter()
            .find(|c| c.key.starts_with(&format!("struct:{name}:")))
            .and_then(|c| c.result.clone())
            .expect("cluster result")
    };

    let load = by_name("load");
    assert!(load.is_success());
    assert!(!load.linted);
    assert_eq!(
        load.consolidated_source.as_deref(),
        Some("def load(path):\n    return open(path).read()")
    );

    let save = by_name("save");
    assert!(!save.is_success());
    assert!(save.errors[0].contains("model refused"));

    let boom = by_name("boom");
    assert!(!boom.is_success());
    assert!(boom.errors[0].contains("panicked"));

    assert_eq!(report.cluster_failures(), 2);
    assert!(!report.success);
    assert_eq!(
        report.stage(Stage::Process).map(|s| s.status),
        Some(StageStatus::Completed)
    );
    assert_eq!(report.duplicate_files.len(), 1);
}

#[tokio::test]
async fn results_keep_cluster_order() {
    let temp = project();
    let report = orchestrator(
        temp.path(),
        Arc::new(Picky {
            calls: AtomicUsize::new(0),
        }),
    )
    .run()
    .await
    .expect("run");

    for cluster in &report.clusters {
        let result = cluster.result.as_ref().expect("every cluster has a result");
        assert_eq!(result.cluster_key, cluster.key);
        assert_eq!(result.member_count, 2);
    }
    let keys: Vec<&str> = report.clusters.iter().map(|c| c.key.as_str()).collect();
    let mut sorted = keys.clone();
    sorted.sort_unstable();
    assert_eq!(keys, sorted);
}
