use consolidator_extractor::ExtractionPath;
use consolidator_pipeline::{
    CheckpointStore, ConsolidatorConfig, PipelineOrchestrator, Stage, StageStatus,
};
use consolidator_vector_store::UnavailableIndex;
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn write(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create dir");
    }
    std::fs::write(path, body).expect("write file");
}

fn three_file_project() -> TempDir {
    let temp = TempDir::new().expect("tempdir");
    write(temp.path(), "a.py", "def foo(x):\n    return x\n");
    write(temp.path(), "b.py", "def foo(x, y):\n    return x + y\n");
    write(
        temp.path(),
        "c.py",
        "def bar():\n    total = [1, 2\n  return total\n",
    );
    temp
}

fn structural_orchestrator(root: &Path) -> PipelineOrchestrator {
    PipelineOrchestrator::new(
        root,
        ConsolidatorConfig::default(),
        Arc::new(UnavailableIndex),
        None,
        false,
    )
}

#[tokio::test]
async fn three_file_scenario() {
    let temp = three_file_project();
    let orchestrator = structural_orchestrator(temp.path());
    let report = orchestrator.run().await.expect("run");

    assert_eq!(report.stats.files_scanned, 3);
    assert_eq!(report.stats.files_loaded, 3);
    assert_eq!(report.stats.files_failed, 0);
    assert_eq!(report.stats.functions, 3);
    assert_eq!(report.stats.clusters, 3);
    assert!(report.clusters.is_empty(), "foo(x) and foo(x, y) must not merge");

    assert_eq!(report.parse_errors.len(), 1);
    assert_eq!(report.parse_errors[0].file_path, "c.py");
    assert!(report.parse_errors[0].line_number.is_some());

    assert_eq!(
        report.stage(Stage::Load).map(|s| s.status),
        Some(StageStatus::Completed)
    );
    assert_eq!(
        report.stage(Stage::Cluster).map(|s| s.status),
        Some(StageStatus::Completed)
    );
    assert!(report.success);

    let state = CheckpointStore::new(orchestrator.checkpoint_path()).load().await;
    let bar = &state.functions["c.py"][0];
    assert_eq!(bar.name, "bar");
    assert_eq!(bar.complexity, 1);
    assert_eq!(bar.extraction, ExtractionPath::Fallback);

    let foo_a = &state.memberships["a.py::foo"];
    let foo_b = &state.memberships["b.py::foo"];
    assert_ne!(foo_a, foo_b);
    assert!(foo_a.starts_with("struct:foo:1:"));
    assert!(foo_b.starts_with("struct:foo:2:"));
}

#[tokio::test]
async fn indentation_error_falls_back_to_line_scanner() {
    let temp = three_file_project();
    write(
        temp.path(),
        "c.py",
        "def bar():\n        total = 1\n    total += 1\n    return total\n",
    );
    let orchestrator = structural_orchestrator(temp.path());
    let report = orchestrator.run().await.expect("run");

    assert_eq!(report.stats.files_loaded, 3);
    assert_eq!(report.stats.functions, 3);
    assert_eq!(report.parse_errors.len(), 1);
    assert_eq!(report.parse_errors[0].file_path, "c.py");
    assert_eq!(report.parse_errors[0].line_number, Some(3));
    assert!(report.success);

    let state = CheckpointStore::new(orchestrator.checkpoint_path()).load().await;
    let bar = &state.functions["c.py"][0];
    assert_eq!(bar.name, "bar");
    assert_eq!(bar.complexity, 1);
    assert_eq!(bar.extraction, ExtractionPath::Fallback);
}

#[tokio::test]
async fn markdown_report_lands_in_root() {
    let temp = three_file_project();
    let report = structural_orchestrator(temp.path())
        .run()
        .await
        .expect("run");

    let path = report.write_markdown(temp.path()).await.expect("write report");
    assert_eq!(path, temp.path().join("code_consolidation_report.md"));
    let md = std::fs::read_to_string(path).expect("read report");
    assert!(md.contains("## Parse errors"));
    assert!(md.contains("`c.py`"));
    assert!(md.contains("No duplicate functions found."));
}

#[tokio::test]
async fn excluded_and_hidden_directories_are_not_scanned() {
    let temp = three_file_project();
    write(temp.path(), "venv/lib/site.py", "def foo(x):\n    return x\n");
    write(temp.path(), ".hidden/d.py", "def foo(x):\n    return x\n");

    let report = structural_orchestrator(temp.path())
        .run()
        .await
        .expect("run");
    assert_eq!(report.stats.files_scanned, 3);
    assert!(report.duplicate_files.is_empty());
}
