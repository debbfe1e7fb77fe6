use crate::advisor::ConsolidationResult;
use crate::error::Result;
use crate::orchestrator::{Stage, StageOutcome};
use crate::stats::RunStats;
use consolidator_extractor::ParseError;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Markdown report written into the scanned root
pub const REPORT_FILE_NAME: &str = "code_consolidation_report.md";

const MAX_CELL_CHARS: usize = 120;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberSummary {
    pub id: String,
    pub signature: String,
    pub location: String,
    pub complexity: u32,
    pub has_docstring: bool,
}

/// One multi-member cluster and what Process made of it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterReport {
    pub key: String,
    pub canonical_id: String,
    pub members: Vec<MemberSummary>,
    /// `None` when Process was skipped
    pub result: Option<ConsolidationResult>,
}

impl ClusterReport {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.result.as_ref().is_some_and(|r| !r.is_success())
    }
}

/// Files with byte-identical content
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateFileGroup {
    pub content_hash: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsolidationReport {
    pub root: PathBuf,
    /// Cluster key strategy used by this run
    pub strategy: String,
    pub stats: RunStats,
    pub stages: Vec<StageOutcome>,
    pub clusters: Vec<ClusterReport>,
    pub parse_errors: Vec<ParseError>,
    pub duplicate_files: Vec<DuplicateFileGroup>,
    pub success: bool,
}

impl ConsolidationReport {
    #[must_use]
    pub fn stage(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    #[must_use]
    pub fn cluster_failures(&self) -> usize {
        self.clusters.iter().filter(|c| c.is_failure()).count()
    }

    #[must_use]
    pub fn consolidated(&self) -> usize {
        self.clusters
            .iter()
            .filter(|c| c.result.as_ref().is_some_and(ConsolidationResult::is_success))
            .count()
    }

    /// One paragraph for the terminal
    #[must_use]
    pub fn summary_line(&self) -> String {
        let s = &self.stats;
        let status = if self.success {
            "completed"
        } else {
            "completed with failures"
        };
        format!(
            "Consolidation {status}: {} files scanned ({} loaded, {} unchanged, {} failed), \
             {} functions in {} clusters, {} with duplicates; {} consolidated, {} failed; \
             {} parse errors, {} duplicate file groups; {} keys; {:.2}s.",
            s.files_scanned,
            s.files_loaded,
            s.files_unchanged,
            s.files_failed,
            s.functions,
            s.clusters,
            s.multi_member_clusters,
            self.consolidated(),
            self.cluster_failures(),
            self.parse_errors.len(),
            self.duplicate_files.len(),
            self.strategy,
            s.time_ms as f64 / 1000.0
        )
    }

    #[must_use]
    pub fn render_markdown(&self) -> String {
        let s = &self.stats;
        let mut md = String::new();
        md.push_str("# Code consolidation report\n\n");
        md.push_str(&format!("- Project: `{}`\n", self.root.display()));
        md.push_str(&format!(
            "- Status: `{}`\n",
            if self.success { "success" } else { "failed" }
        ));
        md.push_str(&format!("- Strategy: `{}`\n", self.strategy));
        md.push_str(&format!(
            "- Files: `{}` scanned, `{}` loaded, `{}` unchanged, `{}` failed\n",
            s.files_scanned, s.files_loaded, s.files_unchanged, s.files_failed
        ));
        md.push_str(&format!(
            "- Functions: `{}`, clusters: `{}`, with duplicates: `{}`\n\n",
            s.functions, s.clusters, s.multi_member_clusters
        ));

        md.push_str("## Stages\n\n");
        md.push_str("| stage | status | duration_ms | message |\n");
        md.push_str("|---|---|---:|---|\n");
        for outcome in &self.stages {
            md.push_str(&format!(
                "| `{}` | `{}` | `{}` | {} |\n",
                outcome.stage,
                outcome.status,
                outcome.duration_ms,
                escape_cell(&truncate_one_line(
                    outcome.message.as_deref().unwrap_or(""),
                    MAX_CELL_CHARS
                )),
            ));
        }
        md.push('\n');

        md.push_str("## Clusters\n\n");
        if self.clusters.is_empty() {
            md.push_str("No duplicate functions found.\n\n");
        }
        for cluster in &self.clusters {
            md.push_str(&format!(
                "### `{}` ({} members)\n\n",
                cluster.key,
                cluster.members.len()
            ));
            md.push_str("| | function | location | complexity | docstring |\n");
            md.push_str("|---|---|---|---:|---|\n");
            for member in &cluster.members {
                let marker = if member.id == cluster.canonical_id {
                    "★"
                } else {
                    ""
                };
                md.push_str(&format!(
                    "| {marker} | `{}` | `{}` | `{}` | {} |\n",
                    escape_cell(&member.signature),
                    escape_cell(&member.location),
                    member.complexity,
                    if member.has_docstring { "yes" } else { "no" },
                ));
            }
            md.push('\n');

            match &cluster.result {
                None => md.push_str("Status: not processed\n\n"),
                Some(result) if result.is_success() => {
                    md.push_str(&format!(
                        "Status: consolidated{}\n\n",
                        if result.linted { "" } else { " (not linted)" }
                    ));
                    if let Some(code) = &result.consolidated_source {
                        md.push_str("```python\n");
                        md.push_str(code.trim_end());
                        md.push_str("\n```\n\n");
                    }
                }
                Some(result) => {
                    md.push_str("Status: failed\n\n");
                    for error in &result.errors {
                        md.push_str(&format!("- {}\n", truncate_one_line(error, MAX_CELL_CHARS)));
                    }
                    md.push('\n');
                }
            }
        }

        md.push_str("## Parse errors\n\n");
        if self.parse_errors.is_empty() {
            md.push_str("None.\n\n");
        } else {
            md.push_str("| file | line | message |\n");
            md.push_str("|---|---:|---|\n");
            for error in &self.parse_errors {
                md.push_str(&format!(
                    "| `{}` | `{}` | {} |\n",
                    escape_cell(&error.file_path),
                    error
                        .line_number
                        .map_or("n/a".to_string(), |v| v.to_string()),
                    escape_cell(&truncate_one_line(&error.message, MAX_CELL_CHARS)),
                ));
            }
            md.push('\n');
        }

        md.push_str("## Duplicate files\n\n");
        if self.duplicate_files.is_empty() {
            md.push_str("None.\n");
        }
        for group in &self.duplicate_files {
            let files: Vec<String> = group.files.iter().map(|f| format!("`{f}`")).collect();
            md.push_str(&format!(
                "- `{}`: {}\n",
                &group.content_hash[..group.content_hash.len().min(12)],
                files.join(", ")
            ));
        }

        md
    }

    /// Write `<root>/code_consolidation_report.md` and return its path.
    pub async fn write_markdown(&self, root: &Path) -> Result<PathBuf> {
        let path = root.join(REPORT_FILE_NAME);
        tokio::fs::write(&path, self.render_markdown()).await?;
        log::info!("Report written to {}", path.display());
        Ok(path)
    }

    pub async fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, bytes).await?;
        log::info!("JSON report written to {}", path.display());
        Ok(())
    }
}

fn truncate_one_line(text: &str, max_chars: usize) -> String {
    let mut s = text.replace(['\n', '\r', '\t'], " ");
    s = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if s.chars().count() <= max_chars {
        return s;
    }
    let truncated: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{truncated}…")
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::StageStatus;
    use pretty_assertions::assert_eq;

    fn report() -> ConsolidationReport {
        ConsolidationReport {
            root: PathBuf::from("/tmp/project"),
            strategy: "structural".to_string(),
            stats: RunStats {
                files_scanned: 3,
                files_loaded: 3,
                functions: 4,
                clusters: 3,
                multi_member_clusters: 1,
                ..RunStats::new()
            },
            stages: vec![StageOutcome {
                stage: Stage::Load,
                status: StageStatus::Completed,
                message: Some("3 loaded".to_string()),
                duration_ms: 4,
            }],
            clusters: vec![ClusterReport {
                key: "struct:load:1:0:abcd1234".to_string(),
                canonical_id: "a.py::load".to_string(),
                members: vec![
                    MemberSummary {
                        id: "a.py::load".to_string(),
                        signature: "def load(path)".to_string(),
                        location: "a.py:1".to_string(),
                        complexity: 1,
                        has_docstring: true,
                    },
                    MemberSummary {
                        id: "b.py::load".to_string(),
                        signature: "def load(path)".to_string(),
                        location: "b.py:7".to_string(),
                        complexity: 1,
                        has_docstring: false,
                    },
                ],
                result: Some(ConsolidationResult {
                    cluster_key: "struct:load:1:0:abcd1234".to_string(),
                    consolidated_source: None,
                    linted: false,
                    errors: vec!["model | offline".to_string()],
                    canonical_id: "a.py::load".to_string(),
                    member_count: 2,
                }),
            }],
            parse_errors: vec![ParseError::new("c.py", "syntax error: x | y", Some(2))],
            duplicate_files: vec![DuplicateFileGroup {
                content_hash: "0123456789abcdef".to_string(),
                files: vec!["d.py".to_string(), "e.py".to_string()],
            }],
            success: false,
        }
    }

    #[test]
    fn markdown_lists_clusters_errors_and_duplicates() {
        let md = report().render_markdown();
        assert!(md.contains("# Code consolidation report"));
        assert!(md.contains("## Stages"));
        assert!(md.contains("| ★ | `def load(path)` | `a.py:1` |"));
        assert!(md.contains("Status: failed"));
        assert!(md.contains("| `c.py` | `2` | syntax error: x \\| y |"));
        assert!(md.contains("- `0123456789ab`: `d.py`, `e.py`"));
    }

    #[test]
    fn counts_failures_and_summarises() {
        let report = report();
        assert_eq!(report.cluster_failures(), 1);
        assert_eq!(report.consolidated(), 0);
        let line = report.summary_line();
        assert!(line.starts_with("Consolidation completed with failures: 3 files scanned"));
        assert!(line.contains("1 parse errors"));
    }

    #[test]
    fn truncates_long_cells() {
        assert_eq!(truncate_one_line("a\nb   c", 10), "a b c");
        assert_eq!(truncate_one_line("abcdef", 4), "abc…");
    }

    #[tokio::test]
    async fn writes_markdown_and_json() {
        let temp = tempfile::tempdir().unwrap();
        let report = report();
        let md_path = report.write_markdown(temp.path()).await.unwrap();
        assert_eq!(md_path, temp.path().join(REPORT_FILE_NAME));

        let json_path = temp.path().join("out").join("report.json");
        report.write_json(&json_path).await.unwrap();
        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(json_path).unwrap()).unwrap();
        assert_eq!(value["clusters"][0]["result"]["errors"][0], "model | offline");
        assert_eq!(value["parse_errors"][0]["line_number"], 2);
    }
}
