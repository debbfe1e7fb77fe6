use crate::cluster::Cluster;
use crate::formatter::Formatter;
use crate::llm::{strip_code_fences, GenerateOptions, Generator};
use consolidator_extractor::Function;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Longest member body quoted in a prompt
const MAX_BODY_LINES: usize = 80;

/// Outcome of one consolidation proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationResult {
    pub cluster_key: String,
    pub consolidated_source: Option<String>,
    /// Whether the formatter accepted the generated code
    pub linted: bool,
    pub errors: Vec<String>,
    pub canonical_id: String,
    pub member_count: usize,
}

impl ConsolidationResult {
    fn for_cluster(cluster: &Cluster) -> Self {
        Self {
            cluster_key: cluster.key.clone(),
            consolidated_source: None,
            linted: false,
            errors: Vec::new(),
            canonical_id: cluster.canonical.id.clone(),
            member_count: cluster.len(),
        }
    }

    /// Failure entry for a proposal that never produced a result
    #[must_use]
    pub fn failed(cluster: &Cluster, error: impl Into<String>) -> Self {
        let mut result = Self::for_cluster(cluster);
        result.errors.push(error.into());
        result
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.consolidated_source.is_some()
    }
}

/// Asks a generator for one implementation per duplicate cluster
pub struct ConsolidationAdvisor {
    generator: Arc<dyn Generator>,
    formatter: Arc<dyn Formatter>,
    options: GenerateOptions,
    source_root: Option<PathBuf>,
}

impl ConsolidationAdvisor {
    pub fn new(
        generator: Arc<dyn Generator>,
        formatter: Arc<dyn Formatter>,
        options: GenerateOptions,
    ) -> Self {
        Self {
            generator,
            formatter,
            options,
            source_root: None,
        }
    }

    /// Quote member bodies from files below `root` in prompts
    #[must_use]
    pub fn with_source_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.source_root = Some(root.into());
        self
    }

    #[must_use]
    pub fn generator_name(&self) -> String {
        self.generator.name()
    }

    pub async fn build_prompt(&self, cluster: &Cluster) -> String {
        let mut files: HashMap<&str, Option<Vec<String>>> = HashMap::new();
        let mut prompt = String::new();

        prompt.push_str(&format!(
            "The following {} Python functions implement the same behaviour.\n",
            cluster.len()
        ));
        prompt.push_str(
            "Write ONE consolidated implementation that preserves the behaviour of all of them.\n",
        );
        prompt.push_str(
            "Start from the canonical candidate. Reply with a single Python code block.\n\n",
        );

        for (i, member) in cluster.members.iter().enumerate() {
            let marker = if member.id == cluster.canonical.id {
                " (canonical candidate)"
            } else {
                ""
            };
            prompt.push_str(&format!("### Candidate {}{marker}\n", i + 1));
            prompt.push_str(&format!("Signature: {}\n", member.signature()));
            prompt.push_str(&format!("Location: {}\n", member.location()));
            prompt.push_str(&format!("Complexity: {}\n", member.complexity));
            if let Some(doc) = member.docstring.as_deref().filter(|d| !d.trim().is_empty()) {
                prompt.push_str(&format!("Docstring: {}\n", doc.trim()));
            }

            let lines = match files.get(member.file_path.as_str()) {
                Some(lines) => lines.clone(),
                None => {
                    let lines = self.read_lines(member).await;
                    files.insert(member.file_path.as_str(), lines.clone());
                    lines
                }
            };
            if let Some(body) = lines.and_then(|lines| body_of(&lines, member)) {
                prompt.push_str("```python\n");
                prompt.push_str(&body);
                prompt.push_str("\n```\n");
            }
            prompt.push('\n');
        }

        prompt
    }

    async fn read_lines(&self, member: &Function) -> Option<Vec<String>> {
        let root = self.source_root.as_ref()?;
        match tokio::fs::read_to_string(root.join(&member.file_path)).await {
            Ok(text) => Some(text.lines().map(str::to_string).collect()),
            Err(e) => {
                log::debug!("Cannot quote {}: {e}", member.file_path);
                None
            }
        }
    }

    /// Generate, strip fences, then format. Never panics on collaborator errors.
    pub async fn propose(&self, cluster: &Cluster) -> ConsolidationResult {
        if cluster.len() < 2 {
            return ConsolidationResult::failed(cluster, "cluster has a single member");
        }

        let prompt = self.build_prompt(cluster).await;
        let answer = match self.generator.generate(&prompt, &self.options).await {
            Ok(answer) => answer,
            Err(e) => {
                log::warn!("Cluster {} failed: {e}", cluster.key);
                return ConsolidationResult::failed(cluster, e.to_string());
            }
        };

        let code = strip_code_fences(&answer);
        if code.is_empty() {
            return ConsolidationResult::failed(cluster, "generator returned no code");
        }

        let formatted = self.formatter.format(&code).await;
        let mut result = ConsolidationResult::for_cluster(cluster);
        if formatted.success {
            result.consolidated_source = Some(formatted.output);
            result.linted = true;
        } else {
            if let Some(diagnostics) = &formatted.diagnostics {
                log::debug!("Formatter rejected cluster {}: {diagnostics}", cluster.key);
            }
            result.consolidated_source = Some(code);
        }
        result
    }
}

fn body_of(lines: &[String], member: &Function) -> Option<String> {
    let start = member.line_number.checked_sub(1)? as usize;
    let end = (member.end_line.max(member.line_number) as usize)
        .min(lines.len())
        .min(start + MAX_BODY_LINES);
    if start >= end {
        return None;
    }
    Some(lines[start..end].join("\n"))
}
