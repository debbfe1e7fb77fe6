use crate::ast_analyzer::AstAnalyzer;
use crate::error::ExtractorError;
use crate::fallback;
use crate::hashing::{hash_prefix, sha256_hex};
use crate::keywords::KeywordExtractor;
use crate::types::{ExtractionPath, Function, FunctionDraft, ParseError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Hex length of `semantic_hash`
const SEMANTIC_HASH_LEN: usize = 16;

/// Everything extracted from one file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileExtraction {
    pub functions: Vec<Function>,
    pub errors: Vec<ParseError>,
    /// sha256 of the file bytes; `None` when the file could not be read
    pub content_hash: Option<String>,
    /// Neither parser could run: unreadable, not UTF-8, or no grammar
    pub failed: bool,
}

impl FileExtraction {
    /// True when the file could not be analysed at all.
    ///
    /// A syntax error that the line scanner recovered from is not a failure,
    /// even when the scanner found no functions.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        self.failed
    }

    fn failed(file_path: &str, message: String, content_hash: Option<String>) -> Self {
        Self {
            functions: Vec::new(),
            errors: vec![ParseError::new(file_path, message, None)],
            content_hash,
            failed: true,
        }
    }
}

/// Parses Python files into [`Function`] records.
///
/// The tree-sitter grammar is tried first. A syntax error is recorded as a
/// [`ParseError`] and the file is re-read by the line scanner; any other
/// failure leaves the file with no functions.
#[derive(Clone)]
pub struct FunctionExtractor {
    keywords: Arc<dyn KeywordExtractor>,
}

impl FunctionExtractor {
    pub fn new(keywords: Arc<dyn KeywordExtractor>) -> Self {
        Self { keywords }
    }

    /// Read `path` and extract its functions, reporting them under `file_path`.
    pub fn extract(&self, path: &Path, file_path: &str) -> FileExtraction {
        match std::fs::read(path) {
            Ok(bytes) => self.extract_source(file_path, &bytes),
            Err(e) => {
                log::warn!("Failed to read {}: {e}", path.display());
                FileExtraction::failed(file_path, ExtractorError::from(e).to_string(), None)
            }
        }
    }

    /// Extract functions from in-memory source.
    pub fn extract_source(&self, file_path: &str, bytes: &[u8]) -> FileExtraction {
        let content_hash = sha256_hex(bytes);
        let Ok(content) = std::str::from_utf8(bytes) else {
            return FileExtraction::failed(
                file_path,
                "file is not valid UTF-8".to_string(),
                Some(content_hash),
            );
        };

        let analyzed = AstAnalyzer::new().and_then(|mut analyzer| analyzer.analyze(content));
        match analyzed {
            Ok(drafts) => FileExtraction {
                functions: self.finish(file_path, &content_hash, drafts, ExtractionPath::Formal),
                errors: Vec::new(),
                content_hash: Some(content_hash),
                failed: false,
            },
            Err(ExtractorError::SyntaxError {
                message,
                line,
                column,
            }) => {
                log::debug!("{file_path}:{line}:{column}: {message}, using line scanner");
                let drafts = fallback::scan(content);
                FileExtraction {
                    functions: self.finish(
                        file_path,
                        &content_hash,
                        drafts,
                        ExtractionPath::Fallback,
                    ),
                    errors: vec![ParseError::new(
                        file_path,
                        format!("syntax error: {message} (column {column})"),
                        Some(line),
                    )],
                    content_hash: Some(content_hash),
                    failed: false,
                }
            }
            Err(e) => {
                log::warn!("Extraction failed for {file_path}: {e}");
                FileExtraction::failed(file_path, e.to_string(), Some(content_hash))
            }
        }
    }

    /// Run only the line scanner, as if the grammar had rejected the file.
    pub fn extract_fallback(&self, file_path: &str, bytes: &[u8]) -> FileExtraction {
        let content_hash = sha256_hex(bytes);
        let content = String::from_utf8_lossy(bytes);
        FileExtraction {
            functions: self.finish(
                file_path,
                &content_hash,
                fallback::scan(&content),
                ExtractionPath::Fallback,
            ),
            errors: Vec::new(),
            content_hash: Some(content_hash),
            failed: false,
        }
    }

    fn finish(
        &self,
        file_path: &str,
        content_hash: &str,
        drafts: Vec<FunctionDraft>,
        extraction: ExtractionPath,
    ) -> Vec<Function> {
        let mut name_counts: HashMap<&str, usize> = HashMap::new();
        for draft in &drafts {
            *name_counts.entry(draft.name.as_str()).or_insert(0) += 1;
        }
        let repeated: Vec<String> = name_counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(name, _)| name.to_string())
            .collect();

        drafts
            .into_iter()
            .map(|draft| {
                let id = if repeated.contains(&draft.name) {
                    format!("{file_path}::{}@{}", draft.name, draft.line_number)
                } else {
                    format!("{file_path}::{}", draft.name)
                };
                let context_keywords = self.keywords.extract(&draft.source);
                let semantic_hash = (!context_keywords.is_empty())
                    .then(|| hash_prefix(&context_keywords, SEMANTIC_HASH_LEN));

                Function {
                    id,
                    name: draft.name,
                    file_path: file_path.to_string(),
                    args: draft.args,
                    line_number: draft.line_number,
                    end_line: draft.end_line,
                    docstring: draft.docstring,
                    complexity: draft.complexity,
                    content_hash: content_hash.to_string(),
                    context_keywords,
                    semantic_hash,
                    extraction,
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for FunctionExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionExtractor").finish_non_exhaustive()
    }
}
