use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Quality contribution of a docstring
const DOCSTRING_WEIGHT: u32 = 2;
/// Complexity stops adding quality past this point
const COMPLEXITY_CAP: u32 = 10;

/// Which extraction path produced a function
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionPath {
    /// Tree-sitter grammar walk
    #[default]
    Formal,
    /// Line scanner used after a syntax error
    Fallback,
}

/// A function or method definition found in a source file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Function {
    /// `{file_path}::{name}`, suffixed with `@{line}` for repeated names
    pub id: String,

    pub name: String,

    /// Path relative to the scanned root, `/` separated
    pub file_path: String,

    /// Parameter names in declaration order (splat markers stripped)
    pub args: Vec<String>,

    /// Header line (1-indexed)
    pub line_number: u32,

    /// Last line of the body (1-indexed, inclusive)
    #[serde(default)]
    pub end_line: u32,

    pub docstring: Option<String>,

    /// Cyclomatic estimate; a fixed low-confidence value on the fallback path
    pub complexity: u32,

    /// sha256 of the whole file the function was read from
    pub content_hash: String,

    /// Sorted, stop-word filtered keywords of the function body
    pub context_keywords: String,

    /// Hash of the normalized keyword set, absent when there are no keywords
    pub semantic_hash: Option<String>,

    #[serde(default)]
    pub extraction: ExtractionPath,
}

impl Function {
    #[must_use]
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    #[must_use]
    pub fn has_docstring(&self) -> bool {
        self.docstring
            .as_deref()
            .is_some_and(|doc| !doc.trim().is_empty())
    }

    /// `2·has_docstring + min(complexity, 10)`
    #[must_use]
    pub fn quality_score(&self) -> u32 {
        let doc = if self.has_docstring() {
            DOCSTRING_WEIGHT
        } else {
            0
        };
        doc + self.complexity.min(COMPLEXITY_CAP)
    }

    /// Ordering used to pick a canonical candidate: `Less` means `self` is the
    /// better candidate. Higher score first, then earlier line, then path.
    #[must_use]
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        other
            .quality_score()
            .cmp(&self.quality_score())
            .then_with(|| self.line_number.cmp(&other.line_number))
            .then_with(|| self.file_path.cmp(&other.file_path))
            .then_with(|| self.id.cmp(&other.id))
    }

    /// Python-style signature, e.g. `def load(path, strict)`
    #[must_use]
    pub fn signature(&self) -> String {
        format!("def {}({})", self.name, self.args.join(", "))
    }

    /// `file:line` location string
    #[must_use]
    pub fn location(&self) -> String {
        format!("{}:{}", self.file_path, self.line_number)
    }
}

/// A recoverable extraction problem for one file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ParseError {
    pub file_path: String,
    pub message: String,
    pub line_number: Option<u32>,
}

impl ParseError {
    pub fn new(
        file_path: impl Into<String>,
        message: impl Into<String>,
        line_number: Option<u32>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            message: message.into(),
            line_number,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line_number {
            Some(line) => write!(f, "{}:{}: {}", self.file_path, line, self.message),
            None => write!(f, "{}: {}", self.file_path, self.message),
        }
    }
}

impl FromStr for ParseError {
    type Err = String;

    /// Inverse of `Display`: `path:line: message` or `path: message`.
    ///
    /// The path ends at the first `": "`, and a trailing `:<digits>` is read
    /// as the line. Paths containing `": "`, or ending in `:<digits>` on an
    /// entry without a line, do not survive the round trip.
    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        let (head, message) = raw
            .split_once(": ")
            .ok_or_else(|| format!("malformed parse error entry: {raw:?}"))?;

        let (file_path, line_number) = match head.rsplit_once(':') {
            Some((path, line)) if !path.is_empty() => match line.parse::<u32>() {
                Ok(line) => (path, Some(line)),
                Err(_) => (head, None),
            },
            _ => (head, None),
        };

        if file_path.is_empty() {
            return Err(format!("parse error entry without a path: {raw:?}"));
        }

        Ok(Self::new(file_path, message, line_number))
    }
}

/// Function data before identity, hashing and keywords are attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FunctionDraft {
    pub name: String,
    pub args: Vec<String>,
    pub line_number: u32,
    pub end_line: u32,
    pub docstring: Option<String>,
    pub complexity: u32,
    pub source: String,
}

/// Strip quotes and string prefixes from a Python string literal.
pub(crate) fn strip_string_literal(literal: &str) -> Option<String> {
    let trimmed = literal.trim();
    let body_start = trimmed.find(['"', '\''])?;
    let prefix = &trimmed[..body_start];
    if prefix.len() > 2 || !prefix.chars().all(|c| "rRuUbBfF".contains(c)) {
        return None;
    }
    let body = &trimmed[body_start..];

    let inner = ["\"\"\"", "'''", "\"", "'"]
        .iter()
        .find_map(|quote| {
            body.strip_prefix(quote)
                .map(|rest| rest.strip_suffix(quote).unwrap_or(rest))
        })?;

    let text = inner.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}
