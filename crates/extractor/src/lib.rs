//! # Consolidator Extractor
//!
//! Turns Python source files into [`Function`] records for duplicate detection.
//!
//! ## Architecture
//!
//! ```text
//! Source bytes
//!     │
//!     ├──> content_hash (sha256 of the whole file)
//!     │
//!     ├──> Tree-sitter Parsing → AST
//!     │      ├─> block indentation checked line by line
//!     │      ├─> every function_definition (methods, nested, decorated)
//!     │      └─> complexity = 1 + branch nodes in the subtree
//!     │
//!     ├──> on syntax error: ParseError + line scanner fallback
//!     │      └─> fixed complexity (1 single-line header, 2 multi-line)
//!     │
//!     └──> Keyword extraction → context_keywords / semantic_hash
//! ```
//!
//! ## Example
//!
//! ```rust
//! use consolidator_extractor::{FunctionExtractor, LexicalKeywords};
//! use std::sync::Arc;
//!
//! let extractor = FunctionExtractor::new(Arc::new(LexicalKeywords::default()));
//! let out = extractor.extract_source("pkg/util.py", b"def add(a, b):\n    return a + b\n");
//!
//! assert!(out.errors.is_empty());
//! assert_eq!(out.functions[0].name, "add");
//! assert_eq!(out.functions[0].args, vec!["a", "b"]);
//! ```

mod ast_analyzer;
mod error;
mod extractor;
mod fallback;
mod hashing;
mod indentation;
mod keywords;
mod types;

pub use error::{ExtractorError, Result};
pub use extractor::{FileExtraction, FunctionExtractor};
pub use hashing::{hash_prefix, sha256_hex};
pub use keywords::{KeywordExtractor, LexicalKeywords, NoKeywords, DEFAULT_MAX_KEYWORDS};
pub use types::{ExtractionPath, Function, ParseError};
