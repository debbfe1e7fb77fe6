use std::collections::HashMap;
use unicode_segmentation::UnicodeSegmentation;

/// Default number of keywords kept per function
pub const DEFAULT_MAX_KEYWORDS: usize = 20;

const MIN_KEYWORD_LEN: usize = 3;

/// Python keywords and builtins that say nothing about what a function does
const PYTHON_WORDS: &[&str] = &[
    "and", "as", "assert", "async", "await", "break", "class", "continue", "def", "del", "elif",
    "else", "except", "false", "finally", "for", "from", "global", "import", "lambda", "none",
    "nonlocal", "not", "pass", "raise", "return", "self", "cls", "true", "try", "while", "with",
    "yield", "print", "len", "range", "str", "int", "float", "bool", "dict", "list", "tuple",
    "set", "args", "kwargs",
];

const STOP_WORDS: &[&str] = &[
    "the", "this", "that", "these", "those", "with", "from", "into", "for", "and", "but", "are",
    "was", "were", "been", "being", "have", "has", "had", "can", "could", "should", "would",
    "will", "shall", "may", "might", "must", "its", "our", "their", "there", "here", "then",
    "than", "when", "what", "which", "who", "whom", "whose", "why", "how", "all", "any", "each",
    "some", "such", "only", "own", "same", "too", "very", "just", "also", "use", "used", "using",
    "get", "set", "value", "values", "returns", "return", "given", "new", "one", "two",
];

/// Produces the normalized keyword string attached to each function
pub trait KeywordExtractor: Send + Sync {
    /// Space-joined, sorted, deduplicated keywords for `source`.
    fn extract(&self, source: &str) -> String;
}

/// Frequency-ranked identifier and word tokens
#[derive(Debug, Clone)]
pub struct LexicalKeywords {
    max_keywords: usize,
}

impl LexicalKeywords {
    #[must_use]
    pub fn new(max_keywords: usize) -> Self {
        Self { max_keywords }
    }
}

impl Default for LexicalKeywords {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_KEYWORDS)
    }
}

impl KeywordExtractor for LexicalKeywords {
    fn extract(&self, source: &str) -> String {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for word in source.unicode_words() {
            for part in split_identifier(word) {
                if keep(&part) {
                    *counts.entry(part).or_insert(0) += 1;
                }
            }
        }

        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(self.max_keywords);

        let mut words: Vec<String> = ranked.into_iter().map(|(word, _)| word).collect();
        words.sort();
        words.join(" ")
    }
}

/// Keyword extraction switched off; every function gets an empty set
#[derive(Debug, Clone, Copy, Default)]
pub struct NoKeywords;

impl KeywordExtractor for NoKeywords {
    fn extract(&self, _source: &str) -> String {
        String::new()
    }
}

/// Split `snake_case` and `camelCase` identifiers into lowercase parts.
fn split_identifier(word: &str) -> Vec<String> {
    let mut parts = Vec::new();
    for chunk in word.split('_').filter(|chunk| !chunk.is_empty()) {
        let mut current = String::new();
        let mut prev_lower = false;
        for c in chunk.chars() {
            if c.is_uppercase() && prev_lower && !current.is_empty() {
                parts.push(std::mem::take(&mut current).to_lowercase());
            }
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
            current.push(c);
        }
        if !current.is_empty() {
            parts.push(current.to_lowercase());
        }
    }
    parts
}

fn keep(word: &str) -> bool {
    word.chars().count() >= MIN_KEYWORD_LEN
        && !word.chars().all(|c| c.is_ascii_digit())
        && word.chars().any(char::is_alphabetic)
        && !PYTHON_WORDS.contains(&word)
        && !STOP_WORDS.contains(&word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn splits_identifiers() {
        assert_eq!(split_identifier("parse_config"), vec!["parse", "config"]);
        assert_eq!(split_identifier("loadHTTPResponse"), vec!["load", "httpresponse"]);
        assert_eq!(split_identifier("__init__"), vec!["init"]);
    }

    #[test]
    fn keywords_are_sorted_and_filtered() {
        let source = "\
def parse_config(path):
    \"\"\"Parse the config file.\"\"\"
    return load_yaml(path)
";
        let keywords = LexicalKeywords::default().extract(source);
        assert_eq!(keywords, "config file load parse path yaml");
    }

    #[test]
    fn reordered_sources_share_keywords() {
        let extractor = LexicalKeywords::default();
        let a = extractor.extract("def fetch(url):\n    return http_get(url)\n");
        let b = extractor.extract("def fetch(url):\n    data = http_get(url)\n    return data\n");
        assert!(a.split(' ').all(|word| b.contains(word)));
    }

    #[test]
    fn keeps_most_frequent_words_only() {
        let extractor = LexicalKeywords::new(2);
        let keywords = extractor.extract("alpha alpha alpha beta beta gamma");
        assert_eq!(keywords, "alpha beta");
    }

    #[test]
    fn drops_numbers_and_short_words() {
        let keywords = LexicalKeywords::default().extract("x = 12345 + ab + counter");
        assert_eq!(keywords, "counter");
    }

    #[test]
    fn disabled_extractor_is_empty() {
        assert_eq!(NoKeywords.extract("def parse(): pass"), "");
    }
}
