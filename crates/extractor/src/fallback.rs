//! Line-oriented function scanner used when the grammar rejects a file.
//!
//! It has no tree to count branches on, so complexity is a fixed
//! low-confidence value: 1 for a single-line header, 2 for a multi-line one.

use crate::types::{strip_string_literal, FunctionDraft};
use once_cell::sync::Lazy;
use regex::Regex;

const TAB_WIDTH: usize = 4;
/// A multi-line header is abandoned after this many lines without a close
const MAX_CONTINUATION_LINES: usize = 3;
const SINGLE_LINE_COMPLEXITY: u32 = 1;
const MULTI_LINE_COMPLEXITY: u32 = 2;

/// `def name(` or `async def name(`
static HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<indent>[ \t]*)(?:async\s+)?def\s+(?P<name>[^\W\d]\w*)\s*\(")
        .expect("header pattern compiles")
});

/// `):` or `) -> T:`
static HEADER_CLOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\)\s*(?:->[^:]*)?:").expect("header close pattern compiles"));

/// One parameter after defaults are flattened: splat, name, then annotation or default
static PARAMETER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\*{0,2}\s*(?P<name>[^\W\d]\w*)\s*(?:[:=].*)?$")
        .expect("parameter pattern compiles")
});

static STRING_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""[^"]*"|'[^']*'"#).expect("string pattern compiles"));

/// Innermost bracket group
static BRACKET_GROUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\([^()\[\]{}]*\)|\[[^()\[\]{}]*\]|\{[^()\[\]{}]*\}")
        .expect("bracket pattern compiles")
});

/// Code before an unquoted `#`
static CODE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^(?:[^#'"]|"[^"]*"|'[^']*')*"#).expect("code pattern compiles"));

struct HeaderStart {
    indent: usize,
    name: String,
}

/// Scan `content` for `def` / `async def` headers.
pub(crate) fn scan(content: &str) -> Vec<FunctionDraft> {
    let lines: Vec<String> = content
        .lines()
        .map(|line| line.replace('\t', &" ".repeat(TAB_WIDTH)))
        .collect();

    let mut drafts = Vec::new();
    let mut idx = 0;
    while idx < lines.len() {
        let Some(start) = header_start(&lines[idx]) else {
            idx += 1;
            continue;
        };

        if closes_header(&lines[idx]) {
            drafts.push(draft(&lines, &start, idx, idx, SINGLE_LINE_COMPLEXITY));
            idx += 1;
            continue;
        }

        let close = (1..=MAX_CONTINUATION_LINES)
            .map(|offset| idx + offset)
            .take_while(|&line_idx| line_idx < lines.len())
            .find(|&line_idx| closes_header(&lines[line_idx]));

        match close {
            Some(end) => {
                drafts.push(draft(&lines, &start, idx, end, MULTI_LINE_COMPLEXITY));
                idx = end + 1;
            }
            None => {
                log::debug!(
                    "Dropping unterminated header for `{}` at line {}",
                    start.name,
                    idx + 1
                );
                idx += 1;
            }
        }
    }

    drafts
}

fn draft(
    lines: &[String],
    start: &HeaderStart,
    header_idx: usize,
    header_end: usize,
    complexity: u32,
) -> FunctionDraft {
    let header: String = lines[header_idx..=header_end]
        .iter()
        .map(|line| strip_comment(line).trim())
        .collect::<Vec<_>>()
        .join(" ");

    let body_end = body_end(lines, start.indent, header_end);
    let inline_body = inline_body(&lines[header_end]);
    let docstring = if inline_body {
        None
    } else {
        leading_docstring(lines, start.indent, header_end)
    };

    FunctionDraft {
        name: start.name.clone(),
        args: parameters(&header),
        line_number: to_line(header_idx),
        end_line: to_line(body_end),
        docstring,
        complexity,
        source: lines[header_idx..=body_end].join("\n"),
    }
}

fn header_start(line: &str) -> Option<HeaderStart> {
    let caps = HEADER.captures(line)?;
    Some(HeaderStart {
        indent: caps.name("indent").map_or(0, |m| m.len()),
        name: caps.name("name")?.as_str().to_string(),
    })
}

fn closes_header(line: &str) -> bool {
    HEADER_CLOSE.is_match(strip_comment(line))
}

/// `def f(): return 1` keeps its body on the header line.
fn inline_body(line: &str) -> bool {
    let code = strip_comment(line);
    HEADER_CLOSE
        .find(code)
        .is_some_and(|close| !code[close.end()..].trim().is_empty())
}

/// Parameter names of a joined header.
///
/// String literals and nested bracket groups are flattened away first, so the
/// commas left before the closing `)` separate parameters.
fn parameters(header: &str) -> Vec<String> {
    let Some(open) = HEADER.find(header) else {
        return Vec::new();
    };

    let mut list = STRING_LITERAL
        .replace_all(&header[open.end()..], "\"\"")
        .into_owned();
    loop {
        let flattened = BRACKET_GROUP.replace_all(&list, "").into_owned();
        if flattened == list {
            break;
        }
        list = flattened;
    }

    list.split(')')
        .next()
        .unwrap_or_default()
        .split(',')
        .filter_map(|piece| PARAMETER.captures(piece))
        .filter_map(|caps| caps.name("name").map(|m| m.as_str().to_string()))
        .collect()
}

fn leading_docstring(lines: &[String], header_indent: usize, header_end: usize) -> Option<String> {
    let (first_idx, first) = lines
        .iter()
        .enumerate()
        .skip(header_end + 1)
        .find(|(_, line)| !line.trim().is_empty())?;
    if indentation(first) <= header_indent {
        return None;
    }

    let trimmed = first.trim();
    let quote_pos = trimmed.find(['"', '\''])?;
    let prefix = &trimmed[..quote_pos];
    if prefix.len() > 2 || !prefix.chars().all(|c| "rRuUbBfF".contains(c)) {
        return None;
    }

    let body = &trimmed[quote_pos..];
    let triple = ["\"\"\"", "'''"].into_iter().find(|q| body.starts_with(q));
    let Some(triple) = triple else {
        return strip_string_literal(trimmed);
    };

    if body.len() > triple.len() && body[triple.len()..].contains(triple) {
        return strip_string_literal(trimmed);
    }

    let mut literal = trimmed.to_string();
    for line in &lines[first_idx + 1..] {
        literal.push('\n');
        literal.push_str(line.trim());
        if line.contains(triple) {
            return strip_string_literal(&literal);
        }
    }
    None
}

/// Last line of the body: the line before indentation returns to the header's level.
fn body_end(lines: &[String], header_indent: usize, header_end: usize) -> usize {
    let mut last = header_end;
    for (idx, line) in lines.iter().enumerate().skip(header_end + 1) {
        if line.trim().is_empty() {
            continue;
        }
        if indentation(line) <= header_indent {
            break;
        }
        last = idx;
    }
    last
}

fn strip_comment(line: &str) -> &str {
    let code = CODE_PREFIX.find(line).map_or("", |m| m.as_str());
    if line[code.len()..].starts_with('#') {
        code
    } else {
        line
    }
}

fn indentation(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn to_line(idx: usize) -> u32 {
    u32::try_from(idx + 1).unwrap_or(u32::MAX)
}
