//! Block structure checks the grammar does not enforce.
//!
//! tree-sitter-python recovers from bad indentation without emitting `ERROR`
//! nodes, so the formal path re-reads the source as logical lines and applies
//! the tokenizer's indent rules: unexpected indents, dedents to an unknown
//! level, headers with no indented body, and ambiguous tab/space mixes.

use crate::error::{ExtractorError, Result};

const TAB_SIZE: usize = 8;

/// Indentation width measured with tab stops of 8 and of 1.
///
/// Two widths that order differently under the two measures mean the
/// indentation depends on the tab size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Indent {
    col: usize,
    alt: usize,
}

impl Indent {
    const ZERO: Self = Self { col: 0, alt: 0 };

    fn measure(line: &str) -> Self {
        let mut indent = Self::ZERO;
        for c in line.chars() {
            match c {
                ' ' => {
                    indent.col += 1;
                    indent.alt += 1;
                }
                '\t' => {
                    indent.col = (indent.col / TAB_SIZE + 1) * TAB_SIZE;
                    indent.alt += 1;
                }
                '\x0c' => indent = Self::ZERO,
                _ => break,
            }
        }
        indent
    }
}

#[derive(Debug, Clone, Copy)]
struct StringState {
    quote: char,
    triple: bool,
}

/// Lexical state carried from one physical line to the next
#[derive(Debug, Default)]
struct LineState {
    depth: usize,
    string: Option<StringState>,
    backslash: bool,
}

impl LineState {
    /// The next physical line continues the current logical line.
    fn continues(&self) -> bool {
        self.depth > 0 || self.string.is_some() || self.backslash
    }

    /// Consume one physical line; returns the last significant character
    /// outside strings and comments at bracket depth zero.
    fn consume(&mut self, line: &str) -> Option<char> {
        self.backslash = false;
        let mut last = None;
        let mut chars = line.chars().peekable();

        while let Some(c) = chars.next() {
            if let Some(state) = self.string {
                match c {
                    '\\' => {
                        if chars.next().is_none() {
                            self.backslash = !state.triple;
                        }
                    }
                    q if q == state.quote => {
                        let closed = !state.triple
                            || (chars.next_if_eq(&q).is_some()
                                && chars.next_if_eq(&q).is_some());
                        if closed {
                            self.string = None;
                        }
                    }
                    _ => {}
                }
                if self.string.is_none() {
                    last = Some(c);
                }
                continue;
            }

            match c {
                '#' => break,
                '\\' if chars.peek().is_none() => {
                    self.backslash = true;
                    break;
                }
                '\'' | '"' => {
                    let triple = chars.next_if_eq(&c).is_some();
                    if triple && chars.next_if_eq(&c).is_none() {
                        // empty literal: '' or ""
                        last = Some(c);
                        continue;
                    }
                    self.string = Some(StringState { quote: c, triple });
                }
                '(' | '[' | '{' => self.depth += 1,
                ')' | ']' | '}' => self.depth = self.depth.saturating_sub(1),
                c if c.is_whitespace() => continue,
                _ => {}
            }
            if self.depth == 0 || matches!(c, ')' | ']' | '}') {
                last = Some(c);
            }
        }

        // A single-quoted literal cannot span lines without a backslash.
        if let Some(state) = self.string {
            if !state.triple && !self.backslash {
                self.string = None;
            }
        }
        last
    }
}

/// Check the indentation of `content` the way the Python tokenizer does.
pub(crate) fn check(content: &str) -> Result<()> {
    let mut levels = vec![Indent::ZERO];
    let mut state = LineState::default();
    let mut expect_block = false;
    let mut last_line = 0;

    for (idx, line) in content.lines().enumerate() {
        last_line = idx + 1;
        if state.continues() {
            if let Some(last) = state.consume(line) {
                expect_block = last == ':' && !state.continues();
            }
            continue;
        }

        let code = line.trim_start_matches([' ', '\t', '\x0c']);
        if code.is_empty() || code.starts_with('#') {
            continue;
        }

        let indent = Indent::measure(line);
        let current = levels.last().copied().unwrap_or(Indent::ZERO);
        let line_no = to_u32(idx + 1);
        let column = to_u32(indent.col + 1);

        if expect_block {
            if indent.col <= current.col {
                return Err(ExtractorError::syntax(
                    "expected an indented block",
                    line_no,
                    column,
                ));
            }
            if indent.alt <= current.alt {
                return Err(inconsistent(line_no, column));
            }
            levels.push(indent);
        } else if indent.col > current.col {
            return Err(ExtractorError::syntax("unexpected indent", line_no, column));
        } else if indent.col == current.col {
            if indent.alt != current.alt {
                return Err(inconsistent(line_no, column));
            }
        } else {
            while levels.last().is_some_and(|level| indent.col < level.col) {
                levels.pop();
            }
            match levels.last() {
                Some(level) if level.col == indent.col => {
                    if level.alt != indent.alt {
                        return Err(inconsistent(line_no, column));
                    }
                }
                _ => {
                    return Err(ExtractorError::syntax(
                        "unindent does not match any outer indentation level",
                        line_no,
                        column,
                    ));
                }
            }
        }

        expect_block = state.consume(line) == Some(':') && !state.continues();
    }

    if expect_block {
        return Err(ExtractorError::syntax(
            "expected an indented block",
            to_u32(last_line + 1),
            1,
        ));
    }
    Ok(())
}

fn inconsistent(line: u32, column: u32) -> ExtractorError {
    ExtractorError::syntax("inconsistent use of tabs and spaces in indentation", line, column)
}

fn to_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
