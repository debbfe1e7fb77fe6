use crate::error::{ExtractorError, Result};
use crate::indentation;
use crate::types::{strip_string_literal, FunctionDraft};
use tree_sitter::{Node, Parser};

/// Node kinds that add a decision point to a function
const BRANCH_KINDS: &[&str] = &[
    "if_statement",
    "elif_clause",
    "while_statement",
    "for_statement",
    "boolean_operator",
];

/// AST-based function collector for Python sources
pub struct AstAnalyzer {
    parser: Parser,
}

impl AstAnalyzer {
    pub fn new() -> Result<Self> {
        let language: tree_sitter::Language = tree_sitter_python::LANGUAGE.into();
        let mut parser = Parser::new();
        parser
            .set_language(&language)
            .map_err(|e| ExtractorError::tree_sitter(format!("Failed to set language: {e}")))?;

        Ok(Self { parser })
    }

    /// Parse `content` and collect every function definition.
    ///
    /// Tree-sitter recovers from errors instead of failing, so a tree that
    /// contains `ERROR` or `MISSING` nodes is reported as a syntax error at the
    /// first such node. Indentation the grammar tolerates but Python rejects
    /// is reported the same way.
    pub fn analyze(&mut self, content: &str) -> Result<Vec<FunctionDraft>> {
        let tree = self
            .parser
            .parse(content, None)
            .ok_or_else(|| ExtractorError::parse("Failed to parse source code"))?;

        let root = tree.root_node();
        if root.has_error() {
            return Err(first_syntax_error(root));
        }
        indentation::check(content)?;

        let mut drafts = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if node.kind() == "function_definition" {
                if let Some(draft) = function_draft(content, node) {
                    drafts.push(draft);
                }
            }
            push_children_in_order(node, &mut stack);
        }

        Ok(drafts)
    }
}

/// Push children so that popping visits them in document order.
fn push_children_in_order<'tree>(node: Node<'tree>, stack: &mut Vec<Node<'tree>>) {
    let mut cursor = node.walk();
    let children: Vec<_> = node.children(&mut cursor).collect();
    stack.extend(children.into_iter().rev());
}

fn first_syntax_error(root: Node) -> ExtractorError {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_missing() || node.is_error() {
            let position = node.start_position();
            let message = if node.is_missing() {
                format!("missing `{}`", node.kind())
            } else {
                "invalid syntax".to_string()
            };
            return ExtractorError::syntax(
                message,
                to_line(position.row),
                to_line(position.column),
            );
        }
        if node.has_error() {
            push_children_in_order(node, &mut stack);
        }
    }

    ExtractorError::syntax("invalid syntax", 1, 1)
}

fn function_draft(content: &str, node: Node) -> Option<FunctionDraft> {
    let name = node_text(content, node.child_by_field_name("name")?).to_string();

    let args = node
        .child_by_field_name("parameters")
        .map(|params| {
            let mut cursor = params.walk();
            params
                .named_children(&mut cursor)
                .filter_map(|param| parameter_name(content, param))
                .collect()
        })
        .unwrap_or_default();

    let docstring = node
        .child_by_field_name("body")
        .and_then(|body| docstring(content, body));

    Some(FunctionDraft {
        name,
        args,
        line_number: to_line(node.start_position().row),
        end_line: to_line(node.end_position().row),
        docstring,
        complexity: 1 + count_branches(node),
        source: node_text(content, node).to_string(),
    })
}

fn parameter_name(content: &str, param: Node) -> Option<String> {
    match param.kind() {
        "identifier" => Some(node_text(content, param).to_string()),
        "default_parameter" | "typed_default_parameter" => param
            .child_by_field_name("name")
            .map(|name| node_text(content, name).to_string()),
        // typed_parameter wraps an identifier or a splat pattern
        "typed_parameter" | "list_splat_pattern" | "dictionary_splat_pattern" => {
            let mut cursor = param.walk();
            let inner = param.named_children(&mut cursor).next()?;
            parameter_name(content, inner)
        }
        // `*`, `/` separators and comments
        _ => None,
    }
}

fn docstring(content: &str, body: Node) -> Option<String> {
    let mut cursor = body.walk();
    let first = body
        .named_children(&mut cursor)
        .find(|child| child.kind() != "comment")?;
    if first.kind() != "expression_statement" {
        return None;
    }

    let mut inner_cursor = first.walk();
    let literal = first.named_children(&mut inner_cursor).next()?;
    if literal.kind() != "string" {
        return None;
    }
    strip_string_literal(node_text(content, literal))
}

fn count_branches(function: Node) -> u32 {
    let mut count = 0;
    let mut stack = Vec::new();
    push_children_in_order(function, &mut stack);
    while let Some(node) = stack.pop() {
        if BRANCH_KINDS.contains(&node.kind()) && !continues_bool_chain(node) {
            count += 1;
        }
        push_children_in_order(node, &mut stack);
    }
    count
}

/// `a and b and c` nests as `(a and b) and c`; the chain is one decision.
fn continues_bool_chain(node: Node) -> bool {
    if node.kind() != "boolean_operator" {
        return false;
    }
    let Some(parent) = node.parent() else {
        return false;
    };
    parent.kind() == "boolean_operator" && operator_kind(parent) == operator_kind(node)
}

fn operator_kind(node: Node) -> Option<&'static str> {
    node.child_by_field_name("operator").map(|op| op.kind())
}

fn node_text<'a>(content: &'a str, node: Node) -> &'a str {
    content.get(node.start_byte()..node.end_byte()).unwrap_or("")
}

fn to_line(row: usize) -> u32 {
    u32::try_from(row + 1).unwrap_or(u32::MAX)
}
