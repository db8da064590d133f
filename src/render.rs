//! Substitution Engine
//!
//! Renders templates off the same token stream the tag parser uses.
//! Substitution is literal: no escaping of any kind is applied.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::tags::{tokenize, Token};

/// Values bound to tag names for one render.
pub type Params = BTreeMap<String, Value>;

#[derive(Debug, PartialEq)]
enum Node<'a> {
    Text(&'a str),
    Variable(&'a str),
    Section {
        name: &'a str,
        inverted: bool,
        children: Vec<Node<'a>>,
    },
}

struct OpenSection<'a> {
    name: &'a str,
    inverted: bool,
    children: Vec<Node<'a>>,
}

/// Fold the flat token stream into a tree. A close marker that does not
/// match the innermost open section is ignored; sections left open run to
/// the end of the template.
fn build_tree<'a>(tokens: Vec<Token<'a>>) -> Vec<Node<'a>> {
    let mut root = Vec::new();
    let mut stack: Vec<OpenSection<'a>> = Vec::new();

    for token in tokens {
        let node = match token {
            Token::Text(text) => Node::Text(text),
            Token::Variable(name) => Node::Variable(name),
            Token::SectionOpen(name) | Token::InvertedOpen(name) => {
                stack.push(OpenSection {
                    name,
                    inverted: matches!(token, Token::InvertedOpen(_)),
                    children: Vec::new(),
                });
                continue;
            }
            Token::SectionClose(name) => {
                if stack.last().map_or(true, |open| open.name != name) {
                    continue;
                }
                match stack.pop() {
                    Some(open) => close_section(open),
                    None => continue,
                }
            }
            Token::Comment(_) => continue,
        };
        match stack.last_mut() {
            Some(open) => open.children.push(node),
            None => root.push(node),
        }
    }

    while let Some(open) = stack.pop() {
        let node = close_section(open);
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => root.push(node),
        }
    }
    root
}

fn close_section(open: OpenSection<'_>) -> Node<'_> {
    Node::Section {
        name: open.name,
        inverted: open.inverted,
        children: open.children,
    }
}

/// Render `template` with `params`. Unbound tags render as empty text.
pub fn render(template: &str, params: &Params) -> String {
    let tree = build_tree(tokenize(template));
    let mut out = String::with_capacity(template.len());
    render_nodes(&tree, params, &mut out);
    out
}

fn render_nodes(nodes: &[Node<'_>], params: &Params, out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Variable(name) => {
                if let Some(value) = params.get(*name) {
                    out.push_str(&display_value(value));
                }
            }
            Node::Section {
                name,
                inverted,
                children,
            } => {
                if is_truthy(params.get(*name)) != *inverted {
                    render_nodes(children, params, out);
                }
            }
        }
    }
}

/// Text form of a field value, as substituted and as validated.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Section gate: absent, null, false, empty string and empty list are falsy.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}
