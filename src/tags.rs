//! Tag Parser - Static Tag Discovery
//!
//! Templates are scanned by an owned tokenizer. Discovery never binds
//! values, so it runs while a template is still being authored.

use serde::Serialize;
use std::collections::BTreeSet;

/// Tags whose values always come from order or device metadata.
pub const DEFAULT_TAGS: [&str; 6] = [
    "customer",
    "location",
    "reference",
    "node",
    "node_ipv4",
    "node_ipv6",
];

/// Metadata tags that are never requested through an input form.
/// Unlike [`DEFAULT_TAGS`] this excludes plain `node`.
pub const FORM_TAGS: [&str; 5] = ["customer", "location", "reference", "node_ipv4", "node_ipv6"];

/// Merge-control comment that marks the base fragment.
pub const MAIN_MARKER: &str = "maintemplate";
/// Merge-control comment that marks the splice point.
pub const SPLICE_MARKER: &str = "subtemplates";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    /// Literal text, emitted as-is
    Text(&'a str),
    /// `{{ name }}`, `{{& name }}` or `{{{ name }}}`
    Variable(&'a str),
    /// `{{# name }}`
    SectionOpen(&'a str),
    /// `{{^ name }}`
    InvertedOpen(&'a str),
    /// `{{/ name }}`
    SectionClose(&'a str),
    /// `{{! ... }}`, also partials and delimiter changes, which are inert here
    Comment(&'a str),
}

impl<'a> Token<'a> {
    /// The tag name, if this token references one.
    pub fn tag_name(&self) -> Option<&'a str> {
        match self {
            Token::Variable(name) | Token::SectionOpen(name) | Token::InvertedOpen(name) => {
                Some(name)
            }
            _ => None,
        }
    }

    /// Tags that produce no output may occupy a line of their own, in which
    /// case the whole line is dropped.
    fn can_stand_alone(&self) -> bool {
        !matches!(self, Token::Text(_) | Token::Variable(_))
    }
}

/// Split a template into a token stream.
///
/// Unterminated or empty markers are kept as literal text.
pub fn tokenize(source: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut pos = 0;
    let mut text_start = 0;
    let mut line_start = 0;
    let mut tag_on_line = false;

    while let Some(rel) = source[pos..].find("{{") {
        let open = pos + rel;
        if let Some(nl) = source[pos..open].rfind('\n') {
            line_start = pos + nl + 1;
            tag_on_line = false;
        }

        let Some((token, close_end)) = scan_tag(source, open) else {
            pos = open + 2;
            continue;
        };

        let standalone = token.can_stand_alone()
            && !tag_on_line
            && is_blank(&source[line_start..open])
            && rest_of_line_blank(source, close_end).is_some();

        if standalone {
            if line_start > text_start {
                tokens.push(Token::Text(&source[text_start..line_start]));
            }
            let line_end = rest_of_line_blank(source, close_end).unwrap_or(close_end);
            text_start = line_end;
            pos = line_end;
            line_start = line_end;
            tag_on_line = false;
        } else {
            if open > text_start {
                tokens.push(Token::Text(&source[text_start..open]));
            }
            text_start = close_end;
            pos = close_end;
            tag_on_line = true;
        }
        tokens.push(token);
    }

    if text_start < source.len() {
        tokens.push(Token::Text(&source[text_start..]));
    }
    tokens
}

/// Parse the marker starting at `open`. Returns the token and the byte
/// offset just past the closing delimiter.
fn scan_tag(source: &str, open: usize) -> Option<(Token<'_>, usize)> {
    if source[open..].starts_with("{{{") {
        let inner_start = open + 3;
        let close = inner_start + source[inner_start..].find("}}}")?;
        let name = source[inner_start..close].trim();
        if name.is_empty() {
            return None;
        }
        return Some((Token::Variable(name), close + 3));
    }

    let inner_start = open + 2;
    let close = inner_start + source[inner_start..].find("}}")?;
    let inner = source[inner_start..close].trim_start();
    let mut chars = inner.chars();
    let token = match chars.next()? {
        '!' | '>' | '=' => Token::Comment(chars.as_str().trim()),
        sigil @ ('#' | '^' | '/' | '&') => {
            let name = chars.as_str().trim();
            if name.is_empty() {
                return None;
            }
            match sigil {
                '#' => Token::SectionOpen(name),
                '^' => Token::InvertedOpen(name),
                '/' => Token::SectionClose(name),
                _ => Token::Variable(name),
            }
        }
        _ => {
            let name = inner.trim();
            if name.is_empty() {
                return None;
            }
            Token::Variable(name)
        }
    };
    Some((token, close + 2))
}

fn is_blank(text: &str) -> bool {
    text.chars().all(|c| c == ' ' || c == '\t')
}

/// If only whitespace follows `from` up to the end of the line, returns the
/// offset of the next line (or end of input).
fn rest_of_line_blank(source: &str, from: usize) -> Option<usize> {
    let rest = &source[from..];
    let end = rest.find('\n').map_or(rest.len(), |i| i + 1);
    rest[..end]
        .chars()
        .all(|c| c.is_whitespace())
        .then_some(from + end)
}

/// Every tag name referenced as a plain, section or inverted marker.
pub fn discover(body: &str) -> BTreeSet<String> {
    tokenize(body)
        .iter()
        .filter_map(Token::tag_name)
        .map(str::to_string)
        .collect()
}

/// Names opened by section markers, in file order. Duplicates are kept.
pub fn list_section_tags(body: &str) -> Vec<String> {
    tokenize(body)
        .into_iter()
        .filter_map(|token| match token {
            Token::SectionOpen(name) => Some(name.to_string()),
            _ => None,
        })
        .collect()
}

/// Tags a template author must attach a validator and label to.
pub fn configurable_tags(body: &str) -> BTreeSet<String> {
    let mut tags = discover(body);
    for tag in DEFAULT_TAGS {
        tags.remove(tag);
    }
    tags
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TagClassification {
    pub all_tags: BTreeSet<String>,
    pub user_tags: BTreeSet<String>,
    pub form_tags: BTreeSet<String>,
    pub list_tags: Vec<String>,
}

pub fn classify(body: &str) -> TagClassification {
    let all_tags = discover(body);
    let (form_tags, user_tags): (BTreeSet<String>, BTreeSet<String>) = all_tags
        .iter()
        .cloned()
        .partition(|tag| FORM_TAGS.contains(&tag.as_str()));

    TagClassification {
        all_tags,
        user_tags,
        form_tags,
        list_tags: list_section_tags(body),
    }
}

/// True when `body` carries a `{{! <marker> }}` comment.
pub fn has_comment_marker(body: &str, marker: &str) -> bool {
    tokenize(body)
        .iter()
        .any(|token| matches!(token, Token::Comment(text) if *text == marker))
}
