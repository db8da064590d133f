//! Template Merger
//!
//! A fragment carrying both `{{! maintemplate }}` and `{{! subtemplates }}`
//! becomes the base; every other fragment is spliced in at the line holding
//! the `subtemplates` marker. Without such a base, fragments are joined.

use crate::tags::{has_comment_marker, MAIN_MARKER, SPLICE_MARKER};

/// Merge an ordered list of fragments into one template body.
pub fn merge<S: AsRef<str>>(fragments: &[S]) -> String {
    // A lone fragment has nothing to splice and is returned as-is.
    let base = match fragments.len() {
        0 | 1 => None,
        _ => fragments.iter().position(|fragment| is_base(fragment.as_ref())),
    };

    let Some(base) = base else {
        return fragments
            .iter()
            .map(|fragment| fragment.as_ref())
            .collect::<Vec<&str>>()
            .join("\n");
    };

    // Each spliced fragment is newline-terminated.
    let content: String = fragments
        .iter()
        .enumerate()
        .filter(|(index, _)| *index != base)
        .map(|(_, fragment)| format!("{}\n", fragment.as_ref()))
        .collect();

    splice(fragments[base].as_ref(), &content)
}

fn is_base(fragment: &str) -> bool {
    has_comment_marker(fragment, MAIN_MARKER) && has_comment_marker(fragment, SPLICE_MARKER)
}

/// Replace the first line holding the splice marker with `content`. If the
/// marker spans lines, the content is appended instead.
fn splice(base: &str, content: &str) -> String {
    let mut lines: Vec<&str> = base.split('\n').collect();
    let position = lines
        .iter()
        .position(|line| has_comment_marker(line, SPLICE_MARKER));

    match position {
        Some(index) => {
            lines.splice(index..=index, content.split('\n'));
            lines.join("\n")
        }
        None => format!("{}\n{}", base, content),
    }
}
