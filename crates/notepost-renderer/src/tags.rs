//! Inline `#tag` stripping.

use std::sync::LazyLock;

use regex::Regex;

use crate::code::CodeRegions;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(^|\s)#[\w/-]+").unwrap());

const MAX_HEADING_LEVEL: usize = 6;

/// Whether the `#` at `hash` is part of a heading marker: everything on its
/// line up to and including it is hashes and whitespace, six at most.
fn is_heading_marker(text: &str, hash: usize) -> bool {
    let line_start = text[..hash].rfind('\n').map_or(0, |i| i + 1);
    let prefix = text[line_start..=hash].trim();
    prefix.len() <= MAX_HEADING_LEVEL && prefix.bytes().all(|b| b == b'#')
}

/// Remove inline tags outside code. The whitespace before each tag stays.
pub fn strip_tags(text: &str) -> String {
    let code = CodeRegions::detect(text);
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in TAG_RE.captures_iter(text) {
        let (Some(tag), Some(lead)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let hash = lead.end();
        if code.contains(hash) || is_heading_marker(text, hash) {
            continue;
        }
        out.push_str(&text[last..hash]);
        last = tag.end();
    }
    out.push_str(&text[last..]);
    out
}
