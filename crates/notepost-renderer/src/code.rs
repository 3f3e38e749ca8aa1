//! Code region detection.
//!
//! Fenced blocks and inline code spans are literal text. Passes that rewrite
//! markdown syntax consult [`CodeRegions`] so they leave code alone.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

static INLINE_CODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`[^`\n]+`").unwrap());

/// Byte ranges of `text` that are code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeRegions {
    ranges: Vec<Range<usize>>,
}

impl CodeRegions {
    pub fn detect(text: &str) -> Self {
        let mut ranges = fenced_blocks(text);
        ranges.extend(INLINE_CODE_RE.find_iter(text).map(|m| m.range()));
        ranges.sort_by_key(|r| r.start);
        Self { ranges }
    }

    /// Whether the byte at `offset` lies inside any code region.
    pub fn contains(&self, offset: usize) -> bool {
        self.ranges.iter().any(|r| r.contains(&offset))
    }

    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// The fence opening a line: three or more of the same backtick or tilde.
fn fence_of(line: &str) -> Option<&str> {
    let first = line.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let run = line.len() - line.trim_start_matches(first).len();
    (run >= 3).then(|| &line[..run])
}

/// Lines of `text` with their starting byte offsets, newline excluded.
fn lines_with_offsets(text: &str) -> impl Iterator<Item = (usize, &str)> {
    let mut offset = 0;
    text.split('\n').map(move |line| {
        let start = offset;
        offset += line.len() + 1;
        (start, line)
    })
}

fn fenced_blocks(text: &str) -> Vec<Range<usize>> {
    let lines: Vec<(usize, &str)> = lines_with_offsets(text).collect();
    let mut ranges = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let (start, line) = lines[i];
        let Some(fence) = fence_of(line) else {
            i += 1;
            continue;
        };
        let closing = lines[i + 1..]
            .iter()
            .position(|(_, candidate)| candidate.starts_with(fence));
        match closing {
            Some(rel) => {
                let (close_start, close_line) = lines[i + 1 + rel];
                ranges.push(start..close_start + close_line.len());
                i += rel + 2;
            }
            // an unclosed fence is not a block
            None => i += 1,
        }
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_fenced_blocks() {
        let text = "before\n```rust\nlet x = 1;\n```\nafter";
        let regions = CodeRegions::detect(text);
        let code_at = text.find("let").unwrap();
        assert!(regions.contains(code_at));
        assert!(regions.contains(text.find("```").unwrap()));
        assert!(!regions.contains(text.find("before").unwrap()));
        assert!(!regions.contains(text.find("after").unwrap()));
    }

    #[test]
    fn closing_fence_must_match_character_and_length() {
        let text = "~~~~\n```\nstill code\n~~~\nstill code too\n~~~~\nprose";
        let regions = CodeRegions::detect(text);
        assert!(regions.contains(text.find("still code too").unwrap()));
        assert!(!regions.contains(text.find("prose").unwrap()));
    }

    #[test]
    fn unclosed_fence_is_ignored() {
        let text = "```\nno closing fence";
        assert!(CodeRegions::detect(text).is_empty());
    }

    #[test]
    fn detects_inline_spans_on_one_line() {
        let text = "use `#tag` here, not `across\nlines`";
        let regions = CodeRegions::detect(text);
        assert!(regions.contains(text.find("#tag").unwrap()));
        assert!(!regions.contains(text.find("here").unwrap()));
        assert!(!regions.contains(text.find("across").unwrap()));
    }
}
