//! Plain text passes of the transformation pipeline.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)%%.*?%%").unwrap());

static ALIASED_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\]|]+)\|([^\]]+)\]\]").unwrap());

static LINK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[\[([^\]]+)\]\]").unwrap());

/// Remove `%%comment%%` spans, including ones spanning lines.
pub fn strip_comments(text: &str) -> Cow<'_, str> {
    COMMENT_RE.replace_all(text, "")
}

/// Replace wiki links with their display text: the alias when there is one,
/// the raw target otherwise.
pub fn convert_wiki_links(text: &str) -> String {
    let aliased = ALIASED_LINK_RE.replace_all(text, "${2}");
    LINK_RE.replace_all(&aliased, "${1}").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_are_removed() {
        assert_eq!(strip_comments("a %%hidden%% b"), "a  b");
        assert_eq!(strip_comments("a\n%%\nmulti\nline\n%%\nb"), "a\n\nb");
        assert_eq!(strip_comments("100%% sure"), "100%% sure");
        assert_eq!(strip_comments("no markers"), "no markers");
    }

    #[test]
    fn links_render_display_text() {
        assert_eq!(convert_wiki_links("see [[Target Note|this]]"), "see this");
        assert_eq!(convert_wiki_links("see [[Target Note]]"), "see Target Note");
        assert_eq!(
            convert_wiki_links("[[a|b]] and [[c#Heading]]"),
            "b and c#Heading"
        );
    }

    #[test]
    fn alias_wins_over_plain_match() {
        assert_eq!(convert_wiki_links("[[A|B]]"), "B");
        assert_eq!(convert_wiki_links("[[A]]"), "A");
    }
}
