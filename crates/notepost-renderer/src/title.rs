use notepost_common::{DocumentRef, split_frontmatter};

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

fn h1_text(line: &str) -> Option<&str> {
    line.strip_prefix("# ").map(str::trim)
}

/// Display title of a note.
///
/// The header's `title` wins, then the first level-1 heading of the body, then
/// the file name without extension.
pub fn extract_title(content: &str, document: &DocumentRef) -> String {
    let (header, body) = split_frontmatter(content);

    let from_header = header.and_then(|header| {
        header.lines().find_map(|line| {
            // top-level key only; indented lines belong to a nested mapping
            let value = line.strip_prefix("title:")?;
            Some(unquote(value.trim()))
        })
    });
    if let Some(title) = from_header.filter(|t| !t.is_empty()) {
        return title.to_owned();
    }

    if let Some(heading) = body.lines().find_map(h1_text).filter(|t| !t.is_empty()) {
        return heading.to_owned();
    }

    document.stem().to_owned()
}

/// Whether `text` opens with a level-1 heading line.
pub fn starts_with_h1(text: &str) -> bool {
    text.lines().next().and_then(h1_text).is_some()
}
