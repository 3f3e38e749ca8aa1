use std::borrow::Cow;

use percent_encoding::percent_decode_str;

/// Image extensions the service accepts, with their MIME types.
const IMAGE_TYPES: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("svg", "image/svg+xml"),
];

/// Extension of the last path segment, without the dot.
pub fn extension_of(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(0) | None => None,
        Some(idx) => Some(&name[idx + 1..]),
    }
}

/// MIME type for an image path, matched on extension case-insensitively.
pub fn image_mime_type(path: &str) -> Option<&'static str> {
    let ext = extension_of(path)?;
    IMAGE_TYPES
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(ext))
        .map(|(_, mime)| *mime)
}

pub fn is_image_path(path: &str) -> bool {
    image_mime_type(path).is_some()
}

/// Could this link target live in the vault? Absolute paths, anything with a
/// scheme and data URIs are not.
pub fn is_local_path(path: &str) -> bool {
    !(path.starts_with('/') || path.contains("://") || path.starts_with("data:"))
}

/// Percent-decode a standard link target and drop a leading `./`.
pub fn normalize_link_target(target: &str) -> Cow<'_, str> {
    let trimmed = target.trim().trim_start_matches('<').trim_end_matches('>');
    let trimmed = trimmed.strip_prefix("./").unwrap_or(trimmed);
    percent_decode_str(trimmed).decode_utf8_lossy()
}

/// Folder part of a vault path, `None` at the vault root.
pub fn parent_dir(path: &str) -> Option<&str> {
    path.rfind('/').map(|idx| &path[..idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_table() {
        assert_eq!(image_mime_type("a/b/Photo.JPG"), Some("image/jpeg"));
        assert_eq!(image_mime_type("x.jpeg"), Some("image/jpeg"));
        assert_eq!(image_mime_type("logo.svg"), Some("image/svg+xml"));
        assert_eq!(image_mime_type("notes.pdf"), None);
        assert_eq!(image_mime_type("png"), None);
        assert_eq!(image_mime_type("dir.png/file"), None);
    }

    #[test]
    fn local_paths() {
        assert!(is_local_path("img/a.png"));
        assert!(is_local_path("../a.png"));
        assert!(!is_local_path("/abs/a.png"));
        assert!(!is_local_path("https://example.com/a.png"));
        assert!(!is_local_path("data:image/png;base64,AAAA"));
    }

    #[test]
    fn link_targets_are_normalized() {
        assert_eq!(normalize_link_target("./My%20Pic.png"), "My Pic.png");
        assert_eq!(normalize_link_target("<img/a b.png>"), "img/a b.png");
        assert_eq!(parent_dir("notes/day/today.md"), Some("notes/day"));
        assert_eq!(parent_dir("today.md"), None);
    }
}
