//! Metadata header (frontmatter) handling.
//!
//! A header is a YAML mapping fenced by `---` lines at the very start of a
//! document. Only a header at offset zero counts; a `---` block further down is
//! ordinary content (a thematic break, usually).

use yaml_rust2::yaml::Hash;
use yaml_rust2::{Yaml, YamlEmitter, YamlLoader};

use crate::error::FrontmatterError;

pub const DELIMITER: &str = "---";

/// Split a leading metadata header off a document.
///
/// Returns the header text (without its delimiter lines) and the remaining
/// body. Delimiter lines may carry a trailing carriage return. An unterminated
/// header is not a header.
pub fn split_frontmatter(content: &str) -> (Option<&str>, &str) {
    let Some(first_end) = content.find('\n') else {
        return (None, content);
    };
    if content[..first_end].trim_end_matches('\r') != DELIMITER {
        return (None, content);
    }

    let header_start = first_end + 1;
    let mut cursor = header_start;
    loop {
        let line_end = content[cursor..].find('\n').map(|i| cursor + i);
        let line = &content[cursor..line_end.unwrap_or(content.len())];
        if line.trim_end_matches('\r') == DELIMITER {
            let body_start = line_end.map_or(content.len(), |end| end + 1);
            return (Some(&content[header_start..cursor]), &content[body_start..]);
        }
        match line_end {
            Some(end) => cursor = end + 1,
            None => return (None, content),
        }
    }
}

/// The document without its leading metadata header.
pub fn strip_frontmatter(content: &str) -> &str {
    split_frontmatter(content).1
}

/// Ordered key/value view of a metadata header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frontmatter {
    entries: Hash,
}

impl Frontmatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse header text (the part between the delimiters).
    pub fn parse(text: &str) -> Result<Self, FrontmatterError> {
        let docs = YamlLoader::load_from_str(text)?;
        match docs.into_iter().next() {
            None | Some(Yaml::Null) => Ok(Self::default()),
            Some(Yaml::Hash(entries)) => Ok(Self { entries }),
            Some(_) => Err(FrontmatterError::NotAMapping),
        }
    }

    /// Parse the header of a whole document, `None` if it has no header.
    pub fn from_document(content: &str) -> Result<Option<Self>, FrontmatterError> {
        match split_frontmatter(content).0 {
            Some(header) => Self::parse(header).map(Some),
            None => Ok(None),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Yaml> {
        self.entries.get(&Yaml::String(key.to_owned()))
    }

    /// String value of a key. Non-string scalars are not coerced.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Yaml::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Set a string value, keeping the key's position if it already exists.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = Yaml::String(value.into());
        match self.entries.get_mut(&Yaml::String(key.to_owned())) {
            Some(slot) => *slot = value,
            None => {
                self.entries.insert(Yaml::String(key.to_owned()), value);
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(&Yaml::String(key.to_owned())).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().filter_map(Yaml::as_str)
    }

    /// Render the mapping as YAML, without delimiters.
    pub fn to_yaml(&self) -> Result<String, FrontmatterError> {
        let mut out = String::new();
        let doc = Yaml::Hash(self.entries.clone());
        YamlEmitter::new(&mut out)
            .dump(&doc)
            .map_err(|e| FrontmatterError::Emit(format!("{e:?}")))?;
        // the emitter always opens with a document marker
        let yaml = out.strip_prefix(DELIMITER).unwrap_or(&out);
        Ok(yaml.trim_start_matches('\n').to_owned())
    }

    /// Reattach this header to a body. An empty header is dropped entirely.
    pub fn render_document(&self, body: &str) -> Result<String, FrontmatterError> {
        if self.is_empty() {
            return Ok(body.to_owned());
        }
        Ok(format!("{DELIMITER}\n{}\n{DELIMITER}\n{body}", self.to_yaml()?))
    }
}

/// Apply a header mutation to a whole document.
///
/// Returns `None` when the mutation leaves the header unchanged, so callers can
/// skip the write.
pub fn rewrite_document<F>(content: &str, mutate: F) -> Result<Option<String>, FrontmatterError>
where
    F: FnOnce(Frontmatter) -> Frontmatter,
{
    let (header, body) = split_frontmatter(content);
    let current = match header {
        Some(text) => Frontmatter::parse(text)?,
        None => Frontmatter::default(),
    };
    let updated = mutate(current.clone());
    if updated == current {
        return Ok(None);
    }
    updated.render_document(body).map(Some)
}
