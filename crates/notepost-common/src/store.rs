//! The host document store.
//!
//! Notes live in a store addressed by vault-relative paths with `/` separators.
//! The publishing side only ever reads content and patches metadata headers;
//! creating, moving and deleting documents belongs to the host, which reports
//! the last two through [`StoreEvent`]s.

use std::fmt;
use std::future::Future;

use bytes::Bytes;
use tokio::sync::broadcast;

use crate::error::StoreError;
use crate::frontmatter::Frontmatter;

pub mod memory;
pub mod vault;

pub use memory::MemoryStore;
pub use vault::VaultStore;

/// Capacity of the rename/delete notification channel.
pub(crate) const EVENT_CAPACITY: usize = 64;

/// A document in the store, identified by its path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentRef {
    path: String,
}

impl DocumentRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// File name including extension.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// File name without its extension.
    pub fn stem(&self) -> &str {
        let name = self.name();
        match name.rfind('.') {
            Some(0) | None => name,
            Some(idx) => &name[..idx],
        }
    }

    pub fn extension(&self) -> Option<&str> {
        let name = self.name();
        match name.rfind('.') {
            Some(0) | None => None,
            Some(idx) => Some(&name[idx + 1..]),
        }
    }

    /// Case-insensitive extension check.
    pub fn has_extension(&self, ext: &str) -> bool {
        self.extension()
            .is_some_and(|own| own.eq_ignore_ascii_case(ext))
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl From<&str> for DocumentRef {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// Host notifications the publish engine reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Renamed { from: String, to: String },
    Deleted { path: String },
}

/// Read access to notes plus metadata-header patching.
pub trait DocumentStore: Send + Sync {
    /// Every document in the store, in a stable order.
    fn list(&self) -> impl Future<Output = Result<Vec<DocumentRef>, StoreError>> + Send;

    /// Documents whose extension matches one of `extensions` (case-insensitive).
    fn list_by_extension<'a>(
        &'a self,
        extensions: &'a [&'a str],
    ) -> impl Future<Output = Result<Vec<DocumentRef>, StoreError>> + Send + 'a {
        async move {
            let all = self.list().await?;
            Ok(all
                .into_iter()
                .filter(|doc| extensions.iter().any(|ext| doc.has_extension(ext)))
                .collect())
        }
    }

    /// Look a document up by exact path.
    fn resolve(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<Option<DocumentRef>, StoreError>> + Send;

    /// Full text of a document.
    fn read(&self, path: &str) -> impl Future<Output = Result<String, StoreError>> + Send;

    fn read_binary(&self, path: &str) -> impl Future<Output = Result<Bytes, StoreError>> + Send;

    /// Parsed metadata header, `None` when the document has none.
    fn frontmatter<'a>(
        &'a self,
        path: &'a str,
    ) -> impl Future<Output = Result<Option<Frontmatter>, StoreError>> + Send + 'a {
        async move {
            let content = self.read(path).await?;
            Frontmatter::from_document(&content).map_err(|source| StoreError::Frontmatter {
                path: path.to_owned(),
                source,
            })
        }
    }

    /// Read-modify-write the metadata header of `path`.
    ///
    /// Resolves to `true` when the document was rewritten. A mutation that
    /// leaves the header as it was writes nothing.
    fn update_frontmatter<F>(
        &self,
        path: &str,
        mutate: F,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send
    where
        F: FnOnce(Frontmatter) -> Frontmatter + Send;

    /// Subscribe to rename and delete notifications.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}
