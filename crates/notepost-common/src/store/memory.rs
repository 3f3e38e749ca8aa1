use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use bytes::Bytes;
use indexmap::IndexMap;
use tokio::sync::broadcast;

use super::{DocumentRef, DocumentStore, EVENT_CAPACITY, StoreEvent};
use crate::error::StoreError;
use crate::frontmatter::{Frontmatter, rewrite_document};

/// In-memory document store, kept in insertion order.
///
/// Used by tests and anywhere a throwaway vault is handy. Text and binary
/// documents share one map; text is stored as UTF-8.
#[derive(Debug)]
pub struct MemoryStore {
    documents: RwLock<IndexMap<String, Bytes>>,
    read_only: AtomicBool,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            documents: RwLock::new(IndexMap::new()),
            read_only: AtomicBool::new(false),
            events,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert of a text document.
    pub fn with(self, path: &str, content: &str) -> Self {
        self.insert(path, content);
        self
    }

    pub fn insert(&self, path: &str, content: &str) {
        self.insert_binary(path, Bytes::copy_from_slice(content.as_bytes()));
    }

    pub fn insert_binary(&self, path: &str, data: impl Into<Bytes>) {
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_owned(), data.into());
    }

    /// Current text of a document, if present and valid UTF-8.
    pub fn contents(&self, path: &str) -> Option<String> {
        let docs = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        docs.get(path)
            .and_then(|data| String::from_utf8(data.to_vec()).ok())
    }

    /// Make metadata writes fail with [`StoreError::ReadOnly`].
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Move a document and notify subscribers.
    pub fn rename(&self, from: &str, to: &str) -> Result<(), StoreError> {
        {
            let mut docs = self.documents.write().unwrap_or_else(PoisonError::into_inner);
            let data = docs.shift_remove(from).ok_or_else(|| StoreError::NotFound {
                path: from.to_owned(),
            })?;
            docs.insert(to.to_owned(), data);
        }
        let _ = self.events.send(StoreEvent::Renamed {
            from: from.to_owned(),
            to: to.to_owned(),
        });
        Ok(())
    }

    /// Remove a document and notify subscribers.
    pub fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(path)
            .ok_or_else(|| StoreError::NotFound {
                path: path.to_owned(),
            })?;
        let _ = self.events.send(StoreEvent::Deleted {
            path: path.to_owned(),
        });
        Ok(())
    }

    fn get(&self, path: &str) -> Result<Bytes, StoreError> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                path: path.to_owned(),
            })
    }

    fn text(&self, path: &str) -> Result<String, StoreError> {
        String::from_utf8(self.get(path)?.to_vec()).map_err(|e| StoreError::Io {
            path: path.into(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })
    }
}

impl DocumentStore for MemoryStore {
    async fn list(&self) -> Result<Vec<DocumentRef>, StoreError> {
        let docs = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        Ok(docs.keys().map(|path| DocumentRef::new(path.as_str())).collect())
    }

    async fn resolve(&self, path: &str) -> Result<Option<DocumentRef>, StoreError> {
        let docs = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        Ok(docs.contains_key(path).then(|| DocumentRef::new(path)))
    }

    async fn read(&self, path: &str) -> Result<String, StoreError> {
        self.text(path)
    }

    async fn read_binary(&self, path: &str) -> Result<Bytes, StoreError> {
        self.get(path)
    }

    async fn update_frontmatter<F>(&self, path: &str, mutate: F) -> Result<bool, StoreError>
    where
        F: FnOnce(Frontmatter) -> Frontmatter + Send,
    {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StoreError::ReadOnly {
                path: path.to_owned(),
            });
        }
        let content = self.text(path)?;
        let rewritten =
            rewrite_document(&content, mutate).map_err(|source| StoreError::Frontmatter {
                path: path.to_owned(),
                source,
            })?;
        match rewritten {
            Some(updated) => {
                self.insert(path, &updated);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_keeps_insertion_order() {
        let store = MemoryStore::new()
            .with("b.md", "b")
            .with("a.md", "a")
            .with("img/c.png", "");
        let paths: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.path().to_owned())
            .collect();
        assert_eq!(paths, vec!["b.md", "a.md", "img/c.png"]);

        let images = store.list_by_extension(&["PNG"]).await.unwrap();
        assert_eq!(images, vec![DocumentRef::new("img/c.png")]);
    }

    #[tokio::test]
    async fn rename_and_delete_notify() {
        let store = MemoryStore::new().with("a.md", "a");
        let mut events = store.subscribe();

        store.rename("a.md", "b.md").unwrap();
        store.delete("b.md").unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::Renamed {
                from: "a.md".into(),
                to: "b.md".into()
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::Deleted {
                path: "b.md".into()
            }
        );
        assert!(store.delete("b.md").is_err());
    }

    #[tokio::test]
    async fn metadata_update_respects_read_only() {
        let store = MemoryStore::new().with("a.md", "body");
        store.set_read_only(true);
        let err = store
            .update_frontmatter("a.md", |mut fm| {
                fm.set("k", "v");
                fm
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ReadOnly { .. }));

        store.set_read_only(false);
        let written = store
            .update_frontmatter("a.md", |mut fm| {
                fm.set("k", "v");
                fm
            })
            .await
            .unwrap();
        assert!(written);
        let fm = store.frontmatter("a.md").await.unwrap().unwrap();
        assert_eq!(fm.get_str("k"), Some("v"));
    }
}
