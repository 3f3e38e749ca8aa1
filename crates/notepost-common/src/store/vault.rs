use std::io;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use ignore::WalkBuilder;
use tokio::sync::broadcast;

use super::{DocumentRef, DocumentStore, EVENT_CAPACITY, StoreEvent};
use crate::error::StoreError;
use crate::frontmatter::{Frontmatter, rewrite_document};

/// A vault directory on disk.
///
/// Hidden files and directories (`.obsidian`, `.git`, ...) are not part of the
/// vault, and ignore files are honoured inside git checkouts.
#[derive(Debug, Clone)]
pub struct VaultStore {
    root: PathBuf,
    events: broadcast::Sender<StoreEvent>,
}

impl VaultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            root: root.into(),
            events,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a vault path to a filesystem path, refusing anything that would
    /// escape the vault.
    fn full_path(&self, path: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            return Err(StoreError::InvalidPath {
                path: path.to_owned(),
            });
        }
        Ok(self.root.join(relative))
    }

    fn io_error(path: &str, full: PathBuf, source: io::Error) -> StoreError {
        if source.kind() == io::ErrorKind::NotFound {
            StoreError::NotFound {
                path: path.to_owned(),
            }
        } else {
            StoreError::Io { path: full, source }
        }
    }

    /// Move a document inside the vault and notify subscribers.
    pub async fn rename(&self, from: &str, to: &str) -> Result<(), StoreError> {
        let source = self.full_path(from)?;
        let target = self.full_path(to)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        tokio::fs::rename(&source, &target)
            .await
            .map_err(|e| Self::io_error(from, source.clone(), e))?;
        tracing::debug!(from, to, "renamed document");
        let _ = self.events.send(StoreEvent::Renamed {
            from: from.to_owned(),
            to: to.to_owned(),
        });
        Ok(())
    }

    /// Delete a document from the vault and notify subscribers.
    pub async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let full = self.full_path(path)?;
        tokio::fs::remove_file(&full)
            .await
            .map_err(|e| Self::io_error(path, full.clone(), e))?;
        tracing::debug!(path, "deleted document");
        let _ = self.events.send(StoreEvent::Deleted {
            path: path.to_owned(),
        });
        Ok(())
    }

    fn relative_path(&self, full: &Path) -> Option<String> {
        let relative = full.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect();
        (!parts.is_empty()).then(|| parts.join("/"))
    }
}

impl DocumentStore for VaultStore {
    async fn list(&self) -> Result<Vec<DocumentRef>, StoreError> {
        let mut paths = Vec::new();
        for entry in WalkBuilder::new(&self.root).hidden(true).build() {
            let entry = entry.map_err(|source| StoreError::Walk {
                root: self.root.clone(),
                source,
            })?;
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            match self.relative_path(entry.path()) {
                Some(path) => paths.push(path),
                None => tracing::debug!(path = %entry.path().display(), "skipping non-UTF-8 path"),
            }
        }
        paths.sort();
        Ok(paths.into_iter().map(DocumentRef::new).collect())
    }

    async fn resolve(&self, path: &str) -> Result<Option<DocumentRef>, StoreError> {
        let full = self.full_path(path)?;
        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_file() => Ok(Some(DocumentRef::new(path))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path: full, source }),
        }
    }

    async fn read(&self, path: &str) -> Result<String, StoreError> {
        let full = self.full_path(path)?;
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| Self::io_error(path, full.clone(), e))
    }

    async fn read_binary(&self, path: &str) -> Result<Bytes, StoreError> {
        let full = self.full_path(path)?;
        tokio::fs::read(&full)
            .await
            .map(Bytes::from)
            .map_err(|e| Self::io_error(path, full.clone(), e))
    }

    async fn update_frontmatter<F>(&self, path: &str, mutate: F) -> Result<bool, StoreError>
    where
        F: FnOnce(Frontmatter) -> Frontmatter + Send,
    {
        let full = self.full_path(path)?;
        let content = tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| Self::io_error(path, full.clone(), e))?;
        let rewritten =
            rewrite_document(&content, mutate).map_err(|source| StoreError::Frontmatter {
                path: path.to_owned(),
                source,
            })?;
        let Some(updated) = rewritten else {
            return Ok(false);
        };
        tokio::fs::write(&full, updated)
            .await
            .map_err(|source| StoreError::Io {
                path: full.clone(),
                source,
            })?;
        tracing::debug!(path, "rewrote metadata header");
        Ok(true)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> (tempfile::TempDir, VaultStore) {
        // tempdir names start with a dot by default, which reads as hidden
        let dir = tempfile::Builder::new().prefix("vault").tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("notes/img")).unwrap();
        std::fs::create_dir_all(dir.path().join(".obsidian")).unwrap();
        std::fs::write(dir.path().join("notes/a.md"), "# A\n").unwrap();
        std::fs::write(dir.path().join("notes/img/pic.png"), [0x89, b'P', b'N', b'G']).unwrap();
        std::fs::write(dir.path().join("b.md"), "b").unwrap();
        std::fs::write(dir.path().join(".obsidian/app.json"), "{}").unwrap();
        let store = VaultStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn lists_visible_files_with_slash_paths() {
        let (_dir, store) = vault();
        let paths: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.path().to_owned())
            .collect();
        assert_eq!(paths, vec!["b.md", "notes/a.md", "notes/img/pic.png"]);
    }

    #[tokio::test]
    async fn rejects_paths_outside_the_vault() {
        let (_dir, store) = vault();
        assert!(matches!(
            store.read("../secret.md").await,
            Err(StoreError::InvalidPath { .. })
        ));
        assert!(matches!(
            store.read("missing.md").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn reads_binary_and_resolves() {
        let (_dir, store) = vault();
        let data = store.read_binary("notes/img/pic.png").await.unwrap();
        assert_eq!(&data[1..], b"PNG");
        assert!(store.resolve("notes/a.md").await.unwrap().is_some());
        assert!(store.resolve("notes").await.unwrap().is_none());
        assert!(store.resolve("nope.md").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rewrites_metadata_on_disk() {
        let (dir, store) = vault();
        let written = store
            .update_frontmatter("notes/a.md", |mut fm| {
                fm.set("share_link", "https://notepost.app/abc");
                fm
            })
            .await
            .unwrap();
        assert!(written);
        let on_disk = std::fs::read_to_string(dir.path().join("notes/a.md")).unwrap();
        assert!(on_disk.starts_with("---\n"));
        assert!(on_disk.ends_with("---\n# A\n"));
        let fm = store.frontmatter("notes/a.md").await.unwrap().unwrap();
        assert_eq!(fm.get_str("share_link"), Some("https://notepost.app/abc"));
    }

    #[tokio::test]
    async fn rename_moves_file_and_notifies() {
        let (dir, store) = vault();
        let mut events = store.subscribe();
        store.rename("b.md", "archive/b.md").await.unwrap();
        assert!(dir.path().join("archive/b.md").exists());
        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::Renamed {
                from: "b.md".into(),
                to: "archive/b.md".into()
            }
        );
    }
}
