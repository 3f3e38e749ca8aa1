//! Persisted plugin state: settings plus the path → published record mapping.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{CredentialError, StateError};
use crate::service::ApiKey;

/// User-facing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Remove inline `#tags` from published markdown.
    pub strip_tags: bool,
    /// Copy the published link to the clipboard after publishing.
    pub auto_copy: bool,
    /// Mirror the link and expiry into each note's metadata header.
    pub mirror_metadata: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            strip_tags: false,
            auto_copy: true,
            mirror_metadata: true,
        }
    }
}

impl Settings {
    /// The configured credential, validated. Blank keys count as unset.
    pub fn api_key(&self) -> Result<Option<ApiKey>, CredentialError> {
        match self.api_key.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => ApiKey::parse(raw).map(Some),
        }
    }
}

/// Remote identity of one published note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedRecord {
    pub slug: String,
    pub url: String,
    /// Present only for anonymously published notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_token: Option<String>,
    pub published_at: DateTime<Utc>,
}

impl PublishedRecord {
    pub fn is_anonymous(&self) -> bool {
        self.edit_token.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalState {
    pub settings: Settings,
    pub published_notes: IndexMap<String, PublishedRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_fingerprint: Option<String>,
    pub pro_refresh_done: bool,
}

impl LocalState {
    /// Generate the device fingerprint if there is none yet.
    ///
    /// Returns `true` when a new fingerprint was created and the state needs
    /// saving.
    pub fn ensure_fingerprint(&mut self) -> bool {
        if self.device_fingerprint.as_deref().is_some_and(|f| !f.is_empty()) {
            return false;
        }
        self.device_fingerprint = Some(uuid::Uuid::new_v4().to_string());
        true
    }

    pub fn device_id(&self) -> &str {
        self.device_fingerprint.as_deref().unwrap_or_default()
    }

    /// Move the record at `from` to `to`, keeping its position in the mapping.
    ///
    /// Any record already at `to` is replaced. Returns `false` when `from` has
    /// no record.
    pub fn rename_record(&mut self, from: &str, to: &str) -> bool {
        if from == to {
            return self.published_notes.contains_key(from);
        }
        let Some(index) = self.published_notes.get_index_of(from) else {
            return false;
        };
        self.published_notes.shift_remove(to);
        // removing `to` may have shifted `from` down by one
        let index = self.published_notes.get_index_of(from).unwrap_or(index);
        let Some(record) = self.published_notes.shift_remove(from) else {
            return false;
        };
        let index = index.min(self.published_notes.len());
        self.published_notes.shift_insert(index, to.to_owned(), record);
        true
    }

    pub fn remove_record(&mut self, path: &str) -> Option<PublishedRecord> {
        self.published_notes.shift_remove(path)
    }
}

/// JSON file holding a [`LocalState`].
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/notepost/state.json`, or a relative fallback when the
    /// platform has no config directory.
    pub fn default_location() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("notepost")
            .join("state.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state. A missing file yields the default state.
    pub async fn load(&self) -> Result<LocalState, StateError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no state file yet");
                return Ok(LocalState::default());
            }
            Err(source) => {
                return Err(StateError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        serde_json::from_str(&text).map_err(|source| StateError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Load the state, creating and persisting a device fingerprint if needed.
    pub async fn load_or_init(&self) -> Result<LocalState, StateError> {
        let mut state = self.load().await?;
        if state.ensure_fingerprint() {
            tracing::debug!("generated device fingerprint");
            self.save(&state).await?;
        }
        Ok(state)
    }

    /// Write the state, replacing the previous file in one rename.
    pub async fn save(&self, state: &LocalState) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(state).map_err(StateError::Serialize)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StateError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|source| StateError::Write {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| StateError::Write {
                path: self.path.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(slug: &str) -> PublishedRecord {
        PublishedRecord {
            slug: slug.into(),
            url: format!("https://notepost.app/{slug}"),
            edit_token: None,
            published_at: Utc::now(),
        }
    }

    #[test]
    fn settings_default_when_missing() {
        let state: LocalState = serde_json::from_str(r#"{"settings":{"stripTags":true}}"#).unwrap();
        assert!(state.settings.strip_tags);
        assert!(state.settings.auto_copy);
        assert!(state.settings.mirror_metadata);
        assert!(state.published_notes.is_empty());
        assert!(!state.pro_refresh_done);
    }

    #[test]
    fn blank_api_key_is_unset() {
        let settings = Settings {
            api_key: Some("   ".into()),
            ..Settings::default()
        };
        assert_eq!(settings.api_key(), Ok(None));
    }

    #[test]
    fn rename_keeps_position() {
        let mut state = LocalState::default();
        state.published_notes.insert("a.md".into(), record("a"));
        state.published_notes.insert("b.md".into(), record("b"));
        state.published_notes.insert("c.md".into(), record("c"));

        assert!(state.rename_record("b.md", "z.md"));
        let keys: Vec<_> = state.published_notes.keys().cloned().collect();
        assert_eq!(keys, vec!["a.md", "z.md", "c.md"]);
        assert_eq!(state.published_notes["z.md"].slug, "b");

        assert!(!state.rename_record("missing.md", "x.md"));
    }

    #[test]
    fn rename_onto_recorded_path_replaces_it() {
        let mut state = LocalState::default();
        state.published_notes.insert("a.md".into(), record("a"));
        state.published_notes.insert("b.md".into(), record("b"));

        assert!(state.rename_record("b.md", "a.md"));
        assert_eq!(state.published_notes.len(), 1);
        assert_eq!(state.published_notes["a.md"].slug, "b");
    }

    #[test]
    fn fingerprint_is_created_once() {
        let mut state = LocalState::default();
        assert!(state.ensure_fingerprint());
        let first = state.device_id().to_owned();
        assert!(!state.ensure_fingerprint());
        assert_eq!(state.device_id(), first);
    }

    #[tokio::test]
    async fn state_file_round_trips_and_keeps_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("nested/state.json"));

        let fresh = file.load_or_init().await.unwrap();
        let fingerprint = fresh.device_fingerprint.clone().unwrap();

        let mut reloaded = file.load_or_init().await.unwrap();
        assert_eq!(reloaded.device_fingerprint.as_deref(), Some(fingerprint.as_str()));

        reloaded.published_notes.insert("a.md".into(), record("a"));
        file.save(&reloaded).await.unwrap();
        let again = file.load().await.unwrap();
        assert_eq!(again, reloaded);

        let raw = std::fs::read_to_string(file.path()).unwrap();
        assert!(raw.contains("\"publishedNotes\""));
        assert!(raw.contains("\"deviceFingerprint\""));
    }

    #[tokio::test]
    async fn corrupt_state_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = StateFile::new(&path).load().await.unwrap_err();
        assert!(matches!(err, StateError::Parse { .. }));
    }
}
