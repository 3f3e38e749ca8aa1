use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use futures_util::FutureExt;
use notepost_common::frontmatter::Frontmatter;
use notepost_common::service::{NEVER_EXPIRES, expiration_label, validate_slug};
use notepost_common::{
    ApiKey, DocumentList, DocumentRef, DocumentStore, LocalState, Owner, PublishRequest,
    PublishService, PublishedRecord, Settings, StateFile, StoreEvent,
};
use notepost_renderer::{Transformer, extract_title, starts_with_h1};
use tokio::sync::{Mutex, broadcast};

use crate::error::PublishError;
use crate::gate::StatusGate;

/// Metadata key holding the published URL.
pub const LINK_KEY: &str = "share_link";
/// Metadata key holding `never` or the expiry date.
pub const EXPIRES_KEY: &str = "share_expires";
/// Link keys written by earlier versions. Still recognised, cleared on
/// unpublish.
pub const LEGACY_LINK_KEYS: [&str; 2] = ["published_url", "shared_url"];

const NOTE_EXTENSIONS: &[&str] = &["md"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub path: String,
    pub record: PublishedRecord,
    /// The service created a new document rather than updating one.
    pub created: bool,
    /// `never`, or the expiry date as `YYYY-MM-DD`.
    pub expires: String,
    /// The tracked document had expired and was published fresh.
    pub retried_after_expiry: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unpublished {
    Removed(PublishedRecord),
    Cancelled,
    NotPublished,
}

/// Result of moving anonymous documents into an account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimReport {
    pub claimed: Vec<String>,
    pub failed: Vec<String>,
}

impl ClaimReport {
    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty() && self.failed.is_empty()
    }
}

/// Records adopted from metadata headers at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub adopted: Vec<String>,
}

/// A loaded publishing session.
///
/// Owns the persisted [`LocalState`] for as long as it lives; every mutation is
/// flushed to the [`StateFile`] before the operation returns.
pub struct Session<S, P> {
    store: Arc<S>,
    service: Arc<P>,
    state_file: StateFile,
    state: Mutex<LocalState>,
    permanent: AtomicBool,
    upgrade_swept: AtomicBool,
    status: StatusGate,
}

impl<S, P> Session<S, P>
where
    S: DocumentStore + 'static,
    P: PublishService + 'static,
{
    /// Load state from `state_file`, generating the device fingerprint on
    /// first use.
    pub async fn load(
        store: Arc<S>,
        service: Arc<P>,
        state_file: StateFile,
    ) -> Result<Self, PublishError> {
        let state = state_file.load_or_init().await?;
        tracing::debug!(
            records = state.published_notes.len(),
            path = %state_file.path().display(),
            "loaded state"
        );
        Ok(Self {
            store,
            service,
            state_file,
            state: Mutex::new(state),
            permanent: AtomicBool::new(false),
            upgrade_swept: AtomicBool::new(false),
            status: StatusGate::default(),
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Last known tier; `false` until a check says otherwise.
    pub fn is_permanent(&self) -> bool {
        self.permanent.load(Ordering::SeqCst)
    }

    pub async fn record(&self, path: &str) -> Option<PublishedRecord> {
        self.state.lock().await.published_notes.get(path).cloned()
    }

    /// All records in tracking order.
    pub async fn records(&self) -> Vec<(String, PublishedRecord)> {
        self.state
            .lock()
            .await
            .published_notes
            .iter()
            .map(|(path, record)| (path.clone(), record.clone()))
            .collect()
    }

    pub async fn settings(&self) -> Settings {
        self.state.lock().await.settings.clone()
    }

    pub async fn update_settings(
        &self,
        update: impl FnOnce(&mut Settings),
    ) -> Result<Settings, PublishError> {
        let mut state = self.state.lock().await;
        update(&mut state.settings);
        self.persist(&state).await?;
        Ok(state.settings.clone())
    }

    async fn persist(&self, state: &LocalState) -> Result<(), PublishError> {
        self.state_file.save(state).await?;
        Ok(())
    }

    fn owner_of(state: &LocalState) -> Result<Owner, PublishError> {
        Ok(match state.settings.api_key()? {
            Some(key) => Owner::Account(key),
            None => Owner::Anonymous {
                device_id: state.device_id().to_owned(),
            },
        })
    }

    fn api_key(state: &LocalState, action: &'static str) -> Result<ApiKey, PublishError> {
        state
            .settings
            .api_key()?
            .ok_or(PublishError::SignedOut { action })
    }

    /// Publish `path`, updating its remote document when one is tracked.
    #[tracing::instrument(skip(self))]
    pub async fn publish(&self, path: &str) -> Result<PublishOutcome, PublishError> {
        let content = self
            .store
            .read(path)
            .await
            .map_err(|source| PublishError::Document {
                path: path.to_owned(),
                source,
            })?;
        let document = DocumentRef::new(path);
        let title = extract_title(&content, &document);

        let (owner, strip_tags, mirror, existing) = {
            let state = self.state.lock().await;
            (
                Self::owner_of(&state)?,
                state.settings.strip_tags,
                state.settings.mirror_metadata,
                state.published_notes.get(path).cloned(),
            )
        };

        let body = Transformer::new(&*self.store, &*self.service, &owner)
            .strip_tags(strip_tags)
            .transform(&content, &document)
            .await;
        let markdown = if starts_with_h1(&body) {
            body
        } else if body.is_empty() {
            format!("# {title}")
        } else {
            format!("# {title}\n\n{body}")
        };

        let request = PublishRequest {
            markdown,
            title,
            slug: existing.as_ref().map(|r| r.slug.clone()),
            edit_token: match &owner {
                Owner::Anonymous { .. } => existing.as_ref().and_then(|r| r.edit_token.clone()),
                Owner::Account(_) => None,
            },
        };
        let updating = request.slug.is_some();
        let action = if updating { "update" } else { "publish" };

        let (response, retried) = match self.service.publish(&owner, request.clone()).await {
            Ok(response) => (response, false),
            Err(error) if updating && error.is_not_found() => {
                tracing::info!(%error, "remote document expired, publishing a fresh copy");
                let fresh = PublishRequest {
                    slug: None,
                    edit_token: None,
                    ..request
                };
                let response = self
                    .service
                    .publish(&owner, fresh)
                    .await
                    .map_err(PublishError::remote("publish"))?;
                (response, true)
            }
            Err(error) => return Err(PublishError::remote(action)(error)),
        };

        // updates may omit the edit token; the one we hold stays valid
        let edit_token = match (&owner, response.edit_token.clone()) {
            (Owner::Account(_), _) => None,
            (Owner::Anonymous { .. }, Some(token)) => Some(token),
            (Owner::Anonymous { .. }, None) if retried => None,
            (Owner::Anonymous { .. }, None) => existing.and_then(|r| r.edit_token),
        };
        let record = PublishedRecord {
            slug: response.slug.clone(),
            url: response.url.clone(),
            edit_token,
            published_at: Utc::now(),
        };
        {
            let mut state = self.state.lock().await;
            state
                .published_notes
                .insert(path.to_owned(), record.clone());
            self.persist(&state).await?;
        }

        let permanent = response.is_permanent();
        self.permanent.store(permanent, Ordering::SeqCst);
        let expires = response.expiration_label();
        if mirror {
            self.mirror_link(path, &record.url, &expires).await;
        }
        if permanent {
            self.upgrade_sweep(Some(path)).await;
        }

        tracing::info!(url = %record.url, created = response.created, retried, "published");
        Ok(PublishOutcome {
            path: path.to_owned(),
            record,
            created: response.created,
            expires,
            retried_after_expiry: retried,
        })
    }

    /// Delete the remote document for `path` once `confirm` agrees.
    #[tracing::instrument(skip(self, confirm))]
    pub async fn unpublish(
        &self,
        path: &str,
        confirm: impl FnOnce(&PublishedRecord) -> bool,
    ) -> Result<Unpublished, PublishError> {
        let (record, owner) = {
            let state = self.state.lock().await;
            let Some(record) = state.published_notes.get(path).cloned() else {
                return Ok(Unpublished::NotPublished);
            };
            let owner = if record.is_anonymous() {
                Owner::Anonymous {
                    device_id: state.device_id().to_owned(),
                }
            } else {
                Owner::Account(Self::api_key(&state, "unpublish")?)
            };
            (record, owner)
        };
        if !confirm(&record) {
            return Ok(Unpublished::Cancelled);
        }

        self.service
            .delete(&owner, &record.slug, record.edit_token.as_deref())
            .await
            .map_err(PublishError::remote("unpublish"))?;

        {
            let mut state = self.state.lock().await;
            state.remove_record(path);
            self.persist(&state).await?;
        }
        self.clear_link(path).await;
        tracing::info!(slug = %record.slug, "unpublished");
        Ok(Unpublished::Removed(record))
    }

    /// Move every anonymously published document into the configured account.
    ///
    /// Runs one claim at a time in tracking order. A failed claim leaves its
    /// record as it was and the sweep moves on.
    #[tracing::instrument(skip(self))]
    pub async fn claim_all(&self) -> Result<ClaimReport, PublishError> {
        let (key, mirror, pending) = {
            let state = self.state.lock().await;
            let key = Self::api_key(&state, "claim documents")?;
            let pending: Vec<(String, String, String)> = state
                .published_notes
                .iter()
                .filter_map(|(path, record)| {
                    let token = record.edit_token.clone()?;
                    Some((path.clone(), record.slug.clone(), token))
                })
                .collect();
            (key, state.settings.mirror_metadata, pending)
        };

        let mut report = ClaimReport::default();
        for (path, slug, token) in pending {
            let claimed = match self.service.claim(&key, &slug, &token).await {
                Ok(claimed) => claimed,
                Err(error) => {
                    tracing::warn!(%path, %slug, %error, "claim failed");
                    report.failed.push(path);
                    continue;
                }
            };
            let url = claimed.url.clone();
            {
                let mut state = self.state.lock().await;
                let Some(record) = state.published_notes.get_mut(&path) else {
                    // the note went away while the claim was in flight
                    continue;
                };
                record.slug = claimed.slug;
                record.url = claimed.url;
                record.edit_token = None;
                if let Err(error) = self.persist(&state).await {
                    tracing::warn!(%path, %error, "failed to save claimed record");
                }
            }
            if mirror {
                let expires = expiration_label(claimed.ttl_days.is_none(), claimed.expires_at);
                self.mirror_link(&path, &url, &expires).await;
            }
            report.claimed.push(path);
        }
        tracing::info!(
            claimed = report.claimed.len(),
            failed = report.failed.len(),
            "claim sweep finished"
        );
        Ok(report)
    }

    /// Configure or clear the API key.
    ///
    /// A key that differs from the previous one triggers the claim sweep and
    /// returns its report.
    #[tracing::instrument(skip_all)]
    pub async fn set_api_key(&self, key: Option<&str>) -> Result<Option<ClaimReport>, PublishError> {
        let newly_configured = {
            let mut state = self.state.lock().await;
            let previous = state.settings.api_key.clone();
            match key {
                Some(raw) => {
                    let key = ApiKey::parse(raw)?;
                    let changed = previous.as_deref().map(str::trim) != Some(key.as_str());
                    state.settings.api_key = Some(key.as_str().to_owned());
                    self.persist(&state).await?;
                    changed
                }
                None => {
                    state.settings.api_key = None;
                    self.persist(&state).await?;
                    false
                }
            }
        };
        self.permanent.store(false, Ordering::SeqCst);

        if !newly_configured {
            return Ok(None);
        }
        tracing::info!("API key configured, claiming anonymous documents");
        self.claim_all().await.map(Some)
    }

    /// Ask the service whether the account is on the permanent tier.
    ///
    /// Concurrent calls queue behind each other; each gets the answer of its
    /// own request. Failures keep the last known tier. Without an API key no
    /// request is made and the answer is `false`.
    #[tracing::instrument(skip(self))]
    pub async fn check_status(&self) -> bool {
        let key = {
            let state = self.state.lock().await;
            state.settings.api_key()
        };
        let key = match key {
            Ok(Some(key)) => key,
            Ok(None) => {
                self.permanent.store(false, Ordering::SeqCst);
                return false;
            }
            Err(error) => {
                tracing::warn!(%error, "stored API key is invalid, skipping status check");
                return self.is_permanent();
            }
        };

        let service = Arc::clone(&self.service);
        let check = async move {
            match service.list_documents(&key).await {
                Ok(list) => Some(list.permanent),
                Err(error) => {
                    tracing::warn!(%error, "status check failed");
                    None
                }
            }
        }
        .boxed();

        match self.status.run(check).await {
            Some(permanent) => {
                self.permanent.store(permanent, Ordering::SeqCst);
                if permanent {
                    self.upgrade_sweep(None).await;
                }
                permanent
            }
            None => self.is_permanent(),
        }
    }

    /// The account's remote documents.
    #[tracing::instrument(skip(self))]
    pub async fn list_remote(&self) -> Result<DocumentList, PublishError> {
        let key = Self::api_key(&*self.state.lock().await, "list documents")?;
        let list = self
            .service
            .list_documents(&key)
            .await
            .map_err(PublishError::remote("list documents"))?;
        self.permanent.store(list.permanent, Ordering::SeqCst);
        if list.permanent {
            self.upgrade_sweep(None).await;
        }
        Ok(list)
    }

    pub async fn billing_portal_url(&self) -> Result<String, PublishError> {
        let key = Self::api_key(&*self.state.lock().await, "open the billing portal")?;
        self.service
            .billing_portal_url(&key)
            .await
            .map_err(PublishError::remote("open billing portal"))
    }

    /// Follow a rename: the record moves to the new path unchanged.
    pub async fn on_rename(&self, from: &str, to: &str) -> Result<bool, PublishError> {
        let mut state = self.state.lock().await;
        if !state.rename_record(from, to) {
            return Ok(false);
        }
        self.persist(&state).await?;
        tracing::debug!(from, to, "moved record");
        Ok(true)
    }

    /// Forget the record of a deleted note.
    pub async fn on_delete(&self, path: &str) -> Result<bool, PublishError> {
        let mut state = self.state.lock().await;
        if state.remove_record(path).is_none() {
            return Ok(false);
        }
        self.persist(&state).await?;
        tracing::debug!(path, "dropped record of deleted note");
        Ok(true)
    }

    pub async fn apply_event(&self, event: &StoreEvent) -> Result<bool, PublishError> {
        match event {
            StoreEvent::Renamed { from, to } => self.on_rename(from, to).await,
            StoreEvent::Deleted { path } => self.on_delete(path).await,
        }
    }

    /// Apply store events until the channel closes.
    pub async fn follow(&self, mut events: broadcast::Receiver<StoreEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Err(error) = self.apply_event(&event).await {
                        tracing::warn!(?event, %error, "failed to apply store event");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "missed store events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Rebuild records for notes whose metadata header says they are
    /// published but that the state does not track.
    ///
    /// Existing records are never touched. Does nothing when metadata
    /// mirroring is off.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_startup(&self) -> Result<ReconcileReport, PublishError> {
        let mut report = ReconcileReport::default();
        if !self.state.lock().await.settings.mirror_metadata {
            return Ok(report);
        }

        let notes = self.store.list_by_extension(NOTE_EXTENSIONS).await?;
        let mut adopted = Vec::new();
        for note in notes {
            if self
                .state
                .lock()
                .await
                .published_notes
                .contains_key(note.path())
            {
                continue;
            }
            let header = match self.store.frontmatter(note.path()).await {
                Ok(Some(header)) => header,
                Ok(None) => continue,
                Err(error) => {
                    tracing::warn!(path = %note, %error, "skipping unreadable note");
                    continue;
                }
            };
            let Some(url) = published_link(&header) else {
                continue;
            };
            let Some(slug) = slug_from_url(url) else {
                tracing::warn!(path = %note, url, "published link has no usable slug");
                continue;
            };
            adopted.push((
                note.path().to_owned(),
                PublishedRecord {
                    slug,
                    url: url.to_owned(),
                    edit_token: None,
                    published_at: Utc::now(),
                },
            ));
        }

        if adopted.is_empty() {
            return Ok(report);
        }
        let mut state = self.state.lock().await;
        for (path, record) in adopted {
            if state.published_notes.contains_key(&path) {
                continue;
            }
            state.published_notes.insert(path.clone(), record);
            report.adopted.push(path);
        }
        self.persist(&state).await?;
        tracing::info!(adopted = report.adopted.len(), "reconciled records from metadata");
        Ok(report)
    }

    /// Rewrite the expiry of every other tracked note to `never`, once.
    async fn upgrade_sweep(&self, skip: Option<&str>) {
        if self.upgrade_swept.swap(true, Ordering::SeqCst) {
            return;
        }
        let (targets, mirror) = {
            let state = self.state.lock().await;
            if state.pro_refresh_done {
                return;
            }
            let targets: Vec<String> = state
                .published_notes
                .keys()
                .filter(|path| Some(path.as_str()) != skip)
                .cloned()
                .collect();
            (targets, state.settings.mirror_metadata)
        };

        tracing::info!(notes = targets.len(), "permanent tier detected, refreshing expiry");
        if mirror {
            for path in &targets {
                let result = self
                    .store
                    .update_frontmatter(path, |mut header| {
                        header.set(EXPIRES_KEY, NEVER_EXPIRES);
                        header
                    })
                    .await;
                if let Err(error) = result {
                    tracing::warn!(%path, %error, "failed to refresh expiry");
                }
            }
        }

        let mut state = self.state.lock().await;
        state.pro_refresh_done = true;
        if let Err(error) = self.persist(&state).await {
            tracing::warn!(%error, "failed to save upgrade flag");
        }
    }

    async fn mirror_link(&self, path: &str, url: &str, expires: &str) {
        let result = self
            .store
            .update_frontmatter(path, |mut header| {
                header.set(LINK_KEY, url);
                header.set(EXPIRES_KEY, expires);
                for key in LEGACY_LINK_KEYS {
                    header.remove(key);
                }
                header
            })
            .await;
        if let Err(error) = result {
            tracing::warn!(path, %error, "failed to mirror link into metadata");
        }
    }

    async fn clear_link(&self, path: &str) {
        let result = self
            .store
            .update_frontmatter(path, |mut header| {
                for key in [LINK_KEY, EXPIRES_KEY].into_iter().chain(LEGACY_LINK_KEYS) {
                    header.remove(key);
                }
                header
            })
            .await;
        if let Err(error) = result {
            tracing::warn!(path, %error, "failed to clear link from metadata");
        }
    }
}

/// The published URL recorded in a header, current key first.
pub fn published_link(header: &Frontmatter) -> Option<&str> {
    [LINK_KEY]
        .into_iter()
        .chain(LEGACY_LINK_KEYS)
        .find_map(|key| header.get_str(key).map(str::trim).filter(|url| !url.is_empty()))
}

/// Last non-empty path segment of a published URL.
pub fn slug_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let slug = parsed.path_segments()?.rev().find(|s| !s.is_empty())?;
    validate_slug(slug).ok()?;
    Some(slug.to_owned())
}
