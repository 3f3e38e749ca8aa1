//! Scripted in-memory publishing service for tests.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::ServiceError;
use crate::service::{
    ApiKey, ClaimResponse, DocumentList, ImageUpload, Owner, PublishRequest, PublishResponse,
    PublishService, validate_edit_token, validate_slug,
};

pub const TEST_URL: &str = "https://notepost.test";
pub const TEST_EXPIRY: &str = "2030-01-31T00:00:00Z";
pub const TEST_TTL_DAYS: u32 = 30;

/// One call made against a [`RecordingService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    Publish {
        anonymous: bool,
        slug: Option<String>,
        edit_token: Option<String>,
        title: String,
        markdown: String,
    },
    Delete {
        anonymous: bool,
        slug: String,
        edit_token: Option<String>,
    },
    Claim {
        slug: String,
        edit_token: String,
    },
    Upload {
        filename: String,
        mime_type: &'static str,
    },
    /// A status listing began; numbered from 1.
    ListStart(usize),
    ListEnd(usize),
    Portal,
}

#[derive(Debug, Default)]
struct Script {
    calls: Vec<ServiceCall>,
    created: usize,
    listings: usize,
    permanent: bool,
    expired: HashSet<String>,
    failing_claims: HashSet<String>,
    publish_failure: Option<(u16, String)>,
    fail_uploads: bool,
    fail_deletes: bool,
    fail_lists: bool,
    list_results: VecDeque<bool>,
    list_delay: Option<Duration>,
    issued_ids: Option<(String, String)>,
}

/// [`PublishService`] that records every call and answers from a script.
///
/// Fresh creates get slugs `slug-1`, `slug-2`, ... and anonymous creates an
/// edit token `token-<slug>`. Updates never return an edit token. Claimed
/// documents come back as `claimed-<slug>`.
#[derive(Debug, Default)]
pub struct RecordingService {
    script: Mutex<Script>,
}

impl RecordingService {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.script().calls.clone()
    }

    /// Publish calls only, for the common case.
    pub fn publishes(&self) -> Vec<ServiceCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, ServiceCall::Publish { .. }))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.script().calls.clear();
    }

    /// Answer as an account on the permanent tier.
    pub fn set_permanent(&self, permanent: bool) {
        self.script().permanent = permanent;
    }

    /// Updates of `slug` fail with not-found from now on.
    pub fn expire(&self, slug: &str) {
        self.script().expired.insert(slug.to_owned());
    }

    pub fn fail_claim(&self, slug: &str) {
        self.script().failing_claims.insert(slug.to_owned());
    }

    /// Every publish fails with this status and message.
    pub fn fail_publishes(&self, status: u16, message: &str) {
        self.script().publish_failure = Some((status, message.to_owned()));
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.script().fail_uploads = fail;
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.script().fail_deletes = fail;
    }

    pub fn fail_lists(&self, fail: bool) {
        self.script().fail_lists = fail;
    }

    /// Tier answers for upcoming listings, consumed in order as each listing
    /// starts. Once exhausted the `set_permanent` value is used.
    pub fn queue_list_results(&self, results: impl IntoIterator<Item = bool>) {
        self.script().list_results.extend(results);
    }

    /// Hold every listing open for `delay` before it answers.
    pub fn set_list_delay(&self, delay: Duration) {
        self.script().list_delay = Some(delay);
    }

    /// Issue slugs `<slug_prefix>N` and edit tokens `<token_prefix><slug>`
    /// for fresh creates instead of the defaults.
    pub fn issue_ids(&self, slug_prefix: &str, token_prefix: &str) {
        self.script().issued_ids = Some((slug_prefix.to_owned(), token_prefix.to_owned()));
    }

    fn url(slug: &str) -> String {
        format!("{TEST_URL}/{slug}")
    }

    fn expiry(permanent: bool) -> (Option<DateTime<Utc>>, Option<u32>) {
        if permanent {
            (None, None)
        } else {
            (TEST_EXPIRY.parse().ok(), Some(TEST_TTL_DAYS))
        }
    }
}

impl PublishService for RecordingService {
    async fn publish(
        &self,
        owner: &Owner,
        request: PublishRequest,
    ) -> Result<PublishResponse, ServiceError> {
        request.validate()?;
        let mut script = self.script();
        script.calls.push(ServiceCall::Publish {
            anonymous: owner.is_anonymous(),
            slug: request.slug.clone(),
            edit_token: request.edit_token.clone(),
            title: request.title.clone(),
            markdown: request.markdown.clone(),
        });
        if let Some((status, message)) = script.publish_failure.clone() {
            return Err(ServiceError::from_status(status, message));
        }

        let (expires_at, ttl_days) = Self::expiry(script.permanent);
        let (slug, created, edit_token) = match request.slug {
            Some(slug) if script.expired.contains(&slug) => {
                return Err(ServiceError::NotFound {
                    message: format!("document {slug} not found"),
                });
            }
            Some(slug) => (slug, false, None),
            None => {
                script.created += 1;
                let (slug_prefix, token_prefix) = script
                    .issued_ids
                    .clone()
                    .unwrap_or_else(|| ("slug-".to_owned(), "token-".to_owned()));
                let slug = format!("{slug_prefix}{}", script.created);
                let token = owner
                    .is_anonymous()
                    .then(|| format!("{token_prefix}{slug}"));
                (slug, true, token)
            }
        };
        Ok(PublishResponse {
            url: Self::url(&slug),
            slug,
            title: Some(request.title),
            expires_at,
            ttl_days,
            created,
            edit_token,
        })
    }

    async fn delete(
        &self,
        owner: &Owner,
        slug: &str,
        edit_token: Option<&str>,
    ) -> Result<(), ServiceError> {
        validate_slug(slug)?;
        if let Some(token) = edit_token {
            validate_edit_token(token)?;
        }
        let mut script = self.script();
        script.calls.push(ServiceCall::Delete {
            anonymous: owner.is_anonymous(),
            slug: slug.to_owned(),
            edit_token: edit_token.map(str::to_owned),
        });
        if script.fail_deletes {
            return Err(ServiceError::from_status(500, "delete failed"));
        }
        Ok(())
    }

    async fn list_documents(&self, _key: &ApiKey) -> Result<DocumentList, ServiceError> {
        let (number, permanent, delay, fail) = {
            let mut script = self.script();
            script.listings += 1;
            let number = script.listings;
            script.calls.push(ServiceCall::ListStart(number));
            let permanent = script
                .list_results
                .pop_front()
                .unwrap_or(script.permanent);
            (number, permanent, script.list_delay, script.fail_lists)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.script().calls.push(ServiceCall::ListEnd(number));
        if fail {
            return Err(ServiceError::from_status(503, "unavailable"));
        }
        Ok(DocumentList {
            documents: Vec::new(),
            permanent,
        })
    }

    async fn claim(
        &self,
        _key: &ApiKey,
        slug: &str,
        edit_token: &str,
    ) -> Result<ClaimResponse, ServiceError> {
        validate_slug(slug)?;
        validate_edit_token(edit_token)?;
        let mut script = self.script();
        script.calls.push(ServiceCall::Claim {
            slug: slug.to_owned(),
            edit_token: edit_token.to_owned(),
        });
        if script.failing_claims.contains(slug) {
            return Err(ServiceError::from_status(500, "claim failed"));
        }
        let claimed = format!("claimed-{slug}");
        let (expires_at, ttl_days) = Self::expiry(script.permanent);
        Ok(ClaimResponse {
            url: Self::url(&claimed),
            slug: claimed,
            expires_at,
            ttl_days,
        })
    }

    async fn upload_image(&self, _owner: &Owner, image: ImageUpload) -> Result<String, ServiceError> {
        let mut script = self.script();
        script.calls.push(ServiceCall::Upload {
            filename: image.filename.clone(),
            mime_type: image.mime_type,
        });
        if script.fail_uploads {
            return Err(ServiceError::from_status(413, "image too large"));
        }
        Ok(format!("https://cdn.notepost.test/{}", image.filename))
    }

    async fn billing_portal_url(&self, _key: &ApiKey) -> Result<String, ServiceError> {
        self.script().calls.push(ServiceCall::Portal);
        Ok("https://billing.notepost.test/portal".to_owned())
    }
}
