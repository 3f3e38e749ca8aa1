//! Contract of the remote publishing service.
//!
//! The service renders and hosts published notes. Every operation exists in an
//! account flavour (API key) and, for publish and delete, an anonymous flavour
//! keyed by a per-installation device id plus a per-document edit token.

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CredentialError, ServiceError};

const API_KEY_MIN: usize = 16;
const API_KEY_MAX: usize = 128;

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// A validated account API key. `Debug` never prints the key.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn parse(raw: &str) -> Result<Self, CredentialError> {
        let key = raw.trim();
        if key.len() < API_KEY_MIN {
            return Err(CredentialError::InvalidApiKey {
                reason: "too short",
            });
        }
        if key.len() > API_KEY_MAX {
            return Err(CredentialError::InvalidApiKey { reason: "too long" });
        }
        if !key.chars().all(is_key_char) {
            return Err(CredentialError::InvalidApiKey {
                reason: "contains characters other than letters, digits, `-` and `_`",
            });
        }
        Ok(Self(key.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

impl FromStr for ApiKey {
    type Err = CredentialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Slugs are server-assigned and opaque; only blank ones are refused.
pub fn validate_slug(slug: &str) -> Result<(), CredentialError> {
    if slug.trim().is_empty() {
        return Err(CredentialError::InvalidSlug {
            slug: slug.to_owned(),
        });
    }
    Ok(())
}

/// Edit tokens are server-issued capabilities; only blank ones are refused.
pub fn validate_edit_token(token: &str) -> Result<(), CredentialError> {
    if token.trim().is_empty() {
        return Err(CredentialError::InvalidEditToken);
    }
    Ok(())
}

/// Who a request is made on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Owner {
    Account(ApiKey),
    Anonymous { device_id: String },
}

impl Owner {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    pub markdown: String,
    pub title: String,
    /// Existing slug to update; absent for a fresh create.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    /// Anonymous updates only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit_token: Option<String>,
}

impl PublishRequest {
    pub fn validate(&self) -> Result<(), CredentialError> {
        if let Some(slug) = &self.slug {
            validate_slug(slug)?;
        }
        if let Some(token) = &self.edit_token {
            validate_edit_token(token)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub slug: String,
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// `None` means the account is on the permanent tier.
    #[serde(default)]
    pub ttl_days: Option<u32>,
    #[serde(default)]
    pub created: bool,
    #[serde(default)]
    pub edit_token: Option<String>,
}

impl PublishResponse {
    pub fn is_permanent(&self) -> bool {
        self.ttl_days.is_none()
    }

    /// Human readable expiry: `never`, or the date part of the expiry.
    pub fn expiration_label(&self) -> String {
        expiration_label(self.is_permanent(), self.expires_at)
    }
}

pub const NEVER_EXPIRES: &str = "never";

pub fn expiration_label(permanent: bool, expires_at: Option<DateTime<Utc>>) -> String {
    match (permanent, expires_at) {
        (false, Some(at)) => at.format("%Y-%m-%d").to_string(),
        _ => NEVER_EXPIRES.to_owned(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDocument {
    pub slug: String,
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentList {
    #[serde(default)]
    pub documents: Vec<RemoteDocument>,
    /// Whether the account is on the permanent-link tier.
    #[serde(default)]
    pub permanent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    pub slug: String,
    pub url: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ttl_days: Option<u32>,
}

/// An image ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub data: Bytes,
    pub filename: String,
    pub mime_type: &'static str,
}

/// The remote publishing service.
pub trait PublishService: Send + Sync {
    /// Create a document, or update `request.slug` when given.
    fn publish(
        &self,
        owner: &Owner,
        request: PublishRequest,
    ) -> impl Future<Output = Result<PublishResponse, ServiceError>> + Send;

    /// Delete a document. Anonymous owners must pass the edit token.
    fn delete(
        &self,
        owner: &Owner,
        slug: &str,
        edit_token: Option<&str>,
    ) -> impl Future<Output = Result<(), ServiceError>> + Send;

    fn list_documents(
        &self,
        key: &ApiKey,
    ) -> impl Future<Output = Result<DocumentList, ServiceError>> + Send;

    /// Move an anonymous document into the account.
    fn claim(
        &self,
        key: &ApiKey,
        slug: &str,
        edit_token: &str,
    ) -> impl Future<Output = Result<ClaimResponse, ServiceError>> + Send;

    /// Upload an image and return its hosted URL.
    fn upload_image(
        &self,
        owner: &Owner,
        image: ImageUpload,
    ) -> impl Future<Output = Result<String, ServiceError>> + Send;

    fn billing_portal_url(
        &self,
        key: &ApiKey,
    ) -> impl Future<Output = Result<String, ServiceError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn api_key_rules() {
        assert!(ApiKey::parse("  abcdefghij_KLMNOP-123  ").is_ok());
        assert!(ApiKey::parse("short").is_err());
        assert!(ApiKey::parse("has spaces inside the key").is_err());
        assert!(ApiKey::parse(&"k".repeat(129)).is_err());
        assert_eq!(
            format!("{:?}", ApiKey::parse("abcdefghijklmnop").unwrap()),
            "ApiKey(***)"
        );
    }

    #[test]
    fn slug_and_token_rules() {
        assert!(validate_slug("abc-123").is_ok());
        assert!(validate_slug("my-note.v2").is_ok());
        assert!(validate_slug("a~b").is_ok());
        assert!(validate_slug("").is_err());
        assert!(validate_slug("  ").is_err());
        assert!(validate_edit_token("tok_1").is_ok());
        assert!(validate_edit_token("eyJhbGciOi.eyJzdWIi.sig").is_ok());
        assert_eq!(validate_edit_token(""), Err(CredentialError::InvalidEditToken));

        let request = PublishRequest {
            markdown: "# A".into(),
            title: "A".into(),
            slug: Some("my-note.v2".into()),
            edit_token: Some("eyJhbGciOi.eyJzdWIi.sig".into()),
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn response_expiration_label() {
        let json = r#"{"slug":"s","url":"u","expiresAt":"2026-03-04T12:00:00Z","ttlDays":30,"created":true}"#;
        let response: PublishResponse = serde_json::from_str(json).unwrap();
        assert!(!response.is_permanent());
        assert_eq!(response.expiration_label(), "2026-03-04");

        let permanent = PublishResponse {
            ttl_days: None,
            expires_at: Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()),
            ..response
        };
        assert_eq!(permanent.expiration_label(), NEVER_EXPIRES);
    }

    #[test]
    fn request_omits_absent_fields() {
        let request = PublishRequest {
            markdown: "# Hi".into(),
            title: "Hi".into(),
            slug: None,
            edit_token: None,
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r##"{"markdown":"# Hi","title":"Hi"}"##
        );
    }
}
