//! Error types shared by the notepost crates.
//!
//! One enum per concern. Callers that need a single type (the publish engine,
//! the CLI) wrap these rather than flattening them.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Document store failures
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("document not found: {path}")]
    #[diagnostic(code(store::not_found))]
    NotFound { path: String },

    #[error("invalid document path: {path}")]
    #[diagnostic(
        code(store::invalid_path),
        help("paths are relative to the vault root and may not contain `..`")
    )]
    InvalidPath { path: String },

    #[error("failed to access {}", path.display())]
    #[diagnostic(code(store::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to walk vault at {}", root.display())]
    #[diagnostic(code(store::walk))]
    Walk {
        root: PathBuf,
        #[source]
        source: ignore::Error,
    },

    #[error("metadata header of {path} could not be processed")]
    #[diagnostic(code(store::frontmatter))]
    Frontmatter {
        path: String,
        #[source]
        source: FrontmatterError,
    },

    #[error("document store is read-only, cannot write {path}")]
    #[diagnostic(code(store::read_only))]
    ReadOnly { path: String },
}

/// Metadata header parse/emit errors
#[derive(Debug, Error, Diagnostic)]
pub enum FrontmatterError {
    #[error("metadata header is not valid YAML")]
    #[diagnostic(code(frontmatter::syntax))]
    Syntax(#[from] yaml_rust2::ScanError),

    #[error("metadata header is not a key/value mapping")]
    #[diagnostic(code(frontmatter::not_a_mapping))]
    NotAMapping,

    #[error("failed to write metadata header: {0}")]
    #[diagnostic(code(frontmatter::emit))]
    Emit(String),
}

/// Persisted state errors
#[derive(Debug, Error, Diagnostic)]
pub enum StateError {
    #[error("failed to read state from {}", path.display())]
    #[diagnostic(code(state::read))]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write state to {}", path.display())]
    #[diagnostic(code(state::write))]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state file {} is corrupt", path.display())]
    #[diagnostic(
        code(state::parse),
        help("fix or delete the file; published records will be rebuilt from metadata headers")
    )]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize state")]
    #[diagnostic(code(state::serialize))]
    Serialize(#[source] serde_json::Error),
}

/// Malformed credentials or identifiers, rejected before any request is made
#[derive(Debug, Error, Diagnostic, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("invalid API key: {reason}")]
    #[diagnostic(
        code(credential::api_key),
        help("API keys are 16-128 characters of letters, digits, `-` and `_`")
    )]
    InvalidApiKey { reason: &'static str },

    #[error("invalid slug: {slug:?}")]
    #[diagnostic(code(credential::slug))]
    InvalidSlug { slug: String },

    #[error("invalid edit token")]
    #[diagnostic(code(credential::edit_token))]
    InvalidEditToken,
}

/// Remote publishing service errors
#[derive(Debug, Error, Diagnostic)]
pub enum ServiceError {
    /// The remote document does not exist. On an update this means it expired.
    #[error("not found: {message}")]
    #[diagnostic(code(service::not_found))]
    NotFound { message: String },

    #[error("rate limited: {message}")]
    #[diagnostic(code(service::rate_limited), help("wait a moment before trying again"))]
    RateLimited { message: String },

    #[error("payload too large: {message}")]
    #[diagnostic(code(service::payload_too_large))]
    PayloadTooLarge { message: String },

    #[error("not authorized: {message}")]
    #[diagnostic(code(service::unauthorized), help("check the configured API key"))]
    Unauthorized { message: String },

    #[error("server error ({status}): {message}")]
    #[diagnostic(code(service::server))]
    Server { status: u16, message: String },

    #[error("request failed")]
    #[diagnostic(code(service::transport))]
    Transport(#[source] reqwest::Error),

    #[error("unexpected response from server")]
    #[diagnostic(code(service::decode))]
    Decode(#[source] reqwest::Error),

    #[error("invalid request: {0}")]
    #[diagnostic(code(service::invalid_request))]
    InvalidRequest(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Credential(#[from] CredentialError),
}

impl ServiceError {
    /// Map a non-success HTTP status and the server's message to an error kind.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            404 => Self::NotFound { message },
            413 => Self::PayloadTooLarge { message },
            429 => Self::RateLimited { message },
            401 | 403 => Self::Unauthorized { message },
            _ => Self::Server { status, message },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Environment configuration errors
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("invalid URL {url:?}: {message}")]
    #[diagnostic(code(config::url))]
    InvalidUrl { url: String, message: String },

    #[error("invalid value {value:?} for {var}")]
    #[diagnostic(code(config::number))]
    InvalidNumber { var: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_kinds() {
        assert!(ServiceError::from_status(404, "gone").is_not_found());
        assert!(matches!(
            ServiceError::from_status(429, "slow down"),
            ServiceError::RateLimited { .. }
        ));
        assert!(matches!(
            ServiceError::from_status(413, "too big"),
            ServiceError::PayloadTooLarge { .. }
        ));
        assert!(matches!(
            ServiceError::from_status(403, "nope"),
            ServiceError::Unauthorized { .. }
        ));
        assert!(matches!(
            ServiceError::from_status(502, "bad gateway"),
            ServiceError::Server { status: 502, .. }
        ));
    }

    #[test]
    fn server_message_is_kept_verbatim() {
        let err = ServiceError::from_status(500, "database exploded");
        assert_eq!(err.to_string(), "server error (500): database exploded");
    }
}
