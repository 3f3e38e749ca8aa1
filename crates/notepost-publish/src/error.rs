use miette::Diagnostic;
use notepost_common::{CredentialError, ServiceError, StateError, StoreError};
use thiserror::Error;

/// Failures surfaced by a publishing session.
///
/// Metadata-header writes and per-item sweep failures never show up here; they
/// are logged and the operation carries on.
#[derive(Debug, Error, Diagnostic)]
pub enum PublishError {
    /// The remote call for `action` failed.
    #[error("{action} failed")]
    #[diagnostic(code(publish::remote))]
    Remote {
        action: &'static str,
        #[source]
        source: ServiceError,
    },

    #[error("could not read {path}")]
    #[diagnostic(code(publish::document))]
    Document {
        path: String,
        #[source]
        source: StoreError,
    },

    #[error("an account is needed to {action}")]
    #[diagnostic(
        code(publish::signed_out),
        help("run `notepost login <api-key>` first")
    )]
    SignedOut { action: &'static str },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

impl PublishError {
    pub(crate) fn remote(action: &'static str) -> impl FnOnce(ServiceError) -> Self {
        move |source| Self::Remote { action, source }
    }

    /// The service error behind a remote failure.
    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            Self::Remote { source, .. } => Some(source),
            _ => None,
        }
    }
}
