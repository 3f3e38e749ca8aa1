//! Shared types for notepost: the document store, persisted state and the
//! publishing service contract.

pub mod error;
pub mod frontmatter;
pub mod http;
pub mod service;
pub mod state;
pub mod store;

#[cfg(feature = "telemetry")]
pub mod telemetry;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use crate::error::{
    ConfigError, CredentialError, FrontmatterError, ServiceError, StateError, StoreError,
};
pub use crate::frontmatter::{Frontmatter, split_frontmatter, strip_frontmatter};
pub use crate::http::{HttpPublishService, ServiceConfig};
pub use crate::service::{
    ApiKey, ClaimResponse, DocumentList, ImageUpload, Owner, PublishRequest, PublishResponse,
    PublishService, RemoteDocument,
};
pub use crate::state::{LocalState, PublishedRecord, Settings, StateFile};
pub use crate::store::{DocumentRef, DocumentStore, MemoryStore, StoreEvent, VaultStore};
