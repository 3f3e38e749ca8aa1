//! Publish reconciliation for notepost.
//!
//! A [`Session`] ties local notes to the remote documents published from them:
//! it picks create or update, republishes expired documents, moves anonymous
//! documents into an account, and keeps records in step with renames and
//! deletions in the vault.

pub mod error;
mod gate;
pub mod session;

pub use error::PublishError;
pub use session::{
    ClaimReport, EXPIRES_KEY, LEGACY_LINK_KEYS, LINK_KEY, PublishOutcome, ReconcileReport,
    Session, Unpublished,
};
