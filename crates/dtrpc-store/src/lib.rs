//! Bundle Store Adapter (§4.1): the abstraction every other component uses
//! to talk to the opportunistic overlay, plus a concrete HTTP+JSON client
//! against a Rhizome-shaped REST surface.
//!
//! The overlay itself — the content-addressed, signed-manifest store with a
//! monotone "new since" token — is an external collaborator. This crate
//! owns the [`BundleStore`] trait any component programs against, and the
//! wire adapter that implements it.

mod http;
mod retry;

pub use http::HttpBundleStore;
pub use retry::retry_transient;

use async_trait::async_trait;
use dtrpc_core::{Bundle, BundleId, Sid, Token};
use dtrpc_error::DtrpcError;
use std::collections::BTreeMap;

/// Outcome of an [`BundleStore::insert`] call. The store distinguishes a
/// freshly authored bundle from one that collided with an equivalent
/// already-stored bundle — callers treat the latter as a non-fatal success
/// (§7, "Duplicate insertion").
#[derive(Clone, Debug, PartialEq)]
pub enum InsertOutcome {
    /// The bundle was newly created.
    Inserted(Bundle),
    /// An equivalent bundle already existed; the store returned it.
    Duplicate(Bundle),
}

impl InsertOutcome {
    /// The bundle, regardless of whether it was newly inserted or a
    /// duplicate of an existing one.
    pub fn bundle(&self) -> &Bundle {
        match self {
            InsertOutcome::Inserted(b) | InsertOutcome::Duplicate(b) => b,
        }
    }

    /// `true` if the store reported this as a duplicate of an existing bundle.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, InsertOutcome::Duplicate(_))
    }
}

/// The abstract bundle store contract (§4.1).
///
/// Every operation may fail with a [`DtrpcError`]; callers distinguish
/// retryable transport failures from fatal ones via
/// [`DtrpcError::is_retryable`].
#[async_trait]
pub trait BundleStore: Send + Sync {
    /// Resolve this node's local SID from the store's keyring.
    async fn identity(&self) -> Result<Sid, DtrpcError>;

    /// Snapshot of every bundle currently in the store, most-recent first.
    async fn list(&self) -> Result<Vec<Bundle>, DtrpcError>;

    /// Bundles strictly newer than `token`, most-recent first. An empty
    /// result is legal and does not indicate an error.
    async fn newsince(&self, token: Token) -> Result<Vec<Bundle>, DtrpcError>;

    /// Fetch a single bundle's manifest and payload by id.
    async fn fetch(&self, id: &BundleId) -> Result<Bundle, DtrpcError>;

    /// Author a new bundle. Returns [`InsertOutcome::Duplicate`] rather
    /// than an error if the store already holds an equivalent bundle.
    async fn insert(
        &self,
        manifest: BTreeMap<String, String>,
        payload: Vec<u8>,
        author: &Sid,
    ) -> Result<InsertOutcome, DtrpcError>;

    /// Apply a manifest patch and/or payload replacement to an
    /// already-inserted bundle. Used for ACK/blanking mutations.
    async fn update(
        &self,
        id: &BundleId,
        manifest_patch: BTreeMap<String, String>,
        payload: Vec<u8>,
    ) -> Result<Bundle, DtrpcError>;
}
