//! Bundle: the unit of exchange in the content-addressed store. Every
//! protocol message (OFFER, CALL, ACK, RESULT, ERROR, CLEANUP) is carried as
//! a manifest of string key/value pairs plus an opaque payload.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Manifest key carrying the bundle's [`BundleType`].
pub const KEY_TYPE: &str = "type";
/// Manifest key carrying the shared [`crate::RpcId`] for a call cascade.
pub const KEY_RPCID: &str = "rpcid";
/// Manifest key carrying the originating client's SID.
pub const KEY_ORIGINATOR: &str = "originator";
/// Manifest key carrying the sending node's SID.
pub const KEY_SENDER: &str = "sender";
/// Manifest key carrying the intended recipient's SID (may be absent for
/// broadcast OFFERs).
pub const KEY_RECIPIENT: &str = "recipient";
/// Manifest key carrying the procedure name a CALL invokes.
pub const KEY_SERVICE: &str = "service";
/// Manifest key carrying a human-readable ERROR reason string.
pub const KEY_REASON: &str = "reason";
/// Manifest key set to `"true"` on bundles authored by this node.
pub const KEY_FROM_HERE: &str = "fromhere";

/// The five protocol message kinds exchanged through the bundle store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BundleType {
    /// A periodic capability/procedure advertisement.
    Offer,
    /// A request to execute one step of a job document.
    Call,
    /// Acknowledgement that a CALL was accepted for execution.
    Ack,
    /// The successful outcome of a step.
    Result,
    /// A failed outcome, with a `reason` manifest entry.
    Error,
    /// A blanking message superseding a prior bundle's payload.
    Cleanup,
}

impl BundleType {
    /// The wire-numeric code used in the original deployment's manifests
    /// (`OFFER`=?, `CALL`=0, `ACK`=1, `RESULT`=2, `ERROR`=3, `CLEANUP`=4).
    pub fn code(self) -> u8 {
        match self {
            BundleType::Call => 0,
            BundleType::Ack => 1,
            BundleType::Result => 2,
            BundleType::Error => 3,
            BundleType::Cleanup => 4,
            BundleType::Offer => 5,
        }
    }

    /// Parse a manifest `type` value back into a [`BundleType`].
    ///
    /// Accepts both the numeric wire form (§6.5: `type` is `int 0..4`) and
    /// the `SCREAMING_SNAKE_CASE` name, so the same parser works whether the
    /// manifest was built by hand or by [`Bundle::builder`]'s default entry.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "0" => Some(BundleType::Call),
            "1" => Some(BundleType::Ack),
            "2" => Some(BundleType::Result),
            "3" => Some(BundleType::Error),
            "4" => Some(BundleType::Cleanup),
            "5" => Some(BundleType::Offer),
            "OFFER" => Some(BundleType::Offer),
            "CALL" => Some(BundleType::Call),
            "ACK" => Some(BundleType::Ack),
            "RESULT" => Some(BundleType::Result),
            "ERROR" => Some(BundleType::Error),
            "CLEANUP" => Some(BundleType::Cleanup),
            _ => None,
        }
    }

    /// The manifest string form, matching serde's `SCREAMING_SNAKE_CASE`.
    pub fn as_str(self) -> &'static str {
        match self {
            BundleType::Offer => "OFFER",
            BundleType::Call => "CALL",
            BundleType::Ack => "ACK",
            BundleType::Result => "RESULT",
            BundleType::Error => "ERROR",
            BundleType::Cleanup => "CLEANUP",
        }
    }
}

impl fmt::Display for BundleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque bundle identifier, as assigned by the store.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleId(String);

impl BundleId {
    /// Wrap a store-assigned identifier.
    pub fn new(raw: impl Into<String>) -> Self {
        BundleId(raw.into())
    }

    /// The raw identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A monotone watermark returned by the store's `newsince` query; bundles
/// observed in one poll carry a token that seeds the next poll.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(pub u64);

impl Token {
    /// The initial token, observing every bundle currently in the store.
    pub fn genesis() -> Self {
        Token(0)
    }

    /// Advance to a token at least as large as `other`.
    pub fn advance_to(&mut self, other: Token) {
        if other > *self {
            *self = other;
        }
    }
}

/// A single message in the store: identity, ordering token, manifest, and
/// opaque payload bytes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    /// Store-assigned identifier.
    pub bundle_id: BundleId,
    /// Store-assigned ordering token.
    pub token: Token,
    /// Protocol manifest entries.
    pub manifest: BTreeMap<String, String>,
    /// Opaque payload (a ZIP archive for CALL, a job-file snippet or
    /// process output for RESULT/ERROR, empty for CLEANUP).
    #[serde(default)]
    pub payload: Vec<u8>,
}

impl Bundle {
    /// Start building a bundle of the given type.
    #[must_use]
    pub fn builder(bundle_type: BundleType) -> BundleBuilder {
        let mut manifest = BTreeMap::new();
        manifest.insert(KEY_TYPE.to_string(), bundle_type.as_str().to_string());
        BundleBuilder {
            bundle_id: BundleId::new(""),
            token: Token::genesis(),
            manifest,
            payload: Vec::new(),
        }
    }

    /// This bundle's [`BundleType`], if the `type` manifest entry is a
    /// recognized value.
    pub fn bundle_type(&self) -> Option<BundleType> {
        BundleType::parse(self.manifest.get(KEY_TYPE)?)
    }

    /// Read a manifest entry by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.manifest.get(key).map(String::as_str)
    }

    /// The `rpcid` manifest entry.
    pub fn rpcid(&self) -> Option<&str> {
        self.get(KEY_RPCID)
    }

    /// The `reason` manifest entry, present on ERROR bundles.
    pub fn reason(&self) -> Option<&str> {
        self.get(KEY_REASON)
    }

    /// `true` if the `fromhere` manifest entry is set to `"true"`.
    pub fn is_from_here(&self) -> bool {
        self.get(KEY_FROM_HERE) == Some("true")
    }

    /// `true` if this bundle's payload has been blanked by a CLEANUP.
    pub fn is_blanked(&self) -> bool {
        self.payload.is_empty() && self.bundle_type() != Some(BundleType::Cleanup)
    }
}

/// Fluent builder for [`Bundle`].
pub struct BundleBuilder {
    bundle_id: BundleId,
    token: Token,
    manifest: BTreeMap<String, String>,
    payload: Vec<u8>,
}

impl BundleBuilder {
    /// Set the store-assigned bundle id (normally left to the store on
    /// insert; useful for constructing fixtures).
    #[must_use]
    pub fn bundle_id(mut self, id: impl Into<String>) -> Self {
        self.bundle_id = BundleId::new(id);
        self
    }

    /// Set a manifest entry.
    #[must_use]
    pub fn manifest(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.manifest.insert(key.into(), value.into());
        self
    }

    /// Set the opaque payload.
    #[must_use]
    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Finalize the bundle.
    pub fn build(self) -> Bundle {
        Bundle {
            bundle_id: self.bundle_id,
            token: self.token,
            manifest: self.manifest,
            payload: self.payload,
        }
    }
}
