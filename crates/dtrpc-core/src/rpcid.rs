//! RPC identifier — the 8-hex-char short identifier shared by every bundle
//! belonging to a single end-to-end call.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Opaque identifier for one end-to-end RPC. Equality is the only thing
/// that matters to the protocol; the value is a content hash but callers
/// must not rely on its derivation beyond that it is unique per
/// `(procedure, originator, time)` tuple.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RpcId(String);

impl RpcId {
    /// Compute an `rpcid` as the first 8 hex characters of
    /// `sha256(procedure || originator_sid || time_seconds_with_9_decimals)`.
    ///
    /// `time_seconds` is the originating instant expressed as seconds since
    /// the Unix epoch with 9 decimal digits of sub-second precision,
    /// matching the original implementation's `time.time()` formatting.
    ///
    /// # Examples
    ///
    /// ```
    /// use dtrpc_core::RpcId;
    ///
    /// let id = RpcId::compute("echo", "deadbeef", 1_700_000_000.123456789);
    /// assert_eq!(id.as_str().len(), 8);
    /// ```
    pub fn compute(procedure: &str, originator_sid: &str, time_seconds: f64) -> Self {
        let time_str = format!("{time_seconds:.9}");
        let mut hasher = Sha256::new();
        hasher.update(procedure.as_bytes());
        hasher.update(originator_sid.as_bytes());
        hasher.update(time_str.as_bytes());
        let digest = hasher.finalize();
        let hex = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
        RpcId(hex[..8].to_string())
    }

    /// Wrap an already-computed id (e.g. parsed off the wire) without
    /// recomputing the hash.
    pub fn new_unchecked(raw: impl Into<String>) -> Self {
        RpcId(raw.into())
    }

    /// The 8-hex-character string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_is_eight_hex_chars() {
        let id = RpcId::compute("echo", "originator", 1_700_000_000.0);
        assert_eq!(id.as_str().len(), 8);
        assert!(id.as_str().bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn compute_is_deterministic() {
        let a = RpcId::compute("echo", "orig", 42.5);
        let b = RpcId::compute("echo", "orig", 42.5);
        assert_eq!(a, b);
    }

    #[test]
    fn compute_differs_by_time() {
        let a = RpcId::compute("echo", "orig", 1.0);
        let b = RpcId::compute("echo", "orig", 2.0);
        assert_ne!(a, b);
    }

    #[test]
    fn compute_differs_by_procedure() {
        let a = RpcId::compute("echo", "orig", 1.0);
        let b = RpcId::compute("reverse", "orig", 1.0);
        assert_ne!(a, b);
    }

    #[test]
    fn compute_differs_by_originator() {
        let a = RpcId::compute("echo", "orig-a", 1.0);
        let b = RpcId::compute("echo", "orig-b", 1.0);
        assert_ne!(a, b);
    }
}
