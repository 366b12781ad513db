//! Manifest conventions: how each bundle kind is tagged on the wire.
//!
//! CALL/ACK/RESULT/ERROR/CLEANUP carry a numeric `type` manifest entry
//! (§6.5). `RPCOFFER` bundles carry no `type` entry at all; they are
//! recognized by their `service` field holding the [`RPCOFFER_SERVICE`]
//! sentinel and their `name` field holding the publishing node's SID.

use dtrpc_core::{
    Bundle, BundleBuilder, BundleType, Sid, KEY_ORIGINATOR, KEY_RECIPIENT, KEY_REASON,
    KEY_RPCID, KEY_SENDER, KEY_SERVICE, KEY_TYPE,
};

/// `service` value every CALL/ACK/RESULT/ERROR/CLEANUP bundle carries.
pub const RPC_SERVICE: &str = "RPC";
/// Sentinel `service` value marking an offer bundle.
pub const RPCOFFER_SERVICE: &str = "RPCOFFER";
/// Manifest key carrying a bundle's `name` field; for `RPCOFFER` bundles
/// this holds the publishing node's SID, for a CALL bundle the procedure
/// name.
pub const KEY_NAME: &str = "name";

/// `true` if `bundle` is an offer bundle per the `service == RPCOFFER`
/// convention, rather than the numeric `type` convention used by the other
/// five kinds.
pub fn is_offer(bundle: &Bundle) -> bool {
    bundle.get(KEY_SERVICE) == Some(RPCOFFER_SERVICE)
}

/// The SID that published an offer bundle, read from its `name` field.
pub fn offer_author(bundle: &Bundle) -> Option<Sid> {
    if !is_offer(bundle) {
        return None;
    }
    Sid::parse(bundle.get(KEY_NAME)?).ok()
}

/// Start building an `RPCOFFER` bundle authored by `author`.
#[must_use]
pub fn offer_builder(author: &Sid, payload_text: String) -> BundleBuilder {
    Bundle::builder(dtrpc_core::BundleType::Offer)
        .manifest(KEY_SERVICE, RPCOFFER_SERVICE)
        .manifest(KEY_NAME, author.to_string())
        .payload(payload_text.into_bytes())
}

/// Start building a CALL bundle for one step of a cascade.
#[must_use]
pub fn call_builder(
    rpcid: &str,
    originator: &Sid,
    sender: &Sid,
    recipient: &Sid,
    procedure: &str,
) -> BundleBuilder {
    typed_builder(BundleType::Call, rpcid, originator, sender, recipient)
        .manifest(KEY_NAME, procedure)
}

/// Start building an ACK bundle answering `rpcid`.
#[must_use]
pub fn ack_builder(rpcid: &str, originator: &Sid, sender: &Sid, recipient: &Sid) -> BundleBuilder {
    typed_builder(BundleType::Ack, rpcid, originator, sender, recipient)
}

/// Start building a RESULT bundle answering `rpcid`.
#[must_use]
pub fn result_builder(
    rpcid: &str,
    originator: &Sid,
    sender: &Sid,
    recipient: &Sid,
) -> BundleBuilder {
    typed_builder(BundleType::Result, rpcid, originator, sender, recipient)
}

/// Start building an ERROR bundle answering `rpcid`, carrying `reason`.
#[must_use]
pub fn error_builder(
    rpcid: &str,
    originator: &Sid,
    sender: &Sid,
    recipient: &Sid,
    reason: &str,
) -> BundleBuilder {
    typed_builder(BundleType::Error, rpcid, originator, sender, recipient)
        .manifest(KEY_REASON, reason)
}

/// Start building a CLEANUP bundle that blanks a prior outbound bundle.
#[must_use]
pub fn cleanup_builder(rpcid: &str, originator: &Sid, sender: &Sid, recipient: &Sid) -> BundleBuilder {
    typed_builder(BundleType::Cleanup, rpcid, originator, sender, recipient)
}

fn typed_builder(
    bundle_type: BundleType,
    rpcid: &str,
    originator: &Sid,
    sender: &Sid,
    recipient: &Sid,
) -> BundleBuilder {
    Bundle::builder(bundle_type)
        .manifest(KEY_SERVICE, RPC_SERVICE)
        .manifest(KEY_TYPE, bundle_type.code().to_string())
        .manifest(KEY_RPCID, rpcid)
        .manifest(KEY_ORIGINATOR, originator.to_string())
        .manifest(KEY_SENDER, sender.to_string())
        .manifest(KEY_RECIPIENT, recipient.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(n: u8) -> Sid {
        Sid::new_unchecked(format!("{n:0>64}"))
    }

    #[test]
    fn offer_builder_roundtrips_author() {
        let author = sid(1);
        let bundle = offer_builder(&author, "procedures: 0\ncapabilities: 0\n".into()).build();
        assert!(is_offer(&bundle));
        assert_eq!(offer_author(&bundle), Some(author));
    }

    #[test]
    fn call_builder_sets_numeric_type_and_service() {
        let originator = sid(1);
        let sender = sid(1);
        let recipient = sid(2);
        let bundle = call_builder("deadbeef", &originator, &sender, &recipient, "echo").build();
        assert_eq!(bundle.get(KEY_TYPE), Some("0"));
        assert_eq!(bundle.get(KEY_SERVICE), Some(RPC_SERVICE));
        assert_eq!(bundle.get(KEY_NAME), Some("echo"));
        assert!(!is_offer(&bundle));
    }

    #[test]
    fn every_typed_bundle_carries_rpc_service() {
        let originator = sid(1);
        let ack = ack_builder("deadbeef", &originator, &originator, &originator).build();
        let result = result_builder("deadbeef", &originator, &originator, &originator).build();
        let error = error_builder("deadbeef", &originator, &originator, &originator, "boom").build();
        let cleanup = cleanup_builder("deadbeef", &originator, &originator, &originator).build();
        for bundle in [&ack, &result, &error, &cleanup] {
            assert_eq!(bundle.get(KEY_SERVICE), Some(RPC_SERVICE));
        }
    }

    #[test]
    fn error_builder_carries_reason() {
        let originator = sid(1);
        let bundle = error_builder("deadbeef", &originator, &originator, &originator, "boom").build();
        assert_eq!(bundle.reason(), Some("boom"));
    }

    #[test]
    fn non_offer_bundle_has_no_author() {
        let originator = sid(1);
        let bundle = ack_builder("deadbeef", &originator, &originator, &originator).build();
        assert_eq!(offer_author(&bundle), None);
    }
}
