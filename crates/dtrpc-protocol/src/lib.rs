//! Wire formats layered on `dtrpc-core`'s contract types: the offer
//! payload text format, manifest tagging conventions for each bundle kind,
//! and the bundle-list JSON envelope returned by the store.

mod manifest;
mod offer;
mod wire;

pub use manifest::{
    ack_builder, call_builder, cleanup_builder, error_builder, is_offer, offer_author,
    offer_builder, result_builder, KEY_NAME, RPCOFFER_SERVICE, RPC_SERVICE,
};
pub use offer::OfferPayload;
pub use wire::{row_str, BundleListResponse, Row};
