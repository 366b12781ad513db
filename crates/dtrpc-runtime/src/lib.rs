//! Engine runtime: the Offer Catalog (§4.2), Client Engine (§4.4), Server
//! Engine (§4.5), Step Handler (§4.6) and Cleanup Tracker (§4.7) that turn
//! the store/protocol/capability/host crates into a running DTN RPC node.

mod archive;
mod cancel;
mod cleanup;
mod client;
mod offer_catalog;
mod server;
mod step_handler;

pub use archive::{build_zip, extract_zip, find_job_file};
pub use cancel::CancellationToken;
pub use cleanup::CleanupTracker;
pub use client::{call, CallOutcome, DISCOVERY_ATTEMPTS, POLL_INTERVAL};
pub use offer_catalog::{CapabilitySampler, OfferCatalog, PUBLISH_INTERVAL};
pub use server::{run, run_until_sigint, DispatchMode, ServerConfig, POLL_IDLE_INTERVAL};
pub use step_handler::{handle_call, StepHandlerDeps};
