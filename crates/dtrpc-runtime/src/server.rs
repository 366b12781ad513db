//! Server Engine (§4.5): the receive loop that turns inbound bundles into
//! Step Handler dispatches, CLEANUP invocations and offer publication.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dtrpc_core::{BundleType, Token, KEY_RECIPIENT, KEY_SERVICE};
use dtrpc_error::DtrpcError;
use dtrpc_host::RpcsManifest;
use dtrpc_protocol::RPC_SERVICE;
use dtrpc_selector::Selector;
use dtrpc_store::BundleStore;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::cleanup::CleanupTracker;
use crate::offer_catalog::OfferCatalog;
use crate::step_handler::{handle_call, StepHandlerDeps};

/// Whether inbound CALLs are dispatched to a parallel handler pool or
/// processed one at a time (§4.5, the `queue` flag).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchMode {
    /// Spawn a fresh task per CALL; handlers run concurrently.
    Parallel,
    /// Run each handler to completion before starting the next.
    Sequential,
}

/// Static configuration for one running server node.
pub struct ServerConfig {
    pub rpcs: RpcsManifest,
    pub bins_dir: PathBuf,
    pub work_dir: PathBuf,
    pub step_timeout: Option<Duration>,
    pub dispatch_mode: DispatchMode,
}

/// Spacing between empty `newsince` polls (§4.5 step 1).
pub const POLL_IDLE_INTERVAL: Duration = Duration::from_secs(1);

/// Run the server engine until `cancel` fires: starts the publish ticker
/// and drives the receive loop, both cooperatively cancellable.
pub async fn run(
    store: Arc<dyn BundleStore>,
    catalog: Arc<OfferCatalog>,
    selector: Arc<Mutex<Selector>>,
    config: ServerConfig,
    cancel: CancellationToken,
) -> Result<(), DtrpcError> {
    let cleanup = Arc::new(CleanupTracker::new());
    let local_sid = catalog.local_sid().clone();

    let ticker_catalog = catalog.clone();
    let ticker_cancel = cancel.clone();
    let ticker_handle = tokio::spawn(async move {
        ticker_catalog.run_publish_ticker(ticker_cancel).await;
    });

    let deps = Arc::new(StepHandlerDeps {
        store: store.clone(),
        catalog,
        cleanup: cleanup.clone(),
        selector,
        rpcs: config.rpcs,
        bins_dir: config.bins_dir,
        work_dir: config.work_dir,
        local_sid: local_sid.clone(),
        step_timeout: config.step_timeout,
    });

    let mut token = Token::genesis();
    let mut in_flight = Vec::new();

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let bundles = tokio::select! {
            _ = cancel.cancelled() => break,
            result = store.newsince(token) => result,
        };

        let bundles = match bundles {
            Ok(bundles) => bundles,
            Err(err) if err.is_retryable() => {
                warn!(target: "dtrpc.runtime.server", %err, "transient store error in receive loop");
                tokio::time::sleep(POLL_IDLE_INTERVAL).await;
                continue;
            }
            Err(err) => return Err(err),
        };

        if bundles.is_empty() {
            tokio::time::sleep(POLL_IDLE_INTERVAL).await;
            continue;
        }

        if let Some(newest) = bundles.first() {
            token.advance_to(newest.token);
        }

        for bundle in bundles {
            if bundle.get(KEY_SERVICE) != Some(RPC_SERVICE) {
                continue;
            }
            if bundle.get(KEY_RECIPIENT) != Some(local_sid.as_str()) {
                continue;
            }

            let full = match store.fetch(&bundle.bundle_id).await {
                Ok(full) => full,
                Err(err) => {
                    warn!(target: "dtrpc.runtime.server", %err, bundle_id = %bundle.bundle_id, "failed to fetch bundle, skipping");
                    continue;
                }
            };

            match full.bundle_type() {
                Some(BundleType::Ack) => {
                    debug!(target: "dtrpc.runtime.server", bundle_id = %full.bundle_id, "observed ack");
                }
                Some(BundleType::Call) => {
                    let deps = deps.clone();
                    match config.dispatch_mode {
                        DispatchMode::Parallel => {
                            let handle = tokio::spawn(async move {
                                if let Err(err) = handle_call(full, &deps).await {
                                    warn!(target: "dtrpc.runtime.server", %err, "step handler failed");
                                }
                            });
                            in_flight.retain(|h: &tokio::task::JoinHandle<()>| !h.is_finished());
                            in_flight.push(handle);
                        }
                        DispatchMode::Sequential => {
                            if let Err(err) = handle_call(full, &deps).await {
                                warn!(target: "dtrpc.runtime.server", %err, "step handler failed");
                            }
                        }
                    }
                }
                Some(BundleType::Cleanup) => {
                    if let Err(err) = cleanup.handle_cleanup(store.as_ref(), &full.bundle_id).await {
                        warn!(target: "dtrpc.runtime.server", %err, bundle_id = %full.bundle_id, "cleanup failed");
                    }
                }
                Some(BundleType::Result) => {
                    debug!(target: "dtrpc.runtime.server", bundle_id = %full.bundle_id, "observed transiting result, ignoring");
                }
                _ => {
                    debug!(target: "dtrpc.runtime.server", bundle_id = %full.bundle_id, "unrecognized bundle type, skipping");
                }
            }
        }
    }

    info!(target: "dtrpc.runtime.server", "shutting down, draining in-flight step handlers");
    for handle in in_flight {
        let _ = handle.await;
    }
    ticker_handle.abort();
    Ok(())
}

/// Run `run` until cancelled by SIGINT.
pub async fn run_until_sigint(
    store: Arc<dyn BundleStore>,
    catalog: Arc<OfferCatalog>,
    selector: Arc<Mutex<Selector>>,
    config: ServerConfig,
) -> Result<(), DtrpcError> {
    let cancel = CancellationToken::new();
    let sigint_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(target: "dtrpc.runtime.server", "received SIGINT, shutting down");
            sigint_cancel.cancel();
        }
    });
    run(store, catalog, selector, config, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dtrpc_core::{Bundle, BundleId, CapabilityRecord, Sid};
    use dtrpc_protocol::call_builder;
    use dtrpc_selector::SelectorPolicy;
    use dtrpc_store::InsertOutcome;
    use std::collections::BTreeMap;
    use std::sync::Mutex as StdMutex;

    struct FakeStore {
        bundles: StdMutex<Vec<Bundle>>,
        next_id: StdMutex<u64>,
    }

    impl FakeStore {
        fn new() -> Self {
            Self {
                bundles: StdMutex::new(Vec::new()),
                next_id: StdMutex::new(0),
            }
        }
    }

    #[async_trait]
    impl BundleStore for FakeStore {
        async fn identity(&self) -> Result<Sid, DtrpcError> {
            Ok(Sid::new_unchecked("0".repeat(64)))
        }

        async fn list(&self) -> Result<Vec<Bundle>, DtrpcError> {
            Ok(self.bundles.lock().unwrap().clone())
        }

        async fn newsince(&self, token: Token) -> Result<Vec<Bundle>, DtrpcError> {
            let mut matching: Vec<Bundle> = self
                .bundles
                .lock()
                .unwrap()
                .iter()
                .filter(|b| b.token > token)
                .cloned()
                .collect();
            matching.sort_by(|a, b| b.token.cmp(&a.token));
            Ok(matching)
        }

        async fn fetch(&self, id: &BundleId) -> Result<Bundle, DtrpcError> {
            self.bundles
                .lock()
                .unwrap()
                .iter()
                .find(|b| &b.bundle_id == id)
                .cloned()
                .ok_or_else(|| DtrpcError::new(dtrpc_error::ErrorCode::Internal, "not found"))
        }

        async fn insert(
            &self,
            manifest: BTreeMap<String, String>,
            payload: Vec<u8>,
            _author: &Sid,
        ) -> Result<InsertOutcome, DtrpcError> {
            let mut next_id = self.next_id.lock().unwrap();
            *next_id += 1;
            let bundle = Bundle {
                bundle_id: BundleId::new(format!("bid{next_id}")),
                token: Token(*next_id),
                manifest,
                payload,
            };
            self.bundles.lock().unwrap().push(bundle.clone());
            Ok(InsertOutcome::Inserted(bundle))
        }

        async fn update(
            &self,
            id: &BundleId,
            manifest_patch: BTreeMap<String, String>,
            payload: Vec<u8>,
        ) -> Result<Bundle, DtrpcError> {
            let mut bundles = self.bundles.lock().unwrap();
            let bundle = bundles
                .iter_mut()
                .find(|b| &b.bundle_id == id)
                .ok_or_else(|| DtrpcError::new(dtrpc_error::ErrorCode::Internal, "not found"))?;
            bundle.manifest.extend(manifest_patch);
            bundle.payload = payload;
            Ok(bundle.clone())
        }
    }

    fn sid(n: u8) -> Sid {
        Sid::new_unchecked(format!("{n:0>64}"))
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_token_stops_the_receive_loop() {
        let store: Arc<dyn BundleStore> = Arc::new(FakeStore::new());
        let server_sid = sid(2);
        let catalog = Arc::new(OfferCatalog::new(store.clone(), server_sid.clone(), vec![], Arc::new(|| CapabilityRecord::new())));
        let selector = Arc::new(Mutex::new(Selector::with_default_seed(SelectorPolicy::First)));
        let tmp = tempfile::tempdir().unwrap();

        let config = ServerConfig {
            rpcs: RpcsManifest::parse("").unwrap(),
            bins_dir: tmp.path().join("bins"),
            work_dir: tmp.path().join("work"),
            step_timeout: Some(Duration::from_secs(1)),
            dispatch_mode: DispatchMode::Parallel,
        };

        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();
        let handle = tokio::spawn(run(store, catalog, selector, config, run_cancel));

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(result.is_ok(), "server loop did not stop after cancellation");
    }

    #[tokio::test(start_paused = true)]
    async fn unrelated_bundles_are_skipped() {
        let store: Arc<dyn BundleStore> = Arc::new(FakeStore::new());
        let server_sid = sid(2);
        let client_sid = sid(1);
        let other_sid = sid(3);

        let built = call_builder("deadbeef", &client_sid, &client_sid, &other_sid, "echo").build();
        store.insert(built.manifest, built.payload, &client_sid).await.unwrap();

        let catalog = Arc::new(OfferCatalog::new(store.clone(), server_sid.clone(), vec![], Arc::new(|| CapabilityRecord::new())));
        let selector = Arc::new(Mutex::new(Selector::with_default_seed(SelectorPolicy::First)));
        let tmp = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            rpcs: RpcsManifest::parse("").unwrap(),
            bins_dir: tmp.path().join("bins"),
            work_dir: tmp.path().join("work"),
            step_timeout: Some(Duration::from_secs(1)),
            dispatch_mode: DispatchMode::Sequential,
        };

        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();
        let handle = tokio::spawn(run(store.clone(), catalog, selector, config, run_cancel));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;

        let bundles = store.list().await.unwrap();
        assert!(!bundles.iter().any(|b| b.bundle_type() == Some(BundleType::Ack)));
    }
}
