//! Offer Catalog (§4.2): publishes this node's offerings periodically and
//! snapshots every other node's current offerings from the store.

use dtrpc_core::{CandidateServer, CapabilityRecord, CapabilityValue, Procedure, Sid, ENERGY};
use dtrpc_error::DtrpcError;
use dtrpc_protocol::{is_offer, offer_author, offer_builder, OfferPayload};
use dtrpc_store::BundleStore;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;

/// How often the publish ticker republishes this node's offer (§4.2).
pub const PUBLISH_INTERVAL: Duration = Duration::from_secs(30);

/// Samples live capability values (cpu_load, memory, disk_space, energy,
/// gps_coord) immediately before each publication (§4.2 "Capability
/// liveness").
pub trait CapabilitySampler: Send + Sync {
    /// Produce a fresh capability record.
    fn sample(&self) -> CapabilityRecord;
}

impl<F> CapabilitySampler for F
where
    F: Fn() -> CapabilityRecord + Send + Sync,
{
    fn sample(&self) -> CapabilityRecord {
        self()
    }
}

struct State {
    capabilities: CapabilityRecord,
    published_bundle_id: Option<dtrpc_core::BundleId>,
}

/// This node's view of what it offers and what every other node offers.
pub struct OfferCatalog {
    store: Arc<dyn BundleStore>,
    local_sid: Sid,
    procedures: Vec<Procedure>,
    sampler: Arc<dyn CapabilitySampler>,
    state: Mutex<State>,
}

impl OfferCatalog {
    /// Construct a catalog for a node offering `procedures`, whose live
    /// capability values are produced by `sampler`.
    pub fn new(
        store: Arc<dyn BundleStore>,
        local_sid: Sid,
        procedures: Vec<Procedure>,
        sampler: Arc<dyn CapabilitySampler>,
    ) -> Self {
        Self {
            store,
            local_sid,
            procedures,
            sampler,
            state: Mutex::new(State {
                capabilities: CapabilityRecord::new(),
                published_bundle_id: None,
            }),
        }
    }

    /// This node's own SID.
    pub fn local_sid(&self) -> &Sid {
        &self.local_sid
    }

    /// The procedures this node offers.
    pub fn procedures(&self) -> &[Procedure] {
        &self.procedures
    }

    /// Current published capability snapshot.
    pub fn capabilities(&self) -> CapabilityRecord {
        self.state.lock().expect("offer catalog lock poisoned").capabilities.clone()
    }

    /// Decrement `energy` by `amount` after a successful execution (§4.2,
    /// "Dynamic updates to `energy`"). Has no effect if `energy` is not
    /// currently published.
    pub fn decrement_energy(&self, amount: f64) {
        let mut state = self.state.lock().expect("offer catalog lock poisoned");
        if let Some(CapabilityValue::Number(current)) = state.capabilities.get(ENERGY).cloned() {
            state
                .capabilities
                .insert(ENERGY.to_string(), CapabilityValue::Number((current - amount).max(0.0)));
        }
    }

    /// Resample live capability values and publish (insert or update) this
    /// node's `RPCOFFER` bundle.
    ///
    /// The sampler is the source of truth for `cpu_load`/`memory`/
    /// `disk_space`/`gps_coord`, but `energy` is carried over from this
    /// catalog's own in-memory state rather than overwritten by the sample:
    /// [`decrement_energy`] must not be undone by the next publish tick.
    pub async fn publish(&self) -> Result<(), DtrpcError> {
        let mut sampled = self.sampler.sample();

        let existing = {
            let mut state = self.state.lock().expect("offer catalog lock poisoned");
            if let Some(current_energy) = state.capabilities.get(ENERGY).cloned() {
                sampled.insert(ENERGY.to_string(), current_energy);
            }
            state.capabilities = sampled.clone();
            state.published_bundle_id.clone()
        };

        let payload_text = OfferPayload::new(self.procedures.clone(), sampled).encode();

        match existing {
            Some(bundle_id) => {
                self.store
                    .update(&bundle_id, Default::default(), payload_text.into_bytes())
                    .await?;
            }
            None => {
                let built = offer_builder(&self.local_sid, payload_text).build();
                let outcome = self
                    .store
                    .insert(built.manifest, built.payload, &self.local_sid)
                    .await?;
                let mut state = self.state.lock().expect("offer catalog lock poisoned");
                state.published_bundle_id = Some(outcome.bundle().bundle_id.clone());
            }
        }
        Ok(())
    }

    /// Snapshot every other node's current offer from the store (§4.2,
    /// "Snapshot remote offerings").
    pub async fn snapshot_candidates(&self) -> Result<Vec<CandidateServer>, DtrpcError> {
        let bundles = self.store.list().await?;
        let mut candidates = Vec::new();

        for bundle in &bundles {
            if !is_offer(bundle) {
                continue;
            }
            let Some(author) = offer_author(bundle) else {
                continue;
            };
            if author == self.local_sid {
                continue;
            }

            let full = match self.store.fetch(&bundle.bundle_id).await {
                Ok(full) => full,
                Err(err) => {
                    warn!(target: "dtrpc.runtime.offer_catalog", %err, bundle_id = %bundle.bundle_id, "failed to fetch offer bundle, skipping");
                    continue;
                }
            };

            let text = String::from_utf8_lossy(&full.payload);
            match OfferPayload::decode(&text) {
                Ok(offer) => candidates.push(CandidateServer::new(author, offer.procedures, offer.capabilities)),
                Err(err) => {
                    debug!(target: "dtrpc.runtime.offer_catalog", %err, "malformed offer payload, skipping");
                }
            }
        }

        Ok(candidates)
    }

    /// Run the publish ticker: first publication immediate, then every
    /// [`PUBLISH_INTERVAL`], until `cancel` fires.
    pub async fn run_publish_ticker(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            if let Err(err) = self.publish().await {
                warn!(target: "dtrpc.runtime.offer_catalog", %err, "offer publication failed");
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(PUBLISH_INTERVAL) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dtrpc_core::{ArgKind, Bundle, BundleId, Token};
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

        async fn newsince(&self, _token: Token) -> Result<Vec<Bundle>, DtrpcError> {
            Ok(Vec::new())
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
            let id = BundleId::new(format!("bid{next_id}"));
            *next_id += 1;
            let bundle = Bundle {
                bundle_id: id,
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

    #[tokio::test]
    async fn publish_then_republish_updates_in_place() {
        let store: Arc<dyn BundleStore> = Arc::new(FakeStore::new());
        let catalog = OfferCatalog::new(
            store.clone(),
            sid(1),
            vec![Procedure::new("echo", vec![ArgKind::Other("str".into())])],
            Arc::new(|| CapabilityRecord::new()),
        );

        catalog.publish().await.unwrap();
        catalog.publish().await.unwrap();

        let bundles = store.list().await.unwrap();
        assert_eq!(bundles.len(), 1, "second publish should update, not insert");
    }

    #[tokio::test]
    async fn snapshot_candidates_ignores_own_offer() {
        let store: Arc<dyn BundleStore> = Arc::new(FakeStore::new());
        let catalog = OfferCatalog::new(
            store.clone(),
            sid(1),
            vec![Procedure::new("echo", vec![])],
            Arc::new(|| CapabilityRecord::new()),
        );
        catalog.publish().await.unwrap();

        let candidates = catalog.snapshot_candidates().await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn snapshot_candidates_decodes_remote_offers() {
        let store: Arc<dyn BundleStore> = Arc::new(FakeStore::new());
        let other = sid(2);
        let payload = OfferPayload::new(
            vec![Procedure::new("echo", vec![ArgKind::Other("str".into())])],
            CapabilityRecord::new(),
        )
        .encode();
        let built = offer_builder(&other, payload).build();
        store.insert(built.manifest, built.payload, &other).await.unwrap();

        let catalog = OfferCatalog::new(store, sid(1), vec![], Arc::new(|| CapabilityRecord::new()));
        let candidates = catalog.snapshot_candidates().await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].sid, other);
        assert!(candidates[0].offers("echo"));
    }

    #[test]
    fn decrement_energy_floors_at_zero() {
        let store: Arc<dyn BundleStore> = Arc::new(FakeStore::new());
        let catalog = OfferCatalog::new(store, sid(1), vec![], Arc::new(|| CapabilityRecord::new()));
        {
            let mut state = catalog.state.lock().unwrap();
            state.capabilities.insert(ENERGY.to_string(), CapabilityValue::Number(2.0));
        }
        catalog.decrement_energy(5.0);
        assert_eq!(
            catalog.capabilities().get(ENERGY).and_then(|v| v.as_number()),
            Some(0.0)
        );
    }

    #[tokio::test]
    async fn republish_does_not_undo_energy_decrement() {
        let store: Arc<dyn BundleStore> = Arc::new(FakeStore::new());
        let sampler: Arc<dyn CapabilitySampler> = Arc::new(|| {
            let mut caps = CapabilityRecord::new();
            caps.insert(ENERGY.to_string(), CapabilityValue::Number(10.0));
            caps
        });
        let catalog = OfferCatalog::new(store, sid(1), vec![], sampler);

        catalog.publish().await.unwrap();
        assert_eq!(
            catalog.capabilities().get(ENERGY).and_then(|v| v.as_number()),
            Some(10.0)
        );

        catalog.decrement_energy(4.0);
        catalog.publish().await.unwrap();
        assert_eq!(
            catalog.capabilities().get(ENERGY).and_then(|v| v.as_number()),
            Some(6.0),
            "a republish tick must not overwrite the decremented energy value with a fresh sample"
        );
    }
}
