//! Cleanup Tracker (§4.7): maps an inbound CALL bundle-id to every outbound
//! bundle-id this node authored while handling it, so a CLEANUP for the
//! inbound CALL can blank them all.

use std::collections::HashMap;
use std::sync::Mutex;

use dtrpc_core::{BundleId, BundleType, KEY_TYPE};
use dtrpc_error::DtrpcError;
use dtrpc_store::BundleStore;
use tracing::debug;

/// Process-local inbound-CALL → outbound-bundle-ids map.
pub struct CleanupTracker {
    chains: Mutex<HashMap<BundleId, Vec<BundleId>>>,
}

impl CleanupTracker {
    /// Construct an empty tracker.
    pub fn new() -> Self {
        Self {
            chains: Mutex::new(HashMap::new()),
        }
    }

    /// Register `outbound` as authored while handling `inbound_call`.
    pub fn register(&self, inbound_call: BundleId, outbound: BundleId) {
        self.chains
            .lock()
            .expect("cleanup tracker lock poisoned")
            .entry(inbound_call)
            .or_default()
            .push(outbound);
    }

    /// Handle a CLEANUP observed for `inbound_call`: blank every outbound
    /// bundle registered under it, then forget the chain. Missing entries
    /// are silently ignored (the CLEANUP may be concurrent with another
    /// node's, or a replay).
    pub async fn handle_cleanup(
        &self,
        store: &dyn BundleStore,
        inbound_call: &BundleId,
    ) -> Result<(), DtrpcError> {
        let outbound = {
            let mut chains = self.chains.lock().expect("cleanup tracker lock poisoned");
            chains.remove(inbound_call)
        };
        let Some(outbound) = outbound else {
            debug!(target: "dtrpc.runtime.cleanup", bundle_id = %inbound_call, "no tracked chain for cleanup, ignoring");
            return Ok(());
        };

        for bundle_id in outbound {
            let mut patch = std::collections::BTreeMap::new();
            patch.insert(KEY_TYPE.to_string(), BundleType::Cleanup.code().to_string());
            store.update(&bundle_id, patch, Vec::new()).await?;
        }
        Ok(())
    }
}

impl Default for CleanupTracker {
    fn default() -> Self {
        Self::new()
    }
}
