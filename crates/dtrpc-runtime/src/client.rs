//! Client Engine (§4.4): drives one end-to-end call from a job file on
//! disk through discovery, dispatch and the result-wait loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dtrpc_capability::filter_candidates;
use dtrpc_core::{BundleType, JobDocument, RpcId, Sid};
use dtrpc_error::{DtrpcError, ErrorCode};
use dtrpc_protocol::{call_builder, RPC_SERVICE};
use dtrpc_selector::Selector;
use dtrpc_store::BundleStore;
use tracing::{info, warn};

use crate::archive::build_zip;
use crate::offer_catalog::OfferCatalog;

/// Number of discovery attempts made when the first step's server is `any`
/// (§4.4 step 3).
pub const DISCOVERY_ATTEMPTS: usize = 10;
/// Spacing between discovery attempts and result-wait polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Terminal outcome of [`call`].
#[derive(Debug)]
pub enum CallOutcome {
    /// A RESULT bundle arrived; `result_path` holds the written ZIP.
    Result { result_path: PathBuf },
    /// An ERROR bundle arrived; `error_path` holds the written ZIP.
    Error { error_path: PathBuf },
    /// The optional total-wait timeout elapsed before a terminal bundle
    /// arrived. The CALL bundle is left un-blanked.
    TimedOut,
}

/// Drive one call described by the job file at `job_file_path` to
/// completion (§4.4).
pub async fn call(
    store: Arc<dyn BundleStore>,
    selector: &mut Selector,
    catalog: &OfferCatalog,
    client_sid: &Sid,
    job_file_path: &Path,
    total_wait_timeout: Option<Duration>,
) -> Result<CallOutcome, DtrpcError> {
    let text = tokio::fs::read_to_string(job_file_path)
        .await
        .map_err(DtrpcError::from)?;
    let mut document = JobDocument::parse(&text)?;

    let first = document
        .first()
        .ok_or_else(|| DtrpcError::new(ErrorCode::ProtocolMalformedJobFile, "job document has no steps"))?
        .clone();

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    let rpcid = RpcId::compute(&first.procedure, client_sid.as_str(), now);

    let requirements = first.effective_filter(&document.header.global_filter);

    let chosen_sid = if first.server.is_any() {
        let sid = discover_server(catalog, selector, client_sid, &first, &requirements).await?;
        document.jobs[0].server = sid.clone();
        tokio::fs::write(job_file_path, document.to_text())
            .await
            .map_err(DtrpcError::from)?;
        sid
    } else {
        first.server.clone()
    };

    let job_dir = job_file_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let job_file_name = job_file_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "job.jb".to_string());

    let mut entries = vec![(job_file_name, tokio::fs::read(job_file_path).await.map_err(DtrpcError::from)?)];
    for arg in &first.arguments {
        let candidate = job_dir.join(arg);
        if candidate.is_file() {
            if let Ok(contents) = tokio::fs::read(&candidate).await {
                entries.push((arg.clone(), contents));
            }
        }
    }
    let zip_bytes = build_zip(&entries)?;

    let built = call_builder(rpcid.as_str(), client_sid, client_sid, &chosen_sid, &first.procedure)
        .payload(zip_bytes)
        .build();
    let outcome = store.insert(built.manifest, built.payload, client_sid).await?;
    let call_bundle_id = outcome.bundle().bundle_id.clone();

    info!(target: "dtrpc.runtime.client", %rpcid, server = %chosen_sid, "call dispatched");

    let wait = result_wait_loop(store.as_ref(), client_sid, rpcid.as_str(), &call_bundle_id, job_dir.as_path(), total_wait_timeout);
    wait.await
}

async fn discover_server(
    catalog: &OfferCatalog,
    selector: &mut Selector,
    client_sid: &Sid,
    first: &dtrpc_core::Job,
    requirements: &dtrpc_core::CapabilityRecord,
) -> Result<Sid, DtrpcError> {
    for attempt in 0..DISCOVERY_ATTEMPTS {
        let candidates = catalog.snapshot_candidates().await?;
        let eligible = filter_candidates(
            &candidates,
            &first.procedure,
            first.arity(),
            requirements,
            client_sid,
            client_sid,
            (0.0, 0.0),
        );
        let owned: Vec<_> = eligible.into_iter().cloned().collect();
        if let Some(chosen) = selector.select(&owned, (0.0, 0.0)) {
            return Ok(chosen.sid.clone());
        }
        if attempt + 1 < DISCOVERY_ATTEMPTS {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
    Err(DtrpcError::new(
        ErrorCode::CapabilityNotOffering,
        format!("no server found offering '{}' after {DISCOVERY_ATTEMPTS} attempts", first.procedure),
    ))
}

async fn result_wait_loop(
    store: &dyn BundleStore,
    client_sid: &Sid,
    rpcid: &str,
    call_bundle_id: &dtrpc_core::BundleId,
    job_dir: &Path,
    total_wait_timeout: Option<Duration>,
) -> Result<CallOutcome, DtrpcError> {
    let mut token = dtrpc_core::Token::genesis();
    let deadline = total_wait_timeout.map(|d| tokio::time::Instant::now() + d);

    loop {
        if let Some(deadline) = deadline {
            if tokio::time::Instant::now() >= deadline {
                return Ok(CallOutcome::TimedOut);
            }
        }

        let bundles = match store.newsince(token).await {
            Ok(bundles) => bundles,
            Err(err) if err.is_retryable() => {
                warn!(target: "dtrpc.runtime.client", %err, "transient error polling for results, retrying");
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }
            Err(err) => return Err(err),
        };

        if let Some(newest) = bundles.first() {
            token.advance_to(newest.token);
        }

        for bundle in &bundles {
            if bundle.get(dtrpc_core::KEY_SERVICE) != Some(RPC_SERVICE) {
                continue;
            }
            if bundle.get(dtrpc_core::KEY_RECIPIENT) != Some(client_sid.as_str()) {
                continue;
            }
            if bundle.rpcid() != Some(rpcid) {
                continue;
            }

            let full = match store.fetch(&bundle.bundle_id).await {
                Ok(full) => full,
                Err(err) => {
                    warn!(target: "dtrpc.runtime.client", %err, bundle_id = %bundle.bundle_id, "failed to fetch candidate result bundle, skipping");
                    continue;
                }
            };

            match full.bundle_type() {
                Some(BundleType::Ack) => {
                    info!(target: "dtrpc.runtime.client", %rpcid, "ack received");
                }
                Some(BundleType::Result) => {
                    let path = job_dir.join(format!("{rpcid}_result.zip"));
                    tokio::fs::write(&path, &full.payload).await.map_err(DtrpcError::from)?;
                    blank_call_bundle(store, call_bundle_id).await?;
                    return Ok(CallOutcome::Result { result_path: path });
                }
                Some(BundleType::Error) => {
                    let path = job_dir.join(format!("{rpcid}_error.zip"));
                    tokio::fs::write(&path, &full.payload).await.map_err(DtrpcError::from)?;
                    blank_call_bundle(store, call_bundle_id).await?;
                    return Ok(CallOutcome::Error { error_path: path });
                }
                _ => {}
            }
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn blank_call_bundle(store: &dyn BundleStore, call_bundle_id: &dtrpc_core::BundleId) -> Result<(), DtrpcError> {
    let mut patch = std::collections::BTreeMap::new();
    patch.insert(dtrpc_core::KEY_TYPE.to_string(), BundleType::Cleanup.code().to_string());
    store.update(call_bundle_id, patch, Vec::new()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtrpc_core::{ArgKind, Bundle, BundleId, Job, JobStatus, Procedure, Token};
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

        fn seed(&self, bundle: Bundle) {
            self.bundles.lock().unwrap().push(bundle);
        }
    }

    #[async_trait::async_trait]
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
    async fn call_to_explicit_server_waits_for_result() {
        let store: Arc<dyn BundleStore> = Arc::new(FakeStore::new());
        let client = sid(1);
        let server = sid(2);

        let dir = tempfile::tempdir().unwrap();
        let job_path = dir.path().join("job.jb");
        let doc = dtrpc_core::JobDocument::builder(client.clone())
            .job(Job::builder(server.clone(), "echo", 0).arg("hi").build())
            .build();
        tokio::fs::write(&job_path, doc.to_text()).await.unwrap();

        let catalog = OfferCatalog::new(store.clone(), server.clone(), vec![], Arc::new(|| dtrpc_core::CapabilityRecord::new()));
        let mut selector = Selector::with_default_seed(dtrpc_selector::SelectorPolicy::First);

        let store_for_responder = store.clone();
        let responder = tokio::spawn(async move {
            loop {
                let bundles = store_for_responder.list().await.unwrap();
                if let Some(call_bundle) = bundles.iter().find(|b| b.bundle_type() == Some(BundleType::Call)) {
                    let rpcid = call_bundle.rpcid().unwrap().to_string();
                    let built = dtrpc_protocol::result_builder(&rpcid, &client, &server, &client)
                        .payload(b"ok".to_vec())
                        .build();
                    store_for_responder.insert(built.manifest, built.payload, &server).await.unwrap();
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        });

        let result = call(store, &mut selector, &catalog, &client, &job_path, None).await.unwrap();
        responder.await.unwrap();

        match result {
            CallOutcome::Result { result_path } => {
                assert!(result_path.exists());
            }
            other => panic!("expected Result outcome, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn call_times_out_without_blanking() {
        let store: Arc<dyn BundleStore> = Arc::new(FakeStore::new());
        let client = sid(1);
        let server = sid(2);

        let dir = tempfile::tempdir().unwrap();
        let job_path = dir.path().join("job.jb");
        let doc = dtrpc_core::JobDocument::builder(client.clone())
            .job(Job::builder(server.clone(), "echo", 0).arg("hi").build())
            .build();
        tokio::fs::write(&job_path, doc.to_text()).await.unwrap();

        let catalog = OfferCatalog::new(store.clone(), server.clone(), vec![], Arc::new(|| dtrpc_core::CapabilityRecord::new()));
        let mut selector = Selector::with_default_seed(dtrpc_selector::SelectorPolicy::First);

        let result = call(store.clone(), &mut selector, &catalog, &client, &job_path, Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert!(matches!(result, CallOutcome::TimedOut));

        let bundles = store.list().await.unwrap();
        let call_bundle = bundles.iter().find(|b| b.bundle_type() == Some(BundleType::Call));
        assert!(call_bundle.is_some(), "call bundle must not be blanked on timeout");
    }

    #[test]
    fn procedure_arity_helper_unused_import_smoke() {
        let p = Procedure::new("echo", vec![ArgKind::Other("str".into())]);
        assert_eq!(p.arity(), 1);
        let _ = JobStatus::Open;
    }
}
