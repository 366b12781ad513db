//! Step Handler (§4.6): executes one inbound CALL bundle end to end.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dtrpc_capability::matches as capability_matches;
use dtrpc_core::{
    Bundle, BundleId, CandidateServer, JobDocument, JobStatus, Sid, KEY_ORIGINATOR, KEY_SENDER, ENERGY,
};
use dtrpc_error::DtrpcError;
use dtrpc_host::{resolve_offering, run_step, ProcessConfig, RpcsManifest};
use dtrpc_protocol::{ack_builder, call_builder, error_builder, result_builder};
use dtrpc_selector::Selector;
use dtrpc_store::BundleStore;
use tracing::{info, warn};

use crate::archive::{build_zip, extract_zip, find_job_file};
use crate::cleanup::CleanupTracker;
use crate::offer_catalog::OfferCatalog;

/// Everything the step handler needs, shared across concurrently-running
/// calls on the same node.
pub struct StepHandlerDeps {
    pub store: Arc<dyn BundleStore>,
    pub catalog: Arc<OfferCatalog>,
    pub cleanup: Arc<CleanupTracker>,
    pub selector: Arc<Mutex<Selector>>,
    pub rpcs: RpcsManifest,
    pub bins_dir: PathBuf,
    pub work_dir: PathBuf,
    pub local_sid: Sid,
    pub step_timeout: Option<Duration>,
}

/// Handle one inbound CALL `bundle` (§4.6, steps 1-11).
pub async fn handle_call(bundle: Bundle, deps: &StepHandlerDeps) -> Result<(), DtrpcError> {
    let Some(rpcid) = bundle.rpcid().map(str::to_string) else {
        warn!(target: "dtrpc.runtime.step_handler", "dropping CALL with no rpcid");
        return Ok(());
    };
    let Some(originator) = bundle.get(KEY_ORIGINATOR).and_then(|s| Sid::parse(s).ok()) else {
        warn!(target: "dtrpc.runtime.step_handler", %rpcid, "dropping CALL with no valid originator");
        return Ok(());
    };
    let Some(prior_sender) = bundle.get(KEY_SENDER).and_then(|s| Sid::parse(s).ok()) else {
        warn!(target: "dtrpc.runtime.step_handler", %rpcid, "dropping CALL with no valid sender");
        return Ok(());
    };

    // Step 1: per-call working paths.
    let ts = millis_timestamp();
    let base_name = format!("{rpcid}_{ts}");
    let step_zip_path = deps.work_dir.join(format!("{base_name}_step.zip"));
    let extract_dir = deps.work_dir.join(&base_name);

    // Step 2: save payload, validate it is a zip.
    tokio::fs::create_dir_all(&deps.work_dir).await.map_err(DtrpcError::from)?;
    tokio::fs::write(&step_zip_path, &bundle.payload).await.map_err(DtrpcError::from)?;
    tokio::fs::create_dir_all(&extract_dir).await.map_err(DtrpcError::from)?;
    if let Err(err) = extract_zip(&bundle.payload, &extract_dir) {
        return emit_error(deps, &rpcid, &originator, &prior_sender, err.code.bundle_reason().unwrap_or("call payload rejected")).await;
    }

    // Step 3: locate and parse the job file.
    let job_file = match find_job_file(&extract_dir) {
        Ok(path) => path,
        Err(err) => {
            return emit_error(deps, &rpcid, &originator, &prior_sender, err.code.bundle_reason().unwrap_or("job file missing")).await;
        }
    };
    let job_text = tokio::fs::read_to_string(&job_file).await.map_err(DtrpcError::from)?;
    let mut document = match JobDocument::parse(&job_text) {
        Ok(document) => document,
        Err(err) => {
            return emit_error(deps, &rpcid, &originator, &prior_sender, err.code.bundle_reason().unwrap_or("job file malformed")).await;
        }
    };

    // Step 4: locate my step.
    let Some((my_job, _next)) = document.find_open_step(&deps.local_sid) else {
        return emit_error(deps, &rpcid, &originator, &prior_sender, "No open step addressed to this server.").await;
    };
    let my_line = my_job.line;
    let procedure = my_job.procedure.clone();
    let arity = my_job.arity();
    let arguments = my_job.arguments.clone();
    let requirements = my_job.effective_filter(&document.header.global_filter);

    // Step 5: offering check.
    let Some((_procedure_decl, executable)) = resolve_offering(&deps.rpcs, &deps.bins_dir, &procedure, arity) else {
        return emit_error(deps, &rpcid, &originator, &prior_sender, "Server is not offering this procedure.").await;
    };

    // Step 6: capability check.
    let self_candidate = CandidateServer::new(deps.local_sid.clone(), deps.catalog.procedures().to_vec(), deps.catalog.capabilities());
    let self_origin = self_candidate
        .capabilities
        .get(dtrpc_core::GPS_COORD)
        .and_then(|v| v.as_gps_coord())
        .unwrap_or((0.0, 0.0));
    if !capability_matches(&self_candidate, &procedure, arity, &requirements, &deps.local_sid, &originator, self_origin) {
        return emit_error(deps, &rpcid, &originator, &prior_sender, "Server is not capable.").await;
    }

    // Step 7: emit ACK. Duplicate insertion is non-fatal.
    let ack_built = ack_builder(&rpcid, &originator, &deps.local_sid, &prior_sender).build();
    let ack_outcome = deps.store.insert(ack_built.manifest, ack_built.payload, &deps.local_sid).await?;
    deps.cleanup.register(bundle.bundle_id.clone(), ack_outcome.bundle().bundle_id.clone());

    // Step 8: execute.
    let resolved_args = resolve_file_args(&arguments, &extract_dir);
    let mut process_config = ProcessConfig::new(extract_dir.clone());
    if let Some(timeout) = deps.step_timeout {
        process_config = process_config.with_timeout(timeout);
    }
    let outcome = run_step(&executable, &resolved_args, &process_config).await?;
    info!(target: "dtrpc.runtime.step_handler", %rpcid, procedure = %procedure, succeeded = outcome.status.succeeded(), "step executed");

    // Step 9: update capabilities on resource consumption. The next publish
    // ticker cycle picks up the new value (§4.2); no forced republish here
    // avoids a burst of OFFER updates mid-cascade.
    if let Some(consumed) = requirements.get(ENERGY).and_then(|v| v.as_number()) {
        deps.catalog.decrement_energy(consumed);
    }

    // Step 10: write back job status and substitute placeholders.
    let strip_prefix = format!("{}/", extract_dir.display());
    let status = if outcome.status.succeeded() { JobStatus::Done } else { JobStatus::Error };
    document.jobs[my_line].status = status;
    document.substitute_placeholder(my_line, outcome.result_string(), Some(&strip_prefix));

    // Step 11: branch to next hop or terminate.
    let next_index = my_line + 1;
    let has_next = next_index < document.jobs.len();

    if status == JobStatus::Done && has_next {
        let idx = next_index;
        if document.jobs[idx].server.is_any() {
            let next_procedure = document.jobs[idx].procedure.clone();
            let next_arity = document.jobs[idx].arity();
            let next_requirements = document.jobs[idx].effective_filter(&document.header.global_filter);
            let candidates = deps.catalog.snapshot_candidates().await?;
            let eligible = dtrpc_capability::filter_candidates(
                &candidates,
                &next_procedure,
                next_arity,
                &next_requirements,
                &deps.local_sid,
                &originator,
                self_origin,
            );
            let owned: Vec<_> = eligible.into_iter().cloned().collect();
            let chosen = {
                let mut selector = deps.selector.lock().expect("selector lock poisoned");
                selector.select(&owned, self_origin).cloned()
            };
            let Some(chosen) = chosen else {
                return emit_error(deps, &rpcid, &originator, &prior_sender, "No server found for next hop.").await;
            };
            document.jobs[idx].server = chosen.sid;
        }
        tokio::fs::write(&job_file, document.to_text()).await.map_err(DtrpcError::from)?;

        let package_entries = collect_directory(&extract_dir).await?;
        let package_bytes = build_zip(&package_entries)?;
        let next_recipient = document.jobs[idx].server.clone();
        let next_procedure = document.jobs[idx].procedure.clone();
        let built = call_builder(&rpcid, &originator, &deps.local_sid, &next_recipient, &next_procedure)
            .payload(package_bytes)
            .build();
        let forwarded = deps.store.insert(built.manifest, built.payload, &deps.local_sid).await?;
        deps.cleanup.register(bundle.bundle_id.clone(), forwarded.bundle().bundle_id.clone());
    } else {
        tokio::fs::write(&job_file, document.to_text()).await.map_err(DtrpcError::from)?;
        let package_entries = collect_directory(&extract_dir).await?;
        let package_bytes = build_zip(&package_entries)?;
        let terminal = if status == JobStatus::Done {
            result_builder(&rpcid, &originator, &deps.local_sid, &document.header.client_sid)
        } else {
            error_builder(&rpcid, &originator, &deps.local_sid, &document.header.client_sid, outcome.result_string())
        };
        let built = terminal.payload(package_bytes).build();
        let terminal_outcome = deps.store.insert(built.manifest, built.payload, &deps.local_sid).await?;
        deps.cleanup.register(bundle.bundle_id.clone(), terminal_outcome.bundle().bundle_id.clone());
    }

    Ok(())
}

async fn emit_error(
    deps: &StepHandlerDeps,
    rpcid: &str,
    originator: &Sid,
    recipient: &Sid,
    reason: &str,
) -> Result<(), DtrpcError> {
    warn!(target: "dtrpc.runtime.step_handler", %rpcid, %reason, "step rejected");
    let built = error_builder(rpcid, originator, &deps.local_sid, recipient, reason).build();
    deps.store.insert(built.manifest, built.payload, &deps.local_sid).await?;
    Ok(())
}

fn resolve_file_args(arguments: &[String], extract_dir: &Path) -> Vec<String> {
    arguments
        .iter()
        .map(|arg| {
            let candidate = extract_dir.join(arg);
            if candidate.is_file() {
                candidate.to_string_lossy().to_string()
            } else {
                arg.clone()
            }
        })
        .collect()
}

async fn collect_directory(dir: &Path) -> Result<Vec<(String, Vec<u8>)>, DtrpcError> {
    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await.map_err(DtrpcError::from)?;
    while let Some(entry) = read_dir.next_entry().await.map_err(DtrpcError::from)? {
        let path = entry.path();
        if path.is_file() {
            let name = path
                .strip_prefix(dir)
                .unwrap_or(&path)
                .to_string_lossy()
                .to_string();
            let contents = tokio::fs::read(&path).await.map_err(DtrpcError::from)?;
            entries.push((name, contents));
        }
    }
    Ok(entries)
}

fn millis_timestamp() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}
