//! Candidate filtering: turns an offer-catalog snapshot plus a job's
//! capability requirements into the set of servers eligible to run a step.
//!
//! See [`matches`] for the single-candidate predicate and [`filter_candidates`]
//! for the catalog-wide operation.

use dtrpc_core::{CandidateServer, CapabilityRecord, CapabilityValue, Sid, CPU_LOAD, DISK_SPACE, ENERGY, GPS_COORD, MEMORY};

/// Why a candidate was excluded from consideration. Returned by
/// [`evaluate`] for diagnostics; [`matches`] and [`filter_candidates`]
/// collapse this down to a boolean.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// The candidate is the caller itself, or the call's originator.
    SelfOrOriginator,
    /// The candidate does not offer the exact `(procedure, arity)`.
    NotOffering,
    /// A required capability was not satisfied; names the failing key.
    CapabilityUnmet(String),
}

/// Evaluate one candidate against one job's requirements, returning `Ok(())`
/// if eligible or the first [`Rejection`] encountered otherwise.
///
/// `caller_sid` is this node's own SID (excluded unconditionally);
/// `originator_sid` is additionally excluded when the caller is an
/// intermediate hop forwarding on behalf of the original client.
pub fn evaluate(
    candidate: &CandidateServer,
    procedure: &str,
    arity: usize,
    requirements: &CapabilityRecord,
    caller_sid: &Sid,
    originator_sid: &Sid,
    self_origin: (f64, f64),
) -> Result<(), Rejection> {
    if &candidate.sid == caller_sid || &candidate.sid == originator_sid {
        return Err(Rejection::SelfOrOriginator);
    }
    if !candidate.offers_with_arity(procedure, arity) {
        return Err(Rejection::NotOffering);
    }
    for (key, required) in requirements {
        if !capability_satisfied(candidate, key, required, self_origin) {
            return Err(Rejection::CapabilityUnmet(key.clone()));
        }
    }
    Ok(())
}

/// `true` if `candidate` is eligible to run a step per §4.2's `matches`
/// operation.
pub fn matches(
    candidate: &CandidateServer,
    procedure: &str,
    arity: usize,
    requirements: &CapabilityRecord,
    caller_sid: &Sid,
    originator_sid: &Sid,
    self_origin: (f64, f64),
) -> bool {
    evaluate(
        candidate,
        procedure,
        arity,
        requirements,
        caller_sid,
        originator_sid,
        self_origin,
    )
    .is_ok()
}

/// Filter a full catalog snapshot down to the eligible candidates.
pub fn filter_candidates<'a>(
    catalog: &'a [CandidateServer],
    procedure: &str,
    arity: usize,
    requirements: &CapabilityRecord,
    caller_sid: &Sid,
    originator_sid: &Sid,
    self_origin: (f64, f64),
) -> Vec<&'a CandidateServer> {
    catalog
        .iter()
        .filter(|c| {
            matches(
                c,
                procedure,
                arity,
                requirements,
                caller_sid,
                originator_sid,
                self_origin,
            )
        })
        .collect()
}

/// A capability the candidate does not publish is treated as unrestricted.
fn capability_satisfied(
    candidate: &CandidateServer,
    key: &str,
    required: &CapabilityValue,
    self_origin: (f64, f64),
) -> bool {
    let Some(published) = candidate.capabilities.get(key) else {
        return true;
    };

    match key {
        CPU_LOAD => match (published.as_number(), required.as_number()) {
            (Some(have), Some(need)) => have <= need,
            _ => true,
        },
        DISK_SPACE | MEMORY | ENERGY => match (published.as_number(), required.as_number()) {
            (Some(have), Some(need)) => have >= need,
            _ => true,
        },
        GPS_COORD => match required.as_number() {
            Some(max_distance) => candidate
                .distance_from(self_origin)
                .is_some_and(|d| d <= max_distance),
            None => true,
        },
        _ => true,
    }
}
