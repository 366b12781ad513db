//! Server selection: turns a filtered candidate set into a single chosen
//! server, per one of four policies (§4.3).

use dtrpc_core::{CandidateServer, CPU_LOAD, DISK_SPACE, MEMORY};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Gamma};
use serde::{Deserialize, Serialize};

/// A server-selection policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorPolicy {
    /// Positional first after the deterministic `best` sort.
    First,
    /// Uniform random choice.
    Random,
    /// Deterministic sort by `(distance asc, cpu_load asc, memory desc,
    /// disk_space desc)`, first element.
    Best,
    /// Same sort as `best`, indexed by a Gamma(k=2, θ=1) draw rounded and
    /// clamped to the last element.
    Probabilistic,
}

/// Default seed used when no seed source is configured.
pub const DEFAULT_SEED: u64 = 0;

/// A selector instance: a fixed policy plus (for `random`/`probabilistic`)
/// a PRNG constructed once from a configured seed, so repeated runs over
/// the same candidate set are reproducible.
pub struct Selector {
    policy: SelectorPolicy,
    rng: StdRng,
}

impl Selector {
    /// Construct a selector for `policy`, seeding its PRNG from `seed`.
    pub fn new(policy: SelectorPolicy, seed: u64) -> Self {
        Self {
            policy,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Construct a selector using [`DEFAULT_SEED`].
    pub fn with_default_seed(policy: SelectorPolicy) -> Self {
        Self::new(policy, DEFAULT_SEED)
    }

    /// This selector's configured policy.
    pub fn policy(&self) -> SelectorPolicy {
        self.policy
    }

    /// Choose one candidate from `candidates`, or `None` if the slice is
    /// empty. `self_origin` is this node's own position, used to compute
    /// each candidate's distance for the `best`/`probabilistic` sort.
    pub fn select<'a>(
        &mut self,
        candidates: &'a [CandidateServer],
        self_origin: (f64, f64),
    ) -> Option<&'a CandidateServer> {
        if candidates.is_empty() {
            return None;
        }
        match self.policy {
            SelectorPolicy::First => Some(&sorted_by_best(candidates, self_origin)[0]),
            SelectorPolicy::Random => {
                let idx = self.rng.gen_range(0..candidates.len());
                Some(&candidates[idx])
            }
            SelectorPolicy::Best => Some(&sorted_by_best(candidates, self_origin)[0]),
            SelectorPolicy::Probabilistic => {
                let sorted = sorted_by_best(candidates, self_origin);
                let gamma = Gamma::new(2.0, 1.0).expect("Gamma(2, 1) parameters are always valid");
                let draw: f64 = gamma.sample(&mut self.rng);
                let idx = (draw.round() as usize).min(sorted.len() - 1);
                Some(sorted[idx])
            }
        }
    }
}

fn sort_key(candidate: &CandidateServer, self_origin: (f64, f64)) -> (f64, f64, f64, f64) {
    let distance = candidate.distance_from(self_origin).unwrap_or(f64::INFINITY);
    let cpu_load = candidate
        .capabilities
        .get(CPU_LOAD)
        .and_then(|v| v.as_number())
        .unwrap_or(f64::INFINITY);
    let memory = candidate
        .capabilities
        .get(MEMORY)
        .and_then(|v| v.as_number())
        .unwrap_or(f64::NEG_INFINITY);
    let disk_space = candidate
        .capabilities
        .get(DISK_SPACE)
        .and_then(|v| v.as_number())
        .unwrap_or(f64::NEG_INFINITY);
    // memory/disk_space sort descending, so negate for an ascending tuple compare.
    (distance, cpu_load, -memory, -disk_space)
}

fn sorted_by_best(candidates: &[CandidateServer], self_origin: (f64, f64)) -> Vec<&CandidateServer> {
    let mut sorted: Vec<&CandidateServer> = candidates.iter().collect();
    sorted.sort_by(|a, b| {
        let ka = sort_key(a, self_origin);
        let kb = sort_key(b, self_origin);
        ka.partial_cmp(&kb).unwrap_or(std::cmp::Ordering::Equal)
    });
    sorted
}
