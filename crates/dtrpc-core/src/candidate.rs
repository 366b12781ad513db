//! Candidate servers discovered during the offer-catalog lookup phase.

use crate::capability::CapabilityRecord;
use crate::procedure::Procedure;
use crate::sid::Sid;
use serde::{Deserialize, Serialize};

/// A node observed to be offering at least one matching procedure, along
/// with the capability record published in its most recent OFFER.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateServer {
    /// The candidate's SID.
    pub sid: Sid,
    /// Procedures this node currently offers.
    pub jobs_offered: Vec<Procedure>,
    /// Most recently published capability record.
    pub capabilities: CapabilityRecord,
}

impl CandidateServer {
    /// Construct a candidate from an offer snapshot.
    pub fn new(sid: Sid, jobs_offered: Vec<Procedure>, capabilities: CapabilityRecord) -> Self {
        Self {
            sid,
            jobs_offered,
            capabilities,
        }
    }

    /// `true` if this candidate currently offers a procedure named
    /// `procedure`, regardless of arity.
    pub fn offers(&self, procedure: &str) -> bool {
        self.jobs_offered.iter().any(|p| p.name == procedure)
    }

    /// `true` if this candidate offers exactly `(procedure, arity)`.
    pub fn offers_with_arity(&self, procedure: &str, arity: usize) -> bool {
        self.jobs_offered
            .iter()
            .any(|p| p.matches_name_and_arity(procedure, arity))
    }

    /// Euclidean distance between this candidate's published `gps_coord`
    /// and `origin`, if this candidate publishes a position.
    pub fn distance_from(&self, origin: (f64, f64)) -> Option<f64> {
        let (x, y) = self
            .capabilities
            .get(crate::capability::GPS_COORD)?
            .as_gps_coord()?;
        let (ox, oy) = origin;
        Some(((x - ox).powi(2) + (y - oy).powi(2)).sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityValue;
    use crate::procedure::ArgKind;

    fn sid(n: u8) -> Sid {
        Sid::new_unchecked(format!("{n:0>64}"))
    }

    fn proc(name: &str, arity: usize) -> Procedure {
        Procedure::new(name, (0..arity).map(|_| ArgKind::Other("str".into())).collect())
    }

    #[test]
    fn offers_checks_procedure_membership() {
        let c = CandidateServer::new(sid(1), vec![proc("echo", 1)], CapabilityRecord::new());
        assert!(c.offers("echo"));
        assert!(!c.offers("reverse"));
    }

    #[test]
    fn offers_with_arity_requires_exact_match() {
        let c = CandidateServer::new(sid(1), vec![proc("echo", 1)], CapabilityRecord::new());
        assert!(c.offers_with_arity("echo", 1));
        assert!(!c.offers_with_arity("echo", 2));
    }

    #[test]
    fn distance_from_computes_euclidean_distance() {
        let mut caps = CapabilityRecord::new();
        caps.insert("gps_coord".into(), CapabilityValue::GpsCoord(3.0, 4.0));
        let c = CandidateServer::new(sid(1), vec![], caps);
        assert_eq!(c.distance_from((0.0, 0.0)), Some(5.0));
    }

    #[test]
    fn distance_from_none_without_gps() {
        let c = CandidateServer::new(sid(1), vec![], CapabilityRecord::new());
        assert_eq!(c.distance_from((0.0, 0.0)), None);
    }
}
