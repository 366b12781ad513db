//! Stable contract types for the DTN RPC coordination engine: node
//! identity, capability records, job documents, candidate servers and the
//! bundle envelope used to exchange all of the above through the store.

mod bundle;
mod candidate;
mod capability;
mod job;
mod procedure;
mod rpcid;
mod sid;

pub use bundle::{
    Bundle, BundleBuilder, BundleId, BundleType, Token, KEY_FROM_HERE, KEY_ORIGINATOR,
    KEY_RECIPIENT, KEY_REASON, KEY_RPCID, KEY_SENDER, KEY_SERVICE, KEY_TYPE,
};
pub use candidate::CandidateServer;
pub use capability::{
    parse_capability_value, CapabilityRecord, CapabilityValue, CPU_CORES, CPU_LOAD, DISK_SPACE,
    ENERGY, GPS_COORD, MEMORY, POWER_PERCENTAGE, POWER_STATE,
};
pub use job::{
    Job, JobBuilder, JobDocument, JobDocumentBuilder, JobHeader, JobStatus, RESULT_PLACEHOLDER,
};
pub use procedure::{ArgKind, Procedure};
pub use rpcid::RpcId;
pub use sid::{Sid, SidParseError, ANY};
