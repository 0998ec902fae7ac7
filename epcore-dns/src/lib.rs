#![deny(clippy::all)]
#![warn(clippy::pedantic)]

//! DNS plumbing for EPC node selection.
//!
//! Three layers, bottom up:
//!
//! - a resolver: one UDP channel per cache instance, driven by a worker
//!   thread that sleeps on the channel's sockets and completes query objects
//!   as answers arrive;
//! - a TTL cache keyed by `(record type, domain)` with a background
//!   refresher thread that re-queries entries nearing expiry and can persist
//!   the query list across restarts;
//! - the 3GPP S-NAPTR node selector (TS 23.003 / RFC 3958): service and
//!   protocol filtering over NAPTR answers, A/AAAA hydration, ordering, and
//!   topological colocation of candidate pairs.

pub mod cache;
pub mod colocate;
pub mod diameter;
pub mod error;
pub mod fqdn;
pub mod query;
pub mod record;
pub mod refresher;
pub mod resolver;
pub mod selector;
pub mod wire;

pub use cache::{Cache, NS_DEFAULT};
pub use colocate::{CanonicalNodeName, ColocatedCandidate, ColocatedCandidateList, PairType};
pub use diameter::{
    DiameterApplication, DiameterHost, DiameterNaptr, DiameterProtocol, DiameterSelector,
    DiameterSrv, DiameterTarget,
};
pub use error::{DnsError, Result};
pub use query::{Query, QueryCallback};
pub use record::{NaptrRecord, QueryKey, RecordData, RecordType, ResourceRecord, SrvRecord};
pub use resolver::NamedServer;
pub use selector::{
    AppProtocol, AppProtocolId, AppService, AppServiceId, NodeSelector, NodeSelectorResult,
};
