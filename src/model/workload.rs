use std::collections::HashMap;
use std::net::IpAddr;

/// A single container or VM as reported by an adapter.
///
/// Mirrors spec §3.1: one record per `source_id`, labels carrying the
/// closed six-key schema parsed by [`crate::model::labels`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    pub source_id: String,
    pub name: String,
    pub hostname: String,
    pub ip: IpAddr,
    pub network: String,
    pub labels: HashMap<String, String>,
}

/// What an adapter observed happening to a workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Start(Workload),
    Stop,
}

/// One adapter-reported occurrence, addressed by `source_id` per spec §4.5
/// ("within one source_id, event ordering... preserved").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub source_id: String,
    pub kind: EventKind,
}
