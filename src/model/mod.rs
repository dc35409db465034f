pub mod core;
pub mod labels;
pub mod workload;

pub use core::{Core, Model, SELF_SOURCE_ID};
pub use labels::Labels;
pub use workload::{Event, EventKind, Workload};

use std::net::IpAddr;

/// One DNS-resolvable record, either derived directly from a workload or
/// synthesized by the LB generator for a proxied hostname (spec §3.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsEntry {
    pub hostname: String,
    pub ip: IpAddr,
    pub network: String,
    pub domain: String,
    pub name: String,
    pub aliases: Vec<String>,
    pub use_wildcard: bool,
    pub refcount: u32,
}

/// One workload's reverse-proxy registration: zero or more HTTP vhosts and
/// TCP frontends (spec §3.2 / §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LbEntry {
    pub hostname: String,
    pub ip: IpAddr,
    pub domain: String,
    pub http_entries: Vec<HttpEntry>,
    pub tcp_entries: Vec<TcpEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpEntry {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpEntry {
    pub host: String,
    pub front_port: u16,
    pub back_port: u16,
}
