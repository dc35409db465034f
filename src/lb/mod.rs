//! LB generator (spec §4.4): renders the reverse-proxy configuration and
//! feeds synthetic DNS entries back to the DNS generator for every host it
//! aggregates.

use crate::model::core::SELF_SOURCE_ID;
use crate::model::{DnsEntry, HttpEntry, LbEntry, Model, TcpEntry};
use log::warn;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::net::IpAddr;
use std::sync::OnceLock;

fn http_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([^:]+):([0-9]+)$").unwrap())
}

fn tcp_triple_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([^:]+):([0-9]+):([0-9]+)$").unwrap())
}

fn tcp_double_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([^:]+):([0-9]+)$").unwrap())
}

/// Parse `lb.http` entries (`HOST:PORT`), logging and skipping any that
/// don't match (spec §7: malformed label -> skip entry, log, continue).
pub fn parse_http_entries(raw: &[String], source_id: &str) -> Vec<HttpEntry> {
    raw.iter()
        .filter_map(|r| match http_re().captures(r) {
            Some(c) => {
                let port: u16 = c[2].parse().ok()?;
                Some(HttpEntry {
                    host: c[1].to_string(),
                    port,
                })
            }
            None => {
                warn!("{source_id}: malformed lb.http entry {r:?}, skipping");
                None
            }
        })
        .collect()
}

/// Parse `lb.tcp` entries, preferring the triple-colon `HOST:FRONT:BACK`
/// form and falling back to `HOST:PORT` (spec §9 Open Question (a)).
pub fn parse_tcp_entries(raw: &[String], source_id: &str) -> Vec<TcpEntry> {
    raw.iter()
        .filter_map(|r| {
            if let Some(c) = tcp_triple_re().captures(r) {
                let front: u16 = c[2].parse().ok()?;
                let back: u16 = c[3].parse().ok()?;
                return Some(TcpEntry {
                    host: c[1].to_string(),
                    front_port: front,
                    back_port: back,
                });
            }
            if let Some(c) = tcp_double_re().captures(r) {
                let port: u16 = c[2].parse().ok()?;
                return Some(TcpEntry {
                    host: c[1].to_string(),
                    front_port: port,
                    back_port: port,
                });
            }
            warn!("{source_id}: malformed lb.tcp entry {r:?}, skipping");
            None
        })
        .collect()
}

fn strip_wildcard(host: &str) -> (&str, bool) {
    match host.strip_prefix("*.") {
        Some(rest) => (rest, true),
        None => (host, false),
    }
}

/// Render the HTTP/TCP frontend and backend blocks and compute the
/// synthetic DNS entries they induce. Returns `(config_blocks,
/// synthetic_dns)`; the caller is responsible for prepending the static
/// template and for the byte-diff / reload decision (spec §4.4: "rebuilds
/// proxy config from scratch each cycle from a static template prefix").
type HttpGroup<'a> = (bool, Vec<(&'a LbEntry, &'a HttpEntry)>);
type TcpGroup<'a> = (String, bool, Vec<(&'a LbEntry, &'a TcpEntry)>);

pub fn generate(model: &Model, self_ip: IpAddr) -> (String, HashMap<String, DnsEntry>) {
    // BTreeMap for deterministic (sorted) iteration -- spec's "outputs
    // deterministic mod ordering" requirement.
    let mut http_by_host: BTreeMap<String, HttpGroup> = BTreeMap::new();
    // (front_port, host, back_port) -- last-written host/domain wins a
    // front_port conflict (spec §9 Open Question (b), documented in
    // DESIGN.md: undefined by spec, we pick deterministic HashMap-iteration
    // order sorted by source_id).
    let mut tcp_by_front: BTreeMap<u16, TcpGroup> = BTreeMap::new();

    let mut source_ids: Vec<&String> = model.lb_entries.keys().collect();
    source_ids.sort();

    for source_id in &source_ids {
        let lb_entry = &model.lb_entries[*source_id];
        for http in &lb_entry.http_entries {
            let (host, wildcard) = strip_wildcard(&http.host);
            let group = http_by_host.entry(host.to_string()).or_default();
            group.0 |= wildcard;
            group.1.push((lb_entry, http));
        }
        for tcp in &lb_entry.tcp_entries {
            let (host, wildcard) = strip_wildcard(&tcp.host);
            let group = tcp_by_front
                .entry(tcp.front_port)
                .or_insert_with(|| (host.to_string(), false, Vec::new()));
            group.0 = host.to_string();
            group.1 |= wildcard;
            group.2.push((lb_entry, tcp));
        }
    }

    let mut synthetic = HashMap::new();
    let mut out = String::new();

    // HTTP frontend: one shared ACL-routed frontend, one backend per host.
    if !http_by_host.is_empty() {
        out.push_str("\nfrontend http-in\n");
        for host in http_by_host.keys() {
            let _ = writeln!(out, "    acl is_{host} hdr_reg(host) ^(.*\\.|){host}(\\..+$|$)");
            let _ = writeln!(out, "    use_backend backend_http_{host} if is_{host}");
        }
        for (host, (wildcard, entries)) in &http_by_host {
            let _ = writeln!(out, "\nbackend backend_http_{host}");
            for (lb_entry, http) in entries {
                let _ = writeln!(
                    out,
                    "    server {} {}:{} check port {}",
                    lb_entry.hostname, lb_entry.ip, http.port, http.port
                );
            }
            register_synthetic(&mut synthetic, host, &host_domain(entries), *wildcard, self_ip);
        }
    }

    // TCP: one frontend + backend per front_port, named after the
    // group's host (spec §8 scenario S6: `frontend_tcp_<host>_<port>`).
    if !tcp_by_front.is_empty() {
        for (front_port, (host, wildcard, entries)) in &tcp_by_front {
            let _ = writeln!(out, "\nfrontend frontend_tcp_{host}_{front_port}");
            let _ = writeln!(out, "    bind *:{front_port}");
            let _ = writeln!(out, "    mode tcp");
            let _ = writeln!(out, "    default_backend backend_tcp_{host}_{front_port}");

            let _ = writeln!(out, "\nbackend backend_tcp_{host}_{front_port}");
            let _ = writeln!(out, "    mode tcp");
            let _ = writeln!(out, "    balance roundrobin");
            for (lb_entry, tcp) in entries {
                let _ = writeln!(
                    out,
                    "    server {} {}:{} check port {}",
                    lb_entry.hostname, lb_entry.ip, tcp.back_port, tcp.back_port
                );
            }
            register_synthetic(&mut synthetic, host, &host_domain_tcp(entries), *wildcard, self_ip);
        }
    }

    (out, synthetic)
}

fn host_domain(entries: &[(&LbEntry, &HttpEntry)]) -> String {
    entries.last().map(|(lb, _)| lb.domain.clone()).unwrap_or_default()
}

fn host_domain_tcp(entries: &[(&LbEntry, &TcpEntry)]) -> String {
    entries.last().map(|(lb, _)| lb.domain.clone()).unwrap_or_default()
}

fn register_synthetic(
    synthetic: &mut HashMap<String, DnsEntry>,
    host: &str,
    domain: &str,
    use_wildcard: bool,
    self_ip: IpAddr,
) {
    let key = format!("{SELF_SOURCE_ID}_{host}");
    let refcount = synthetic.get(&key).map(|e| e.refcount).unwrap_or(0) + 1;
    synthetic.insert(
        key,
        DnsEntry {
            hostname: host.to_string(),
            ip: self_ip,
            network: String::new(),
            domain: domain.to_string(),
            name: host.to_string(),
            aliases: Vec::new(),
            use_wildcard,
            refcount,
        },
    );
}
