//! DNS generator (spec §4.3): renders the resolver's hosts and wildcards
//! files from the current model. Reload decisions (byte-diff, reload vs
//! restart) are made by the caller (`model::core::Core::converge`); this
//! module only renders deterministic text.

use crate::model::labels::{normalize_alias, strip_wildcard_prefix};
use crate::model::Model;
use std::collections::HashSet;
use std::fmt::Write as _;

/// Collect the deduped, FQDN-first-ordered name tokens a `DnsEntry`
/// contributes to a hosts-file line (spec Invariant 5).
fn entry_names(entry: &crate::model::DnsEntry) -> Vec<String> {
    let mut names = Vec::new();
    let mut seen = HashSet::new();
    let mut push = |n: String| {
        if seen.insert(n.clone()) {
            names.push(n);
        }
    };

    push(format!("{}.{}", entry.hostname, entry.domain));
    push(entry.hostname.clone());
    push(format!("{}.{}", entry.name, entry.domain));
    push(entry.name.clone());
    for alias in &entry.aliases {
        push(strip_wildcard_prefix(alias).to_string());
        push(normalize_alias(alias, &entry.domain));
    }
    names
}

/// Render the hosts file: one line per `DnsEntry` (direct and synthetic),
/// in deterministic (sorted by key) order per spec Invariant 5
/// (FQDN-first ordering) and the general "outputs deterministic mod
/// ordering" requirement of §3.2.
pub fn generate_hosts(model: &Model) -> String {
    let mut out = String::new();
    for (_, entry) in sorted_entries(model) {
        let _ = writeln!(out, "{} {}", entry.ip, entry_names(entry).join(" "));
    }
    out
}

/// Render the wildcards file: one `address=/<name>/<ip>` line for every
/// name token the hosts line carries for a `use_wildcard` entry (spec
/// Invariant 6: "for every host H that appears on the hosts line, the
/// wildcards file contains exactly one `address=/H/<ip>` line").
pub fn generate_wildcards(model: &Model) -> String {
    let mut out = String::new();
    for (_, entry) in sorted_entries(model) {
        if entry.use_wildcard {
            for name in entry_names(entry) {
                let _ = writeln!(out, "address=/{name}/{}", entry.ip);
            }
        }
    }
    out
}

fn sorted_entries(model: &Model) -> Vec<(&String, &crate::model::DnsEntry)> {
    let mut entries: Vec<(&String, &crate::model::DnsEntry)> = model
        .dns_entries
        .iter()
        .chain(model.synthetic_dns.iter())
        .collect();
    entries.sort_by_key(|(key, _)| key.as_str());
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DnsEntry;
    use std::net::{IpAddr, Ipv4Addr};

    fn entry(hostname: &str, name: &str, ip: [u8; 4], aliases: Vec<&str>, wildcard: bool) -> DnsEntry {
        DnsEntry {
            hostname: hostname.to_string(),
            ip: IpAddr::V4(Ipv4Addr::from(ip)),
            network: "bridge".to_string(),
            domain: "my.local.env".to_string(),
            name: name.to_string(),
            aliases: aliases.into_iter().map(String::from).collect(),
            use_wildcard: wildcard,
            refcount: 1,
        }
    }

    #[test]
    fn s1_plain_container_basic_line() {
        let mut model = Model::default();
        model.dns_entries.insert(
            "c1".to_string(),
            entry("asdfgh", "qwerty", [172, 17, 0, 7], vec![], false),
        );
        let hosts = generate_hosts(&model);
        assert_eq!(
            hosts,
            "172.17.0.7 asdfgh.my.local.env asdfgh qwerty.my.local.env qwerty\n"
        );
    }

    #[test]
    fn s2_aliases_appended_after_fqdn_first() {
        let mut model = Model::default();
        model.dns_entries.insert(
            "c1".to_string(),
            entry("asdfgh", "qwerty", [172, 17, 0, 7], vec!["alias1", "alias2"], false),
        );
        let hosts = generate_hosts(&model);
        assert!(hosts.starts_with("172.17.0.7 asdfgh.my.local.env"));
        assert!(hosts.contains("alias1 alias1.my.local.env"));
        assert!(hosts.contains("alias2 alias2.my.local.env"));
    }

    #[test]
    fn s3_wildcard_emits_wildcards_line() {
        let mut model = Model::default();
        model.dns_entries.insert(
            "c1".to_string(),
            entry("asdfgh", "qwerty", [172, 17, 0, 7], vec![], true),
        );
        let wildcards = generate_wildcards(&model);
        for expect in [
            "address=/asdfgh/172.17.0.7\n",
            "address=/asdfgh.my.local.env/172.17.0.7\n",
            "address=/qwerty/172.17.0.7\n",
            "address=/qwerty.my.local.env/172.17.0.7\n",
        ] {
            assert!(wildcards.contains(expect), "missing {expect:?} in {wildcards:?}");
        }
        assert_eq!(
            generate_hosts(&model),
            "172.17.0.7 asdfgh.my.local.env asdfgh qwerty.my.local.env qwerty\n"
        );
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let mut model = Model::default();
        model
            .dns_entries
            .insert("c1".to_string(), entry("web", "web", [10, 0, 0, 2], vec!["web"], false));
        let hosts = generate_hosts(&model);
        let line = hosts.trim_end();
        let names: Vec<&str> = line.split_whitespace().skip(1).collect();
        // "web" is both the hostname and an (identical) alias: it must
        // appear only once in the rendered name list.
        assert_eq!(names.iter().filter(|n| **n == "web").count(), 1);
    }
}
