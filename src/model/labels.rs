//! The closed six-key label schema (spec §3 / §9). Unknown keys are ignored;
//! the six recognized keys are `dns.domain`, `dns.wildcard`, `dns.aliases`,
//! `lb.domain`, `lb.http`, `lb.tcp`.

use crate::config::constants::*;
use crate::config::is_truthy;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels {
    pub dns_domain: String,
    pub dns_wildcard: bool,
    pub dns_aliases: Vec<String>,
    pub lb_domain: String,
    pub lb_http: Vec<String>,
    pub lb_tcp: Vec<String>,
}

impl Labels {
    /// Parse a workload's raw label map, falling back to the daemon-wide
    /// `dns.domain`/`lb.domain`/`dns.wildcard` defaults when the labels
    /// don't override them.
    pub fn from_map(
        labels: &HashMap<String, String>,
        default_dns_domain: &str,
        default_lb_domain: &str,
        default_dns_wildcard: bool,
    ) -> Self {
        let dns_domain = labels
            .get(LABEL_DNS_DOMAIN)
            .cloned()
            .unwrap_or_else(|| default_dns_domain.to_string());
        let dns_wildcard = labels
            .get(LABEL_DNS_WILDCARD)
            .map(|v| is_truthy(v))
            .unwrap_or(default_dns_wildcard);
        let dns_aliases = labels
            .get(LABEL_DNS_ALIASES)
            .map(|v| split_csv(v))
            .unwrap_or_default();
        let lb_domain = labels
            .get(LABEL_LB_DOMAIN)
            .cloned()
            .unwrap_or_else(|| default_lb_domain.to_string());
        let lb_http = labels.get(LABEL_LB_HTTP).map(|v| split_csv(v)).unwrap_or_default();
        let lb_tcp = labels.get(LABEL_LB_TCP).map(|v| split_csv(v)).unwrap_or_default();

        Self {
            dns_domain,
            dns_wildcard,
            dns_aliases,
            lb_domain,
            lb_http,
            lb_tcp,
        }
    }
}

fn split_csv(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Strip a leading `*.`, then a leading `.`, then a leading `*`, in that
/// order (spec §4.3 alias normalization, step 1).
pub fn strip_wildcard_prefix(alias: &str) -> &str {
    if let Some(rest) = alias.strip_prefix("*.") {
        rest
    } else if let Some(rest) = alias.strip_prefix('.') {
        rest
    } else if let Some(rest) = alias.strip_prefix('*') {
        rest
    } else {
        alias
    }
}

/// Append `.<domain>`, collapsing `alias.domain.domain` into `alias.domain`
/// when the (prefix-stripped) alias already ends with the domain suffix
/// (spec §4.3 alias normalization, step 2).
pub fn normalize_alias(alias: &str, domain: &str) -> String {
    let stripped = strip_wildcard_prefix(alias);
    let suffix = format!(".{domain}");
    if stripped == domain || stripped.ends_with(&suffix) {
        stripped.to_string()
    } else {
        format!("{stripped}.{domain}")
    }
}
