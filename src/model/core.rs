use super::labels::Labels;
use super::workload::Workload;
use super::{DnsEntry, LbEntry};
use crate::config::Config;
use crate::dns;
use crate::error::{BeaconResult, BeaconWrap};
use crate::lb;
use crate::supervisor::Supervisor;
use log::{debug, info};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Key prefix used for LB-induced synthetic DNS entries (spec §3.2:
/// `${self_id}_${host}`). `self_id` is the daemon's own fixed identity, not
/// a per-workload value: the synthetic map is global, keyed by the host the
/// proxy aggregates entries under, one entry regardless of how many
/// workloads register backends for it (spec S5).
pub const SELF_SOURCE_ID: &str = "__beacond_self__";

/// Everything the convergence core owns: the workload-derived entries, the
/// LB-induced synthetic DNS entries, and the last-rendered text of every
/// output file (for the byte-diff reload gate in spec §3.2's "outputs
/// deterministic... reloads fire only on byte diff").
#[derive(Debug, Default)]
pub struct Model {
    pub dns_entries: HashMap<String, DnsEntry>,
    pub lb_entries: HashMap<String, LbEntry>,
    pub synthetic_dns: HashMap<String, DnsEntry>,
    pub last_hosts: Option<String>,
    pub last_wildcards: Option<String>,
    pub last_proxy: Option<String>,
}

/// The single-mutex convergence engine (spec §5 `config_lock`). Every
/// `start`/`stop` call locks, mutates, runs the LB generator then the DNS
/// generator (spec §4.4/§9 ordering that breaks the LB→DNS synthetic-entry
/// cycle), and releases.
pub struct Core {
    config: Config,
    supervisor: Arc<dyn Supervisor>,
    self_ip: IpAddr,
    model: Mutex<Model>,
}

impl Core {
    pub fn new(config: Config, supervisor: Arc<dyn Supervisor>, self_ip: IpAddr) -> Self {
        Self {
            config,
            supervisor,
            self_ip,
            model: Mutex::new(Model::default()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Register or overwrite a workload (spec §4.2: "Re-Start idempotent").
    pub async fn start(&self, workload: Workload) -> BeaconResult<()> {
        debug!("start {} ({})", workload.source_id, workload.name);
        let labels = Labels::from_map(
            &workload.labels,
            &self.config.dns_domain,
            &self.config.lb_domain,
            self.config.dns_wildcard,
        );

        let dns_entry = DnsEntry {
            hostname: workload.hostname.clone(),
            ip: workload.ip,
            network: workload.network.clone(),
            domain: labels.dns_domain.clone(),
            name: workload.name.clone(),
            aliases: labels.dns_aliases.clone(),
            use_wildcard: labels.dns_wildcard,
            refcount: 1,
        };

        let lb_entry = LbEntry {
            hostname: workload.hostname.clone(),
            ip: workload.ip,
            domain: labels.lb_domain.clone(),
            http_entries: lb::parse_http_entries(&labels.lb_http, &workload.source_id),
            tcp_entries: lb::parse_tcp_entries(&labels.lb_tcp, &workload.source_id),
        };

        let mut model = self.model.lock().await;
        model.dns_entries.insert(workload.source_id.clone(), dns_entry);
        model.lb_entries.insert(workload.source_id.clone(), lb_entry);
        self.converge(&mut model).await
    }

    /// Remove a workload, deleting both its DNS and LB entries if present
    /// (spec §4.2 / Invariant 2 "Removal completeness").
    pub async fn stop(&self, source_id: &str) -> BeaconResult<()> {
        debug!("stop {source_id}");
        let mut model = self.model.lock().await;
        model.dns_entries.remove(source_id);
        model.lb_entries.remove(source_id);
        self.converge(&mut model).await
    }

    async fn converge(&self, model: &mut Model) -> BeaconResult<()> {
        let template = std::fs::read_to_string(&self.config.haproxy_config_template)
            .wrap(format!(
                "read proxy template {}",
                self.config.haproxy_config_template
            ))?;

        // LB first: it both renders the proxy config and recomputes the
        // synthetic DNS entries the DNS generator needs below. Invariant 4
        // (Synthetic-DNS flush) is enforced by `lb::generate` fully
        // rebuilding the synthetic map every cycle rather than patching it.
        let (proxy_text, synthetic) = lb::generate(model, self.self_ip);
        model.synthetic_dns = synthetic;

        if model.last_proxy.as_deref() != Some(proxy_text.as_str()) {
            let full = format!("{template}{proxy_text}");
            std::fs::write(&self.config.haproxy_config_file, &full)
                .wrap("write proxy config")?;
            self.supervisor
                .reload_proxy(&self.config.haproxy_config_file)
                .await?;
            model.last_proxy = Some(proxy_text);
            info!("proxy config reloaded");
        }

        let hosts_text = dns::generate_hosts(model);
        if model.last_hosts.as_deref() != Some(hosts_text.as_str()) {
            std::fs::write(&self.config.dnsmasq_hosts_file, &hosts_text)
                .wrap("write dns hosts file")?;
            self.supervisor.reload_dns().await?;
            model.last_hosts = Some(hosts_text);
            info!("dns hosts reloaded");
        }

        let wildcards_text = dns::generate_wildcards(model);
        if model.last_wildcards.as_deref() != Some(wildcards_text.as_str()) {
            std::fs::write(&self.config.dnsmasq_wildcards_file, &wildcards_text)
                .wrap("write dns wildcards file")?;
            self.supervisor.restart_dns().await?;
            model.last_wildcards = Some(wildcards_text);
            info!("dns wildcards restarted");
        }

        Ok(())
    }
}
