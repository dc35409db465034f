//! The supervision hook (spec §4.5/§6/§9): an injectable capability so the
//! convergence core never invokes a concrete resolver/proxy process
//! directly. A real deployment runs `ProcessSupervisor`; tests substitute
//! `FakeSupervisor`.

use crate::error::{BeaconResult, BeaconWrap};
use async_trait::async_trait;
use log::{info, warn};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::process::Command;

#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Trigger the DNS resolver to re-read its hosts file without dropping
    /// in-flight queries (spec: reload, not restart).
    async fn reload_dns(&self) -> BeaconResult<()>;

    /// Trigger the DNS resolver to restart, picking up a changed wildcards
    /// file (spec: wildcards changes require restart, not reload).
    async fn restart_dns(&self) -> BeaconResult<()>;

    /// Invoke the proxy reload helper (spec §6 "Proxy reload helper
    /// contract") against the freshly written config path.
    async fn reload_proxy(&self, config_path: &str) -> BeaconResult<()>;
}

/// Default supervisor: signals the resolver and shells out to the
/// `beacon-lb-reload` helper for the proxy, exactly the two hand-off
/// mechanisms spec §6 names.
pub struct ProcessSupervisor {
    pub dns_pid_file: String,
    pub lb_reload_helper: String,
}

impl ProcessSupervisor {
    pub fn new(dns_pid_file: impl Into<String>, lb_reload_helper: impl Into<String>) -> Self {
        Self {
            dns_pid_file: dns_pid_file.into(),
            lb_reload_helper: lb_reload_helper.into(),
        }
    }

    fn signal_dns(&self, signal: nix::sys::signal::Signal) -> BeaconResult<()> {
        let pid_text = std::fs::read_to_string(&self.dns_pid_file)
            .wrap(format!("read dns pid file {}", self.dns_pid_file))?;
        let pid: i32 = pid_text
            .trim()
            .parse()
            .wrap("parse dns pid file contents")?;
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), signal)?;
        Ok(())
    }
}

#[async_trait]
impl Supervisor for ProcessSupervisor {
    async fn reload_dns(&self) -> BeaconResult<()> {
        info!("reloading dns resolver");
        self.signal_dns(nix::sys::signal::Signal::SIGHUP)
    }

    async fn restart_dns(&self) -> BeaconResult<()> {
        info!("restarting dns resolver");
        self.signal_dns(nix::sys::signal::Signal::SIGTERM)
    }

    async fn reload_proxy(&self, config_path: &str) -> BeaconResult<()> {
        info!("reloading proxy with config {config_path}");
        // Only `spawn` (fork/exec), never `status`/`wait` here: the helper
        // serially SIGTERMs stale proxy workers with a grace period per PID
        // (src/bin/beacon_lb_reload.rs) and can run for seconds, while this
        // call runs with the model lock held (spec §5: "process-signal
        // commands occur inside the lock but are short"; §6: the
        // supervision hook "returns promptly"). Reap the child in the
        // background instead of blocking the caller on it.
        let mut child = Command::new(&self.lb_reload_helper)
            .arg(config_path)
            .spawn()
            .wrap(format!("spawn {}", self.lb_reload_helper))?;
        let helper = self.lb_reload_helper.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if !status.success() => warn!("{helper} exited with {status}"),
                Err(e) => warn!("{helper} wait failed: {e}"),
                Ok(_) => {}
            }
        });
        Ok(())
    }
}

/// Records calls instead of touching any process, for the end-to-end and
/// unit test suites (spec §9: "external process invocation modeled as an
/// injectable `Supervisor` capability for test substitution").
#[derive(Default)]
pub struct FakeSupervisor {
    reload_dns_calls: AtomicUsize,
    restart_dns_calls: AtomicUsize,
    reload_proxy_calls: AtomicUsize,
}

impl FakeSupervisor {
    pub fn reload_dns_calls(&self) -> usize {
        self.reload_dns_calls.load(Ordering::SeqCst)
    }

    pub fn restart_dns_calls(&self) -> usize {
        self.restart_dns_calls.load(Ordering::SeqCst)
    }

    pub fn reload_proxy_calls(&self) -> usize {
        self.reload_proxy_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Supervisor for FakeSupervisor {
    async fn reload_dns(&self) -> BeaconResult<()> {
        self.reload_dns_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn restart_dns(&self) -> BeaconResult<()> {
        self.restart_dns_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reload_proxy(&self, _config_path: &str) -> BeaconResult<()> {
        self.reload_proxy_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
