use beacond::adapters::docker;
#[cfg(feature = "libvirt")]
use beacond::adapters::libvirt;
use beacond::adapters::{NoopSource, WorkloadSource};
use beacond::config::Config;
use beacond::model::{Core, EventKind, Workload, SELF_SOURCE_ID};
use beacond::supervisor::{ProcessSupervisor, Supervisor};
use clap::{Parser, Subcommand};
use log::{error, info};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "beacond", about = "Projects container/VM lifecycle into DNS and load-balancer configuration")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the convergence daemon.
    Run,
    /// Print version information.
    Version,
}

#[derive(Debug)]
struct Info {
    version: &'static str,
    target: &'static str,
}

// We don't pull in a json crate just to print four fields.
impl fmt::Display for Info {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{\n  \"version\": \"{}\",\n  \"target\": \"{}\"\n}}",
            self.version, self.target
        )
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Version => {
            println!(
                "{}",
                Info {
                    version: env!("CARGO_PKG_VERSION"),
                    target: std::env::consts::ARCH,
                }
            );
            Ok(())
        }
        Command::Run => tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?
            .block_on(run()),
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let docker = docker::connect(&config.docker_socket)?;
    let self_ip = match &config.external_ip {
        Some(ip) => ip.parse()?,
        None => match &docker {
            Some(client) => docker::discover_self(client).await?,
            None => anyhow::bail!(
                "EXTERNAL_IP is not set and the container adapter is unavailable for self-discovery"
            ),
        },
    };
    info!("daemon self-IP is {self_ip}");

    let supervisor: Arc<dyn Supervisor> = Arc::new(ProcessSupervisor::new(
        "/var/run/dnsmasq.pid",
        "beacon-lb-reload",
    ));
    let core = Arc::new(Core::new(config.clone(), supervisor, self_ip));

    let self_hostname = nix::unistd::gethostname()?.to_string_lossy().into_owned();
    core.start(Workload {
        source_id: SELF_SOURCE_ID.to_string(),
        name: self_hostname.clone(),
        hostname: self_hostname,
        ip: self_ip,
        network: "self".to_string(),
        labels: HashMap::new(),
    })
    .await?;

    let docker_source: Arc<dyn WorkloadSource> = match docker {
        Some(client) => Arc::new(docker::DockerSource::new(client, self_ip)),
        None => Arc::new(NoopSource),
    };

    #[cfg(feature = "libvirt")]
    let libvirt_source: Arc<dyn WorkloadSource> = match libvirt::connect(&config.libvirt_socket)? {
        Some(connect) => Arc::new(libvirt::LibvirtSource::new(connect, config.libvirt_ip_timeout)),
        None => Arc::new(NoopSource),
    };
    #[cfg(not(feature = "libvirt"))]
    let libvirt_source: Arc<dyn WorkloadSource> = Arc::new(NoopSource);

    for workload in docker_source.enumerate().await? {
        core.start(workload).await?;
    }
    for workload in libvirt_source.enumerate().await? {
        core.start(workload).await?;
    }

    let (tx, rx) = flume::unbounded();
    for source in [docker_source, libvirt_source] {
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Err(e) = source.run(tx).await {
                error!("adapter stopped: {e:#}");
            }
        });
    }
    drop(tx);

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }
            event = rx.recv_async() => {
                let Ok(event) = event else {
                    info!("all adapters stopped, shutting down");
                    break;
                };
                let result = match event.kind {
                    EventKind::Start(workload) => core.start(workload).await,
                    EventKind::Stop => core.stop(&event.source_id).await,
                };
                if let Err(e) = result {
                    error!("convergence failed for {}: {e}", event.source_id);
                }
            }
        }
    }

    Ok(())
}
