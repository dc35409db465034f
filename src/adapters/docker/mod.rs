//! Container adapter (spec §4.1.1): enumerates and streams lifecycle
//! events from the Docker Engine API via `bollard`.

use crate::error::{BeaconError, BeaconResult, BeaconWrap};
use crate::model::{Event, EventKind, Workload};
use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, ListContainersOptions};
use bollard::models::{ContainerInspectResponse, EventMessageTypeEnum};
use bollard::system::EventsOptions;
use bollard::Docker;
use futures_util::StreamExt;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::net::IpAddr;
use tokio::sync::Mutex;

const NETWORK_MODE_HOST: &str = "host";

/// Connects to the Engine API at `socket`. Returns `Ok(None)` when the
/// socket path doesn't exist, so the caller can fall back to a no-op
/// source (spec §4.1: adapters optional).
pub fn connect(socket: &str) -> BeaconResult<Option<Docker>> {
    match Docker::connect_with_unix(socket, 120, bollard::API_DEFAULT_VERSION) {
        Ok(docker) => Ok(Some(docker)),
        Err(bollard::errors::Error::SocketNotFoundError(path)) => {
            info!("docker socket {path} not found, container adapter disabled");
            Ok(None)
        }
        Err(e) => Err(BeaconError::msg(format!("connect to docker: {e}"))),
    }
}

/// Match the daemon's own container by hostname against the running
/// containers (spec §4.1.1 self-discovery). Fatal if no match is found,
/// per spec: the daemon cannot meaningfully register itself otherwise.
pub async fn discover_self(docker: &Docker) -> BeaconResult<IpAddr> {
    let own_hostname = nix::unistd::gethostname()
        .wrap("read own hostname")?
        .to_string_lossy()
        .into_owned();

    let summaries = docker
        .list_containers(Some(ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        }))
        .await
        .wrap("list containers for self-discovery")?;

    for summary in summaries {
        let Some(id) = summary.id else { continue };
        let inspect = docker
            .inspect_container(&id, None::<InspectContainerOptions>)
            .await
            .wrap(format!("inspect {id}"))?;
        let hostname = inspect
            .config
            .as_ref()
            .and_then(|c| c.hostname.clone())
            .unwrap_or_default();
        if hostname == own_hostname {
            if let Some(ip) = primary_ip(&inspect) {
                return Ok(ip);
            }
        }
    }

    Err(BeaconError::msg(format!(
        "self-discovery failed: no running container with hostname {own_hostname:?}"
    )))
}

fn primary_ip(inspect: &ContainerInspectResponse) -> Option<IpAddr> {
    let networks = inspect.network_settings.as_ref()?.networks.as_ref()?;
    networks
        .values()
        .find_map(|ep| ep.ip_address.as_deref())
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
}

fn workload_from_inspect(id: &str, inspect: ContainerInspectResponse, self_ip: IpAddr) -> Option<Workload> {
    let name = inspect
        .name
        .clone()
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_else(|| id.to_string());
    let hostname = inspect
        .config
        .as_ref()
        .and_then(|c| c.hostname.clone())
        .unwrap_or_else(|| name.clone());
    let labels = inspect
        .config
        .as_ref()
        .and_then(|c| c.labels.clone())
        .unwrap_or_default();

    let network_mode = inspect
        .host_config
        .as_ref()
        .and_then(|h| h.network_mode.clone());

    if network_mode.as_deref() == Some(NETWORK_MODE_HOST) {
        return Some(Workload {
            source_id: id.to_string(),
            name,
            hostname,
            ip: self_ip,
            network: NETWORK_MODE_HOST.to_string(),
            labels,
        });
    }

    let networks = inspect.network_settings.as_ref()?.networks.as_ref()?;
    let (network, ip) = networks.iter().find_map(|(net_name, ep)| {
        ep.ip_address
            .as_deref()
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse::<IpAddr>().ok())
            .map(|ip| (net_name.clone(), ip))
    })?;

    Some(Workload {
        source_id: id.to_string(),
        name,
        hostname,
        ip,
        network,
        labels,
    })
}

/// The container `WorkloadSource`: enumerates via inspect-all, streams the
/// Engine's global event feed filtered to `container` `start`/`die`, and
/// caches inspections between the two so a `die` doesn't need a (likely
/// already-gone) inspect call to resolve.
pub struct DockerSource {
    docker: Docker,
    self_ip: IpAddr,
    cache: Mutex<HashMap<String, ContainerInspectResponse>>,
}

impl DockerSource {
    pub fn new(docker: Docker, self_ip: IpAddr) -> Self {
        Self {
            docker,
            self_ip,
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn inspect(&self, id: &str) -> BeaconResult<ContainerInspectResponse> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .wrap(format!("inspect {id}"))?;
        self.cache
            .lock()
            .await
            .insert(id.to_string(), inspect.clone());
        Ok(inspect)
    }
}

#[async_trait]
impl crate::adapters::WorkloadSource for DockerSource {
    async fn enumerate(&self) -> BeaconResult<Vec<Workload>> {
        let summaries = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await
            .wrap("list containers")?;

        let mut workloads = Vec::new();
        for summary in summaries {
            let Some(id) = summary.id else { continue };
            let inspect = self.inspect(&id).await?;
            match workload_from_inspect(&id, inspect, self.self_ip) {
                Some(w) => workloads.push(w),
                None => warn!("container {id}: no usable IP, skipping registration"),
            }
        }
        Ok(workloads)
    }

    async fn run(&self, tx: flume::Sender<Event>) -> BeaconResult<()> {
        let mut options = HashMap::new();
        options.insert("type".to_string(), vec!["container".to_string()]);
        let mut stream = self.docker.events(Some(EventsOptions::<String> {
            filters: options,
            ..Default::default()
        }));

        while let Some(item) = stream.next().await {
            let message = match item {
                Ok(m) => m,
                Err(e) => {
                    warn!("docker event stream error: {e}");
                    continue;
                }
            };
            if message.typ != Some(EventMessageTypeEnum::CONTAINER) {
                continue;
            }
            let Some(actor) = message.actor else { continue };
            let Some(id) = actor.id else { continue };
            let Some(action) = message.action else { continue };

            match action.as_str() {
                "start" => {
                    let inspect = match self.inspect(&id).await {
                        Ok(i) => i,
                        Err(e) => {
                            warn!("inspect {id} after start event failed: {e}");
                            continue;
                        }
                    };
                    match workload_from_inspect(&id, inspect, self.self_ip) {
                        Some(workload) => {
                            debug!("container {id} started");
                            let _ = tx
                                .send_async(Event {
                                    source_id: id,
                                    kind: EventKind::Start(workload),
                                })
                                .await;
                        }
                        None => warn!("container {id}: no usable IP on start, skipping"),
                    }
                }
                "die" => {
                    self.cache.lock().await.remove(&id);
                    debug!("container {id} died");
                    let _ = tx
                        .send_async(Event {
                            source_id: id,
                            kind: EventKind::Stop,
                        })
                        .await;
                }
                _ => {}
            }
        }

        Ok(())
    }
}
