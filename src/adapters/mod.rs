//! Workload source adapters (spec §4.1): each exposes an initial
//! enumeration plus a live event feed. Adapters whose backing socket is
//! absent are expected to degrade to a no-op rather than fail (spec §7).

pub mod docker;
#[cfg(feature = "libvirt")]
pub mod libvirt;

use crate::error::BeaconResult;
use crate::model::Event;
use async_trait::async_trait;

#[async_trait]
pub trait WorkloadSource: Send + Sync {
    /// List every currently-running workload this source knows about.
    async fn enumerate(&self) -> BeaconResult<Vec<crate::model::Workload>>;

    /// Run the live event feed, forwarding `Event`s until the source is
    /// told to stop or its connection drops. Blocks the calling task, so
    /// callers run it on its own task (spec §4.5 container adapter; §4.1.2
    /// VM adapter's dedicated background task).
    async fn run(&self, tx: flume::Sender<Event>) -> BeaconResult<()>;
}

/// Used for a configured-but-absent backend (spec §4.1 "adapters optional
/// (no-op if socket missing)").
pub struct NoopSource;

#[async_trait]
impl WorkloadSource for NoopSource {
    async fn enumerate(&self) -> BeaconResult<Vec<crate::model::Workload>> {
        Ok(Vec::new())
    }

    async fn run(&self, _tx: flume::Sender<Event>) -> BeaconResult<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}
