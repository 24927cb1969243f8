//! Periodic stats publisher.
//!
//! Grounded on `lymph.core.monitoring.Monitor`: connects a PUB socket to a
//! configured collector endpoint and publishes `[b"stats", payload]` every
//! two seconds. The payload carries request/connection/interface counters;
//! true OS rusage deltas (`RUSAGE_ATTRS` in the source) are not reproduced
//! here since the example pack has no grounded crate for process resource
//! usage - see DESIGN.md.

use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use lymph_transport::socket_config::{connect_publisher, Multipart, ZmqContext};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const PUBLISH_INTERVAL: Duration = Duration::from_secs(2);

/// Produces the current stats snapshot as an already-encoded body.
pub type StatsProvider = Arc<dyn Fn() -> Vec<u8> + Send + Sync>;

pub struct Monitor {
    stop: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl Monitor {
    /// Connect the PUB socket now; `start` only spawns the publish loop, so
    /// a bind failure surfaces immediately instead of silently inside a task.
    pub fn connect(context: &ZmqContext, collector_endpoint: &str, provider: StatsProvider) -> anyhow::Result<Self> {
        let socket = connect_publisher(context, collector_endpoint)?;
        let stop = Arc::new(Notify::new());
        let task_stop = stop.clone();
        let task = tokio::spawn(async move {
            publish_loop(socket, provider, task_stop).await;
        });
        Ok(Self {
            stop,
            task: Some(task),
        })
    }

    pub async fn stop(&mut self) {
        self.stop.notify_one();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

async fn publish_loop(mut socket: impl lymph_transport::socket_config::PublisherSocket, provider: StatsProvider, stop: Arc<Notify>) {
    let mut interval = tokio::time::interval(PUBLISH_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = stop.notified() => {
                debug!("monitor publish loop stopping");
                return;
            }
            _ = interval.tick() => {
                let payload = provider();
                let multipart: Multipart = vec![b"stats".to_vec(), payload].into();
                if let Err(e) = socket.send(multipart).await {
                    warn!(error = %e, "failed to publish stats");
                }
            }
        }
    }
}
