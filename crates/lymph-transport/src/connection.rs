//! Per-peer connection state: heartbeat loop and liveness estimate.
//!
//! A direct port of `lymph.core.connection.Connection`: one heartbeat task
//! per connected peer, pinging at `heartbeat_interval` and reclassifying
//! `RESPONSIVE`/`UNRESPONSIVE` from `now - last_seen` against `timeout`.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lymph_proto::{LymphError, SampleWindow};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Anything capable of pinging a peer endpoint and reporting elapsed time.
///
/// [`crate::Transport`] implements this; `Connection` only depends on the
/// trait so its heartbeat loop can be unit-tested against a fake.
#[async_trait]
pub trait Pinger: Send + Sync {
    async fn ping(&self, endpoint: &str, timeout: Duration) -> Result<Duration, LymphError>;
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Unknown = 0,
    Responsive = 1,
    Unresponsive = 2,
    Closed = 3,
}

impl ConnectionStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionStatus::Unknown,
            1 => ConnectionStatus::Responsive,
            2 => ConnectionStatus::Unresponsive,
            _ => ConnectionStatus::Closed,
        }
    }
}

/// A connection to a single peer endpoint.
pub struct Connection {
    pub endpoint: String,
    heartbeat_interval: Duration,
    timeout: Duration,
    created_at: Instant,
    last_seen: RwLock<Option<Instant>>,
    last_message: RwLock<Option<Instant>>,
    heartbeat_samples: RwLock<SampleWindow>,
    explicit_heartbeat_count: AtomicU32,
    sent_message_count: AtomicU64,
    received_message_count: AtomicU64,
    status: AtomicU8,
    heartbeat_task: RwLock<Option<JoinHandle<()>>>,
}

impl Connection {
    pub fn new(endpoint: impl Into<String>, heartbeat_interval: Duration, timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            endpoint: endpoint.into(),
            heartbeat_interval,
            timeout,
            created_at: Instant::now(),
            last_seen: RwLock::new(None),
            last_message: RwLock::new(Some(Instant::now())),
            heartbeat_samples: RwLock::new(SampleWindow::new(100, 1000.0)),
            explicit_heartbeat_count: AtomicU32::new(0),
            sent_message_count: AtomicU64::new(0),
            received_message_count: AtomicU64::new(0),
            status: AtomicU8::new(ConnectionStatus::Unknown as u8),
            heartbeat_task: RwLock::new(None),
        })
    }

    /// Start the heartbeat loop. No-op if already started.
    pub async fn spawn_heartbeat(self: &Arc<Self>, pinger: Arc<dyn Pinger>) {
        let mut guard = self.heartbeat_task.write().await;
        if guard.is_some() {
            return;
        }
        let conn = self.clone();
        *guard = Some(tokio::spawn(async move {
            conn.heartbeat_loop(pinger).await;
        }));
    }

    async fn heartbeat_loop(self: Arc<Self>, pinger: Arc<dyn Pinger>) {
        loop {
            if self.status() == ConnectionStatus::Closed {
                return;
            }
            match pinger.ping(&self.endpoint, self.heartbeat_interval).await {
                Ok(rtt) => {
                    self.heartbeat_samples.write().await.add(rtt.as_secs_f64());
                    self.explicit_heartbeat_count.fetch_add(1, Ordering::Relaxed);
                    *self.last_seen.write().await = Some(Instant::now());
                }
                Err(LymphError::Timeout { .. }) => {
                    // Peer didn't answer in time; leave last_seen untouched,
                    // update_status below will reclassify if it's overdue.
                }
                Err(e) => {
                    error!(endpoint = %self.endpoint, error = %e, "heartbeat ping failed");
                }
            }
            self.update_status().await;
            tokio::time::sleep(self.heartbeat_interval).await;
        }
    }

    async fn update_status(&self) {
        if self.status() == ConnectionStatus::Closed {
            return;
        }
        let last_seen = *self.last_seen.read().await;
        let overdue = match last_seen {
            Some(t) => t.elapsed() >= self.timeout,
            None => true,
        };
        let new_status = if overdue { ConnectionStatus::Unresponsive } else { ConnectionStatus::Responsive };
        self.status.store(new_status as u8, Ordering::Relaxed);
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::Relaxed))
    }

    pub fn is_alive(&self) -> bool {
        self.status() == ConnectionStatus::Responsive
    }

    /// phi-accrual liveness estimate at the current instant.
    pub async fn phi(&self) -> f64 {
        let last_seen = match *self.last_seen.read().await {
            Some(t) => t,
            None => return 0.0,
        };
        let dt = last_seen.elapsed().as_secs_f64();
        self.heartbeat_samples.read().await.phi(dt)
    }

    /// Idempotent close: marks `CLOSED` and cancels the heartbeat task.
    pub async fn close(&self) {
        let previous = self.status.swap(ConnectionStatus::Closed as u8, Ordering::SeqCst);
        if previous == ConnectionStatus::Closed as u8 {
            return;
        }
        if let Some(handle) = self.heartbeat_task.write().await.take() {
            handle.abort();
        }
        debug!(endpoint = %self.endpoint, "connection closed");
    }

    pub async fn on_send(&self) {
        self.sent_message_count.fetch_add(1, Ordering::Relaxed);
        *self.last_message.write().await = Some(Instant::now());
    }

    pub async fn on_recv(&self) {
        self.received_message_count.fetch_add(1, Ordering::Relaxed);
        *self.last_message.write().await = Some(Instant::now());
    }

    pub async fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            endpoint: self.endpoint.clone(),
            status: self.status(),
            phi: self.phi().await,
            sent: self.sent_message_count.load(Ordering::Relaxed),
            received: self.received_message_count.load(Ordering::Relaxed),
            uptime: self.created_at.elapsed(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub endpoint: String,
    pub status: ConnectionStatus,
    pub phi: f64,
    pub sent: u64,
    pub received: u64,
    pub uptime: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysRespondsPinger;

    #[async_trait]
    impl Pinger for AlwaysRespondsPinger {
        async fn ping(&self, _endpoint: &str, _timeout: Duration) -> Result<Duration, LymphError> {
            Ok(Duration::from_millis(5))
        }
    }

    struct NeverRespondsPinger;

    #[async_trait]
    impl Pinger for NeverRespondsPinger {
        async fn ping(&self, _endpoint: &str, _timeout: Duration) -> Result<Duration, LymphError> {
            Err(LymphError::Timeout {
                request_id: uuid::Uuid::nil(),
            })
        }
    }

    #[tokio::test]
    async fn starts_unknown_and_becomes_responsive() {
        let conn = Connection::new("tcp://a:1", Duration::from_millis(10), Duration::from_millis(200));
        assert_eq!(conn.status(), ConnectionStatus::Unknown);
        conn.spawn_heartbeat(Arc::new(AlwaysRespondsPinger)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(conn.status(), ConnectionStatus::Responsive);
        conn.close().await;
    }

    #[tokio::test]
    async fn unresponsive_peer_is_reclassified() {
        let conn = Connection::new("tcp://a:1", Duration::from_millis(10), Duration::from_millis(20));
        conn.spawn_heartbeat(Arc::new(NeverRespondsPinger)).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(conn.status(), ConnectionStatus::Unresponsive);
        conn.close().await;
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let conn = Connection::new("tcp://a:1", Duration::from_millis(10), Duration::from_millis(200));
        conn.spawn_heartbeat(Arc::new(AlwaysRespondsPinger)).await;
        conn.close().await;
        conn.close().await;
        assert_eq!(conn.status(), ConnectionStatus::Closed);
    }

    #[tokio::test]
    async fn recv_updates_last_message() {
        let conn = Connection::new("tcp://a:1", Duration::from_secs(1), Duration::from_secs(1));
        let before = *conn.last_message.read().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        conn.on_recv().await;
        let after = *conn.last_message.read().await;
        assert!(after >= before);
        assert_eq!(conn.received_message_count.load(Ordering::Relaxed), 1);
    }
}
