//! A named service and the set of instances currently believed to serve it.
//!
//! Grounded on `lymph.core.services.Service`/`ServiceInstance`: instances are
//! keyed by a stable identity (not necessarily the endpoint), liveness is
//! delegated to the instance's underlying [`Connection`], and instance churn
//! is published to observers as `Added`/`Removed`/`Updated` events instead of
//! the source's bespoke `Observable` mixin.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use lymph_proto::{endpoint_identity, LymphError};
use lymph_transport::Connection;
use rand::seq::SliceRandom;
use tokio::sync::broadcast;
use tracing::info;

/// Bounded retries for [`Service::connect`] when no instance looks alive.
const CONNECT_MAX_ATTEMPTS: u32 = 3;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Anything capable of turning an endpoint into a live, heartbeat-tracked
/// [`Connection`]. [`lymph_transport::Transport::connect`] satisfies this.
pub trait PeerConnector: Send + Sync {
    fn connect(&self, endpoint: &str) -> Arc<Connection>;
}

#[derive(Debug, Clone)]
pub struct ServiceInstanceInfo {
    pub endpoint: String,
    pub name: Option<String>,
    pub supported_serializations: Option<Vec<String>>,
}

/// One advertised endpoint for a service.
pub struct ServiceInstance {
    pub identity: String,
    pub info: ServiceInstanceInfo,
    connection: Option<Arc<Connection>>,
}

impl ServiceInstance {
    pub fn new(info: ServiceInstanceInfo, identity: Option<String>) -> Self {
        let identity = identity.unwrap_or_else(|| endpoint_identity(&info.endpoint));
        Self {
            identity,
            info,
            connection: None,
        }
    }

    pub fn update(&mut self, info: ServiceInstanceInfo) {
        self.info = info;
    }

    pub fn connect(&mut self, connector: &dyn PeerConnector) -> Arc<Connection> {
        let conn = connector.connect(&self.info.endpoint);
        self.connection = Some(conn.clone());
        conn
    }

    /// An instance with no connection yet is optimistically alive: it just
    /// hasn't been dialed, not observed to be dead.
    pub fn is_alive(&self) -> bool {
        match &self.connection {
            Some(conn) => conn.is_alive(),
            None => true,
        }
    }
}

/// Membership-change events a [`Service`] publishes to observers.
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    Added { identity: String, endpoint: String },
    Removed { identity: String },
    Updated { identity: String, endpoint: String },
}

/// A named service and its known instances, with liveness-aware random
/// selection for outbound connections.
pub struct Service {
    pub name: String,
    instances: DashMap<String, ServiceInstance>,
    events: broadcast::Sender<ServiceEvent>,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            name: name.into(),
            instances: DashMap::new(),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.events.subscribe()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn identities(&self) -> Vec<String> {
        self.instances.iter().map(|e| e.key().clone()).collect()
    }

    /// Insert a newly-discovered instance, or update it if already known.
    pub fn upsert(&self, identity: String, info: ServiceInstanceInfo) {
        if let Some(mut existing) = self.instances.get_mut(&identity) {
            let endpoint = info.endpoint.clone();
            existing.update(info);
            let _ = self.events.send(ServiceEvent::Updated { identity, endpoint });
        } else {
            let endpoint = info.endpoint.clone();
            self.instances.insert(identity.clone(), ServiceInstance::new(info, Some(identity.clone())));
            let _ = self.events.send(ServiceEvent::Added { identity, endpoint });
        }
    }

    pub fn remove(&self, identity: &str) {
        if self.instances.remove(identity).is_some() {
            let _ = self.events.send(ServiceEvent::Removed {
                identity: identity.to_string(),
            });
        }
    }

    /// Pick a random live instance and connect to it. If none look alive,
    /// retry up to [`CONNECT_MAX_ATTEMPTS`] times with a short sleep between,
    /// giving in-flight heartbeats a chance to reclassify an instance before
    /// giving up. Fails with [`LymphError::NotConnected`] once every attempt
    /// finds zero alive instances (including the zero-instances-at-all case).
    pub async fn connect(&self, connector: &dyn PeerConnector) -> Result<(String, Arc<Connection>), LymphError> {
        for attempt in 0..CONNECT_MAX_ATTEMPTS {
            let alive: Vec<String> = self
                .instances
                .iter()
                .filter(|e| e.value().is_alive())
                .map(|e| e.key().clone())
                .collect();

            if let Some(identity) = alive.choose(&mut rand::thread_rng()).cloned() {
                let mut instance = self.instances.get_mut(&identity).ok_or_else(|| LymphError::NotConnected {
                    service: self.name.clone(),
                })?;
                let connection = instance.connect(connector);
                return Ok((identity, connection));
            }

            info!(service = %self.name, attempt, "no live instance");
            if attempt + 1 < CONNECT_MAX_ATTEMPTS {
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
        }

        Err(LymphError::NotConnected {
            service: self.name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopConnector;

    impl PeerConnector for NoopConnector {
        fn connect(&self, endpoint: &str) -> Arc<Connection> {
            Connection::new(endpoint, std::time::Duration::from_secs(1), std::time::Duration::from_secs(1))
        }
    }

    fn info(endpoint: &str) -> ServiceInstanceInfo {
        ServiceInstanceInfo {
            endpoint: endpoint.to_string(),
            name: None,
            supported_serializations: None,
        }
    }

    #[test]
    fn upsert_then_remove_round_trips() {
        let service = Service::new("echo");
        service.upsert("a".into(), info("tcp://a:1"));
        assert_eq!(service.len(), 1);
        service.remove("a");
        assert!(service.is_empty());
    }

    #[tokio::test]
    async fn connect_with_no_instances_fails() {
        let service = Service::new("echo");
        let connector = NoopConnector;
        assert!(matches!(service.connect(&connector).await, Err(LymphError::NotConnected { .. })));
    }

    #[tokio::test]
    async fn connect_with_no_alive_instances_fails_after_retries() {
        let service = Service::new("echo");
        service.upsert("a".into(), info("tcp://a:1"));
        let connector = FixedConnector {
            connections: DashMap::new(),
        };
        let dead = Connection::new("tcp://a:1", std::time::Duration::from_millis(5), std::time::Duration::from_millis(5));
        dead.spawn_heartbeat(Arc::new(NeverRespondsPinger)).await;
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        connector.connections.insert("tcp://a:1".to_string(), dead.clone());

        // The one known instance is unresponsive, so every retry sees zero
        // alive candidates and connect must still give up with NotConnected.
        service.instances.get_mut("a").unwrap().connect(&connector);
        let started = std::time::Instant::now();
        assert!(matches!(service.connect(&connector).await, Err(LymphError::NotConnected { .. })));
        assert!(started.elapsed() >= std::time::Duration::from_millis(20));

        dead.close().await;
    }

    #[tokio::test]
    async fn connect_picks_a_known_instance() {
        let service = Service::new("echo");
        service.upsert("a".into(), info("tcp://a:1"));
        service.upsert("b".into(), info("tcp://b:2"));
        let connector = NoopConnector;
        let (identity, _conn) = service.connect(&connector).await.unwrap();
        assert!(identity == "a" || identity == "b");
    }

    #[tokio::test]
    async fn upsert_notifies_subscribers() {
        let service = Service::new("echo");
        let mut events = service.subscribe();
        service.upsert("a".into(), info("tcp://a:1"));
        let event = events.recv().await.unwrap();
        assert!(matches!(event, ServiceEvent::Added { .. }));
    }

    struct AlwaysRespondsPinger;

    #[async_trait::async_trait]
    impl lymph_transport::Pinger for AlwaysRespondsPinger {
        async fn ping(&self, _endpoint: &str, _timeout: std::time::Duration) -> Result<std::time::Duration, LymphError> {
            Ok(std::time::Duration::from_millis(1))
        }
    }

    struct NeverRespondsPinger;

    #[async_trait::async_trait]
    impl lymph_transport::Pinger for NeverRespondsPinger {
        async fn ping(&self, _endpoint: &str, _timeout: std::time::Duration) -> Result<std::time::Duration, LymphError> {
            Err(LymphError::Timeout {
                request_id: uuid::Uuid::nil(),
            })
        }
    }

    /// Hands out one pre-built connection per endpoint, already heartbeating
    /// against a fixed pinger, instead of dialing a real peer.
    struct FixedConnector {
        connections: DashMap<String, Arc<Connection>>,
    }

    impl PeerConnector for FixedConnector {
        fn connect(&self, endpoint: &str) -> Arc<Connection> {
            self.connections.get(endpoint).unwrap().clone()
        }
    }

    #[tokio::test]
    async fn connect_only_ever_returns_the_responsive_instance() {
        let responsive = Connection::new("tcp://responsive:1", std::time::Duration::from_millis(5), std::time::Duration::from_millis(200));
        responsive.spawn_heartbeat(Arc::new(AlwaysRespondsPinger)).await;
        let unresponsive = Connection::new("tcp://unresponsive:1", std::time::Duration::from_millis(5), std::time::Duration::from_millis(20));
        unresponsive.spawn_heartbeat(Arc::new(NeverRespondsPinger)).await;

        // Let both heartbeat loops run at least once so status leaves Unknown.
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        assert!(responsive.is_alive());
        assert!(!unresponsive.is_alive());

        let connections = DashMap::new();
        connections.insert("tcp://responsive:1".to_string(), responsive.clone());
        connections.insert("tcp://unresponsive:1".to_string(), unresponsive.clone());
        let connector = FixedConnector { connections };

        let service = Service::new("echo");
        service.upsert("responsive".into(), info("tcp://responsive:1"));
        service.upsert("unresponsive".into(), info("tcp://unresponsive:1"));

        for _ in 0..20 {
            let (identity, _conn) = service.connect(&connector).await.unwrap();
            assert_eq!(identity, "responsive");
        }

        responsive.close().await;
        unresponsive.close().await;
    }
}
