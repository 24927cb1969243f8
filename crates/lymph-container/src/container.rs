//! The service container: owns one transport, one registry, one event
//! system, a table of installed interfaces, and lifecycle/stats plumbing.
//!
//! Grounded on `lymph.core.container.ServiceContainer`: startup binds the
//! transport, starts the registry/event backends, calls `on_start`/
//! `configure` on every interface, then registers interfaces that opt in;
//! shutdown reverses that order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use lymph_config::LymphConfig;
use lymph_events::{Event, EventSystem, InMemoryEventSystem};
use lymph_proto::{endpoint_identity, LymphError, Message};
use lymph_registry::{InMemoryRegistry, PeerConnector, Registry, ServiceCache};
use lymph_retry::Retry;
use lymph_transport::socket_config::ZmqContext;
use lymph_transport::{ReplyChannel, RequestHandler, RequestOutcome, Transport, TransportConfig};
use tracing::{error, info, warn};

use crate::interface::{DefaultInterface, Interface};
use crate::monitor::Monitor;

/// Best-effort error callback chain, grounded on the source's `Hook`
/// (`core/plugins.py`): every installed hook runs, in order, regardless of
/// whether an earlier one panics being caught is not attempted - hooks are
/// expected to be infallible observers, not control flow.
#[derive(Default, Clone)]
pub struct ErrorHooks(Arc<std::sync::RwLock<Vec<Arc<dyn Fn(&LymphError) + Send + Sync>>>>);

impl ErrorHooks {
    pub fn push(&self, hook: impl Fn(&LymphError) + Send + Sync + 'static) {
        self.0.write().unwrap().push(Arc::new(hook));
    }

    fn fire(&self, err: &LymphError) {
        for hook in self.0.read().unwrap().iter() {
            hook(err);
        }
    }
}

pub struct Container {
    transport: Arc<Transport>,
    events: Arc<dyn EventSystem>,
    service_cache: ServiceCache,
    interfaces: DashMap<String, Arc<dyn Interface>>,
    request_counts: DashMap<String, u64>,
    error_hooks: ErrorHooks,
    monitor: std::sync::Mutex<Option<Monitor>>,
    running: AtomicBool,
    retry: Retry,
}

impl Container {
    /// Build (but do not start) a container bound per `config.infra.node`,
    /// using an in-memory registry/event backend unless the embedding
    /// application installs its own before calling [`Container::start`].
    pub async fn build(config: &LymphConfig) -> anyhow::Result<Arc<Self>> {
        Self::build_with_backends(config, Arc::new(InMemoryRegistry::new()), Arc::new(InMemoryEventSystem::new())).await
    }

    pub async fn build_with_backends(config: &LymphConfig, registry: Arc<dyn Registry>, events: Arc<dyn EventSystem>) -> anyhow::Result<Arc<Self>> {
        let interfaces: DashMap<String, Arc<dyn Interface>> = DashMap::new();
        let request_counts: DashMap<String, u64> = DashMap::new();

        let container_cell: Arc<std::sync::OnceLock<Arc<Container>>> = Arc::new(std::sync::OnceLock::new());
        let dispatch_cell = container_cell.clone();
        let handler: RequestHandler = Arc::new(move |message: Message, reply: ReplyChannel| {
            if let Some(container) = dispatch_cell.get() {
                container.dispatch(message, reply);
            }
        });

        let transport_config = TransportConfig {
            ip: config.infra.node.ip.clone(),
            port: config.infra.node.port,
            endpoint_override: config.infra.node.node_endpoint.clone(),
            heartbeat_interval: Duration::from_secs_f64(config.bootstrap.heartbeat.interval_secs),
            heartbeat_timeout: Duration::from_secs_f64(config.bootstrap.heartbeat.timeout_secs),
            request_timeout: Duration::from_secs_f64(config.bootstrap.retry.timeout_secs),
            shared_fds: config.infra.shared_sockets.fds.clone(),
            ..TransportConfig::default()
        };
        let transport = Transport::bind(transport_config, handler).await?;

        let retry = Retry::new(Duration::from_secs_f64(config.bootstrap.retry.timeout_secs))
            .with_delay(Duration::from_secs_f64(config.bootstrap.retry.delay_secs))
            .with_backoff(config.bootstrap.retry.backoff)
            .with_max_jitter(Duration::from_secs_f64(config.bootstrap.retry.max_jitter_secs));
        let retry = match config.bootstrap.retry.max_delay_secs {
            Some(max) => retry.with_max_delay(Duration::from_secs_f64(max)),
            None => retry,
        };

        let container = Arc::new(Self {
            transport,
            events,
            service_cache: ServiceCache::new(registry),
            interfaces,
            request_counts,
            error_hooks: ErrorHooks::default(),
            monitor: std::sync::Mutex::new(None),
            running: AtomicBool::new(false),
            retry,
        });

        let _ = container_cell.set(container.clone());

        let metrics_container = container.clone();
        container.interfaces.insert(
            "lymph".to_string(),
            Arc::new(DefaultInterface::new(Arc::new(move || metrics_container.metrics()))),
        );

        Ok(container)
    }

    pub fn endpoint(&self) -> &str {
        &self.transport.endpoint
    }

    pub fn identity(&self) -> String {
        endpoint_identity(&self.transport.endpoint)
    }

    pub fn install(&self, interface: Arc<dyn Interface>) {
        self.interfaces.insert(interface.service_name().to_string(), interface);
    }

    pub fn error_hooks(&self) -> &ErrorHooks {
        &self.error_hooks
    }

    /// Resolve `address` to a `(endpoint_identity, connection)` pair: a
    /// direct `scheme://` address bypasses the registry, anything else names
    /// a logical service.
    pub async fn lookup(self: &Arc<Self>, address: &str) -> Result<(String, Arc<lymph_transport::Connection>), LymphError> {
        if address.contains("://") {
            let conn = self.transport.connect(address);
            return Ok((endpoint_identity(address), conn));
        }
        let service = self.service_cache.get(address).await?;
        service.connect(&ConnectorAdapter(self.transport.clone())).await
    }

    /// Send a REQ to `address` (direct endpoint or logical service name) and
    /// await its terminal reply under the container's configured retry.
    pub async fn request(self: &Arc<Self>, address: &str, subject: &str, body: Bytes) -> Result<RequestOutcome, LymphError> {
        let (_identity, connection) = self.lookup(address).await?;
        self.transport.request(&connection.endpoint, subject, body, &self.retry).await
    }

    pub async fn emit(&self, name: &str, body: Bytes) -> Result<(), LymphError> {
        self.events.emit(Event::new(name, body)).await
    }

    fn dispatch(&self, message: Message, reply: ReplyChannel) {
        if !self.running.load(Ordering::SeqCst) {
            warn!(subject = %message.subject, "dropping request, container not running");
            return;
        }
        self.dispatch_running(message, reply);
    }

    fn dispatch_running(&self, message: Message, mut reply: ReplyChannel) {
        let Some((service_name, method_name)) = message.split_subject() else {
            warn!(subject = %message.subject, "malformed subject, dropping");
            return;
        };
        *self.request_counts.entry(message.subject.clone()).or_insert(0) += 1;

        let Some(interface) = self.interfaces.get(service_name) else {
            warn!(service = %service_name, "unsupported service type");
            return;
        };
        let Some(handler) = interface.methods().get(method_name) else {
            warn!(service = %service_name, method = %method_name, "unsupported method");
            return;
        };
        let handler = handler.clone();
        let body = message.body.clone();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(body, reply)));
        if outcome.is_err() {
            error!(subject = %message.subject, "request handler panicked");
            self.error_hooks.fire(&LymphError::Io("request handler panicked".to_string()));
        }
    }

    fn metrics(&self) -> Vec<(String, f64, HashMap<String, String>)> {
        let mut out = Vec::new();
        out.push(("connections".to_string(), self.transport.connection_count() as f64, HashMap::new()));
        for entry in self.request_counts.iter() {
            let mut tags = HashMap::new();
            tags.insert("subject".to_string(), entry.key().clone());
            out.push(("requests".to_string(), *entry.value() as f64, tags));
        }
        out
    }

    fn stats_payload(&self) -> Vec<u8> {
        let metrics = self.metrics();
        rmp_serde::to_vec(&metrics).unwrap_or_default()
    }

    /// Start order, mirroring `ServiceContainer.start`: monitor → registry
    /// `on_start` → events `on_start` → transport (already bound by `build`)
    /// → each interface's `on_start`/`configure` → register interfaces that
    /// opt in.
    pub async fn start(self: &Arc<Self>, config: &LymphConfig, register: bool) -> anyhow::Result<()> {
        self.running.store(true, Ordering::SeqCst);

        if let Some(monitor_endpoint) = &config.infra.telemetry.monitor_endpoint {
            let context = ZmqContext::new();
            let stats_container = self.clone();
            let provider: crate::monitor::StatsProvider = Arc::new(move || stats_container.stats_payload());
            match Monitor::connect(&context, monitor_endpoint, provider) {
                Ok(monitor) => *self.monitor.lock().unwrap() = Some(monitor),
                Err(e) => warn!(error = %e, "failed to connect monitor publisher"),
            }
        }

        self.service_cache.backend().on_start();
        self.events.on_start();

        for entry in self.interfaces.iter() {
            entry.value().on_start();
            entry.value().configure(&HashMap::new());
        }

        info!(endpoint = %self.transport.endpoint, "container started");

        if register {
            for entry in self.interfaces.iter() {
                if !entry.value().register_with_coordinator() {
                    continue;
                }
                if let Err(e) = self.service_cache.backend().register(entry.key(), &self.transport.endpoint).await {
                    error!(service = %entry.key(), error = %e, "registration failed, stopping container");
                    self.stop().await;
                    return Err(e.into());
                }
            }
        }

        Ok(())
    }

    pub async fn stop(self: &Arc<Self>) {
        self.running.store(false, Ordering::SeqCst);
        for entry in self.interfaces.iter() {
            entry.value().on_stop();
        }
        self.events.on_stop();
        self.service_cache.backend().on_stop();
        if let Some(mut monitor) = self.monitor.lock().unwrap().take() {
            monitor.stop().await;
        }
        self.transport.shutdown().await;
        info!(endpoint = %self.transport.endpoint, "container stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

struct ConnectorAdapter(Arc<Transport>);

impl PeerConnector for ConnectorAdapter {
    fn connect(&self, endpoint: &str) -> Arc<lymph_transport::Connection> {
        Transport::connect(&self.0, endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> LymphConfig {
        let mut config = LymphConfig::default();
        config.infra.node.ip = "127.0.0.1".to_string();
        config.infra.node.port = 0;
        config
    }

    #[tokio::test]
    async fn stopped_container_drops_inbound_requests() {
        let container = Container::build(&test_config()).await.unwrap();
        container.running.store(false, Ordering::SeqCst);

        let request = Message::request("lymph", "ping", "tcp://caller:1", Bytes::new());
        let (tx, rx) = std::sync::mpsc::channel();
        let reply = ReplyChannel::new(request.clone(), container.endpoint().to_string(), move |msg| {
            let _ = tx.send(msg);
        });

        container.dispatch(request.clone(), reply);

        assert!(container.request_counts.get(&request.subject).is_none());
        // The dropped ReplyChannel still nacks on drop; that's transport-level
        // bookkeeping, not evidence the request reached an interface handler.
        let _ = rx.recv();
    }
}
