//! Pluggable service discovery backend.
//!
//! Grounded on `lymph.discovery.base.BaseServiceRegistry`: `get` caches a
//! [`Service`] per name, lazily populating it from `lookup` on first access.
//! Only an in-memory backend ships here; other backends are installed by the
//! embedding application the way the source expects a Zookeeper/etcd/consul
//! backend to be plugged in via `lymph.discovery.*`.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use lymph_proto::LymphError;

use crate::service::{Service, ServiceInstanceInfo};

/// A discovery backend: advertises this process's services and resolves
/// instances of others.
///
/// Grounded on `lymph.discovery.base.BaseServiceRegistry`: `on_start`/
/// `on_stop` are lifecycle hooks a container calls around backend
/// connect/disconnect, and `discover` lists every service name currently
/// known to the backend (e.g. for an admin/status surface), independent of
/// whatever this process has already looked up into its own cache.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Populate or refresh `service`'s instance list from the backend.
    async fn lookup(&self, service: &Service) -> Result<(), LymphError>;

    /// Advertise `endpoint` as an instance of `service_name`.
    async fn register(&self, service_name: &str, endpoint: &str) -> Result<(), LymphError>;

    /// Withdraw a previously-registered advertisement.
    async fn unregister(&self, service_name: &str, endpoint: &str) -> Result<(), LymphError>;

    /// List every service name currently advertised in the backend.
    async fn discover(&self) -> Result<HashSet<String>, LymphError>;

    /// Called once as the container starts, before any `register` call.
    fn on_start(&self) {}

    /// Called once as the container stops, after all interfaces are
    /// withdrawn.
    fn on_stop(&self) {}
}

/// A process-local registry: services register and resolve entirely within
/// this one `ServiceRegistry`'s `DashMap`, with no external discovery
/// protocol. Sufficient for a single-process container cluster or for tests;
/// matches `backends.registry = "memory"` in [`lymph_config::BootstrapConfig`].
#[derive(Default)]
pub struct InMemoryRegistry {
    advertised: DashMap<String, Vec<String>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn lookup(&self, service: &Service) -> Result<(), LymphError> {
        if let Some(endpoints) = self.advertised.get(&service.name) {
            for endpoint in endpoints.iter() {
                let identity = lymph_proto::endpoint_identity(endpoint);
                service.upsert(
                    identity,
                    ServiceInstanceInfo {
                        endpoint: endpoint.clone(),
                        name: Some(service.name.clone()),
                        supported_serializations: None,
                    },
                );
            }
        }
        Ok(())
    }

    async fn register(&self, service_name: &str, endpoint: &str) -> Result<(), LymphError> {
        self.advertised
            .entry(service_name.to_string())
            .or_default()
            .push(endpoint.to_string());
        Ok(())
    }

    async fn unregister(&self, service_name: &str, endpoint: &str) -> Result<(), LymphError> {
        if let Some(mut endpoints) = self.advertised.get_mut(service_name) {
            endpoints.retain(|e| e != endpoint);
        }
        Ok(())
    }

    async fn discover(&self) -> Result<HashSet<String>, LymphError> {
        Ok(self.advertised.iter().map(|e| e.key().clone()).collect())
    }
}

/// Caches one [`Service`] per name, populated lazily via the backend
/// [`Registry`] on first lookup.
pub struct ServiceCache {
    backend: Arc<dyn Registry>,
    services: DashMap<String, Arc<Service>>,
}

impl ServiceCache {
    pub fn new(backend: Arc<dyn Registry>) -> Self {
        Self {
            backend,
            services: DashMap::new(),
        }
    }

    pub async fn get(&self, service_name: &str) -> Result<Arc<Service>, LymphError> {
        if let Some(service) = self.services.get(service_name) {
            return Ok(service.clone());
        }
        let service = Arc::new(Service::new(service_name));
        self.backend.lookup(&service).await?;
        self.services.insert(service_name.to_string(), service.clone());
        Ok(service)
    }

    pub fn backend(&self) -> &Arc<dyn Registry> {
        &self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_lookup_populates_instances() {
        let registry = InMemoryRegistry::new();
        registry.register("echo", "tcp://127.0.0.1:4000").await.unwrap();

        let service = Service::new("echo");
        registry.lookup(&service).await.unwrap();
        assert_eq!(service.len(), 1);
    }

    #[tokio::test]
    async fn unregister_removes_future_lookups() {
        let registry = InMemoryRegistry::new();
        registry.register("echo", "tcp://127.0.0.1:4000").await.unwrap();
        registry.unregister("echo", "tcp://127.0.0.1:4000").await.unwrap();

        let service = Service::new("echo");
        registry.lookup(&service).await.unwrap();
        assert!(service.is_empty());
    }

    #[tokio::test]
    async fn discover_lists_every_advertised_service() {
        let registry = InMemoryRegistry::new();
        registry.register("echo", "tcp://127.0.0.1:4000").await.unwrap();
        registry.register("upper", "tcp://127.0.0.1:4001").await.unwrap();

        let names = registry.discover().await.unwrap();
        assert_eq!(names, HashSet::from(["echo".to_string(), "upper".to_string()]));
    }

    #[tokio::test]
    async fn service_cache_reuses_service_across_calls() {
        let backend = Arc::new(InMemoryRegistry::new());
        backend.register("echo", "tcp://127.0.0.1:4000").await.unwrap();
        let cache = ServiceCache::new(backend);

        let first = cache.get("echo").await.unwrap();
        let second = cache.get("echo").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
