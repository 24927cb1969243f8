//! Service discovery: named services, instance liveness, pluggable backends.

pub mod registry;
pub mod service;

pub use registry::{InMemoryRegistry, Registry, ServiceCache};
pub use service::{PeerConnector, Service, ServiceEvent, ServiceInstance, ServiceInstanceInfo};
