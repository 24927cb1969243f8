//! Typed handler tables installed into a [`crate::Container`].
//!
//! Grounded on `lymph.core.interfaces`: a service exposes a name, a flag
//! controlling whether it's advertised to the coordinator, and a method
//! table built once at install time rather than resolved via runtime
//! attribute lookup.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use lymph_proto::{serializer, CONTENT_TYPE_HEADER};
use lymph_transport::ReplyChannel;

/// One RPC method: given the request body and a handle to answer it.
pub type MethodHandler = Arc<dyn Fn(Bytes, ReplyChannel) + Send + Sync>;

/// A named collection of RPC methods installed into a container.
pub trait Interface: Send + Sync {
    fn service_name(&self) -> &str;

    /// Whether this interface should be advertised to the service registry
    /// on container startup.
    fn register_with_coordinator(&self) -> bool {
        true
    }

    fn methods(&self) -> &HashMap<String, MethodHandler>;

    fn on_start(&self) {}
    fn on_stop(&self) {}
    fn configure(&self, _options: &HashMap<String, String>) {}
}

/// The always-installed interface answering the two reserved subjects every
/// container supports without a service author writing a handler.
pub struct DefaultInterface {
    methods: HashMap<String, MethodHandler>,
}

impl DefaultInterface {
    /// `metrics` produces the body for `lymph.get_metrics`: a list of
    /// `(name, value, tags)` triples per the wire contract in spec §6.
    pub fn new(metrics: Arc<dyn Fn() -> Vec<(String, f64, HashMap<String, String>)> + Send + Sync>) -> Self {
        let mut methods: HashMap<String, MethodHandler> = HashMap::new();

        methods.insert(
            "ping".to_string(),
            Arc::new(|_body: Bytes, mut reply: ReplyChannel| {
                reply.reply(Bytes::new());
            }),
        );

        methods.insert(
            "get_metrics".to_string(),
            Arc::new(move |_body: Bytes, mut reply: ReplyChannel| {
                let triples = metrics();
                let content_type = reply
                    .request()
                    .headers
                    .get(CONTENT_TYPE_HEADER)
                    .map(String::as_str)
                    .unwrap_or("msgpack");
                match serializer::encode(content_type, &triples) {
                    Ok(encoded) => reply.reply(Bytes::from(encoded)),
                    Err(e) => reply.error("EncodeError", &e.to_string()),
                }
            }),
        );

        Self { methods }
    }
}

impl Interface for DefaultInterface {
    fn service_name(&self) -> &str {
        "lymph"
    }

    fn register_with_coordinator(&self) -> bool {
        false
    }

    fn methods(&self) -> &HashMap<String, MethodHandler> {
        &self.methods
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_method_is_registered() {
        let iface = DefaultInterface::new(Arc::new(Vec::new));
        assert!(iface.methods().contains_key("ping"));
        assert!(iface.methods().contains_key("get_metrics"));
        assert!(!iface.register_with_coordinator());
    }
}
