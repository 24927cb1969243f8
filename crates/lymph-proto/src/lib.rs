//! Wire protocol for the lymph RPC runtime.
//!
//! This crate owns the three things every other lymph crate needs and
//! nothing else: the framed [`Message`] type and its multipart codec,
//! content-type negotiation (`serializer`), and the shared [`LymphError`]
//! taxonomy. It has no socket or async runtime dependency so it can be used
//! from synchronous test harnesses too.

pub mod error;
pub mod message;
pub mod sample_window;
pub mod serializer;

pub use error::LymphError;
pub use message::{FrameError, Message, MessageType, CONTENT_TYPE_HEADER, TRACE_ID_HEADER};
pub use sample_window::SampleWindow;
pub use serializer::ContentType;

/// Reserved subject every container answers without installing any interface.
pub const PING_SUBJECT: &str = "lymph.ping";
/// Reserved subject returning process/runtime metrics.
pub const METRICS_SUBJECT: &str = "lymph.get_metrics";

/// A stable, content-derived identity for an endpoint string.
///
/// The source computes `hashlib.md5(endpoint).hexdigest()`; this uses SHA-256
/// for the same purpose (a stable opaque id, not a security boundary) and
/// truncates to the same 32 hex characters a source identity has.
pub fn endpoint_identity(endpoint: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(endpoint.as_bytes());
    let hex = format!("{digest:x}");
    hex[..32].to_string()
}

#[cfg(test)]
mod identity_tests {
    use super::*;

    #[test]
    fn identity_is_stable_and_endpoint_specific() {
        let a = endpoint_identity("tcp://127.0.0.1:4000");
        let b = endpoint_identity("tcp://127.0.0.1:4000");
        let c = endpoint_identity("tcp://127.0.0.1:4001");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }
}
