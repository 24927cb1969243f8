//! Error taxonomy shared across the lymph runtime crates.

use uuid::Uuid;

/// All failure modes a caller of the runtime can observe.
#[derive(Debug, thiserror::Error)]
pub enum LymphError {
    /// An operation exceeded its deadline.
    #[error("timed out waiting for reply to request {request_id}")]
    Timeout { request_id: Uuid },

    /// The peer explicitly refused to handle the request.
    #[error("request {request_id} was nacked by the peer")]
    Nack { request_id: Uuid },

    /// The peer executed the handler and returned a structured error.
    #[error("request {request_id} failed: {kind}: {message}")]
    ErrorReply {
        request_id: Uuid,
        kind: String,
        message: String,
    },

    /// A service name could not be resolved via the registry.
    #[error("no such service: {service}")]
    LookupFailure { service: String },

    /// The registry backend refused to advertise this service.
    #[error("failed to register service {service}: {reason}")]
    RegistrationFailure { service: String, reason: String },

    /// No live instance of a service was available after bounded retries.
    #[error("not connected: no live instance of {service} available")]
    NotConnected { service: String },

    /// A `LYMPH_SHARED_SOCKET_FDS` entry was requested but not present.
    #[error("no shared socket fd for port {port}")]
    SocketNotCreated { port: u16 },

    /// Caller and callee advertise no common content type.
    #[error("no common serialization between caller and {service}")]
    UnsupportedSerialization { service: String },

    /// Frame-level decode failure.
    #[error("frame decode error: {0}")]
    Frame(#[from] crate::message::FrameError),

    /// I/O failure from the underlying transport.
    #[error("transport I/O error: {0}")]
    Io(String),
}

impl LymphError {
    /// True if [`crate::Retry`] should treat this as retry-eligible.
    ///
    /// Mirrors the source's `RetryableError` marker: only transient
    /// conditions (timeouts and not-yet-connected peers) are retried, never
    /// application-level rejections.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LymphError::Timeout { .. } | LymphError::NotConnected { .. }
        )
    }
}
