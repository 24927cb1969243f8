//! Centralized ZMQ socket configuration for the lymph transport.
//!
//! All socket setup goes through these helpers so that fixing a bug here
//! fixes it for every caller.
//!
//! ## Configuration applied
//!
//! - `LINGER` set to 0 for clean shutdown
//! - `RECONNECT_IVL_MAX` capped to prevent runaway backoff
//! - `RECONNECT_IVL` kept short for responsive reconnection
//!
//! ## Socket types
//!
//! `tmq` doesn't export socket types directly; callers use the trait
//! aliases below with generic bounds for stored sockets.

use anyhow::{Context, Result};
use futures::{Sink, Stream};
use tmq::{publish, router, TmqError};

pub use tmq::Context as ZmqContext;
pub use tmq::Multipart;

/// Trait bound for PUB sockets (send only), used by the monitor.
pub trait PublisherSocket: Sink<Multipart, Error = TmqError> + Unpin + Send {}
impl<T> PublisherSocket for T where T: Sink<Multipart, Error = TmqError> + Unpin + Send {}

pub const DEFAULT_RECONNECT_IVL_MS: i32 = 200;
pub const DEFAULT_RECONNECT_IVL_MAX_MS: i32 = 10_000;

/// Trait bound for ROUTER sockets (send and receive, identity-addressed).
pub trait RouterSocket:
    Stream<Item = Result<Multipart, TmqError>> + Sink<Multipart, Error = TmqError> + Unpin + Send
{
}
impl<T> RouterSocket for T where
    T: Stream<Item = Result<Multipart, TmqError>> + Sink<Multipart, Error = TmqError> + Unpin + Send
{
}

/// Bind a ROUTER socket with identity set to its own endpoint.
///
/// Matches the source's `_bind`: the socket's ZMQ identity is the endpoint
/// string so peers can route replies back without a separate registry.
pub fn bind_router(ctx: &ZmqContext, endpoint: &str) -> Result<impl RouterSocket> {
    router(ctx)
        .set_linger(0)
        .set_identity(endpoint.as_bytes())
        .set_reconnect_ivl(DEFAULT_RECONNECT_IVL_MS)
        .set_reconnect_ivl_max(DEFAULT_RECONNECT_IVL_MAX_MS)
        .bind(endpoint)
        .with_context(|| format!("failed to bind ROUTER to {endpoint}"))
}

/// Bind a ROUTER socket to a pre-bound fd handed off by a supervisor process
/// instead of opening a fresh one.
///
/// Matches the source's `get_shared_socket_fd`/`LYMPH_SHARED_SOCKET_FDS`
/// hand-off contract: `ZMQ_USE_FD` tells libzmq to adopt the given fd rather
/// than create its own when `bind` is called.
pub fn bind_router_with_fd(ctx: &ZmqContext, endpoint: &str, fd: i32) -> Result<impl RouterSocket> {
    router(ctx)
        .set_linger(0)
        .set_identity(endpoint.as_bytes())
        .set_reconnect_ivl(DEFAULT_RECONNECT_IVL_MS)
        .set_reconnect_ivl_max(DEFAULT_RECONNECT_IVL_MAX_MS)
        .set_use_fd(fd as i64)
        .bind(endpoint)
        .with_context(|| format!("failed to bind ROUTER to {endpoint} using shared fd {fd}"))
}

/// Connect a ROUTER socket to a peer's ROUTER endpoint.
///
/// The source connects ROUTER-to-ROUTER rather than DEALER-to-ROUTER so each
/// side can address the other by identity in both directions; `tmq`/`zmq`
/// allow a ROUTER socket to `connect()` just like a DEALER.
pub fn connect_router(ctx: &ZmqContext, own_endpoint: &str, peer_endpoint: &str) -> Result<impl RouterSocket> {
    router(ctx)
        .set_linger(0)
        .set_identity(own_endpoint.as_bytes())
        .set_reconnect_ivl(DEFAULT_RECONNECT_IVL_MS)
        .set_reconnect_ivl_max(DEFAULT_RECONNECT_IVL_MAX_MS)
        .connect(peer_endpoint)
        .with_context(|| format!("failed to connect ROUTER to {peer_endpoint}"))
}

/// Connect a PUB socket to a stats collector endpoint.
///
/// Matches the source's `Monitor.__init__`: the monitor connects out to a
/// fixed collector address rather than binding its own.
pub fn connect_publisher(ctx: &ZmqContext, collector_endpoint: &str) -> Result<impl PublisherSocket> {
    publish(ctx)
        .set_linger(0)
        .connect(collector_endpoint)
        .with_context(|| format!("failed to connect PUB to {collector_endpoint}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_bounds_are_sane() {
        assert!(DEFAULT_RECONNECT_IVL_MS < DEFAULT_RECONNECT_IVL_MAX_MS);
    }
}
