//! RPC transport, connection liveness, and request/reply channels.
//!
//! This crate owns everything that touches a socket: binding and connecting
//! ROUTER sockets ([`socket_config`]), tracking peer liveness with a
//! phi-accrual-style heartbeat ([`connection`]), the caller/callee channel
//! state machines for a single request ([`channel`]), and the tasks that tie
//! them together ([`transport`]) — one recv loop owning the bound socket,
//! plus one dedicated outbound socket and send loop per connected peer.

pub mod channel;
pub mod connection;
pub mod socket_config;
pub mod transport;

pub use channel::{ReplyChannel, RequestAwait, RequestChannel, RequestOutcome};
pub use connection::{Connection, ConnectionStats, ConnectionStatus, Pinger};
pub use transport::{RequestHandler, Transport, TransportConfig};
