//! ROUTER-to-ROUTER transport: one bound socket receives everything, one
//! dedicated outbound socket per peer sends to it.
//!
//! Mirrors the source's `ZeroRPCServer`, which keeps a single bound
//! `recv_sock` and a single `send_sock` that grows a new `.connect()` per
//! peer as they're discovered. A shared send socket that's connected-to
//! incrementally isn't something this transport layer's socket builder
//! exposes once built, so each peer instead gets its own outbound socket and
//! owning task - architecturally heavier than the source's one-socket
//! design, but the same reactor-per-socket shape `hooteproto`'s client uses
//! everywhere else in this crate.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use lymph_proto::{LymphError, Message, MessageType};
use lymph_retry::Retry;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::channel::{ReplyChannel, RequestChannel, RequestOutcome};
use crate::connection::{Connection, Pinger};
use crate::socket_config::{bind_router, bind_router_with_fd, connect_router, Multipart, RouterSocket, ZmqContext};

/// Invoked once per inbound REQ with the decoded message and a handle to
/// answer it. Must answer via the [`ReplyChannel`] it's given; dropping it
/// without answering sends an implicit NACK.
pub type RequestHandler = Arc<dyn Fn(Message, ReplyChannel) + Send + Sync>;

enum TransportCommand {
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub ip: String,
    /// 0 selects a random ephemeral port, retrying on bind conflicts.
    pub port: u16,
    /// When set, bound verbatim instead of deriving `tcp://ip:port` - mirrors
    /// `NodeConfig::node_endpoint` overriding `ip`/`port`.
    pub endpoint_override: Option<String>,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub request_timeout: Duration,
    pub max_bind_attempts: u32,
    /// Pre-bound listening socket fds, keyed by port, from
    /// `LYMPH_SHARED_SOCKET_FDS`. When `port` has an entry here, `bind` must
    /// adopt that fd instead of binding a fresh socket.
    pub shared_fds: HashMap<u16, i32>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".to_string(),
            port: 0,
            endpoint_override: None,
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
            max_bind_attempts: 10,
            shared_fds: HashMap::new(),
        }
    }
}

/// The running transport: a bound recv socket, one outbound socket per known
/// peer, a map of in-flight requests keyed by message id, and a map of peer
/// connections keyed by endpoint.
pub struct Transport {
    pub endpoint: String,
    config: TransportConfig,
    cmd_tx: mpsc::Sender<TransportCommand>,
    pending: Arc<DashMap<Uuid, RequestChannel>>,
    connections: Arc<DashMap<String, Arc<Connection>>>,
    peer_senders: DashMap<String, mpsc::UnboundedSender<Vec<Bytes>>>,
    context: ZmqContext,
    running: AtomicBool,
}

impl Transport {
    /// Bind a ROUTER socket and spawn its I/O task.
    ///
    /// When `config.port == 0`, a random port in `35536..65536` is tried, up
    /// to `max_bind_attempts` times on conflict, mirroring the source's
    /// `bind('tcp://%s:*')` ZMQ wildcard-port behaviour without depending on
    /// `tmq` exposing the bound port back to us.
    pub async fn bind(config: TransportConfig, handler: RequestHandler) -> Result<Arc<Self>> {
        let context = ZmqContext::new();

        if let Some(endpoint) = config.endpoint_override.clone() {
            let socket = bind_router(&context, &endpoint)?;
            return Ok(Self::spawn(context, endpoint, config, socket, handler));
        }

        // A supervisor that pre-binds listening sockets across a restart hands
        // them off by fd; adopt that fd instead of binding fresh when present.
        if config.port != 0 && !config.shared_fds.is_empty() {
            let fd = *config
                .shared_fds
                .get(&config.port)
                .ok_or(LymphError::SocketNotCreated { port: config.port })?;
            let endpoint = format!("tcp://{}:{}", config.ip, config.port);
            let socket = bind_router_with_fd(&context, &endpoint, fd)?;
            return Ok(Self::spawn(context, endpoint, config, socket, handler));
        }

        let mut attempt: u32 = 0;
        loop {
            let port = if config.port == 0 {
                rand::thread_rng().gen_range(35536..65536)
            } else {
                config.port
            };
            let endpoint = format!("tcp://{}:{}", config.ip, port);
            match bind_router(&context, &endpoint) {
                Ok(socket) => return Ok(Self::spawn(context, endpoint, config, socket, handler)),
                Err(e) if config.port == 0 && attempt + 1 < config.max_bind_attempts => {
                    debug!(endpoint = %endpoint, error = %e, "bind attempt failed, retrying next port");
                    attempt += 1;
                }
                Err(e) => return Err(e).with_context(|| "exhausted bind attempts"),
            }
        }
    }

    fn spawn(
        context: ZmqContext,
        endpoint: String,
        config: TransportConfig,
        socket: impl RouterSocket + 'static,
        handler: RequestHandler,
    ) -> Arc<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let pending = Arc::new(DashMap::new());
        let connections = Arc::new(DashMap::new());

        let transport = Arc::new(Self {
            endpoint: endpoint.clone(),
            config,
            cmd_tx,
            pending: pending.clone(),
            connections: connections.clone(),
            peer_senders: DashMap::new(),
            context,
            running: AtomicBool::new(true),
        });

        let recv_transport = transport.clone();
        tokio::spawn(async move {
            recv_loop(socket, cmd_rx, recv_transport, handler).await;
        });

        transport
    }

    /// Track a peer endpoint, dial an outbound socket to it if this is the
    /// first time we've seen it, and start its heartbeat loop. Idempotent.
    pub fn connect(self: &Arc<Self>, peer_endpoint: &str) -> Arc<Connection> {
        if let Err(e) = self.ensure_peer_socket(peer_endpoint) {
            warn!(endpoint = %peer_endpoint, error = %e, "failed to dial peer");
        }
        if let Some(existing) = self.connections.get(peer_endpoint) {
            return existing.clone();
        }
        let conn = Connection::new(peer_endpoint, self.config.heartbeat_interval, self.config.heartbeat_timeout);
        self.connections.insert(peer_endpoint.to_string(), conn.clone());
        let heartbeat_conn = conn.clone();
        let pinger: Arc<dyn Pinger> = self.clone();
        tokio::spawn(async move {
            heartbeat_conn.spawn_heartbeat(pinger).await;
        });
        conn
    }

    pub fn connection(&self, peer_endpoint: &str) -> Option<Arc<Connection>> {
        self.connections.get(peer_endpoint).map(|c| c.clone())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Dial an outbound socket to `peer_endpoint` unless one already exists.
    fn ensure_peer_socket(&self, peer_endpoint: &str) -> Result<(), LymphError> {
        let vacant = match self.peer_senders.entry(peer_endpoint.to_string()) {
            Entry::Occupied(_) => return Ok(()),
            Entry::Vacant(vacant) => vacant,
        };
        let socket = connect_router(&self.context, &self.endpoint, peer_endpoint).map_err(|e| LymphError::Io(e.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        vacant.insert(tx);
        let endpoint = peer_endpoint.to_string();
        tokio::spawn(async move {
            peer_send_loop(socket, rx, endpoint).await;
        });
        Ok(())
    }

    async fn send_to(&self, peer_endpoint: &str, message: &Message) -> Result<(), LymphError> {
        if !self.running.load(Ordering::SeqCst) {
            error!(endpoint = %peer_endpoint, id = %message.id, "cannot send message, transport not running");
            return Err(LymphError::NotConnected {
                service: peer_endpoint.to_string(),
            });
        }
        self.ensure_peer_socket(peer_endpoint)?;
        let frames = message.to_frames_with_identity(&[Bytes::from(peer_endpoint.as_bytes().to_vec())]);
        let sender = self
            .peer_senders
            .get(peer_endpoint)
            .ok_or_else(|| LymphError::NotConnected {
                service: peer_endpoint.to_string(),
            })?;
        sender
            .send(frames)
            .map_err(|_| LymphError::Io("peer send channel closed".to_string()))?;
        drop(sender);
        if let Some(conn) = self.connections.get(peer_endpoint) {
            conn.on_send().await;
        }
        Ok(())
    }

    /// Send one REQ and await its reply, without the deadline/retry wrapper
    /// `request` adds. Used directly by the heartbeat [`Pinger`] impl, where
    /// retrying a dead peer's ping would just mask the liveness signal.
    async fn request_once(&self, peer_endpoint: &str, subject: &str, body: Bytes, timeout: Duration) -> Result<RequestOutcome, LymphError> {
        let (service, method) = subject.rsplit_once('.').ok_or_else(|| LymphError::LookupFailure {
            service: subject.to_string(),
        })?;
        let message = Message::request(service, method, &self.endpoint, body);
        let (channel, awaiting) = RequestChannel::new(message.id);
        self.pending.insert(message.id, channel);
        self.send_to(peer_endpoint, &message).await?;
        match tokio::time::timeout(timeout, awaiting.wait()).await {
            Ok(result) => result,
            Err(_) => {
                self.pending.remove(&message.id);
                Err(LymphError::Timeout { request_id: message.id })
            }
        }
    }

    /// Send a REQ to `peer_endpoint` and await its terminal reply, retrying
    /// on retryable errors under `retry`.
    pub async fn request(self: &Arc<Self>, peer_endpoint: &str, subject: &str, body: Bytes, retry: &Retry) -> Result<RequestOutcome, LymphError> {
        self.connect(peer_endpoint);
        let timeout = self.config.request_timeout;
        retry
            .execute(|| self.request_once(peer_endpoint, subject, body.clone(), timeout))
            .await
    }

    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        for conn in self.connections.iter() {
            conn.value().close().await;
        }
        self.peer_senders.clear();
        let _ = self.cmd_tx.send(TransportCommand::Shutdown).await;
    }
}

#[async_trait]
impl Pinger for Transport {
    async fn ping(&self, endpoint: &str, timeout: Duration) -> Result<Duration, LymphError> {
        let start = Instant::now();
        self.request_once(endpoint, lymph_proto::PING_SUBJECT, Bytes::new(), timeout)
            .await?;
        Ok(start.elapsed())
    }
}

/// Drains one peer's outbound queue onto its dedicated socket. Ends (and
/// drops the socket) when every sender handle - held only by
/// [`Transport::peer_senders`] - is dropped, i.e. on transport shutdown.
async fn peer_send_loop(mut socket: impl RouterSocket, mut rx: mpsc::UnboundedReceiver<Vec<Bytes>>, peer_endpoint: String) {
    while let Some(frames) = rx.recv().await {
        let multipart: Multipart = frames.into_iter().map(|f| f.to_vec()).collect::<Vec<_>>().into();
        if let Err(e) = socket.send(multipart).await {
            warn!(endpoint = %peer_endpoint, error = %e, "send to peer failed");
        }
    }
}

async fn recv_loop(mut socket: impl RouterSocket, mut cmd_rx: mpsc::Receiver<TransportCommand>, transport: Arc<Transport>, handler: RequestHandler) {
    loop {
        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(TransportCommand::Shutdown) | None => {
                        debug!(endpoint = %transport.endpoint, "recv loop shutting down");
                        break;
                    }
                }
            }

            incoming = socket.next() => {
                match incoming {
                    Some(Ok(multipart)) => {
                        let frames: Vec<Bytes> = multipart.into_iter().map(|m| Bytes::from(m.to_vec())).collect();
                        handle_frames(frames, &transport, &handler).await;
                    }
                    Some(Err(e)) => {
                        warn!(endpoint = %transport.endpoint, error = %e, "receive error");
                    }
                    None => {
                        warn!(endpoint = %transport.endpoint, "socket stream ended");
                        break;
                    }
                }
            }
        }
    }
}

async fn handle_frames(frames: Vec<Bytes>, transport: &Arc<Transport>, handler: &RequestHandler) {
    let (_identity, message) = match Message::from_frames_with_identity(&frames) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, "dropping malformed frame");
            return;
        }
    };

    // Every inbound message implies a live peer, whether or not we initiated
    // the connection - matches the source's `recv_message` calling `connect`
    // unconditionally before dispatching.
    let connection = transport.connect(&message.source);
    connection.on_recv().await;

    match message.kind {
        MessageType::Req => {
            trace!(id = %message.id, subject = %message.subject, "inbound request");
            let reply_transport = transport.clone();
            let reply_peer = message.source.clone();
            let own_endpoint = transport.endpoint.clone();
            let reply_channel = ReplyChannel::new(message.clone(), own_endpoint, move |reply| {
                let reply_transport = reply_transport.clone();
                let reply_peer = reply_peer.clone();
                tokio::spawn(async move {
                    if let Err(e) = reply_transport.send_to(&reply_peer, &reply).await {
                        warn!(error = %e, "failed to send reply");
                    }
                });
            });
            handler(message, reply_channel);
        }
        MessageType::Rep | MessageType::Nack | MessageType::Err => {
            let request_id = Uuid::parse_str(&message.subject).unwrap_or(Uuid::nil());
            if let Some((_, mut channel)) = transport.pending.remove(&request_id) {
                channel.complete(message);
            } else {
                debug!(id = %message.id, "discarding reply for unknown/expired request");
            }
        }
        MessageType::Ack => {
            trace!(id = %message.id, "ack received");
        }
    }
}
