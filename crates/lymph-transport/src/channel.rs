//! Request/reply channel state machines.
//!
//! A [`RequestChannel`] is the caller-side handle for one outstanding REQ: it
//! resolves exactly once, via a [`tokio::sync::oneshot`], to either a
//! terminal reply or a local error (timeout, transport failure). A
//! [`ReplyChannel`] is the callee-side counterpart handed to a request
//! handler so it can ack, nack, reply, or error exactly once.

use std::fmt;

use bytes::Bytes;
use lymph_proto::{LymphError, Message, MessageType};
use tokio::sync::oneshot;
use uuid::Uuid;

/// The terminal outcome delivered to a waiting caller.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Reply(Message),
    Nack,
    Error { kind: String, message: String },
}

/// Caller-side handle: created when a REQ is sent, resolved once when its
/// terminal reply (or a local failure) arrives.
pub struct RequestChannel {
    pub request_id: Uuid,
    tx: Option<oneshot::Sender<Result<RequestOutcome, LymphError>>>,
}

impl fmt::Debug for RequestChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestChannel")
            .field("request_id", &self.request_id)
            .field("resolved", &self.tx.is_none())
            .finish()
    }
}

/// Awaiting half returned alongside [`RequestChannel`].
pub struct RequestAwait {
    rx: oneshot::Receiver<Result<RequestOutcome, LymphError>>,
}

impl RequestChannel {
    pub fn new(request_id: Uuid) -> (Self, RequestAwait) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                request_id,
                tx: Some(tx),
            },
            RequestAwait { rx },
        )
    }

    /// Resolve with a terminal reply. A no-op if already resolved, matching
    /// the source's "last write wins, duplicates are ignored" reply handling.
    pub fn complete(&mut self, message: Message) {
        let Some(tx) = self.tx.take() else { return };
        let outcome = match message.kind {
            MessageType::Rep => RequestOutcome::Reply(message),
            MessageType::Nack => RequestOutcome::Nack,
            MessageType::Err => {
                let kind = message
                    .headers
                    .get("error_kind")
                    .cloned()
                    .unwrap_or_else(|| "Error".to_string());
                let text = String::from_utf8_lossy(&message.body).to_string();
                RequestOutcome::Error {
                    kind,
                    message: text,
                }
            }
            MessageType::Req | MessageType::Ack => return,
        };
        let _ = tx.send(Ok(outcome));
    }

    pub fn fail(&mut self, err: LymphError) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(err));
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.is_none()
    }
}

impl RequestAwait {
    pub async fn wait(self) -> Result<RequestOutcome, LymphError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(LymphError::Io("request channel dropped".to_string())),
        }
    }
}

/// Callee-side handle given to a request handler for a single inbound REQ.
///
/// Exactly one of `ack`/`nack`/`reply`/`error` may be called; subsequent
/// calls are no-ops, mirroring the source's idempotent reply guard.
pub struct ReplyChannel {
    request: Message,
    source: String,
    sender: Option<Box<dyn FnOnce(Message) + Send>>,
}

impl ReplyChannel {
    pub fn new(request: Message, source: impl Into<String>, sender: impl FnOnce(Message) + Send + 'static) -> Self {
        Self {
            request,
            source: source.into(),
            sender: Some(Box::new(sender)),
        }
    }

    pub fn request(&self) -> &Message {
        &self.request
    }

    fn send(&mut self, kind: MessageType, body: Bytes) {
        let Some(sender) = self.sender.take() else { return };
        let reply = Message::reply_to(&self.request, kind, &self.source, body);
        sender(reply);
    }

    pub fn ack(&mut self) {
        self.send(MessageType::Ack, Bytes::new());
    }

    pub fn nack(&mut self) {
        self.send(MessageType::Nack, Bytes::new());
    }

    pub fn reply(&mut self, body: Bytes) {
        self.send(MessageType::Rep, body);
    }

    pub fn error(&mut self, kind: &str, message: &str) {
        let Some(sender) = self.sender.take() else { return };
        let mut reply = Message::reply_to(&self.request, MessageType::Err, &self.source, Bytes::from(message.to_string()));
        reply.headers.insert("error_kind".to_string(), kind.to_string());
        sender(reply);
    }

    pub fn is_answered(&self) -> bool {
        self.sender.is_none()
    }
}

impl Drop for ReplyChannel {
    fn drop(&mut self) {
        // An un-replied handler implicitly nacks, matching the source's
        // behaviour when a greenlet handling a request dies uncleanly.
        if self.sender.is_some() {
            self.nack();
        }
    }
}
