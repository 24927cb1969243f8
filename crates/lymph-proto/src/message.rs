//! The framed RPC unit exchanged between peers.
//!
//! ## Wire format
//!
//! A lymph message is a multipart frame sequence:
//!
//! ```text
//! [routing identity ...]   prepended by a ROUTER socket, scanned off on decode
//! Frame 0: type             1 byte
//! Frame 1: id                 UTF-8 string (UUID)
//! Frame 2: subject           UTF-8 string
//! Frame 3: source             UTF-8 string
//! Frame 4: headers           MessagePack map<string, string>
//! Frame 5: body               bytes (interpretation per content-type header)
//! ```
//!
//! Routing identity frames are never part of the logical message; they are
//! ZMQ ROUTER plumbing and are threaded through separately so a reply can be
//! addressed back to the same peer without the caller ever seeing them.

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const TRACE_ID_HEADER: &str = "trace_id";
pub const CONTENT_TYPE_HEADER: &str = "content_type";

const FRAME_COUNT: usize = 6;

/// Message type discriminant (wire value in parentheses).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// Request (0).
    Req = 0,
    /// Successful reply (1).
    Rep = 1,
    /// Acknowledgement that a request was accepted but has no reply body yet (2).
    Ack = 2,
    /// Explicit refusal to handle the request (3).
    Nack = 3,
    /// The handler ran and produced a structured error (4).
    Err = 4,
}

impl MessageType {
    fn from_u8(v: u8) -> Result<Self, FrameError> {
        match v {
            0 => Ok(MessageType::Req),
            1 => Ok(MessageType::Rep),
            2 => Ok(MessageType::Ack),
            3 => Ok(MessageType::Nack),
            4 => Ok(MessageType::Err),
            other => Err(FrameError::InvalidType(other)),
        }
    }

    /// Terminal reply types: once delivered, a pending request channel is done.
    pub fn is_terminal_reply(&self) -> bool {
        matches!(self, MessageType::Rep | MessageType::Nack | MessageType::Err)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("missing frame {0}")]
    MissingFrame(&'static str),
    #[error("invalid message type byte: {0:#04x}")]
    InvalidType(u8),
    #[error("invalid uuid in id frame")]
    InvalidUuid,
    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),
    #[error("header decode error: {0}")]
    HeaderDecode(#[from] rmp_serde::decode::Error),
    #[error("header encode error: {0}")]
    HeaderEncode(#[from] rmp_serde::encode::Error),
}

/// An immutable RPC message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: MessageType,
    pub id: Uuid,
    /// `"service.method"` for REQ; the originating request's id (as a string)
    /// for REP/ACK/NACK/ERR.
    pub subject: String,
    /// Endpoint of the sender, e.g. `"tcp://10.0.0.4:35551"`.
    pub source: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl Message {
    /// Build a REQ addressed at `service.method`.
    pub fn request(service: &str, method: &str, source: &str, body: Bytes) -> Self {
        Self {
            kind: MessageType::Req,
            id: Uuid::new_v4(),
            subject: format!("{service}.{method}"),
            source: source.to_string(),
            headers: HashMap::new(),
            body,
        }
    }

    /// Build a terminal reply to `request`, reusing its id as the subject.
    pub fn reply_to(request: &Message, kind: MessageType, source: &str, body: Bytes) -> Self {
        debug_assert!(kind.is_terminal_reply() || kind == MessageType::Ack);
        Self {
            kind,
            id: Uuid::new_v4(),
            subject: request.id.to_string(),
            source: source.to_string(),
            headers: HashMap::new(),
            body,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.headers.get(TRACE_ID_HEADER).map(String::as_str)
    }

    /// Ensure `trace_id` is set, generating a fresh one if absent.
    pub fn ensure_trace_id(&mut self) -> &str {
        if !self.headers.contains_key(TRACE_ID_HEADER) {
            self.headers
                .insert(TRACE_ID_HEADER.to_string(), Uuid::new_v4().to_string());
        }
        self.headers.get(TRACE_ID_HEADER).unwrap()
    }

    /// Parse `subject` as `service.method`, splitting on the last `.`.
    ///
    /// Matches the source's `subject.rsplit('.', 1)` so a method name may
    /// itself contain dots (it never should, but the service name might via
    /// namespacing).
    pub fn split_subject(&self) -> Option<(&str, &str)> {
        let idx = self.subject.rfind('.')?;
        Some((&self.subject[..idx], &self.subject[idx + 1..]))
    }

    pub fn to_frames(&self) -> Vec<Bytes> {
        let mut frames = Vec::with_capacity(FRAME_COUNT);
        frames.push(Bytes::copy_from_slice(&[self.kind as u8]));
        frames.push(Bytes::from(self.id.to_string()));
        frames.push(Bytes::from(self.subject.clone()));
        frames.push(Bytes::from(self.source.clone()));
        let headers = rmp_serde::to_vec(&self.headers).expect("header map always serializes");
        frames.push(Bytes::from(headers));
        frames.push(self.body.clone());
        frames
    }

    pub fn to_frames_with_identity(&self, identity: &[Bytes]) -> Vec<Bytes> {
        let mut frames = identity.to_vec();
        frames.extend(self.to_frames());
        frames
    }

    pub fn from_frames(frames: &[Bytes]) -> Result<Self, FrameError> {
        let (_, msg) = Self::from_frames_with_identity(frames)?;
        Ok(msg)
    }

    /// Decode a message, splitting off any ROUTER-prepended identity frames.
    ///
    /// A well-formed lymph message always has exactly [`FRAME_COUNT`] trailing
    /// frames; everything before that is routing identity.
    pub fn from_frames_with_identity(frames: &[Bytes]) -> Result<(Vec<Bytes>, Self), FrameError> {
        if frames.len() < FRAME_COUNT {
            return Err(FrameError::MissingFrame("insufficient frames"));
        }
        let split = frames.len() - FRAME_COUNT;
        let identity = frames[..split].to_vec();
        let body_frames = &frames[split..];

        let kind_frame = &body_frames[0];
        if kind_frame.is_empty() {
            return Err(FrameError::MissingFrame("type"));
        }
        let kind = MessageType::from_u8(kind_frame[0])?;

        let id_frame = std::str::from_utf8(&body_frames[1]).map_err(|_| FrameError::InvalidUtf8("id"))?;
        let id = Uuid::parse_str(id_frame).map_err(|_| FrameError::InvalidUuid)?;

        let subject = std::str::from_utf8(&body_frames[2])
            .map_err(|_| FrameError::InvalidUtf8("subject"))?
            .to_string();
        let source = std::str::from_utf8(&body_frames[3])
            .map_err(|_| FrameError::InvalidUtf8("source"))?
            .to_string();

        let headers: HashMap<String, String> = if body_frames[4].is_empty() {
            HashMap::new()
        } else {
            rmp_serde::from_slice(&body_frames[4])?
        };

        let body = body_frames[5].clone();

        Ok((
            identity,
            Message {
                kind,
                id,
                subject,
                source,
                headers,
                body,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn request_roundtrip() {
        let msg = Message::request("echo", "upper", "tcp://a:1", Bytes::from_static(b"hi"))
            .with_header(TRACE_ID_HEADER, "trace-1");
        let frames = msg.to_frames();
        assert_eq!(frames.len(), FRAME_COUNT);

        let parsed = Message::from_frames(&frames).unwrap();
        assert_eq!(parsed, msg);
        assert_eq!(parsed.subject, "echo.upper");
    }

    #[test]
    fn reply_reuses_request_id_as_subject() {
        let req = Message::request("echo", "upper", "tcp://a:1", Bytes::new());
        let rep = Message::reply_to(&req, MessageType::Rep, "tcp://b:2", Bytes::from_static(b"HI"));
        assert_eq!(rep.subject, req.id.to_string());
    }

    #[test]
    fn split_subject_splits_on_last_dot() {
        let msg = Message::request("ns.echo", "upper", "tcp://a:1", Bytes::new());
        assert_eq!(msg.split_subject(), Some(("ns.echo", "upper")));
    }

    #[test]
    fn identity_prefix_is_recovered() {
        let msg = Message::request("echo", "upper", "tcp://a:1", Bytes::new());
        let identity = vec![Bytes::from_static(b"\x00\x01peer")];
        let framed = msg.to_frames_with_identity(&identity);
        assert_eq!(framed.len(), FRAME_COUNT + 1);

        let (recovered_identity, parsed) = Message::from_frames_with_identity(&framed).unwrap();
        assert_eq!(recovered_identity, identity);
        assert_eq!(parsed, msg);
    }

    #[test]
    fn ensure_trace_id_is_idempotent() {
        let mut msg = Message::request("echo", "upper", "tcp://a:1", Bytes::new());
        assert!(msg.trace_id().is_none());
        let first = msg.ensure_trace_id().to_string();
        let second = msg.ensure_trace_id().to_string();
        assert_eq!(first, second);
    }

    #[test]
    fn short_frame_list_is_rejected() {
        let frames = vec![Bytes::from_static(b"\x00")];
        assert!(matches!(
            Message::from_frames(&frames),
            Err(FrameError::MissingFrame(_))
        ));
    }

    #[test]
    fn terminal_reply_classification() {
        assert!(MessageType::Rep.is_terminal_reply());
        assert!(MessageType::Nack.is_terminal_reply());
        assert!(MessageType::Err.is_terminal_reply());
        assert!(!MessageType::Ack.is_terminal_reply());
        assert!(!MessageType::Req.is_terminal_reply());
    }
}
