//! Content-type negotiation for message bodies.
//!
//! Each peer advertises a priority-ordered list of content types it can
//! produce and consume; callers intersect their own list with the peer's and
//! pick the lowest-priority-number match. Lower number wins, matching the
//! source's `BaseSerializer` registry (msgpack priority 10, json priority 20).

use serde::{de::DeserializeOwned, Serialize};

/// A content type's wire name and negotiation priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ContentType {
    pub priority: u16,
    pub name: &'static str,
}

pub const MSGPACK: ContentType = ContentType {
    priority: 10,
    name: "msgpack",
};
pub const JSON: ContentType = ContentType {
    priority: 20,
    name: "json",
};

/// The content types this process can use, in priority order.
///
/// Mirrors `BaseSerializer.get_available_serializations()`: a fixed,
/// ascending-by-priority list built once at startup.
pub fn available_content_types() -> Vec<ContentType> {
    vec![MSGPACK, JSON]
}

/// Pick the highest-priority content type both `ours` and `theirs` support.
///
/// `theirs` may be empty, meaning the peer expressed no preference; in that
/// case our own first (highest-priority) choice wins, matching the source's
/// fallback in `ServiceInstance.get_best_serialization_type`.
pub fn negotiate(ours: &[ContentType], theirs: &[&str]) -> Option<ContentType> {
    if theirs.is_empty() {
        return ours.first().copied();
    }
    ours.iter().find(|ct| theirs.contains(&ct.name)).copied()
}

#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("msgpack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),
    #[error("msgpack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown content type: {0}")]
    Unknown(String),
}

/// Encode `value` per the named content type.
pub fn encode<T: Serialize>(content_type: &str, value: &T) -> Result<Vec<u8>, SerializeError> {
    match content_type {
        "msgpack" => Ok(rmp_serde::to_vec(value)?),
        "json" => Ok(serde_json::to_vec(value)?),
        other => Err(SerializeError::Unknown(other.to_string())),
    }
}

/// Decode `bytes` per the named content type.
pub fn decode<T: DeserializeOwned>(content_type: &str, bytes: &[u8]) -> Result<T, SerializeError> {
    match content_type {
        "msgpack" => Ok(rmp_serde::from_slice(bytes)?),
        "json" => Ok(serde_json::from_slice(bytes)?),
        other => Err(SerializeError::Unknown(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_types_are_priority_ordered() {
        let types = available_content_types();
        assert_eq!(types[0], MSGPACK);
        assert_eq!(types[1], JSON);
        assert!(types[0].priority < types[1].priority);
    }

    #[test]
    fn negotiate_prefers_lower_priority_number() {
        let ours = available_content_types();
        let picked = negotiate(&ours, &["json", "msgpack"]).unwrap();
        assert_eq!(picked, MSGPACK);
    }

    #[test]
    fn negotiate_falls_back_to_first_when_peer_silent() {
        let ours = available_content_types();
        let picked = negotiate(&ours, &[]).unwrap();
        assert_eq!(picked, MSGPACK);
    }

    #[test]
    fn negotiate_fails_with_no_overlap() {
        let ours = vec![MSGPACK];
        assert!(negotiate(&ours, &["json"]).is_none());
    }

    #[test]
    fn roundtrip_msgpack_and_json() {
        let value = vec!["a".to_string(), "b".to_string()];
        for ct in ["msgpack", "json"] {
            let bytes = encode(ct, &value).unwrap();
            let decoded: Vec<String> = decode(ct, &bytes).unwrap();
            assert_eq!(decoded, value);
        }
    }
}
