//! Event data models
//!
//! This module defines the ledger event as it arrives on the log and the
//! document handed to the search index.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ledger event as published on the events topic
///
/// Only the identity-bearing fields and the tick/epoch are used by the
/// pipeline; the document indexed is always the raw record, never a
/// re-serialization of this struct.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Era counter
    pub epoch: u32,

    /// Monotonic counter within an epoch
    pub tick: u32,

    /// Event identifier assigned by the source
    pub event_id: u64,

    /// Content checksum supplied by the source
    pub event_digest: u64,

    /// Hash of the transaction that emitted the event
    pub transaction_hash: String,

    /// Event type discriminator
    pub event_type: u32,

    /// Size of the event data
    pub event_size: u32,

    /// Opaque event payload
    pub event_data: String,
}

impl Event {
    /// Parse an event from raw record bytes
    ///
    /// Unknown fields are ignored; a missing field is an error.
    pub fn from_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

/// Deterministic document identifier (lowercase hex)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(String);

impl DocumentId {
    pub(crate) fn from_digest(digest: &[u8]) -> Self {
        DocumentId(hex::encode(digest))
    }

    /// An identifier as echoed back by the index
    pub(crate) fn from_reported(id: impl Into<String>) -> Self {
        DocumentId(id.into())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A document ready to be upserted into the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexableDocument {
    /// Identifier derived from the event's identity fields
    pub id: DocumentId,

    /// Raw record bytes, unmodified
    pub payload: Vec<u8>,
}

impl IndexableDocument {
    pub fn new(id: DocumentId, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }

    /// Payload rendered for log output
    pub fn payload_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "epoch": 150,
        "tick": 18000123,
        "eventId": 42,
        "eventDigest": 9876543210,
        "transactionHash": "zbgvhbmndgwjdzjgqwbmeeeoyoqtbybexpbtwmlgpgdcswnpfvnqpeeadrvc",
        "eventType": 0,
        "eventSize": 72,
        "eventData": "AAAA"
    }"#;

    #[test]
    fn test_parse_event() {
        let event = Event::from_slice(SAMPLE.as_bytes()).unwrap();
        assert_eq!(event.epoch, 150);
        assert_eq!(event.tick, 18000123);
        assert_eq!(event.event_id, 42);
        assert_eq!(event.event_digest, 9876543210);
        assert_eq!(event.event_size, 72);
        assert_eq!(event.event_data, "AAAA");
    }

    #[test]
    fn test_parse_ignores_unknown_fields() {
        let json = r#"{"epoch":1,"tick":2,"eventId":3,"eventDigest":4,"transactionHash":"h",
            "eventType":5,"eventSize":6,"eventData":"d","emittingContract":"x","extra":[1,2]}"#;
        let event = Event::from_slice(json.as_bytes()).unwrap();
        assert_eq!(event.tick, 2);
        assert_eq!(event.transaction_hash, "h");
    }

    #[test]
    fn test_parse_missing_field_fails() {
        let json = r#"{"epoch":1,"tick":2,"eventId":3,"transactionHash":"h",
            "eventType":5,"eventSize":6,"eventData":"d"}"#;
        let err = Event::from_slice(json.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("eventDigest"));
    }

    #[test]
    fn test_parse_rejects_out_of_range_tick() {
        let json = r#"{"epoch":1,"tick":-2,"eventId":3,"eventDigest":4,"transactionHash":"h",
            "eventType":5,"eventSize":6,"eventData":"d"}"#;
        assert!(Event::from_slice(json.as_bytes()).is_err());
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(Event::from_slice(b"not json").is_err());
    }

    #[test]
    fn test_document_id_is_hex() {
        let id = DocumentId::from_digest(&[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(id.as_str(), "deadbeef");
        assert_eq!(id.to_string(), "deadbeef");
    }
}
