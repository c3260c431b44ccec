//! JSON wire protocol between editor clients and the collab server.
//!
//! Every frame is a single JSON object with a `"type"` tag:
//! ```text
//! ┌───────────────┬──────────────────────────────────────────────┐
//! │ client frames │ insert delete paste cut cursor heartbeat     │
//! │               │ sync_request                                 │
//! ├───────────────┼──────────────────────────────────────────────┤
//! │ server frames │ init update cursor presence_join             │
//! │               │ presence_leave sync_response                 │
//! └───────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! Content frames carry character deltas, never full snapshots; full state
//! travels only in `init` and `sync_response`. A frame that fails to decode
//! (unknown tag, missing field, wrong type) is dropped by the transport
//! with no effect on the session.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use coscribe_text::{Character, DocumentSnapshot};

use crate::session::PresenceSummary;

/// Close codes sent when a connection is refused during admission.
pub mod close {
    /// Unclassified server error.
    pub const SERVER_ERROR: u16 = 4000;
    /// No identity could be resolved for the connection.
    pub const NO_IDENTITY: u16 = 4001;
    /// The presented token failed authentication.
    pub const AUTH_FAILED: u16 = 4002;
    /// The identity is known but may not open this document.
    pub const ACCESS_DENIED: u16 = 4003;
    /// The document does not exist.
    pub const NOT_FOUND: u16 = 4004;
}

/// Frames a client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Insert a single character so it lands at `index`.
    Insert { index: usize, value: char },
    /// Tombstone the character at `index`.
    Delete { index: usize },
    /// Batch insert of `text` starting at `index`.
    Paste { index: usize, text: String },
    /// Tombstone the visible range `startIndex..endIndex`.
    Cut {
        #[serde(rename = "startIndex")]
        start_index: usize,
        #[serde(rename = "endIndex")]
        end_index: usize,
    },
    /// Move the sender's cursor.
    Cursor { position: usize },
    /// Liveness signal; refreshes presence only.
    Heartbeat,
    /// Ask for the full current state (reconnect / detected divergence).
    SyncRequest,
}

/// Frames the server sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// First frame after admission: the full document plus who is here.
    Init {
        document_id: Uuid,
        participant_id: Uuid,
        state: DocumentSnapshot,
        cursors: HashMap<Uuid, usize>,
        presence: Vec<PresenceSummary>,
    },
    /// Character deltas resulting from one content operation.
    Update {
        origin: Uuid,
        version: u64,
        characters: Vec<Character>,
    },
    /// Another participant moved their cursor.
    Cursor { participant_id: Uuid, position: usize },
    /// A participant joined the document.
    PresenceJoin { participant: PresenceSummary },
    /// A participant left (or was evicted as inactive).
    PresenceLeave { participant_id: Uuid },
    /// Reply to `sync_request`, addressed to the requester only.
    SyncResponse {
        document_id: Uuid,
        state: DocumentSnapshot,
        cursors: HashMap<Uuid, usize>,
        version: u64,
    },
}

impl ClientFrame {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

impl ServerFrame {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    Encode(String),
    Decode(String),
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encode(e) => write!(f, "encode error: {e}"),
            Self::Decode(e) => write!(f, "decode error: {e}"),
            Self::ConnectionClosed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;
    use coscribe_text::ReplicatedSequence;

    #[test]
    fn test_client_frame_round_trip() {
        let frames = vec![
            ClientFrame::Insert { index: 3, value: 'x' },
            ClientFrame::Delete { index: 0 },
            ClientFrame::Paste { index: 2, text: "hello".into() },
            ClientFrame::Cut { start_index: 1, end_index: 4 },
            ClientFrame::Cursor { position: 9 },
            ClientFrame::Heartbeat,
            ClientFrame::SyncRequest,
        ];
        for frame in frames {
            let encoded = frame.encode().unwrap();
            assert_eq!(ClientFrame::decode(&encoded).unwrap(), frame);
        }
    }

    #[test]
    fn test_wire_tags_match_the_protocol() {
        let encoded = ClientFrame::SyncRequest.encode().unwrap();
        assert!(encoded.contains(r#""type":"sync_request""#));
        let encoded = ClientFrame::Cut { start_index: 1, end_index: 2 }.encode().unwrap();
        assert!(encoded.contains(r#""startIndex":1"#));
        assert!(encoded.contains(r#""endIndex":2"#));
    }

    #[test]
    fn test_decode_from_raw_json() {
        let frame = ClientFrame::decode(r#"{"type":"insert","index":0,"value":"a"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Insert { index: 0, value: 'a' });
        let frame = ClientFrame::decode(r#"{"type":"heartbeat"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Heartbeat);
    }

    #[test]
    fn test_missing_field_is_rejected() {
        // A partially-specified operation must fail decoding so the
        // transport drops it without touching document state.
        assert!(ClientFrame::decode(r#"{"type":"insert","index":0}"#).is_err());
        assert!(ClientFrame::decode(r#"{"type":"cut","startIndex":1}"#).is_err());
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(ClientFrame::decode(r#"{"type":"drop_tables"}"#).is_err());
        assert!(ClientFrame::decode("not json at all").is_err());
    }

    #[test]
    fn test_update_frame_round_trip() {
        let mut seq = ReplicatedSequence::new(Uuid::new_v4());
        let ch = seq.insert(0, 'q');
        let frame = ServerFrame::Update {
            origin: Uuid::new_v4(),
            version: 12,
            characters: vec![ch],
        };
        let decoded = ServerFrame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_init_frame_round_trip() {
        let mut seq = ReplicatedSequence::new(Uuid::new_v4());
        seq.insert(0, 'h');
        seq.insert(1, 'i');
        let doc = Uuid::new_v4();
        let me = Uuid::new_v4();
        let mut cursors = HashMap::new();
        cursors.insert(me, 1usize);

        let frame = ServerFrame::Init {
            document_id: doc,
            participant_id: me,
            state: seq.to_snapshot(2),
            cursors,
            presence: Vec::new(),
        };
        let decoded = ServerFrame::decode(&frame.encode().unwrap()).unwrap();
        match decoded {
            ServerFrame::Init { state, document_id, .. } => {
                assert_eq!(document_id, doc);
                assert_eq!(state.text, "hi");
                assert_eq!(state.version, 2);
            }
            other => panic!("expected init, got {other:?}"),
        }
    }

    #[test]
    fn test_close_codes() {
        assert_eq!(close::SERVER_ERROR, 4000);
        assert_eq!(close::NO_IDENTITY, 4001);
        assert_eq!(close::AUTH_FAILED, 4002);
        assert_eq!(close::ACCESS_DENIED, 4003);
        assert_eq!(close::NOT_FOUND, 4004);
    }
}
