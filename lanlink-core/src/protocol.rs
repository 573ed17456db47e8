//! LanLink wire protocol: discovery datagrams and session envelopes.
//!
//! Both layers are UTF-8 JSON with a `type` tag, kept compatible with the
//! field names the original deployment put on the wire.

use serde::{Deserialize, Serialize};

use crate::identity::{PeerId, TransferId};

/// Discovery-layer datagram, broadcast over UDP.
///
/// `port` is the announcing peer's transport listen port; `discovery_port`
/// echoes the port the datagram was sent on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Datagram {
    PeerAnnouncement {
        username: String,
        uuid: PeerId,
        port: u16,
        discovery_port: u16,
    },
}

impl Datagram {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Session-layer message. One envelope per transport frame.
///
/// `text`, `image` and `file` carry a string payload plus timestamp;
/// `file_chunk` carries its transfer bookkeeping fields flat in the object,
/// with the chunk bytes base64 encoded in `chunk_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    Text {
        content: String,
        timestamp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
    },
    /// Image share: `content` is the filename, metadata only.
    Image {
        content: String,
        timestamp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
    },
    /// Legacy whole-file notice, superseded by the chunk flow.
    File {
        content: String,
        timestamp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
    },
    FileChunk {
        transfer_id: TransferId,
        chunk_data: String,
        chunk_index: u64,
        total_chunks: u64,
        file_size: u64,
        filename: String,
    },
    FileCompleted {
        content: String,
        timestamp: String,
    },
    FileError {
        content: String,
        timestamp: String,
    },
}

impl Envelope {
    pub fn text(content: impl Into<String>, sender: Option<String>) -> Self {
        Envelope::Text {
            content: content.into(),
            timestamp: now_timestamp(),
            sender,
        }
    }

    pub fn image(filename: impl Into<String>, sender: Option<String>) -> Self {
        Envelope::Image {
            content: filename.into(),
            timestamp: now_timestamp(),
            sender,
        }
    }

    pub fn file_completed(filename: impl Into<String>) -> Self {
        Envelope::FileCompleted {
            content: filename.into(),
            timestamp: now_timestamp(),
        }
    }

    pub fn file_error(message: impl Into<String>) -> Self {
        Envelope::FileError {
            content: message.into(),
            timestamp: now_timestamp(),
        }
    }
}

/// Current time as an RFC 3339 string, the envelope timestamp format.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announcement_wire_fields() {
        let ann = Datagram::PeerAnnouncement {
            username: "alice".into(),
            uuid: PeerId::random(),
            port: 8081,
            discovery_port: 8080,
        };
        let v: serde_json::Value = serde_json::from_slice(&ann.to_bytes().unwrap()).unwrap();
        assert_eq!(v["type"], "peer_announcement");
        assert_eq!(v["username"], "alice");
        assert_eq!(v["port"], 8081);
        assert_eq!(v["discovery_port"], 8080);
        assert!(v["uuid"].is_string());
    }

    #[test]
    fn announcement_roundtrip() {
        let ann = Datagram::PeerAnnouncement {
            username: "bob".into(),
            uuid: PeerId::random(),
            port: 9000,
            discovery_port: 9001,
        };
        let back = Datagram::from_bytes(&ann.to_bytes().unwrap()).unwrap();
        assert_eq!(ann, back);
    }

    #[test]
    fn unknown_datagram_type_rejected() {
        let err = Datagram::from_bytes(br#"{"type":"mystery","username":"x"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn text_envelope_wire_fields() {
        let env = Envelope::text("hi", Some("alice".into()));
        let v: serde_json::Value = serde_json::to_value(&env).unwrap();
        assert_eq!(v["type"], "text");
        assert_eq!(v["content"], "hi");
        assert_eq!(v["sender"], "alice");
        assert!(v["timestamp"].is_string());
    }

    #[test]
    fn sender_omitted_when_absent() {
        let env = Envelope::text("hi", None);
        let v: serde_json::Value = serde_json::to_value(&env).unwrap();
        assert!(v.get("sender").is_none());
    }

    #[test]
    fn file_chunk_fields_are_flat() {
        let env = Envelope::FileChunk {
            transfer_id: TransferId::random(),
            chunk_data: "aGVsbG8=".into(),
            chunk_index: 2,
            total_chunks: 3,
            file_size: 20_000,
            filename: "photo.png".into(),
        };
        let v: serde_json::Value = serde_json::to_value(&env).unwrap();
        assert_eq!(v["type"], "file_chunk");
        assert_eq!(v["chunk_index"], 2);
        assert_eq!(v["total_chunks"], 3);
        assert_eq!(v["file_size"], 20_000);
        assert_eq!(v["filename"], "photo.png");
        assert_eq!(v["chunk_data"], "aGVsbG8=");
    }

    #[test]
    fn legacy_file_envelope_still_parses() {
        // Receive-only kind; nothing in this crate constructs it.
        let env: Envelope = serde_json::from_str(
            r#"{"type":"file","content":"a.bin","timestamp":"t","sender":"bob"}"#,
        )
        .unwrap();
        assert!(matches!(env, Envelope::File { .. }));
    }

    #[test]
    fn envelope_without_sender_still_parses() {
        // Peers running older builds omit the optional sender field.
        let env: Envelope =
            serde_json::from_str(r#"{"type":"text","content":"hi","timestamp":"t"}"#).unwrap();
        assert!(matches!(env, Envelope::Text { sender: None, .. }));
    }
}
