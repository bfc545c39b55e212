//! Signaling and data-channel wire messages.
//!
//! Two wire contracts live here:
//!
//! 1. **Signaling** (client ⇄ relay server, JSON text over the duplex
//!    signaling channel): [`ClientMessage`] and [`ServerMessage`]. Each
//!    message is a tagged JSON object, e.g.
//!    `{"type":"verify-code","code":"4821"}`. Offer, answer and candidate
//!    payloads are opaque [`serde_json::Value`]s; the relay forwards them
//!    unmodified and never inspects their contents.
//!
//! 2. **Data channel** (peer ⇄ peer, out of the server's path): one text
//!    frame carrying [`FileMetadata`] as `{"name":…,"size":…,"type":…}`,
//!    immediately followed by `ceil(size / 16384)` binary frames of at most
//!    16384 bytes each, whose in-order concatenation reproduces the file
//!    bytes exactly.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Identifier of one signaling connection endpoint.
///
/// Assigned by the relay server when a client connects; all signaling
/// messages address peers by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh connection id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Messages a client sends to the relay server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Request a new pairing code.
    GenerateCode,
    /// Submit a code typed in by the user.
    VerifyCode {
        /// The code as entered; validated server-side
        code: String,
    },
    /// Connection offer for the peer identified by `target`.
    Offer {
        /// Intended recipient
        target: ConnectionId,
        /// Opaque session description
        offer: Value,
    },
    /// Connection answer for the peer identified by `target`.
    Answer {
        /// Intended recipient
        target: ConnectionId,
        /// Opaque session description
        answer: Value,
    },
    /// Locally discovered network candidate for the peer.
    #[serde(rename = "network-candidate")]
    Candidate {
        /// Intended recipient
        target: ConnectionId,
        /// Opaque network candidate
        candidate: Value,
    },
}

/// Messages the relay server sends to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// A freshly issued pairing code.
    CodeIssued {
        /// The code to display to the user
        code: String,
    },
    /// Pairing succeeded; `peer_id` addresses the other device.
    #[serde(rename_all = "camelCase")]
    PairSuccess {
        /// Connection id of the paired peer
        peer_id: ConnectionId,
    },
    /// Pairing or relaying failed.
    PairError {
        /// Human-readable reason
        message: String,
    },
    /// Forwarded connection offer, tagged with its sender.
    Offer {
        /// Connection that sent the offer
        from: ConnectionId,
        /// Opaque session description
        offer: Value,
    },
    /// Forwarded connection answer, tagged with its sender.
    Answer {
        /// Connection that sent the answer
        from: ConnectionId,
        /// Opaque session description
        answer: Value,
    },
    /// Forwarded network candidate, tagged with its sender.
    #[serde(rename = "network-candidate")]
    Candidate {
        /// Connection that sent the candidate
        from: ConnectionId,
        /// Opaque network candidate
        candidate: Value,
    },
}

/// Metadata the sender declares before streaming file chunks.
///
/// The receiver treats `size` as authoritative: the transfer is complete
/// exactly when that many bytes have arrived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// File name as declared by the sender
    pub name: String,
    /// Total file size in bytes
    pub size: u64,
    /// MIME type, empty when unknown
    #[serde(rename = "type")]
    pub mime_type: String,
}

impl FileMetadata {
    /// Build metadata for a named byte buffer, guessing the MIME type from
    /// the file name.
    #[must_use]
    pub fn for_bytes(name: &str, bytes: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            size: bytes.len() as u64,
            mime_type: mime_guess::from_path(name)
                .first_raw()
                .unwrap_or_default()
                .to_string(),
        }
    }

    /// Number of data-channel chunks needed for this file.
    #[must_use]
    pub fn chunk_count(&self) -> u64 {
        self.size.div_ceil(crate::CHUNK_SIZE as u64)
    }
}

/// Encode a message to its JSON wire form.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode<T: Serialize>(message: &T) -> Result<String> {
    serde_json::to_string(message).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode a message from its JSON wire form.
///
/// # Errors
///
/// Returns an error if the text is not a valid message.
pub fn decode<T: for<'de> Deserialize<'de>>(text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| Error::ProtocolError(e.to_string()))
}
