//! Signaling relay routing between connected clients.
//!
//! The relay is a pure routing function keyed by [`ConnectionId`]: given an
//! envelope addressed to a target connection, it delivers the payload to that
//! connection's outbound queue, tagged with the sender's id. It performs no
//! protocol validation (an answer is routed even if no offer preceded it)
//! and never inspects the opaque payloads it carries.
//!
//! A forward to a vanished target is not silently dropped:
//! [`RelayRouter::forward`] surfaces [`Error::TargetUnreachable`] so the
//! server can report the failure back to the sender.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::protocol::{ConnectionId, ServerMessage};

/// One signaling message in flight between two identified endpoints.
///
/// The payload is opaque session-description or network-candidate data,
/// passed through unmodified.
#[derive(Debug, Clone)]
pub enum SignalingEnvelope {
    /// Connection offer for `target`.
    Offer {
        /// Intended recipient
        target: ConnectionId,
        /// Opaque session description
        payload: Value,
    },
    /// Connection answer for `target`.
    Answer {
        /// Intended recipient
        target: ConnectionId,
        /// Opaque session description
        payload: Value,
    },
    /// Network candidate for `target`.
    Candidate {
        /// Intended recipient
        target: ConnectionId,
        /// Opaque network candidate
        payload: Value,
    },
}

impl SignalingEnvelope {
    /// The connection this envelope is addressed to.
    #[must_use]
    pub fn target(&self) -> ConnectionId {
        match self {
            Self::Offer { target, .. }
            | Self::Answer { target, .. }
            | Self::Candidate { target, .. } => *target,
        }
    }

    /// Short label for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate { .. } => "candidate",
        }
    }
}

/// Routes signaling messages between connected clients.
#[derive(Debug, Default)]
pub struct RelayRouter {
    connections: Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<ServerMessage>>>,
}

impl RelayRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's outbound queue.
    pub fn register(&self, id: ConnectionId, tx: mpsc::UnboundedSender<ServerMessage>) {
        self.connections
            .lock()
            .expect("router lock poisoned")
            .insert(id, tx);
        tracing::debug!("registered connection {id}");
    }

    /// Remove a connection after it disconnects.
    pub fn unregister(&self, id: ConnectionId) {
        self.connections
            .lock()
            .expect("router lock poisoned")
            .remove(&id);
        tracing::debug!("unregistered connection {id}");
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.lock().expect("router lock poisoned").len()
    }

    /// Whether no connections are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver a server message to one connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TargetUnreachable`] if the connection is not
    /// registered or its queue is closed.
    pub fn deliver(&self, target: ConnectionId, message: ServerMessage) -> Result<()> {
        let connections = self.connections.lock().expect("router lock poisoned");
        let tx = connections
            .get(&target)
            .ok_or_else(|| Error::TargetUnreachable(target.to_string()))?;
        tx.send(message)
            .map_err(|_| Error::TargetUnreachable(target.to_string()))
    }

    /// Forward an envelope from `from` to its target, tagging the payload
    /// with the sender's id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TargetUnreachable`] if the target connection no
    /// longer exists.
    pub fn forward(&self, from: ConnectionId, envelope: SignalingEnvelope) -> Result<()> {
        let target = envelope.target();
        tracing::debug!("forwarding {} from {from} to {target}", envelope.kind());

        let message = match envelope {
            SignalingEnvelope::Offer { payload, .. } => ServerMessage::Offer {
                from,
                offer: payload,
            },
            SignalingEnvelope::Answer { payload, .. } => ServerMessage::Answer {
                from,
                answer: payload,
            },
            SignalingEnvelope::Candidate { payload, .. } => ServerMessage::Candidate {
                from,
                candidate: payload,
            },
        };

        self.deliver(target, message)
    }
}
