//! Error types for Droplink.
//!
//! This module provides a unified error type for all Droplink operations,
//! with specific error variants for different failure modes.

use std::io;

use thiserror::Error;

/// A specialized `Result` type for Droplink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Droplink.
#[derive(Error, Debug)]
pub enum Error {
    /// Pairing code is unknown, already used, or past its expiry window
    #[error("pairing code is invalid or has expired")]
    PairingExpired,

    /// Invalid pairing code format
    #[error("invalid code format: {0}")]
    InvalidCodeFormat(String),

    /// Could not find an unused pairing code
    #[error("code collision detected, unable to generate unique code")]
    CodeCollision,

    /// Relay target connection no longer exists
    #[error("target connection '{0}' is no longer reachable")]
    TargetUnreachable(String),

    /// Transport-level connection failure during the handshake
    #[error("peer handshake failed: {0}")]
    HandshakeFailed(String),

    /// Session is not in a state that allows the requested operation
    #[error("invalid session state: {0}")]
    InvalidSessionState(String),

    /// Send attempted before the data channel reached the open state
    #[error("data channel is not open")]
    ChannelNotReady,

    /// Data channel closed while a transfer was in progress
    #[error("transfer aborted: channel closed mid-transfer")]
    TransferAborted,

    /// More bytes arrived than the sender declared
    #[error("transfer overrun: received {received} bytes, declared {declared}")]
    TransferOverrun {
        /// Bytes received so far
        received: u64,
        /// Bytes the sender declared
        declared: u64,
    },

    /// Binary frame arrived before any file metadata
    #[error("received file chunk with no preceding metadata")]
    UnexpectedChunk,

    /// Invalid protocol message
    #[error("invalid protocol message: {0}")]
    ProtocolError(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid file name declared by the sender
    #[error("invalid file name: {0}")]
    InvalidFileName(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Returns whether the user can simply retry the failed operation.
    ///
    /// A rejected code can be retyped and a failed handshake restarted from
    /// pairing; an aborted transfer has already discarded partial data on
    /// both ends and needs a fresh session.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PairingExpired | Self::InvalidCodeFormat(_) | Self::ChannelNotReady
        )
    }
}
