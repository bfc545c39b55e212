//! # Droplink Core Library
//!
//! `droplink-core` provides the core functionality for Droplink, a tool that
//! pairs two devices with a short numeric code and then transfers a file
//! directly between them, peer to peer.
//!
//! Two devices connect to a shared relay server. One requests a pairing code
//! and shows it; the other types the code in. Once the relay matches them, the
//! devices negotiate a direct data channel through relayed offer/answer/
//! candidate messages, and all file bytes flow peer to peer; the relay never
//! sees them.
//!
//! ## Modules
//!
//! - [`code`] - Pairing code generation and validation
//! - [`config`] - Configuration management
//! - [`registry`] - Server-side registry of outstanding pairing codes
//! - [`relay`] - Signaling relay routing between connected clients
//! - [`protocol`] - Signaling and data-channel wire messages
//! - [`session`] - Peer session establisher (handshake state machine)
//! - [`transfer`] - Chunked file transfer engine
//!
//! ## Example
//!
//! ```rust,ignore
//! use droplink_core::registry::PairingRegistry;
//!
//! let registry = PairingRegistry::new();
//! let code = registry.generate_code(device_a)?;
//! // On the other device, within five minutes:
//! let result = registry.verify_code(&code, device_b);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod code;
pub mod config;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod session;
pub mod transfer;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default relay server port
pub const DEFAULT_RELAY_PORT: u16 = 3001;

/// How long a pairing code stays valid after issuance
pub const CODE_TTL: std::time::Duration = std::time::Duration::from_secs(300);

/// Chunk size for data-channel file transfers (16 KiB)
pub const CHUNK_SIZE: usize = 16384;
