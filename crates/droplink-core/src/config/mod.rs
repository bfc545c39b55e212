//! Configuration management for Droplink.
//!
//! The relay server reads an optional TOML file; every setting has a
//! default, and CLI flags override the file.
//!
//! ## Example
//!
//! ```toml
//! [network]
//! port = 3001
//! static_dir = "dist"
//!
//! [pairing]
//! code_ttl_secs = 300
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Relay server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network settings
    pub network: NetworkConfig,
    /// Pairing settings
    pub pairing: PairingConfig,
}

/// Network configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Port the relay server listens on
    pub port: u16,
    /// Directory of static web client files to serve, if any
    pub static_dir: Option<PathBuf>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: crate::DEFAULT_RELAY_PORT,
            static_dir: None,
        }
    }
}

/// Pairing configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// Seconds a pairing code stays valid after issuance
    pub code_ttl_secs: u64,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            code_ttl_secs: crate::CODE_TTL.as_secs(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&text)
            .map_err(|e| Error::ConfigError(format!("cannot parse {}: {e}", path.display())))
    }

    /// Code lifetime as a [`Duration`].
    #[must_use]
    pub fn code_ttl(&self) -> Duration {
        Duration::from_secs(self.pairing.code_ttl_secs)
    }
}
