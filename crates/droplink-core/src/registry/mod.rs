//! Server-side registry of outstanding pairing codes.
//!
//! The registry is the only state shared across connections on the relay
//! server. It maps each issued [`PairCode`] to the connection that requested
//! it, and resolves `verify-code` requests into pairings.
//!
//! ## Lifetime of an entry
//!
//! - Created when a connection asks for a code.
//! - Valid for lookup for five minutes after issuance.
//! - Removed atomically on the first successful verification (single-use).
//! - Removed when the owning connection disconnects, regardless of age.
//! - A failed lookup never removes the entry; stale entries linger until
//!   their owner disconnects. Harmless, since an expired entry can never
//!   match again.
//!
//! The map sits behind a [`Mutex`] so that lookup-then-delete in
//! [`PairingRegistry::verify_code`] is atomic across the server's tasks.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::code::{CodeGenerator, PairCode};
use crate::error::{Error, Result};
use crate::protocol::ConnectionId;

/// Attempts before giving up on finding an unused code.
const MAX_GENERATE_ATTEMPTS: usize = 128;

/// One issued pairing code.
#[derive(Debug, Clone)]
struct PairingEntry {
    /// Connection that requested the code
    owner: ConnectionId,
    /// When the code was issued
    created_at: Instant,
}

/// Outcome of a `verify-code` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairResult {
    /// The code matched; `peer` is the connection that issued it.
    Paired {
        /// Owner of the verified code
        peer: ConnectionId,
    },
    /// The code is unknown, expired, already used, or owned by the
    /// requester itself.
    Expired,
}

/// Registry of outstanding pairing codes.
#[derive(Debug, Default)]
pub struct PairingRegistry {
    ttl: Duration,
    entries: Mutex<HashMap<PairCode, PairingEntry>>,
    generator: CodeGenerator,
}

impl PairingRegistry {
    /// Create a registry with the default five-minute code lifetime.
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(crate::CODE_TTL)
    }

    /// Create a registry with a custom code lifetime.
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
            generator: CodeGenerator::new(),
        }
    }

    /// Issue a new code owned by `owner`.
    ///
    /// Regenerates on collision with a still-valid code; a collision with an
    /// expired entry evicts it and reuses the code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CodeCollision`] if no unused code is found after a
    /// bounded number of attempts.
    pub fn generate_code(&self, owner: ConnectionId) -> Result<PairCode> {
        self.generate_code_at(owner, Instant::now())
    }

    /// Verify a code typed in by `requester`.
    ///
    /// On a match, the entry is removed in the same critical section so a
    /// code can pair at most once. Anything else (unknown code, malformed
    /// code, expired entry, or the requester trying to pair with itself)
    /// comes back as [`PairResult::Expired`].
    pub fn verify_code(&self, code: &str, requester: ConnectionId) -> PairResult {
        self.verify_code_at(code, requester, Instant::now())
    }

    /// Remove every entry owned by a disconnected connection.
    pub fn remove_owned_by(&self, conn: ConnectionId) {
        let mut entries = self.entries.lock().expect("registry lock poisoned");
        let before = entries.len();
        entries.retain(|_, entry| entry.owner != conn);
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!("dropped {removed} pairing code(s) owned by {conn}");
        }
    }

    /// Number of outstanding entries, valid or stale.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().expect("registry lock poisoned").len()
    }

    /// Whether the registry holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn generate_code_at(&self, owner: ConnectionId, now: Instant) -> Result<PairCode> {
        let mut entries = self.entries.lock().expect("registry lock poisoned");

        for _ in 0..MAX_GENERATE_ATTEMPTS {
            let code = self.generator.generate();
            match entries.get(&code) {
                Some(entry) if !self.is_expired(entry, now) => {}
                _ => {
                    entries.insert(
                        code.clone(),
                        PairingEntry {
                            owner,
                            created_at: now,
                        },
                    );
                    tracing::debug!("issued pairing code {code} to {owner}");
                    return Ok(code);
                }
            }
        }

        Err(Error::CodeCollision)
    }

    pub(crate) fn verify_code_at(
        &self,
        code: &str,
        requester: ConnectionId,
        now: Instant,
    ) -> PairResult {
        let Ok(code) = PairCode::parse(code) else {
            return PairResult::Expired;
        };

        let mut entries = self.entries.lock().expect("registry lock poisoned");

        match entries.get(&code) {
            Some(entry) if !self.is_expired(entry, now) && entry.owner != requester => {
                let entry = entries.remove(&code).expect("entry present under lock");
                tracing::debug!("code {code} paired {requester} with {}", entry.owner);
                PairResult::Paired { peer: entry.owner }
            }
            _ => PairResult::Expired,
        }
    }

    fn is_expired(&self, entry: &PairingEntry, now: Instant) -> bool {
        now.duration_since(entry.created_at) >= self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (ConnectionId, ConnectionId) {
        (ConnectionId::generate(), ConnectionId::generate())
    }

    #[test]
    fn test_verify_within_window() {
        let registry = PairingRegistry::new();
        let (owner, verifier) = ids();

        let issued_at = Instant::now();
        let code = registry.generate_code_at(owner, issued_at).unwrap();

        // Well inside the five-minute window.
        let result =
            registry.verify_code_at(code.as_str(), verifier, issued_at + Duration::from_secs(100));
        assert_eq!(result, PairResult::Paired { peer: owner });
    }

    #[test]
    fn test_verify_after_expiry() {
        let registry = PairingRegistry::new();
        let (owner, verifier) = ids();

        let issued_at = Instant::now();
        let code = registry.generate_code_at(owner, issued_at).unwrap();

        // One millisecond past the five-minute window.
        let result = registry.verify_code_at(
            code.as_str(),
            verifier,
            issued_at + Duration::from_millis(300_001),
        );
        assert_eq!(result, PairResult::Expired);
    }

    #[test]
    fn test_verify_at_exact_expiry_boundary_fails() {
        let registry = PairingRegistry::new();
        let (owner, verifier) = ids();

        let issued_at = Instant::now();
        let code = registry.generate_code_at(owner, issued_at).unwrap();

        let result = registry.verify_code_at(
            code.as_str(),
            verifier,
            issued_at + Duration::from_millis(300_000),
        );
        assert_eq!(result, PairResult::Expired);
    }

    #[test]
    fn test_code_is_single_use() {
        let registry = PairingRegistry::new();
        let (owner, verifier) = ids();

        let now = Instant::now();
        let code = registry.generate_code_at(owner, now).unwrap();

        let first = registry.verify_code_at(code.as_str(), verifier, now);
        assert_eq!(first, PairResult::Paired { peer: owner });

        let second = registry.verify_code_at(code.as_str(), verifier, now);
        assert_eq!(second, PairResult::Expired);
    }

    #[test]
    fn test_unknown_and_malformed_codes() {
        let registry = PairingRegistry::new();
        let (_, verifier) = ids();

        assert_eq!(
            registry.verify_code("4821", verifier),
            PairResult::Expired
        );
        assert_eq!(
            registry.verify_code("not-a-code", verifier),
            PairResult::Expired
        );
    }

    #[test]
    fn test_disconnect_removes_owned_codes() {
        let registry = PairingRegistry::new();
        let (owner, verifier) = ids();

        // Owner disconnects shortly after issuance; the code is
        // unreachable well inside the expiry window.
        let issued_at = Instant::now();
        let code = registry.generate_code_at(owner, issued_at).unwrap();

        registry.remove_owned_by(owner);

        let result =
            registry.verify_code_at(code.as_str(), verifier, issued_at + Duration::from_secs(6));
        assert_eq!(result, PairResult::Expired);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_disconnect_only_removes_own_codes() {
        let registry = PairingRegistry::new();
        let (owner_a, owner_b) = ids();
        let verifier = ConnectionId::generate();

        let now = Instant::now();
        let _code_a = registry.generate_code_at(owner_a, now).unwrap();
        let code_b = registry.generate_code_at(owner_b, now).unwrap();

        registry.remove_owned_by(owner_a);

        assert_eq!(
            registry.verify_code_at(code_b.as_str(), verifier, now),
            PairResult::Paired { peer: owner_b }
        );
    }

    #[test]
    fn test_self_pairing_rejected() {
        let registry = PairingRegistry::new();
        let owner = ConnectionId::generate();

        let now = Instant::now();
        let code = registry.generate_code_at(owner, now).unwrap();

        assert_eq!(
            registry.verify_code_at(code.as_str(), owner, now),
            PairResult::Expired
        );
        // The failed self-verification must not consume the code.
        let other = ConnectionId::generate();
        assert_eq!(
            registry.verify_code_at(code.as_str(), other, now),
            PairResult::Paired { peer: owner }
        );
    }

    #[test]
    fn test_failed_lookup_keeps_entry() {
        let registry = PairingRegistry::new();
        let (owner, verifier) = ids();

        let issued_at = Instant::now();
        let code = registry.generate_code_at(owner, issued_at).unwrap();

        let late = issued_at + Duration::from_secs(400);
        assert_eq!(
            registry.verify_code_at(code.as_str(), verifier, late),
            PairResult::Expired
        );
        // Stale entries stay until the owner disconnects.
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_generated_codes_are_unique_while_valid() {
        let registry = PairingRegistry::new();
        let owner = ConnectionId::generate();

        let now = Instant::now();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let code = registry.generate_code_at(owner, now).unwrap();
            assert!(seen.insert(code), "collision check failed to regenerate");
        }
    }
}
