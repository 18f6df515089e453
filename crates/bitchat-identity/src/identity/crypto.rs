//! Cryptographic identity with public keys and handshake history

use serde::{Deserialize, Serialize};

use crate::types::{Fingerprint, Timestamp};

/// Long-term identity of a peer, keyed by fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptographicIdentity {
    /// Fingerprint (SHA-256 of the persistent identity key)
    pub fingerprint: Fingerprint,
    /// Persistent key-agreement public key (Noise static key)
    pub public_key: [u8; 32],
    /// Persistent Ed25519 identity key, when the peer asserted one
    pub signing_public_key: Option<[u8; 32]>,
    /// First seen timestamp
    pub first_seen: Timestamp,
    /// Last successful handshake timestamp
    pub last_handshake: Option<Timestamp>,
    /// Number of successful handshakes
    pub handshake_count: u32,
}

impl CryptographicIdentity {
    /// Create a new cryptographic identity seen for the first time at `now`
    pub fn new(
        fingerprint: Fingerprint,
        public_key: [u8; 32],
        signing_public_key: Option<[u8; 32]>,
        now: Timestamp,
    ) -> Self {
        Self {
            fingerprint,
            public_key,
            signing_public_key,
            first_seen: now,
            last_handshake: None,
            handshake_count: 0,
        }
    }

    /// Record a successful handshake
    pub fn update_handshake_time(&mut self, now: Timestamp) {
        self.last_handshake = Some(now);
        self.handshake_count = self.handshake_count.saturating_add(1);
    }
}
