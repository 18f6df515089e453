//! Ephemeral identity for a single connection

use super::types::HandshakeState;
use crate::types::{Fingerprint, PeerId, Timestamp};

/// Ephemeral identity for one live connection; never persisted
#[derive(Debug, Clone)]
pub struct EphemeralIdentity {
    /// Transient peer ID for this connection
    pub peer_id: PeerId,
    /// Current handshake state
    pub handshake_state: HandshakeState,
    /// Session start time
    pub session_start: Timestamp,
    /// Last activity timestamp
    pub last_activity: Timestamp,
}

impl EphemeralIdentity {
    /// Create a new ephemeral identity
    pub fn new(peer_id: PeerId, now: Timestamp) -> Self {
        Self {
            peer_id,
            handshake_state: HandshakeState::None,
            session_start: now,
            last_activity: now,
        }
    }

    /// Update handshake state; terminal states are never left
    ///
    /// Returns `false` when the transition was refused.
    pub fn set_handshake_state(&mut self, state: HandshakeState, now: Timestamp) -> bool {
        if self.handshake_state.is_terminal() {
            return false;
        }
        self.handshake_state = state;
        self.last_activity = now;
        true
    }

    /// Get fingerprint if handshake is complete
    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.handshake_state.fingerprint()
    }

    /// Check if handshake is complete
    pub fn is_handshake_complete(&self) -> bool {
        self.handshake_state.is_complete()
    }
}
