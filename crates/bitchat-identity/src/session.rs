//! Peer session hub
//!
//! Wires the encryption service, the handshake state machine and the identity
//! manager together per connection: connect, handshake, record, seal/open,
//! disconnect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::config::HandshakeConfig;
use crate::errors::SessionError;
use crate::identity::{HandshakeState, SecureIdentityStateManager};
use crate::protocol::{EncryptionService, HandshakeRole, HandshakeSession, SessionState};
use crate::types::{Fingerprint, PeerId, SystemTimeSource, TimeSource};
use crate::{BitchatError, Result};

/// Outcome of feeding one handshake frame to [`PeerSessions`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeEvent {
    /// Frame to send back to the peer
    pub reply: Option<Vec<u8>>,
    /// Set when this frame completed the handshake
    pub completed: Option<Fingerprint>,
}

/// Per-connection sessions over shared crypto and identity services
pub struct PeerSessions<T: TimeSource = SystemTimeSource> {
    encryption: Arc<EncryptionService>,
    identities: Arc<SecureIdentityStateManager<T>>,
    config: HandshakeConfig,
    sessions: Mutex<HashMap<PeerId, HandshakeSession>>,
}

impl<T: TimeSource> PeerSessions<T> {
    pub fn new(
        encryption: Arc<EncryptionService>,
        identities: Arc<SecureIdentityStateManager<T>>,
        config: HandshakeConfig,
    ) -> Self {
        Self {
            encryption,
            identities,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn encryption(&self) -> &Arc<EncryptionService> {
        &self.encryption
    }

    pub fn identities(&self) -> &Arc<SecureIdentityStateManager<T>> {
        &self.identities
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<PeerId, HandshakeSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a connection; returns message 1 when acting as initiator
    pub fn connect(&self, peer_id: PeerId, role: HandshakeRole) -> Result<Option<Vec<u8>>> {
        let mut sessions = self.sessions();
        self.connect_locked(&mut sessions, peer_id, role)
    }

    fn connect_locked(
        &self,
        sessions: &mut HashMap<PeerId, HandshakeSession>,
        peer_id: PeerId,
        role: HandshakeRole,
    ) -> Result<Option<Vec<u8>>> {
        if let Some(existing) = sessions.get(&peer_id) {
            if !matches!(existing.state(), SessionState::Failed(_)) {
                return Err(BitchatError::Session(SessionError::SessionAlreadyExists {
                    peer_id: peer_id.to_string(),
                }));
            }
        }

        let mut session =
            HandshakeSession::new(peer_id, role, self.encryption.clone(), &self.config)?;
        self.identities.register_ephemeral_session(peer_id);

        let first = match role {
            HandshakeRole::Initiator => Some(session.start()?),
            HandshakeRole::Responder => None,
        };
        self.mirror_state(&peer_id, session.handshake_state());
        sessions.insert(peer_id, session);
        debug!(peer = %peer_id, ?role, "Peer connected");
        Ok(first)
    }

    /// Feed one inbound handshake frame
    ///
    /// An unknown peer sending message 1 gets a responder session.
    pub fn handle_handshake_frame(&self, peer_id: PeerId, frame: &[u8]) -> Result<HandshakeEvent> {
        let mut sessions = self.sessions();
        if !sessions.contains_key(&peer_id) {
            if frame.first() != Some(&1) {
                return Err(BitchatError::session_not_found(peer_id));
            }
            self.connect_locked(&mut sessions, peer_id, HandshakeRole::Responder)?;
        }
        let session = sessions
            .get_mut(&peer_id)
            .ok_or_else(|| BitchatError::session_not_found(peer_id))?;

        let result = session.handle_message(frame);
        self.mirror_state(&peer_id, session.handshake_state());
        let reply = result?;

        let completed = session.established().map(|done| {
            self.identities.record_handshake(
                &done.fingerprint,
                done.remote_static,
                Some(done.identity_public_key),
            );
            done.fingerprint.clone()
        });
        Ok(HandshakeEvent { reply, completed })
    }

    fn mirror_state(&self, peer_id: &PeerId, state: HandshakeState) {
        if let Err(e) = self.identities.update_handshake_state(peer_id, state) {
            warn!(peer = %peer_id, error = %e, "Ephemeral session missing");
        }
    }

    /// Handshake lifecycle for a peer
    pub fn session_state(&self, peer_id: &PeerId) -> Option<SessionState> {
        self.sessions().get(peer_id).map(HandshakeSession::state)
    }

    /// Fingerprint bound to this connection by a completed handshake
    pub fn fingerprint(&self, peer_id: &PeerId) -> Option<Fingerprint> {
        self.identities.resolve_fingerprint(peer_id)
    }

    fn ensure_not_blocked(&self, peer_id: &PeerId) -> Result<()> {
        match self.fingerprint(peer_id) {
            Some(fingerprint) if self.identities.is_blocked(&fingerprint) => {
                Err(BitchatError::Session(SessionError::PeerBlocked {
                    fingerprint: fingerprint.to_string(),
                }))
            }
            _ => Ok(()),
        }
    }

    /// Encrypt an application payload for an established peer
    pub fn seal(&self, peer_id: &PeerId, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.ensure_not_blocked(peer_id)?;
        self.encryption.seal(plaintext, peer_id)
    }

    /// Decrypt an application payload from an established peer
    pub fn open(&self, peer_id: &PeerId, sealed: &[u8]) -> Result<Vec<u8>> {
        self.ensure_not_blocked(peer_id)?;
        self.encryption.open(sealed, peer_id)
    }

    /// Cancel an in-flight handshake (timeout or transport loss)
    ///
    /// Returns `false` for unknown peers and for sessions that already
    /// completed or failed; use [`disconnect`](Self::disconnect) to tear down
    /// an established session. Other peers are untouched.
    pub fn abandon(&self, peer_id: &PeerId) -> bool {
        let mut sessions = self.sessions();
        let Some(session) = sessions.get_mut(peer_id) else {
            return false;
        };
        if !session.abandon(None) {
            return false;
        }
        self.mirror_state(peer_id, session.handshake_state());
        true
    }

    /// Connection closed: drop the session, its keys and its ephemeral identity
    pub fn disconnect(&self, peer_id: &PeerId) -> bool {
        let removed = self.sessions().remove(peer_id).is_some();
        self.encryption.remove_peer(peer_id);
        self.identities.remove_ephemeral_session(peer_id);
        if removed {
            debug!(peer = %peer_id, "Peer disconnected");
        }
        removed
    }

    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }
}
