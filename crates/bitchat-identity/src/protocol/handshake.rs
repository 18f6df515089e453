//! Noise XX handshake state machine
//!
//! One [`HandshakeSession`] per connection. Frames on the wire are
//! `sequence (1..=3) ‖ noise message`. Message 2 carries the responder's
//! combined key export and message 3 the initiator's, both encrypted by
//! Noise. On completion the peer's export is ingested into the
//! [`EncryptionService`], so both sides end up with the same session key.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::crypto::{generate_fingerprint, noise_static_for_identity, NoiseHandshake};
use super::encryption::{CombinedPublicKeys, EncryptionService};
use crate::config::HandshakeConfig;
use crate::identity::HandshakeState;
use crate::types::{Fingerprint, PeerId};
use crate::{BitchatError, Result};

const MESSAGE_1: u8 = 1;
const MESSAGE_2: u8 = 2;
const MESSAGE_3: u8 = 3;

/// Reason recorded when the transport gives up on a handshake
pub const CANCELLED: &str = "cancelled";

// ----------------------------------------------------------------------------
// Public State Types
// ----------------------------------------------------------------------------

/// Which side of the connection this session plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeRole {
    Initiator,
    Responder,
}

/// Coarse session lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Created, nothing exchanged yet
    Uninitialized,
    /// Handshake messages in flight
    Handshaking,
    /// Handshake complete, session key installed
    Established,
    /// Terminal failure
    Failed(String),
}

/// Facts about a completed handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstablishedSession {
    /// SHA-256 of the peer's persistent identity key
    pub fingerprint: Fingerprint,
    /// Peer's Noise static key
    pub remote_static: [u8; 32],
    /// Peer's persistent Ed25519 identity key
    pub identity_public_key: [u8; 32],
    /// Noise handshake hash, usable as a channel binding
    pub handshake_hash: [u8; 32],
}

// ----------------------------------------------------------------------------
// Internal Phases
// ----------------------------------------------------------------------------

enum Phase {
    Uninitialized(NoiseHandshake),
    Initiated(NoiseHandshake),
    InProgress(NoiseHandshake),
    Established(EstablishedSession),
    Failed(String),
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::Uninitialized(_) => "uninitialized",
            Phase::Initiated(_) => "initiated",
            Phase::InProgress(_) => "in progress",
            Phase::Established(_) => "established",
            Phase::Failed(_) => "failed",
        }
    }
}

type Step = core::result::Result<(Phase, Option<Vec<u8>>), String>;

fn frame(sequence: u8, message: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + message.len());
    out.push(sequence);
    out.extend(message);
    out
}

// ----------------------------------------------------------------------------
// Handshake Session
// ----------------------------------------------------------------------------

/// Drives the three-message Noise XX handshake for one connection
pub struct HandshakeSession {
    peer_id: PeerId,
    role: HandshakeRole,
    phase: Phase,
    encryption: Arc<EncryptionService>,
    max_message_size: usize,
}

impl core::fmt::Debug for HandshakeSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandshakeSession")
            .field("peer_id", &self.peer_id)
            .field("role", &self.role)
            .field("phase", &self.phase.name())
            .finish()
    }
}

impl HandshakeSession {
    /// Create a session whose Noise static key is the local persistent identity
    pub fn new(
        peer_id: PeerId,
        role: HandshakeRole,
        encryption: Arc<EncryptionService>,
        config: &HandshakeConfig,
    ) -> Result<Self> {
        let local_key = encryption.noise_keypair()?;
        let noise = match role {
            HandshakeRole::Initiator => NoiseHandshake::initiator(&local_key)?,
            HandshakeRole::Responder => NoiseHandshake::responder(&local_key)?,
        };

        Ok(Self {
            peer_id,
            role,
            phase: Phase::Uninitialized(noise),
            encryption,
            max_message_size: config.max_message_size,
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn role(&self) -> HandshakeRole {
        self.role
    }

    /// Coarse lifecycle state
    pub fn state(&self) -> SessionState {
        match &self.phase {
            Phase::Uninitialized(_) => SessionState::Uninitialized,
            Phase::Initiated(_) | Phase::InProgress(_) => SessionState::Handshaking,
            Phase::Established(_) => SessionState::Established,
            Phase::Failed(reason) => SessionState::Failed(reason.clone()),
        }
    }

    /// Handshake sub-phase, as tracked on the ephemeral identity
    pub fn handshake_state(&self) -> HandshakeState {
        match &self.phase {
            Phase::Uninitialized(_) => HandshakeState::None,
            Phase::Initiated(_) => HandshakeState::Initiated,
            Phase::InProgress(_) => HandshakeState::InProgress,
            Phase::Established(done) => HandshakeState::Completed {
                fingerprint: done.fingerprint.clone(),
            },
            Phase::Failed(reason) => HandshakeState::Failed {
                reason: reason.clone(),
            },
        }
    }

    pub fn is_established(&self) -> bool {
        matches!(self.phase, Phase::Established(_))
    }

    /// Details of the completed handshake
    pub fn established(&self) -> Option<&EstablishedSession> {
        match &self.phase {
            Phase::Established(done) => Some(done),
            _ => None,
        }
    }

    /// Peer fingerprint once established
    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.established().map(|done| &done.fingerprint)
    }

    /// Produce message 1 (initiator only, before anything was exchanged)
    pub fn start(&mut self) -> Result<Vec<u8>> {
        match std::mem::replace(&mut self.phase, Phase::Failed(String::new())) {
            Phase::Uninitialized(mut noise) if self.role == HandshakeRole::Initiator => {
                match noise.write_message(&[]) {
                    Ok(message) => {
                        self.phase = Phase::Initiated(noise);
                        debug!(peer = %self.peer_id, "Sent handshake message 1");
                        Ok(frame(MESSAGE_1, message))
                    }
                    Err(e) => Err(self.fail(e.to_string())),
                }
            }
            other => {
                let phase = other.name();
                self.phase = other;
                Err(BitchatError::handshake_failed(
                    self.peer_id,
                    format!("cannot start a {:?} handshake that is {}", self.role, phase),
                ))
            }
        }
    }

    /// Process one inbound frame, returning the frame to send back, if any
    ///
    /// Any error moves the session to `Failed`. Established and failed
    /// sessions reject all further input without changing state.
    pub fn handle_message(&mut self, input: &[u8]) -> Result<Option<Vec<u8>>> {
        match &self.phase {
            Phase::Established(_) => {
                return Err(BitchatError::handshake_failed(
                    self.peer_id,
                    "handshake already completed",
                ))
            }
            Phase::Failed(reason) => {
                return Err(BitchatError::handshake_failed(self.peer_id, reason.clone()))
            }
            _ => {}
        }

        let Some((&sequence, message)) = input.split_first() else {
            return Err(self.fail("empty handshake frame"));
        };
        // The limit covers the noise message; the sequence byte is extra
        if message.len() > self.max_message_size {
            return Err(self.fail(format!(
                "handshake message of {} bytes exceeds {}",
                message.len(),
                self.max_message_size
            )));
        }

        let phase = std::mem::replace(&mut self.phase, Phase::Failed(String::new()));
        match self.advance(phase, sequence, message) {
            Ok((next, reply)) => {
                self.phase = next;
                Ok(reply)
            }
            Err(reason) => Err(self.fail(reason)),
        }
    }

    fn advance(&self, phase: Phase, sequence: u8, message: &[u8]) -> Step {
        let phase_name = phase.name();
        match (self.role, phase, sequence) {
            (HandshakeRole::Responder, Phase::Uninitialized(mut noise), MESSAGE_1) => {
                noise.read_message(message).map_err(|e| e.to_string())?;
                let reply = self.write_with_local_keys(&mut noise)?;
                debug!(peer = %self.peer_id, "Answered handshake message 1");
                Ok((Phase::InProgress(noise), Some(frame(MESSAGE_2, reply))))
            }
            (HandshakeRole::Initiator, Phase::Initiated(mut noise), MESSAGE_2) => {
                let payload = noise.read_message(message).map_err(|e| e.to_string())?;
                let peer_keys = bound_peer_keys(&payload, noise.get_remote_static())?;
                let reply = self.write_with_local_keys(&mut noise)?;
                let done = self.complete(noise, &payload, peer_keys)?;
                Ok((Phase::Established(done), Some(frame(MESSAGE_3, reply))))
            }
            (HandshakeRole::Responder, Phase::InProgress(mut noise), MESSAGE_3) => {
                let payload = noise.read_message(message).map_err(|e| e.to_string())?;
                let peer_keys = bound_peer_keys(&payload, noise.get_remote_static())?;
                let done = self.complete(noise, &payload, peer_keys)?;
                Ok((Phase::Established(done), None))
            }
            (role, _, sequence) => Err(format!(
                "unexpected message {} for {:?} in phase {}",
                sequence, role, phase_name
            )),
        }
    }

    fn write_with_local_keys(&self, noise: &mut NoiseHandshake) -> core::result::Result<Vec<u8>, String> {
        let export = self
            .encryption
            .combined_public_key_export()
            .map_err(|e| e.to_string())?;
        noise.write_message(&export).map_err(|e| e.to_string())
    }

    fn complete(
        &self,
        noise: NoiseHandshake,
        payload: &[u8],
        peer_keys: (CombinedPublicKeys, [u8; 32]),
    ) -> core::result::Result<EstablishedSession, String> {
        if !noise.is_handshake_finished() {
            return Err("noise handshake did not finish".to_string());
        }
        let (keys, remote_static) = peer_keys;
        self.encryption
            .ingest_peer_public_keys(self.peer_id, payload)
            .map_err(|e| e.to_string())?;

        let fingerprint = generate_fingerprint(keys.identity);
        info!(peer = %self.peer_id, fingerprint = %fingerprint.short(), "Handshake completed");
        Ok(EstablishedSession {
            fingerprint,
            remote_static,
            identity_public_key: keys.identity,
            handshake_hash: noise.handshake_hash(),
        })
    }

    /// Give up on an in-flight handshake and drop the peer's key material
    ///
    /// Completed and failed sessions are left untouched; returns whether the
    /// handshake was cancelled.
    pub fn abandon(&mut self, reason: Option<&str>) -> bool {
        match self.phase {
            Phase::Established(_) | Phase::Failed(_) => false,
            Phase::Uninitialized(_) | Phase::Initiated(_) | Phase::InProgress(_) => {
                self.encryption.remove_peer(&self.peer_id);
                let reason = reason.unwrap_or(CANCELLED).to_string();
                debug!(peer = %self.peer_id, %reason, "Handshake abandoned");
                self.phase = Phase::Failed(reason);
                true
            }
        }
    }

    fn fail<R: Into<String>>(&mut self, reason: R) -> BitchatError {
        let reason = reason.into();
        warn!(peer = %self.peer_id, %reason, "Handshake failed");
        self.phase = Phase::Failed(reason.clone());
        BitchatError::handshake_failed(self.peer_id, reason)
    }
}

/// Parse the peer's export and check its identity key owns the Noise static key
fn bound_peer_keys(
    payload: &[u8],
    remote_static: Option<[u8; 32]>,
) -> core::result::Result<(CombinedPublicKeys, [u8; 32]), String> {
    let keys = CombinedPublicKeys::parse(payload).map_err(|e| e.to_string())?;
    let remote_static = remote_static.ok_or("peer static key missing")?;
    match noise_static_for_identity(&keys.identity) {
        Some(expected) if expected == remote_static => Ok((keys, remote_static)),
        Some(_) => Err("identity key does not match noise static key".to_string()),
        None => Err("identity key is not a valid Ed25519 point".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentityConfig;
    use crate::identity::MemoryStorage;

    fn service() -> Arc<EncryptionService> {
        let service = EncryptionService::new(
            Arc::new(MemoryStorage::new()),
            &IdentityConfig::default(),
        );
        service.initialize().unwrap();
        Arc::new(service)
    }

    fn sessions() -> (HandshakeSession, HandshakeSession, Arc<EncryptionService>, Arc<EncryptionService>) {
        let alice = service();
        let bob = service();
        let config = HandshakeConfig::default();
        let initiator = HandshakeSession::new(
            PeerId::new([0xB; 8]),
            HandshakeRole::Initiator,
            alice.clone(),
            &config,
        )
        .unwrap();
        let responder = HandshakeSession::new(
            PeerId::new([0xA; 8]),
            HandshakeRole::Responder,
            bob.clone(),
            &config,
        )
        .unwrap();
        (initiator, responder, alice, bob)
    }

    #[test]
    fn test_full_handshake() {
        let (mut initiator, mut responder, alice, bob) = sessions();
        assert_eq!(initiator.state(), SessionState::Uninitialized);

        let m1 = initiator.start().unwrap();
        assert_eq!(m1[0], 1);
        assert_eq!(initiator.handshake_state(), HandshakeState::Initiated);

        let m2 = responder.handle_message(&m1).unwrap().unwrap();
        assert_eq!(m2[0], 2);
        assert_eq!(responder.handshake_state(), HandshakeState::InProgress);

        let m3 = initiator.handle_message(&m2).unwrap().unwrap();
        assert_eq!(m3[0], 3);
        assert!(initiator.is_established());

        assert!(responder.handle_message(&m3).unwrap().is_none());
        assert!(responder.is_established());

        assert_eq!(initiator.fingerprint(), bob.local_fingerprint().as_ref());
        assert_eq!(responder.fingerprint(), alice.local_fingerprint().as_ref());
        assert_eq!(
            initiator.established().unwrap().handshake_hash,
            responder.established().unwrap().handshake_hash
        );
        assert_eq!(
            alice.session_key(&PeerId::new([0xB; 8])),
            bob.session_key(&PeerId::new([0xA; 8]))
        );
    }

    #[test]
    fn test_wrong_sequence_fails() {
        let (mut initiator, mut responder, _, _) = sessions();
        let m1 = initiator.start().unwrap();
        let m2 = responder.handle_message(&m1).unwrap().unwrap();

        assert!(responder.handle_message(&m1).unwrap_err().is_handshake_failed());
        assert!(matches!(responder.state(), SessionState::Failed(_)));

        // No completion after failure, even with a valid message
        let m3 = initiator.handle_message(&m2).unwrap().unwrap();
        assert!(responder.handle_message(&m3).is_err());
        assert!(!responder.is_established());
    }

    #[test]
    fn test_message_size_limit_excludes_sequence_byte() {
        // 32-byte ephemeral key followed by a plaintext payload
        let (_, mut responder, _, _) = sessions();
        let mut frame = vec![9u8; 1 + 65_535];
        frame[0] = 1;
        assert!(responder.handle_message(&frame).unwrap().is_some());
        assert_eq!(responder.state(), SessionState::Handshaking);

        let (_, mut responder, _, _) = sessions();
        let mut frame = vec![9u8; 1 + 65_536];
        frame[0] = 1;
        assert!(responder.handle_message(&frame).is_err());
        assert_eq!(
            responder.state(),
            SessionState::Failed("handshake message of 65536 bytes exceeds 65535".into())
        );
    }

    #[test]
    fn test_start_twice_is_rejected_without_failing() {
        let (mut initiator, mut responder, _, _) = sessions();
        initiator.start().unwrap();
        assert!(initiator.start().is_err());
        assert_eq!(initiator.handshake_state(), HandshakeState::Initiated);
        assert!(responder.start().is_err());
        assert_eq!(responder.state(), SessionState::Uninitialized);
    }

    #[test]
    fn test_abandon_in_flight() {
        let (mut initiator, mut responder, _, _) = sessions();
        let m1 = initiator.start().unwrap();
        responder.handle_message(&m1).unwrap().unwrap();
        assert_eq!(responder.handshake_state(), HandshakeState::InProgress);

        assert!(responder.abandon(None));
        assert_eq!(responder.state(), SessionState::Failed(CANCELLED.into()));
        assert!(!responder.abandon(Some("again")));
        assert_eq!(responder.state(), SessionState::Failed(CANCELLED.into()));

        assert!(initiator.abandon(Some("timeout")));
        assert_eq!(initiator.state(), SessionState::Failed("timeout".into()));
    }

    #[test]
    fn test_abandon_leaves_established_session() {
        let (mut initiator, mut responder, alice, _) = sessions();
        let m1 = initiator.start().unwrap();
        let m2 = responder.handle_message(&m1).unwrap().unwrap();
        initiator.handle_message(&m2).unwrap();
        assert!(initiator.is_established());

        assert!(!initiator.abandon(None));
        assert!(initiator.is_established());
        assert!(alice.has_shared_secret(&PeerId::new([0xB; 8])));
    }
}
