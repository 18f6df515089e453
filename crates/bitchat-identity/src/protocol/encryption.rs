//! Key and session crypto service
//!
//! Owns the local key pairs, turns a peer's combined public key export into a
//! per-peer session key, and seals, opens, signs and verifies payloads for
//! established peers.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hashbrown::HashMap;
use hkdf::Hkdf;
use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use tracing::{debug, info, warn};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

use super::crypto::{generate_fingerprint, parse_verifying_key, IdentityKeyPair, NoiseKeyPair};
use crate::config::{IdentityConfig, SESSION_KDF_SALT};
use crate::errors::CryptographicError;
use crate::identity::SecureStorage;
use crate::types::{Fingerprint, PeerId};
use crate::{BitchatError, Result};

/// Length of the combined public key export
pub const COMBINED_PUBLIC_KEY_LEN: usize = 96;

/// AES-GCM nonce length
pub const NONCE_LEN: usize = 12;

/// AES-GCM tag length
pub const TAG_LEN: usize = 16;

// ----------------------------------------------------------------------------
// Key Material
// ----------------------------------------------------------------------------

/// Per-process ephemeral key pairs, replaced wholesale on rotation
struct EphemeralKeys {
    key_agreement: StaticSecret,
    key_agreement_public: X25519PublicKey,
    signing: IdentityKeyPair,
}

impl EphemeralKeys {
    fn generate() -> Self {
        let key_agreement = StaticSecret::random_from_rng(OsRng);
        let key_agreement_public = X25519PublicKey::from(&key_agreement);
        Self {
            key_agreement,
            key_agreement_public,
            signing: IdentityKeyPair::generate(),
        }
    }
}

/// Keys received from one peer plus the derived session key
struct PeerSessionKeys {
    signing_public_key: [u8; 32],
    identity_public_key: [u8; 32],
    session_key: Zeroizing<[u8; 32]>,
}

/// The three keys carried by a combined export
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombinedPublicKeys {
    pub key_agreement: [u8; 32],
    pub signing: [u8; 32],
    pub identity: [u8; 32],
}

impl CombinedPublicKeys {
    /// Split a combined export, rejecting any length other than 96 bytes
    pub fn parse(blob: &[u8]) -> Result<Self> {
        let blob: &[u8; COMBINED_PUBLIC_KEY_LEN] = blob.try_into().map_err(|_| {
            BitchatError::invalid_public_key(format!(
                "combined key export must be {} bytes, got {}",
                COMBINED_PUBLIC_KEY_LEN,
                blob.len()
            ))
        })?;

        let mut keys = Self {
            key_agreement: [0u8; 32],
            signing: [0u8; 32],
            identity: [0u8; 32],
        };
        keys.key_agreement.copy_from_slice(&blob[0..32]);
        keys.signing.copy_from_slice(&blob[32..64]);
        keys.identity.copy_from_slice(&blob[64..96]);
        Ok(keys)
    }

    pub fn to_bytes(&self) -> [u8; COMBINED_PUBLIC_KEY_LEN] {
        let mut out = [0u8; COMBINED_PUBLIC_KEY_LEN];
        out[0..32].copy_from_slice(&self.key_agreement);
        out[32..64].copy_from_slice(&self.signing);
        out[64..96].copy_from_slice(&self.identity);
        out
    }
}

struct ServiceState {
    ephemeral: Arc<EphemeralKeys>,
    identity: Option<Arc<IdentityKeyPair>>,
    peers: HashMap<PeerId, PeerSessionKeys>,
}

// ----------------------------------------------------------------------------
// Encryption Service
// ----------------------------------------------------------------------------

/// Key and session crypto service
///
/// Construction only generates ephemeral keys. The persistent identity is
/// loaded or created by [`initialize`](Self::initialize).
pub struct EncryptionService {
    state: RwLock<ServiceState>,
    storage: Arc<dyn SecureStorage>,
    identity_key_storage_key: String,
}

impl core::fmt::Debug for EncryptionService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.read_state();
        f.debug_struct("EncryptionService")
            .field(
                "identity",
                &state.identity.as_ref().map(|id| id.fingerprint().short()),
            )
            .field("peers", &state.peers.len())
            .finish()
    }
}

impl EncryptionService {
    /// Create a service with fresh ephemeral keys; storage is not touched
    pub fn new(storage: Arc<dyn SecureStorage>, config: &IdentityConfig) -> Self {
        Self {
            state: RwLock::new(ServiceState {
                ephemeral: Arc::new(EphemeralKeys::generate()),
                identity: None,
                peers: HashMap::new(),
            }),
            storage,
            identity_key_storage_key: config.identity_key_storage_key.clone(),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ServiceState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ServiceState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ----------------------------------------------------------------------------
    // Persistent Identity
    // ----------------------------------------------------------------------------

    /// Load the persistent identity from storage, creating it if absent
    ///
    /// Calling this again once an identity is loaded is a no-op.
    pub fn initialize(&self) -> Result<Fingerprint> {
        let mut state = self.write_state();
        if let Some(identity) = &state.identity {
            return Ok(identity.fingerprint());
        }

        let identity = match self.storage.retrieve(&self.identity_key_storage_key) {
            Ok(Some(bytes)) => match <[u8; 32]>::try_from(bytes.as_slice()) {
                Ok(secret) => {
                    let secret = Zeroizing::new(secret);
                    let identity = IdentityKeyPair::from_bytes(&secret);
                    info!(fingerprint = %identity.fingerprint().short(), "Loaded persistent identity");
                    identity
                }
                Err(_) => {
                    warn!(len = bytes.len(), "Stored identity key is malformed, replacing it");
                    if let Err(e) = self.storage.delete(&self.identity_key_storage_key) {
                        warn!(error = %e, "Failed to delete malformed identity key");
                    }
                    self.generate_and_persist()
                }
            },
            Ok(None) => self.generate_and_persist(),
            Err(e) => {
                // Never overwrite a key we could not read
                warn!(error = %e, "Identity storage unreadable, using an in-memory identity");
                IdentityKeyPair::generate()
            }
        };

        let fingerprint = identity.fingerprint();
        state.identity = Some(Arc::new(identity));
        Ok(fingerprint)
    }

    /// Generate and persist a new persistent identity, replacing the current one
    pub fn create_persistent_identity(&self) -> Result<Fingerprint> {
        let identity = self.generate_and_persist();
        let fingerprint = identity.fingerprint();
        self.write_state().identity = Some(Arc::new(identity));
        Ok(fingerprint)
    }

    /// Delete the persistent identity and forget every peer
    ///
    /// Ephemeral keys are rotated. No replacement identity is created; call
    /// [`create_persistent_identity`](Self::create_persistent_identity) for that.
    pub fn reset_persistent_identity(&self) -> Result<()> {
        {
            let mut state = self.write_state();
            state.identity = None;
            state.ephemeral = Arc::new(EphemeralKeys::generate());
            state.peers.clear();
        }
        warn!("Persistent identity reset");
        self.storage.delete(&self.identity_key_storage_key)
    }

    fn generate_and_persist(&self) -> IdentityKeyPair {
        let identity = IdentityKeyPair::generate();
        let secret = identity.private_key_bytes();
        match self
            .storage
            .store(&self.identity_key_storage_key, secret.to_vec())
        {
            Ok(()) => info!(fingerprint = %identity.fingerprint().short(), "Created persistent identity"),
            Err(e) => warn!(error = %e, "Failed to persist new identity, keeping it in memory"),
        }
        identity
    }

    fn identity(&self) -> Result<Arc<IdentityKeyPair>> {
        self.read_state()
            .identity
            .clone()
            .ok_or(BitchatError::Crypto(CryptographicError::IdentityUnavailable))
    }

    /// Fingerprint of the local persistent identity
    pub fn local_fingerprint(&self) -> Option<Fingerprint> {
        self.read_state().identity.as_ref().map(|id| id.fingerprint())
    }

    /// Local persistent identity public key
    pub fn local_identity_public_key(&self) -> Option<[u8; 32]> {
        self.read_state()
            .identity
            .as_ref()
            .map(|id| id.public_key_bytes())
    }

    /// Noise static key pair bound to the persistent identity
    pub(crate) fn noise_keypair(&self) -> Result<NoiseKeyPair> {
        Ok(self.identity()?.to_noise_keypair())
    }

    // ----------------------------------------------------------------------------
    // Key Exchange
    // ----------------------------------------------------------------------------

    /// Local keys as `key agreement ‖ ephemeral signing ‖ persistent identity`
    pub fn combined_public_key_export(&self) -> Result<[u8; COMBINED_PUBLIC_KEY_LEN]> {
        let state = self.read_state();
        let identity = state
            .identity
            .as_ref()
            .ok_or(BitchatError::Crypto(CryptographicError::IdentityUnavailable))?;

        Ok(CombinedPublicKeys {
            key_agreement: state.ephemeral.key_agreement_public.to_bytes(),
            signing: state.ephemeral.signing.public_key_bytes(),
            identity: identity.public_key_bytes(),
        }
        .to_bytes())
    }

    /// Validate a peer's combined export and derive the session key
    ///
    /// On error nothing about the peer changes.
    pub fn ingest_peer_public_keys(&self, peer_id: PeerId, blob: &[u8]) -> Result<()> {
        let keys = CombinedPublicKeys::parse(blob)?;
        if parse_verifying_key(&keys.signing).is_none() {
            return Err(BitchatError::invalid_public_key("signing key is not a valid Ed25519 point"));
        }
        if parse_verifying_key(&keys.identity).is_none() {
            return Err(BitchatError::invalid_public_key("identity key is not a valid Ed25519 point"));
        }

        let mut state = self.write_state();
        let shared = state
            .ephemeral
            .key_agreement
            .diffie_hellman(&X25519PublicKey::from(keys.key_agreement));
        if !shared.was_contributory() {
            return Err(BitchatError::invalid_public_key("key agreement key has low order"));
        }
        let session_key = derive_session_key(shared.as_bytes())?;

        state.peers.insert(
            peer_id,
            PeerSessionKeys {
                signing_public_key: keys.signing,
                identity_public_key: keys.identity,
                session_key,
            },
        );
        debug!(peer = %peer_id, "Derived session key");
        Ok(())
    }

    // ----------------------------------------------------------------------------
    // Authenticated Encryption
    // ----------------------------------------------------------------------------

    fn session_cipher(&self, peer_id: &PeerId) -> Result<Aes256Gcm> {
        let state = self.read_state();
        let peer = state
            .peers
            .get(peer_id)
            .ok_or_else(|| BitchatError::no_shared_secret(peer_id))?;
        Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(
            peer.session_key.as_slice(),
        )))
    }

    /// Encrypt for a peer as `nonce ‖ ciphertext ‖ tag`
    pub fn seal(&self, plaintext: &[u8], peer_id: &PeerId) -> Result<Vec<u8>> {
        let cipher = self.session_cipher(peer_id)?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| BitchatError::Crypto(CryptographicError::EncryptionFailed))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypt a sealed payload from a peer
    pub fn open(&self, sealed: &[u8], peer_id: &PeerId) -> Result<Vec<u8>> {
        let cipher = self.session_cipher(peer_id)?;
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(BitchatError::decryption_failed());
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| BitchatError::decryption_failed())
    }

    // ----------------------------------------------------------------------------
    // Signatures
    // ----------------------------------------------------------------------------

    /// Sign with the local ephemeral signing key
    pub fn sign(&self, data: &[u8]) -> [u8; 64] {
        let ephemeral = Arc::clone(&self.read_state().ephemeral);
        ephemeral.signing.sign(data)
    }

    /// Verify a signature from a peer's ephemeral signing key
    pub fn verify(&self, signature: &[u8], data: &[u8], peer_id: &PeerId) -> Result<bool> {
        let signing_key = self
            .read_state()
            .peers
            .get(peer_id)
            .map(|peer| peer.signing_public_key)
            .ok_or_else(|| BitchatError::no_shared_secret(peer_id))?;
        Ok(IdentityKeyPair::verify(&signing_key, data, signature))
    }

    // ----------------------------------------------------------------------------
    // Peer Bookkeeping
    // ----------------------------------------------------------------------------

    /// Persistent identity public key a peer presented
    pub fn export_persistent_identity_public_key(&self, peer_id: &PeerId) -> Option<[u8; 32]> {
        self.read_state()
            .peers
            .get(peer_id)
            .map(|peer| peer.identity_public_key)
    }

    /// Fingerprint of a peer's persistent identity
    pub fn peer_fingerprint(&self, peer_id: &PeerId) -> Option<Fingerprint> {
        self.export_persistent_identity_public_key(peer_id)
            .map(generate_fingerprint)
    }

    pub fn has_shared_secret(&self, peer_id: &PeerId) -> bool {
        self.read_state().peers.contains_key(peer_id)
    }

    /// Forget one peer's key material
    pub fn remove_peer(&self, peer_id: &PeerId) -> bool {
        self.write_state().peers.remove(peer_id).is_some()
    }

    pub fn peer_count(&self) -> usize {
        self.read_state().peers.len()
    }

    /// Replace the ephemeral key pairs
    ///
    /// Every peer session is dropped since its key depended on the old pair.
    pub fn rotate_ephemeral_keys(&self) {
        let mut state = self.write_state();
        state.ephemeral = Arc::new(EphemeralKeys::generate());
        state.peers.clear();
        debug!("Rotated ephemeral keys");
    }

    #[cfg(test)]
    pub(crate) fn session_key(&self, peer_id: &PeerId) -> Option<[u8; 32]> {
        self.read_state()
            .peers
            .get(peer_id)
            .map(|peer| *peer.session_key)
    }
}

/// HKDF-SHA256 over the X25519 output
fn derive_session_key(shared_secret: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let hkdf = Hkdf::<Sha256>::new(Some(SESSION_KDF_SALT), shared_secret);
    let mut key = Zeroizing::new([0u8; 32]);
    hkdf.expand(&[], &mut key[..])
        .map_err(|_| BitchatError::Crypto(CryptographicError::KeyDerivationFailed))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MemoryStorage;

    fn service() -> EncryptionService {
        let service = EncryptionService::new(
            Arc::new(MemoryStorage::new()),
            &IdentityConfig::default(),
        );
        service.initialize().unwrap();
        service
    }

    fn pair() -> (EncryptionService, EncryptionService, PeerId, PeerId) {
        let alice = service();
        let bob = service();
        let alice_id = PeerId::new([0xA; 8]);
        let bob_id = PeerId::new([0xB; 8]);
        alice
            .ingest_peer_public_keys(bob_id, &bob.combined_public_key_export().unwrap())
            .unwrap();
        bob.ingest_peer_public_keys(alice_id, &alice.combined_public_key_export().unwrap())
            .unwrap();
        (alice, bob, alice_id, bob_id)
    }

    #[test]
    fn test_session_keys_match() {
        let (alice, bob, alice_id, bob_id) = pair();
        assert_eq!(alice.session_key(&bob_id), bob.session_key(&alice_id));
        assert!(alice.session_key(&bob_id).is_some());
    }

    #[test]
    fn test_seal_open_and_signatures() {
        let (alice, bob, alice_id, bob_id) = pair();

        let sealed = alice.seal(b"hello", &bob_id).unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + 5 + TAG_LEN);
        assert_eq!(bob.open(&sealed, &alice_id).unwrap(), b"hello");
        assert!(bob.open(&sealed[..NONCE_LEN + TAG_LEN - 1], &alice_id)
            .unwrap_err()
            .is_decryption_failed());

        let signature = alice.sign(b"data");
        assert!(bob.verify(&signature, b"data", &alice_id).unwrap());
        assert!(!bob.verify(&signature, b"tampered", &alice_id).unwrap());
        assert!(!bob.verify(&[1, 2, 3], b"data", &alice_id).unwrap());
    }

    #[test]
    fn test_unknown_peer_has_no_shared_secret() {
        let alice = service();
        let stranger = PeerId::new([9; 8]);
        assert!(alice.seal(b"x", &stranger).unwrap_err().is_no_shared_secret());
        assert!(alice.open(&[0; 40], &stranger).unwrap_err().is_no_shared_secret());
        assert!(alice.verify(&[0; 64], b"x", &stranger).unwrap_err().is_no_shared_secret());
    }

    #[test]
    fn test_low_order_key_agreement_rejected() {
        let alice = service();
        let bob = service();
        let mut blob = bob.combined_public_key_export().unwrap();
        blob[0..32].copy_from_slice(&[0u8; 32]);

        let peer = PeerId::new([1; 8]);
        assert!(alice
            .ingest_peer_public_keys(peer, &blob)
            .unwrap_err()
            .is_invalid_public_key());
        assert!(!alice.has_shared_secret(&peer));
    }

    #[test]
    fn test_export_requires_identity() {
        let service = EncryptionService::new(
            Arc::new(MemoryStorage::new()),
            &IdentityConfig::default(),
        );
        assert!(matches!(
            service.combined_public_key_export(),
            Err(BitchatError::Crypto(CryptographicError::IdentityUnavailable))
        ));
    }

    #[test]
    fn test_initialize_reuses_stored_identity() {
        let storage: Arc<dyn SecureStorage> = Arc::new(MemoryStorage::new());
        let config = IdentityConfig::default();
        let first = EncryptionService::new(storage.clone(), &config)
            .initialize()
            .unwrap();
        let second = EncryptionService::new(storage.clone(), &config)
            .initialize()
            .unwrap();
        assert_eq!(first, second);

        storage
            .store(&config.identity_key_storage_key, vec![1, 2, 3])
            .unwrap();
        let third = EncryptionService::new(storage.clone(), &config)
            .initialize()
            .unwrap();
        assert_ne!(third, first);
        assert_eq!(
            storage
                .retrieve(&config.identity_key_storage_key)
                .unwrap()
                .map(|key| key.len()),
            Some(32)
        );
    }

    #[test]
    fn test_reset_persistent_identity() {
        let (alice, _, _, bob_id) = pair();
        let before = alice.local_fingerprint().unwrap();

        alice.reset_persistent_identity().unwrap();
        assert_eq!(alice.local_fingerprint(), None);
        assert_eq!(alice.peer_count(), 0);
        assert!(!alice.has_shared_secret(&bob_id));

        let after = alice.create_persistent_identity().unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn test_rotation_drops_peers() {
        let (alice, _, _, bob_id) = pair();
        let export = alice.combined_public_key_export().unwrap();
        alice.rotate_ephemeral_keys();
        assert!(!alice.has_shared_secret(&bob_id));
        let rotated = alice.combined_public_key_export().unwrap();
        assert_ne!(export[..64], rotated[..64]);
        assert_eq!(export[64..], rotated[64..]);
    }
}
