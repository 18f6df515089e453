//! Cryptographic primitives for BitChat
//!
//! Thin, safe wrappers around the primitives the identity core builds on:
//! Ed25519 identity keys, the X25519 Noise static key bound to them, Noise XX
//! handshake state, and fingerprint generation.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::{CryptoRng, OsRng, RngCore};
use sha2::{Digest, Sha256};
use snow::{Builder, HandshakeState};
use zeroize::Zeroizing;

use crate::config::{MAX_HANDSHAKE_MESSAGE_SIZE, PROTOCOL_VERSION};
use crate::types::Fingerprint;
use crate::Result;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Noise Protocol configuration for BitChat
pub const NOISE_PATTERN: &str = "Noise_XX_25519_ChaChaPoly_SHA256";

// ----------------------------------------------------------------------------
// Identity Key Pair (Ed25519)
// ----------------------------------------------------------------------------

/// Ed25519 signing key pair
///
/// Used both for the persistent identity and for the per-process ephemeral
/// signing key.
#[derive(Clone)]
pub struct IdentityKeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl core::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public_key", &hex::encode(self.public_key_bytes()))
            .finish()
    }
}

impl IdentityKeyPair {
    /// Generate a new random identity key pair
    pub fn generate() -> Self {
        Self::generate_with_rng(&mut OsRng)
    }

    /// Generate a new identity key pair with custom RNG
    pub fn generate_with_rng<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut secret_bytes = Zeroizing::new([0u8; 32]);
        rng.fill_bytes(&mut secret_bytes[..]);
        Self::from_bytes(&secret_bytes)
    }

    /// Create from raw private key bytes
    pub fn from_bytes(private_key: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(private_key);
        let verifying_key = signing_key.verifying_key();

        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Get the public key bytes
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Get the private key bytes
    pub fn private_key_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing_key.to_bytes())
    }

    /// Fingerprint of this key pair's public key
    pub fn fingerprint(&self) -> Fingerprint {
        generate_fingerprint(self.public_key_bytes())
    }

    /// Sign data
    pub fn sign<T: AsRef<[u8]>>(&self, data: T) -> [u8; 64] {
        self.signing_key.sign(data.as_ref()).to_bytes()
    }

    /// Verify a signature made by `public_key`
    ///
    /// Returns `false` for malformed keys or signatures as well as for
    /// signatures that simply do not match.
    pub fn verify<D: AsRef<[u8]>>(public_key: &[u8; 32], data: D, signature: &[u8]) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(public_key) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        verifying_key.verify(data.as_ref(), &signature).is_ok()
    }

    /// Derive the X25519 key pair bound to this Ed25519 key
    pub fn to_noise_keypair(&self) -> NoiseKeyPair {
        NoiseKeyPair {
            private_key: Zeroizing::new(self.signing_key.to_scalar_bytes()),
            public_key: self.verifying_key.to_montgomery().to_bytes(),
        }
    }
}

/// Parse and validate an Ed25519 public key
pub fn parse_verifying_key(bytes: &[u8; 32]) -> Option<VerifyingKey> {
    VerifyingKey::from_bytes(bytes).ok()
}

/// X25519 public key that an Ed25519 identity key maps to
pub fn noise_static_for_identity(identity_public: &[u8; 32]) -> Option<[u8; 32]> {
    parse_verifying_key(identity_public).map(|key| key.to_montgomery().to_bytes())
}

// ----------------------------------------------------------------------------
// Noise Key Pair (X25519)
// ----------------------------------------------------------------------------

/// X25519 static key pair used by the Noise handshake
///
/// Derived from the persistent identity so that the fingerprint a peer
/// computes always belongs to the static key it authenticated.
pub struct NoiseKeyPair {
    private_key: Zeroizing<[u8; 32]>,
    public_key: [u8; 32],
}

impl core::fmt::Debug for NoiseKeyPair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NoiseKeyPair")
            .field("public_key", &hex::encode(self.public_key))
            .finish()
    }
}

impl NoiseKeyPair {
    /// Get the public key bytes
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.public_key
    }

    /// Get the private key bytes
    pub(crate) fn private_key_bytes(&self) -> &[u8; 32] {
        &self.private_key
    }
}

// ----------------------------------------------------------------------------
// Fingerprint Generation
// ----------------------------------------------------------------------------

/// Generate SHA-256 fingerprint from a public key
pub fn generate_fingerprint<T: AsRef<[u8]>>(public_key: T) -> Fingerprint {
    let hash = Sha256::digest(public_key.as_ref());
    let mut fingerprint = [0u8; 32];
    fingerprint.copy_from_slice(&hash);
    Fingerprint::new(fingerprint)
}

// ----------------------------------------------------------------------------
// Noise Protocol Handshake
// ----------------------------------------------------------------------------

/// Noise Protocol handshake state
pub struct NoiseHandshake {
    state: Box<HandshakeState>,
}

impl core::fmt::Debug for NoiseHandshake {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NoiseHandshake")
            .field("initiator", &self.state.is_initiator())
            .field("finished", &self.state.is_handshake_finished())
            .finish()
    }
}

impl NoiseHandshake {
    /// Create initiator handshake
    pub fn initiator(local_key: &NoiseKeyPair) -> Result<Self> {
        Self::build(local_key, &[PROTOCOL_VERSION], true)
    }

    /// Create responder handshake
    pub fn responder(local_key: &NoiseKeyPair) -> Result<Self> {
        Self::build(local_key, &[PROTOCOL_VERSION], false)
    }

    /// Peers with different prologues fail at the first encrypted payload
    fn build(local_key: &NoiseKeyPair, prologue: &[u8], initiator: bool) -> Result<Self> {
        let builder = Builder::new(NOISE_PATTERN.parse()?)
            .local_private_key(local_key.private_key_bytes())
            .prologue(prologue);
        let state = if initiator {
            builder.build_initiator()?
        } else {
            builder.build_responder()?
        };

        Ok(Self {
            state: Box::new(state),
        })
    }

    /// Write handshake message
    pub fn write_message(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut output = vec![0u8; MAX_HANDSHAKE_MESSAGE_SIZE];
        let len = self.state.write_message(payload, &mut output)?;
        output.truncate(len);
        Ok(output)
    }

    /// Read handshake message, returning its decrypted payload
    pub fn read_message(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = vec![0u8; MAX_HANDSHAKE_MESSAGE_SIZE];
        let len = self.state.read_message(input, &mut output)?;
        output.truncate(len);
        Ok(output)
    }

    /// Check if handshake is complete
    pub fn is_handshake_finished(&self) -> bool {
        self.state.is_handshake_finished()
    }

    /// Get remote static key (available once the peer sent `s`)
    pub fn get_remote_static(&self) -> Option<[u8; 32]> {
        self.state
            .get_remote_static()
            .and_then(|key| key.try_into().ok())
    }

    /// Handshake transcript hash, usable as a channel binding
    pub fn handshake_hash(&self) -> [u8; 32] {
        let mut hash = [0u8; 32];
        let raw = self.state.get_handshake_hash();
        let len = raw.len().min(32);
        hash[..len].copy_from_slice(&raw[..len]);
        hash
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_keypair() {
        let keypair = IdentityKeyPair::generate();
        let public_key = keypair.public_key_bytes();

        let data = b"test message";
        let signature = keypair.sign(data);

        assert!(IdentityKeyPair::verify(&public_key, data, &signature));
        assert!(!IdentityKeyPair::verify(&public_key, b"other", &signature));
        assert!(!IdentityKeyPair::verify(&public_key, data, &[0u8; 64]));
        assert!(!IdentityKeyPair::verify(&public_key, data, &[0u8; 10]));
    }

    #[test]
    fn test_identity_keypair_round_trips_private_bytes() {
        let keypair = IdentityKeyPair::generate();
        let restored = IdentityKeyPair::from_bytes(&keypair.private_key_bytes());
        assert_eq!(keypair.public_key_bytes(), restored.public_key_bytes());
        assert_eq!(keypair.fingerprint(), restored.fingerprint());
    }

    #[test]
    fn test_seeded_generation_is_deterministic() {
        use rand_chacha::rand_core::SeedableRng;
        use rand_chacha::ChaCha20Rng;

        let a = IdentityKeyPair::generate_with_rng(&mut ChaCha20Rng::seed_from_u64(7));
        let b = IdentityKeyPair::generate_with_rng(&mut ChaCha20Rng::seed_from_u64(7));
        let c = IdentityKeyPair::generate_with_rng(&mut ChaCha20Rng::seed_from_u64(8));
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_noise_key_is_bound_to_identity() {
        let identity = IdentityKeyPair::generate();
        let noise = identity.to_noise_keypair();

        let secret = x25519_dalek::StaticSecret::from(*noise.private_key_bytes());
        let public = x25519_dalek::PublicKey::from(&secret);
        assert_eq!(public.to_bytes(), noise.public_key_bytes());
        assert_eq!(
            noise_static_for_identity(&identity.public_key_bytes()),
            Some(noise.public_key_bytes())
        );
    }

    #[test]
    fn test_fingerprint_is_sha256() {
        let fingerprint = generate_fingerprint(b"abc");
        assert_eq!(
            fingerprint.to_string(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_noise_handshake() {
        let alice_key = IdentityKeyPair::generate().to_noise_keypair();
        let bob_key = IdentityKeyPair::generate().to_noise_keypair();

        let mut alice = NoiseHandshake::initiator(&alice_key).unwrap();
        let mut bob = NoiseHandshake::responder(&bob_key).unwrap();

        let message1 = alice.write_message(b"").unwrap();
        bob.read_message(&message1).unwrap();

        let message2 = bob.write_message(b"from bob").unwrap();
        assert_eq!(alice.read_message(&message2).unwrap(), b"from bob");

        let message3 = alice.write_message(b"from alice").unwrap();
        assert_eq!(bob.read_message(&message3).unwrap(), b"from alice");

        assert!(alice.is_handshake_finished());
        assert!(bob.is_handshake_finished());
        assert_eq!(alice.get_remote_static(), Some(bob_key.public_key_bytes()));
        assert_eq!(bob.get_remote_static(), Some(alice_key.public_key_bytes()));
        assert_eq!(alice.handshake_hash(), bob.handshake_hash());
    }

    #[test]
    fn test_protocol_version_mismatch_fails_handshake() {
        let alice_key = IdentityKeyPair::generate().to_noise_keypair();
        let bob_key = IdentityKeyPair::generate().to_noise_keypair();

        let mut alice = NoiseHandshake::initiator(&alice_key).unwrap();
        let mut bob =
            NoiseHandshake::build(&bob_key, &[PROTOCOL_VERSION.wrapping_add(1)], false).unwrap();

        let message1 = alice.write_message(b"").unwrap();
        bob.read_message(&message1).unwrap();
        let message2 = bob.write_message(b"from bob").unwrap();
        assert!(alice.read_message(&message2).is_err());
        assert!(!alice.is_handshake_finished());
    }
}
