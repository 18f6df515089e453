//! BitChat Protocol Module
//!
//! Session establishment for the identity core:
//! - `crypto`: Cryptographic primitives and key derivation
//! - `encryption`: Per-peer key agreement and authenticated encryption
//! - `handshake`: Noise XX handshake state machine
//! - `coordinator`: Role selection, retries, and duplicate suppression

pub mod coordinator;
pub mod crypto;
pub mod encryption;
pub mod handshake;

// Re-export crypto types
pub use crypto::{generate_fingerprint, IdentityKeyPair, NoiseHandshake, NoiseKeyPair, NOISE_PATTERN};

// Re-export encryption types
pub use encryption::{CombinedPublicKeys, EncryptionService, COMBINED_PUBLIC_KEY_LEN};

// Re-export handshake types
pub use handshake::{EstablishedSession, HandshakeRole, HandshakeSession, SessionState};

// Re-export coordination types
pub use coordinator::{CoordinationState, HandshakeCoordinator};
