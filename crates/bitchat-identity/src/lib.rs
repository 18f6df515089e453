//! BitChat Secure Identity & Session Establishment
//!
//! This crate provides the identity core of the BitChat peer-to-peer protocol:
//! a three-layer peer identity model, a mutually-authenticated Noise XX
//! handshake that binds a transient connection to a long-term fingerprint, and
//! the key management and encryption services that seal payloads for
//! established peers.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod errors;
pub mod identity;
pub mod protocol;
pub mod session;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{BitchatConfig, HandshakeConfig, IdentityConfig};
pub use errors::{
    BitchatError, BitchatResult, CryptographicError, Result, SessionError, StorageError,
};
pub use identity::{
    CryptographicIdentity, EncryptedStorage, EphemeralIdentity, FileStorage, HandshakeState,
    IdentityCache, IdentityCacheStats, MemoryStorage, SecureIdentityStateManager, SecureStorage,
    SocialIdentity, SocialMutation, TrustLevel,
};
pub use protocol::{
    EncryptionService, EstablishedSession, HandshakeCoordinator, HandshakeRole, HandshakeSession,
    SessionState,
};
pub use session::{HandshakeEvent, PeerSessions};
pub use types::{Fingerprint, PeerId, SystemTimeSource, TimeSource, Timestamp};
