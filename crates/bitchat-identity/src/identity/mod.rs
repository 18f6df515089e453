//! Identity management system for BitChat
//!
//! Implements a three-layer identity model:
//! 1. Ephemeral Identity - Temporary per-connection state
//! 2. Cryptographic Identity - Long-term public keys and handshake history
//! 3. Social Identity - User-assigned names, trust levels, and social metadata

// Module declarations
pub mod cache;
pub mod crypto;
pub mod ephemeral;
pub mod manager;
pub mod social;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use cache::{IdentityCache, IdentityCacheStats, IDENTITY_CACHE_VERSION};
pub use crypto::CryptographicIdentity;
pub use ephemeral::EphemeralIdentity;
pub use manager::SecureIdentityStateManager;
pub use social::{SocialIdentity, SocialMutation};
pub use storage::{EncryptedStorage, FileStorage, MemoryStorage, SecureStorage};
pub use types::{HandshakeState, TrustLevel};
