//! Error types for the BitChat identity subsystem
//!
//! This module contains the error types used throughout the identity and session
//! establishment core: cryptographic errors, handshake/session errors, storage
//! errors, and the `BitchatError` type that unifies them.

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Specific cryptographic error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptographicError {
    #[error("Invalid public key: {reason}")]
    InvalidPublicKey { reason: String },
    #[error("No shared secret established with peer {peer_id}")]
    NoSharedSecret { peer_id: String },
    #[error("Decryption failed")]
    DecryptionFailed,
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Key derivation failed")]
    KeyDerivationFailed,
    #[error("Persistent identity is not available")]
    IdentityUnavailable,
}

/// Specific session error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found for peer {peer_id}")]
    SessionNotFound { peer_id: String },
    #[error("Session handshake failed with peer {peer_id}: {reason}")]
    HandshakeFailed { peer_id: String, reason: String },
    #[error("Session already exists for peer {peer_id}")]
    SessionAlreadyExists { peer_id: String },
    #[error("Peer {fingerprint} is blocked")]
    PeerBlocked { fingerprint: String },
}

/// Errors related to the durable blob store
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Secure storage not available")]
    NotAvailable,
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Core error type for the BitChat identity subsystem
#[derive(Debug, thiserror::Error)]
pub enum BitchatError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptographicError),

    #[error("Noise protocol error: {0}")]
    Noise(#[from] snow::Error),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl BitchatError {
    /// Create an invalid public key error
    pub fn invalid_public_key<T: Into<String>>(reason: T) -> Self {
        BitchatError::Crypto(CryptographicError::InvalidPublicKey {
            reason: reason.into(),
        })
    }

    /// Create a missing shared secret error
    pub fn no_shared_secret<P: ToString>(peer_id: P) -> Self {
        BitchatError::Crypto(CryptographicError::NoSharedSecret {
            peer_id: peer_id.to_string(),
        })
    }

    /// Create a decryption failure
    pub fn decryption_failed() -> Self {
        BitchatError::Crypto(CryptographicError::DecryptionFailed)
    }

    /// Create a handshake failed error
    pub fn handshake_failed<P: ToString, R: Into<String>>(peer_id: P, reason: R) -> Self {
        BitchatError::Session(SessionError::HandshakeFailed {
            peer_id: peer_id.to_string(),
            reason: reason.into(),
        })
    }

    /// Create a session not found error
    pub fn session_not_found<P: ToString>(peer_id: P) -> Self {
        BitchatError::Session(SessionError::SessionNotFound {
            peer_id: peer_id.to_string(),
        })
    }

    /// Create a storage backend error with a message
    pub fn storage_error<T: Into<String>>(message: T) -> Self {
        BitchatError::Storage(StorageError::Backend(message.into()))
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        BitchatError::Configuration {
            reason: reason.into(),
        }
    }

    /// True for `InvalidPublicKey`
    pub fn is_invalid_public_key(&self) -> bool {
        matches!(
            self,
            BitchatError::Crypto(CryptographicError::InvalidPublicKey { .. })
        )
    }

    /// True for `NoSharedSecret`
    pub fn is_no_shared_secret(&self) -> bool {
        matches!(
            self,
            BitchatError::Crypto(CryptographicError::NoSharedSecret { .. })
        )
    }

    /// True for `DecryptionFailed`
    pub fn is_decryption_failed(&self) -> bool {
        matches!(self, BitchatError::Crypto(CryptographicError::DecryptionFailed))
    }

    /// True for `HandshakeFailed`
    pub fn is_handshake_failed(&self) -> bool {
        matches!(
            self,
            BitchatError::Session(SessionError::HandshakeFailed { .. })
        )
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, BitchatError>;
pub type BitchatResult<T> = Result<T>;
