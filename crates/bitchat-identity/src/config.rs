//! Centralized Configuration Management
//!
//! Configuration structures for the identity and session establishment core.
//! Everything is serde-serializable so embedders can load it from a file.

use serde::{Deserialize, Serialize};

use crate::{BitchatError, Result};

// ----------------------------------------------------------------------------
// Protocol Constants
// ----------------------------------------------------------------------------

/// Session-establishment protocol version, bound into every handshake as the Noise prologue
pub const PROTOCOL_VERSION: u8 = 1;

/// HKDF salt for per-peer session keys. Changing it breaks interoperability.
pub const SESSION_KDF_SALT: &[u8] = b"bitchat-v1";

/// Upper bound for a single handshake frame, checked before any crypto runs
pub const MAX_HANDSHAKE_MESSAGE_SIZE: usize = 65535;

/// Storage key for the persistent identity private key
pub const IDENTITY_KEY_STORAGE_KEY: &str = "bitchat.persistentIdentityPrivateKey";

/// Storage key for the serialized identity cache
pub const IDENTITY_CACHE_STORAGE_KEY: &str = "bitchat.identityCache.v2";

// ----------------------------------------------------------------------------
// Identity Configuration
// ----------------------------------------------------------------------------

/// Configuration for identity persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Blob store key holding the persistent identity private key
    pub identity_key_storage_key: String,
    /// Blob store key holding the serialized identity cache
    pub cache_storage_key: String,
    /// Minimum interval between automatic cache flushes (0 = flush on every mutation)
    pub cache_save_interval_ms: u64,
    /// Ephemeral sessions older than this are dropped by stale-session cleanup
    pub max_ephemeral_age_ms: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            identity_key_storage_key: IDENTITY_KEY_STORAGE_KEY.to_string(),
            cache_storage_key: IDENTITY_CACHE_STORAGE_KEY.to_string(),
            cache_save_interval_ms: 2_000,  // debounce bursts of handshakes
            max_ephemeral_age_ms: 3_600_000, // 1 hour
        }
    }
}

// ----------------------------------------------------------------------------
// Handshake Configuration
// ----------------------------------------------------------------------------

/// Configuration for handshake bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Maximum accepted handshake frame size in bytes
    pub max_message_size: usize,
    /// Initiation attempts before a peer is given up on
    pub max_attempts: u32,
    /// Delay before retrying after a failure
    pub retry_delay_ms: u64,
    /// Minimum spacing between two initiations to the same peer
    pub min_time_between_handshakes_ms: u64,
    /// Handshakes idle longer than this are considered stale
    pub stale_timeout_ms: u64,
    /// Number of recent handshake frames remembered for duplicate suppression
    pub message_history_limit: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            max_message_size: MAX_HANDSHAKE_MESSAGE_SIZE,
            max_attempts: 3,
            retry_delay_ms: 2_000,
            min_time_between_handshakes_ms: 1_000,
            stale_timeout_ms: 30_000,
            message_history_limit: 100,
        }
    }
}

// ----------------------------------------------------------------------------
// Aggregate Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the identity core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BitchatConfig {
    pub identity: IdentityConfig,
    pub handshake: HandshakeConfig,
}

impl BitchatConfig {
    /// Configuration for tests: synchronous flushes, no retry delays
    pub fn testing() -> Self {
        Self {
            identity: IdentityConfig {
                cache_save_interval_ms: 0,
                ..IdentityConfig::default()
            },
            handshake: HandshakeConfig {
                retry_delay_ms: 0,
                min_time_between_handshakes_ms: 0,
                ..HandshakeConfig::default()
            },
        }
    }

    /// Reject values that would break the protocol or the storage contract
    pub fn validate(&self) -> Result<()> {
        if self.handshake.max_message_size == 0
            || self.handshake.max_message_size > MAX_HANDSHAKE_MESSAGE_SIZE
        {
            return Err(BitchatError::config_error(format!(
                "max_message_size must be in 1..={}",
                MAX_HANDSHAKE_MESSAGE_SIZE
            )));
        }
        if self.handshake.max_attempts == 0 {
            return Err(BitchatError::config_error("max_attempts must be at least 1"));
        }
        if self.identity.identity_key_storage_key.is_empty()
            || self.identity.cache_storage_key.is_empty()
        {
            return Err(BitchatError::config_error("storage keys must not be empty"));
        }
        if self.identity.identity_key_storage_key == self.identity.cache_storage_key {
            return Err(BitchatError::config_error(
                "identity key and cache must use different storage keys",
            ));
        }
        Ok(())
    }
}
