//! Core identity types and enums

use serde::{Deserialize, Serialize};

use crate::types::Fingerprint;

// ----------------------------------------------------------------------------
// Handshake State
// ----------------------------------------------------------------------------

/// Handshake sub-phase for a peer connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeState {
    /// No handshake message exchanged yet
    None,
    /// Message 1 sent or received
    Initiated,
    /// Message 2 sent or received
    InProgress,
    /// Message 3 exchanged and the peer's identity confirmed
    Completed { fingerprint: Fingerprint },
    /// Handshake failed; terminal for this connection
    Failed { reason: String },
}

impl HandshakeState {
    /// Check if handshake is complete
    pub fn is_complete(&self) -> bool {
        matches!(self, HandshakeState::Completed { .. })
    }

    /// Completed and failed handshakes accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HandshakeState::Completed { .. } | HandshakeState::Failed { .. }
        )
    }

    /// Get the fingerprint if handshake is complete
    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        match self {
            HandshakeState::Completed { fingerprint } => Some(fingerprint),
            _ => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Trust Level
// ----------------------------------------------------------------------------

/// Trust level for a peer, ordered ascending
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TrustLevel {
    /// Unknown peer (default)
    #[default]
    Unknown = 0,
    /// Seen and labelled, no stronger claim
    Casual = 1,
    /// Trusted by explicit user action
    Trusted = 2,
    /// Verified peer (fingerprint confirmed out-of-band)
    Verified = 3,
}

impl core::fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            TrustLevel::Unknown => "unknown",
            TrustLevel::Casual => "casual",
            TrustLevel::Trusted => "trusted",
            TrustLevel::Verified => "verified",
        };
        f.write_str(name)
    }
}

impl core::str::FromStr for TrustLevel {
    type Err = crate::BitchatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unknown" => Ok(TrustLevel::Unknown),
            "casual" => Ok(TrustLevel::Casual),
            "trusted" => Ok(TrustLevel::Trusted),
            "verified" => Ok(TrustLevel::Verified),
            other => Err(crate::BitchatError::config_error(format!(
                "unknown trust level: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trust_levels_are_ordered() {
        assert!(TrustLevel::Unknown < TrustLevel::Casual);
        assert!(TrustLevel::Casual < TrustLevel::Trusted);
        assert!(TrustLevel::Trusted < TrustLevel::Verified);
        assert_eq!("Trusted".parse::<TrustLevel>().unwrap(), TrustLevel::Trusted);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!HandshakeState::None.is_terminal());
        assert!(!HandshakeState::InProgress.is_terminal());
        assert!(HandshakeState::Failed { reason: "x".into() }.is_terminal());
        let done = HandshakeState::Completed {
            fingerprint: Fingerprint::new([7; 32]),
        };
        assert!(done.is_terminal());
        assert_eq!(done.fingerprint(), Some(&Fingerprint::new([7; 32])));
    }
}
