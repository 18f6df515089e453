//! Social identity with user-assigned metadata

use serde::{Deserialize, Serialize};

use super::types::TrustLevel;
use crate::types::{Fingerprint, Timestamp};

/// Social identity with user-assigned metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialIdentity {
    /// Associated fingerprint
    pub fingerprint: Fingerprint,
    /// Peer's claimed nickname (advisory, untrusted)
    pub claimed_nickname: Option<String>,
    /// User-assigned local petname
    pub local_petname: Option<String>,
    /// Trust level
    pub trust_level: TrustLevel,
    /// Is this peer a favorite?
    pub is_favorite: bool,
    /// Is this peer blocked?
    pub is_blocked: bool,
    /// Last interaction timestamp
    pub last_interaction: Timestamp,
    /// Notes about this peer
    pub notes: Option<String>,
}

/// One explicit change to a social identity
///
/// There is deliberately no variant that lowers trust; see
/// [`SocialIdentity::reset_trust`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocialMutation {
    SetPetname(Option<String>),
    SetClaimedNickname(Option<String>),
    SetFavorite(bool),
    SetBlocked(bool),
    SetNotes(Option<String>),
    /// Raise trust to at least this level; a lower level is a no-op
    RaiseTrust(TrustLevel),
    /// Out-of-band fingerprint verification succeeded
    MarkVerified,
}

impl SocialIdentity {
    /// Create a new social identity
    pub fn new(fingerprint: Fingerprint, now: Timestamp) -> Self {
        Self {
            fingerprint,
            claimed_nickname: None,
            local_petname: None,
            trust_level: TrustLevel::Unknown,
            is_favorite: false,
            is_blocked: false,
            last_interaction: now,
            notes: None,
        }
    }

    /// Get the display name (petname if set, otherwise claimed nickname)
    pub fn display_name(&self) -> Option<&str> {
        self.local_petname
            .as_deref()
            .or(self.claimed_nickname.as_deref())
    }

    /// Apply a mutation
    pub fn apply(&mut self, mutation: SocialMutation, now: Timestamp) {
        match mutation {
            SocialMutation::SetPetname(petname) => self.local_petname = petname,
            SocialMutation::SetClaimedNickname(nickname) => self.claimed_nickname = nickname,
            SocialMutation::SetFavorite(favorite) => self.is_favorite = favorite,
            SocialMutation::SetBlocked(blocked) => self.is_blocked = blocked,
            SocialMutation::SetNotes(notes) => self.notes = notes,
            SocialMutation::RaiseTrust(level) => {
                self.trust_level = self.trust_level.max(level);
            }
            SocialMutation::MarkVerified => self.trust_level = TrustLevel::Verified,
        }
        self.last_interaction = now;
    }

    /// Drop trust back to `Unknown`
    pub fn reset_trust(&mut self, now: Timestamp) {
        self.trust_level = TrustLevel::Unknown;
        self.last_interaction = now;
    }
}
