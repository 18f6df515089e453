//! Identity cache for storing all durable identity data

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{CryptographicIdentity, SocialIdentity};
use crate::types::Fingerprint;

/// Current on-disk layout version of [`IdentityCache`]
pub const IDENTITY_CACHE_VERSION: u32 = 2;

/// In-memory cache of all durable identity data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityCache {
    /// Layout version
    pub version: u32,
    /// Cryptographic identities by fingerprint
    pub cryptographic_identities: BTreeMap<Fingerprint, CryptographicIdentity>,
    /// Social identities by fingerprint
    pub social_identities: BTreeMap<Fingerprint, SocialIdentity>,
    /// Fingerprints confirmed out-of-band
    pub verified_fingerprints: Vec<Fingerprint>,
}

impl IdentityCache {
    /// Create a new empty identity cache
    pub fn new() -> Self {
        Self {
            version: IDENTITY_CACHE_VERSION,
            cryptographic_identities: BTreeMap::new(),
            social_identities: BTreeMap::new(),
            verified_fingerprints: Vec::new(),
        }
    }

    /// Get cryptographic identity by fingerprint
    pub fn get_cryptographic_identity(
        &self,
        fingerprint: &Fingerprint,
    ) -> Option<&CryptographicIdentity> {
        self.cryptographic_identities.get(fingerprint)
    }

    /// Get social identity by fingerprint
    pub fn get_social_identity(&self, fingerprint: &Fingerprint) -> Option<&SocialIdentity> {
        self.social_identities.get(fingerprint)
    }

    /// Set verified status
    pub fn set_verified(&mut self, fingerprint: &Fingerprint, verified: bool) {
        if verified {
            if !self.verified_fingerprints.contains(fingerprint) {
                self.verified_fingerprints.push(fingerprint.clone());
            }
        } else {
            self.verified_fingerprints.retain(|f| f != fingerprint);
        }
    }

    /// Check if a fingerprint is verified
    pub fn is_verified(&self, fingerprint: &Fingerprint) -> bool {
        self.verified_fingerprints.contains(fingerprint)
    }

    /// Find fingerprint by nickname (petname first, then claimed nickname)
    pub fn find_by_nickname(&self, nickname: &str) -> Option<&Fingerprint> {
        self.social_identities
            .values()
            .find(|social| social.local_petname.as_deref() == Some(nickname))
            .or_else(|| {
                self.social_identities
                    .values()
                    .find(|social| social.claimed_nickname.as_deref() == Some(nickname))
            })
            .map(|social| &social.fingerprint)
    }

    /// Remove an identity completely
    pub fn remove_identity(&mut self, fingerprint: &Fingerprint) -> bool {
        let had_crypto = self.cryptographic_identities.remove(fingerprint).is_some();
        let had_social = self.social_identities.remove(fingerprint).is_some();
        self.verified_fingerprints.retain(|f| f != fingerprint);
        had_crypto || had_social
    }

    /// Get cache statistics
    pub fn stats(&self) -> IdentityCacheStats {
        IdentityCacheStats {
            total_cryptographic_identities: self.cryptographic_identities.len(),
            total_social_identities: self.social_identities.len(),
            total_verified: self.verified_fingerprints.len(),
            total_favorites: self
                .social_identities
                .values()
                .filter(|s| s.is_favorite)
                .count(),
            total_blocked: self
                .social_identities
                .values()
                .filter(|s| s.is_blocked)
                .count(),
        }
    }
}

impl Default for IdentityCache {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

/// Statistics about the identity cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityCacheStats {
    /// Total cryptographic identities
    pub total_cryptographic_identities: usize,
    /// Total social identities
    pub total_social_identities: usize,
    /// Total verified identities
    pub total_verified: usize,
    /// Total favorites
    pub total_favorites: usize,
    /// Total blocked
    pub total_blocked: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SocialMutation;
    use crate::types::Timestamp;

    #[test]
    fn test_find_by_nickname_prefers_petname() {
        let mut cache = IdentityCache::new();
        let alice = Fingerprint::new([1; 32]);
        let mallory = Fingerprint::new([2; 32]);

        let mut a = SocialIdentity::new(alice.clone(), Timestamp::new(0));
        a.apply(SocialMutation::SetPetname(Some("alice".into())), Timestamp::new(0));
        let mut m = SocialIdentity::new(mallory.clone(), Timestamp::new(0));
        m.apply(
            SocialMutation::SetClaimedNickname(Some("alice".into())),
            Timestamp::new(0),
        );
        cache.social_identities.insert(mallory, m);
        cache.social_identities.insert(alice.clone(), a);

        assert_eq!(cache.find_by_nickname("alice"), Some(&alice));
        assert_eq!(cache.find_by_nickname("nobody"), None);
    }

    #[test]
    fn test_remove_identity_clears_verified() {
        let mut cache = IdentityCache::new();
        let fp = Fingerprint::new([3; 32]);
        cache
            .social_identities
            .insert(fp.clone(), SocialIdentity::new(fp.clone(), Timestamp::new(0)));
        cache.set_verified(&fp, true);
        cache.set_verified(&fp, true);
        assert_eq!(cache.stats().total_verified, 1);

        assert!(cache.remove_identity(&fp));
        assert!(!cache.is_verified(&fp));
        assert!(!cache.remove_identity(&fp));
    }
}
