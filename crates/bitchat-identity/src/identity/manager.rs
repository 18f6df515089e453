//! Secure Identity State Manager
//!
//! Central manager for the three-layer identity system: ephemeral sessions in
//! memory, cryptographic and social identities persisted through a
//! [`SecureStorage`] backend.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use super::{
    CryptographicIdentity, EphemeralIdentity, HandshakeState, IdentityCache, IdentityCacheStats,
    SecureStorage, SocialIdentity, SocialMutation, IDENTITY_CACHE_VERSION,
};
use crate::config::IdentityConfig;
use crate::types::{Fingerprint, PeerId, SystemTimeSource, TimeSource, Timestamp};
use crate::{BitchatError, Result};

/// Everything guarded by the manager's lock
#[derive(Debug)]
struct ManagerState {
    /// In-memory ephemeral identities (never persisted)
    ephemeral_sessions: BTreeMap<PeerId, EphemeralIdentity>,
    /// Durable identity data
    cache: IdentityCache,
    /// Last cache save timestamp (for debouncing)
    last_cache_save: Timestamp,
    /// Whether the cache has unsaved changes
    cache_dirty: bool,
}

/// Secure identity state manager implementing the three-layer identity model
///
/// Explicitly constructed and shared by `Arc`; several independent managers
/// can coexist in one process.
pub struct SecureIdentityStateManager<T: TimeSource = SystemTimeSource> {
    state: RwLock<ManagerState>,
    storage: Arc<dyn SecureStorage>,
    config: IdentityConfig,
    time_source: T,
    flush_failures: AtomicU64,
}

impl SecureIdentityStateManager<SystemTimeSource> {
    /// Create a manager using the wall clock
    pub fn new(storage: Arc<dyn SecureStorage>, config: IdentityConfig) -> Self {
        Self::with_time_source(storage, config, SystemTimeSource)
    }
}

impl<T: TimeSource> SecureIdentityStateManager<T> {
    /// Create a manager with an injected time source
    ///
    /// Nothing is read from storage until [`load`](Self::load) is called.
    pub fn with_time_source(
        storage: Arc<dyn SecureStorage>,
        config: IdentityConfig,
        time_source: T,
    ) -> Self {
        Self {
            state: RwLock::new(ManagerState {
                ephemeral_sessions: BTreeMap::new(),
                cache: IdentityCache::new(),
                last_cache_save: Timestamp::new(0),
                cache_dirty: false,
            }),
            storage,
            config,
            time_source,
            flush_failures: AtomicU64::new(0),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ManagerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ManagerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ----------------------------------------------------------------------------
    // Persistence
    // ----------------------------------------------------------------------------

    /// Load the identity cache from storage
    ///
    /// Missing, unreadable, corrupt, or wrong-version data leaves an empty
    /// cache behind. The condition is logged, never returned.
    pub fn load(&self) {
        let cache = match self.storage.retrieve(&self.config.cache_storage_key) {
            Ok(Some(bytes)) => match bincode::deserialize::<IdentityCache>(&bytes) {
                Ok(cache) if cache.version == IDENTITY_CACHE_VERSION => {
                    debug!(
                        identities = cache.cryptographic_identities.len(),
                        "Loaded identity cache"
                    );
                    cache
                }
                Ok(cache) => {
                    warn!(
                        found = cache.version,
                        expected = IDENTITY_CACHE_VERSION,
                        "Identity cache version mismatch, starting empty"
                    );
                    IdentityCache::new()
                }
                Err(e) => {
                    warn!(error = %e, "Identity cache is corrupt, starting empty");
                    IdentityCache::new()
                }
            },
            Ok(None) => IdentityCache::new(),
            Err(e) => {
                warn!(error = %e, "Identity cache could not be read, starting empty");
                IdentityCache::new()
            }
        };

        let mut state = self.write_state();
        state.cache = cache;
        state.cache_dirty = false;
    }

    /// Serialize and store the whole cache now
    pub fn save(&self) -> Result<()> {
        let mut state = self.write_state();
        self.save_locked(&mut state)
    }

    /// Save only if there are unsaved changes
    pub fn flush(&self) -> Result<()> {
        let mut state = self.write_state();
        if state.cache_dirty {
            self.save_locked(&mut state)?;
        }
        Ok(())
    }

    /// Number of automatic flushes that failed since construction
    pub fn flush_failure_count(&self) -> u64 {
        self.flush_failures.load(Ordering::Relaxed)
    }

    /// Check if storage is available
    pub fn is_storage_available(&self) -> bool {
        self.storage.is_available()
    }

    fn save_locked(&self, state: &mut ManagerState) -> Result<()> {
        let bytes = bincode::serialize(&state.cache)?;
        self.storage.store(&self.config.cache_storage_key, bytes)?;
        state.cache_dirty = false;
        state.last_cache_save = self.time_source.now();
        Ok(())
    }

    /// Apply a cache mutation under the write lock, then flush if due
    fn mutate<R>(&self, f: impl FnOnce(&mut IdentityCache, Timestamp) -> R) -> R {
        let now = self.time_source.now();
        let mut state = self.write_state();
        let result = f(&mut state.cache, now);
        state.cache_dirty = true;

        let elapsed = now.duration_since(state.last_cache_save).as_millis() as u64;
        if elapsed >= self.config.cache_save_interval_ms {
            if let Err(e) = self.save_locked(&mut state) {
                self.flush_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Failed to flush identity cache");
            }
        }
        result
    }

    // ----------------------------------------------------------------------------
    // Ephemeral Identity Management
    // ----------------------------------------------------------------------------

    /// Register a new ephemeral session, replacing any previous binding
    pub fn register_ephemeral_session(&self, peer_id: PeerId) {
        let now = self.time_source.now();
        self.write_state()
            .ephemeral_sessions
            .insert(peer_id, EphemeralIdentity::new(peer_id, now));
    }

    /// Update handshake state for an ephemeral session
    ///
    /// Returns `Ok(false)` when the session is already terminal and the
    /// transition was refused.
    pub fn update_handshake_state(&self, peer_id: &PeerId, state: HandshakeState) -> Result<bool> {
        let now = self.time_source.now();
        let mut guard = self.write_state();
        let ephemeral = guard
            .ephemeral_sessions
            .get_mut(peer_id)
            .ok_or_else(|| BitchatError::session_not_found(peer_id))?;
        Ok(ephemeral.set_handshake_state(state, now))
    }

    /// Current handshake state for a peer
    pub fn handshake_state(&self, peer_id: &PeerId) -> Option<HandshakeState> {
        self.read_state()
            .ephemeral_sessions
            .get(peer_id)
            .map(|e| e.handshake_state.clone())
    }

    /// Remove an ephemeral session (connection closed)
    pub fn remove_ephemeral_session(&self, peer_id: &PeerId) -> bool {
        self.write_state().ephemeral_sessions.remove(peer_id).is_some()
    }

    /// Resolve a transient peer ID to its durable fingerprint
    ///
    /// Only answers once the handshake on that connection has completed.
    pub fn resolve_fingerprint(&self, peer_id: &PeerId) -> Option<Fingerprint> {
        self.read_state()
            .ephemeral_sessions
            .get(peer_id)
            .and_then(|e| e.fingerprint().cloned())
    }

    /// Drop ephemeral sessions idle longer than `max_ephemeral_age_ms`
    pub fn cleanup_stale_ephemeral_sessions(&self) -> usize {
        let now = self.time_source.now();
        let max_age = self.config.max_ephemeral_age_ms;
        let mut state = self.write_state();
        let before = state.ephemeral_sessions.len();
        state
            .ephemeral_sessions
            .retain(|_, e| (now.duration_since(e.last_activity).as_millis() as u64) < max_age);
        let removed = before - state.ephemeral_sessions.len();
        if removed > 0 {
            debug!(removed, "Cleaned up stale ephemeral sessions");
        }
        removed
    }

    /// Get ephemeral session count
    pub fn ephemeral_session_count(&self) -> usize {
        self.read_state().ephemeral_sessions.len()
    }

    // ----------------------------------------------------------------------------
    // Cryptographic Identity Management
    // ----------------------------------------------------------------------------

    /// Record a successful handshake with the identity behind `fingerprint`
    pub fn record_handshake(
        &self,
        fingerprint: &Fingerprint,
        public_key: [u8; 32],
        signing_public_key: Option<[u8; 32]>,
    ) {
        self.mutate(|cache, now| {
            let crypto = cache
                .cryptographic_identities
                .entry(fingerprint.clone())
                .or_insert_with(|| {
                    info!(fingerprint = %fingerprint.short(), "New cryptographic identity");
                    CryptographicIdentity::new(
                        fingerprint.clone(),
                        public_key,
                        signing_public_key,
                        now,
                    )
                });
            crypto.public_key = public_key;
            if signing_public_key.is_some() {
                crypto.signing_public_key = signing_public_key;
            }
            crypto.update_handshake_time(now);

            cache
                .social_identities
                .entry(fingerprint.clone())
                .or_insert_with(|| SocialIdentity::new(fingerprint.clone(), now));
        });
    }

    /// Get cryptographic identity by fingerprint
    pub fn cryptographic_identity(&self, fingerprint: &Fingerprint) -> Option<CryptographicIdentity> {
        self.read_state()
            .cache
            .get_cryptographic_identity(fingerprint)
            .cloned()
    }

    /// All known cryptographic identities
    pub fn cryptographic_identities(&self) -> Vec<CryptographicIdentity> {
        self.read_state()
            .cache
            .cryptographic_identities
            .values()
            .cloned()
            .collect()
    }

    // ----------------------------------------------------------------------------
    // Social Identity Management
    // ----------------------------------------------------------------------------

    /// Apply one explicit change to a peer's social identity, creating it if absent
    pub fn upsert_social(&self, fingerprint: &Fingerprint, mutation: SocialMutation) {
        self.mutate(|cache, now| {
            if mutation == SocialMutation::MarkVerified {
                cache.set_verified(fingerprint, true);
            }
            cache
                .social_identities
                .entry(fingerprint.clone())
                .or_insert_with(|| SocialIdentity::new(fingerprint.clone(), now))
                .apply(mutation, now);
        });
    }

    /// Drop a peer's trust back to `Unknown` and clear its verification
    ///
    /// Returns `false` if the fingerprint has no social identity.
    pub fn reset_trust(&self, fingerprint: &Fingerprint) -> bool {
        self.mutate(|cache, now| {
            cache.set_verified(fingerprint, false);
            match cache.social_identities.get_mut(fingerprint) {
                Some(social) => {
                    social.reset_trust(now);
                    true
                }
                None => false,
            }
        })
    }

    /// Get social identity by fingerprint
    pub fn social_identity(&self, fingerprint: &Fingerprint) -> Option<SocialIdentity> {
        self.read_state().cache.get_social_identity(fingerprint).cloned()
    }

    /// All known social identities
    pub fn social_identities(&self) -> Vec<SocialIdentity> {
        self.read_state()
            .cache
            .social_identities
            .values()
            .cloned()
            .collect()
    }

    /// Get display name for a fingerprint (petname, else claimed nickname)
    pub fn display_name(&self, fingerprint: &Fingerprint) -> Option<String> {
        self.read_state()
            .cache
            .get_social_identity(fingerprint)
            .and_then(|social| social.display_name().map(str::to_string))
    }

    /// Find fingerprint by nickname
    pub fn find_by_nickname(&self, nickname: &str) -> Option<Fingerprint> {
        self.read_state().cache.find_by_nickname(nickname).cloned()
    }

    /// Fingerprints marked as favorite
    pub fn favorites(&self) -> Vec<Fingerprint> {
        self.read_state()
            .cache
            .social_identities
            .values()
            .filter(|s| s.is_favorite)
            .map(|s| s.fingerprint.clone())
            .collect()
    }

    pub fn is_favorite(&self, fingerprint: &Fingerprint) -> bool {
        self.read_state()
            .cache
            .get_social_identity(fingerprint)
            .is_some_and(|s| s.is_favorite)
    }

    pub fn is_blocked(&self, fingerprint: &Fingerprint) -> bool {
        self.read_state()
            .cache
            .get_social_identity(fingerprint)
            .is_some_and(|s| s.is_blocked)
    }

    pub fn is_verified(&self, fingerprint: &Fingerprint) -> bool {
        self.read_state().cache.is_verified(fingerprint)
    }

    /// Get all verified fingerprints
    pub fn verified_fingerprints(&self) -> Vec<Fingerprint> {
        self.read_state().cache.verified_fingerprints.clone()
    }

    // ----------------------------------------------------------------------------
    // Cleanup and Maintenance
    // ----------------------------------------------------------------------------

    /// Remove an identity completely (explicit user action)
    pub fn forget_peer(&self, fingerprint: &Fingerprint) -> bool {
        let removed = self.mutate(|cache, _| cache.remove_identity(fingerprint));
        if removed {
            info!(fingerprint = %fingerprint.short(), "Forgot peer");
        }
        removed
    }

    /// Panic mode: clear all identity data in memory and in storage
    pub fn panic_clear_all_data(&self) -> Result<()> {
        let mut state = self.write_state();
        state.ephemeral_sessions.clear();
        state.cache = IdentityCache::new();
        state.cache_dirty = false;
        self.storage.delete(&self.config.cache_storage_key)?;
        warn!("Cleared all identity data");
        Ok(())
    }

    /// Get identity cache statistics
    pub fn cache_stats(&self) -> IdentityCacheStats {
        self.read_state().cache.stats()
    }
}

impl<T: TimeSource> Drop for SecureIdentityStateManager<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !state.cache_dirty {
            return;
        }
        match bincode::serialize(&state.cache) {
            Ok(bytes) => {
                if let Err(e) = self.storage.store(&self.config.cache_storage_key, bytes) {
                    warn!(error = %e, "Final identity cache flush failed");
                }
            }
            Err(e) => warn!(error = %e, "Final identity cache flush failed"),
        }
    }
}
