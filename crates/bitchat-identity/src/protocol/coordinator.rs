//! Handshake coordination
//!
//! Advisory bookkeeping for the transport: which side initiates, whether an
//! initiation should be sent or accepted right now, how long to wait before a
//! retry, and which handshake frames were already seen. It never sends
//! anything itself.

use core::time::Duration;
use std::collections::{HashMap, HashSet, VecDeque};

use sha2::{Digest, Sha256};
use tracing::debug;

use super::handshake::HandshakeRole;
use crate::config::HandshakeConfig;
use crate::types::{PeerId, TimeSource, Timestamp};

/// Coordinator's view of a handshake with one peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinationState {
    Idle,
    Initiating,
    Responding,
    Established,
    Failed,
}

#[derive(Debug, Clone)]
struct PeerRecord {
    state: CoordinationState,
    since: Timestamp,
    attempt: u32,
    can_retry: bool,
    reason: Option<String>,
}

/// Handshake coordinator shared by all connections of one node
#[derive(Debug)]
pub struct HandshakeCoordinator<T: TimeSource> {
    config: HandshakeConfig,
    time_source: T,
    peers: HashMap<PeerId, PeerRecord>,
    seen_messages: HashSet<[u8; 32]>,
    seen_order: VecDeque<[u8; 32]>,
}

impl<T: TimeSource> HandshakeCoordinator<T> {
    pub fn new(config: HandshakeConfig, time_source: T) -> Self {
        Self {
            config,
            time_source,
            peers: HashMap::new(),
            seen_messages: HashSet::new(),
            seen_order: VecDeque::new(),
        }
    }

    /// The lexicographically lower peer ID initiates
    pub fn determine_role(local: &PeerId, remote: &PeerId) -> HandshakeRole {
        if local < remote {
            HandshakeRole::Initiator
        } else {
            HandshakeRole::Responder
        }
    }

    fn elapsed_ms(&self, since: Timestamp) -> u64 {
        self.time_source.now().duration_since(since).as_millis() as u64
    }

    /// Whether the local node should send message 1 to `remote` now
    pub fn should_initiate(&self, local: &PeerId, remote: &PeerId) -> bool {
        if Self::determine_role(local, remote) != HandshakeRole::Initiator {
            return false;
        }
        match self.peers.get(remote) {
            None => true,
            Some(record) => match record.state {
                CoordinationState::Idle | CoordinationState::Established => true,
                CoordinationState::Initiating | CoordinationState::Responding => false,
                CoordinationState::Failed => {
                    record.can_retry && self.elapsed_ms(record.since) >= self.config.retry_delay_ms
                }
            },
        }
    }

    /// Whether an inbound message 1 from `remote` should be answered
    pub fn should_accept_initiation(&self, remote: &PeerId) -> bool {
        !matches!(
            self.peers.get(remote).map(|r| r.state),
            Some(CoordinationState::Established)
        )
    }

    pub fn record_initiation(&mut self, peer_id: PeerId) {
        let attempt = self.current_attempt(&peer_id) + 1;
        self.set(peer_id, CoordinationState::Initiating, attempt, false, None);
    }

    pub fn record_response(&mut self, peer_id: PeerId) {
        self.set(peer_id, CoordinationState::Responding, 0, false, None);
    }

    pub fn record_success(&mut self, peer_id: PeerId) {
        self.set(peer_id, CoordinationState::Established, 0, false, None);
    }

    pub fn record_failure(&mut self, peer_id: PeerId, reason: &str) {
        let attempt = self.current_attempt(&peer_id);
        let can_retry = attempt < self.config.max_attempts;
        debug!(peer = %peer_id, attempt, can_retry, reason, "Handshake failure recorded");
        self.set(
            peer_id,
            CoordinationState::Failed,
            attempt,
            can_retry,
            Some(reason.to_string()),
        );
    }

    fn set(
        &mut self,
        peer_id: PeerId,
        state: CoordinationState,
        attempt: u32,
        can_retry: bool,
        reason: Option<String>,
    ) {
        let since = self.time_source.now();
        self.peers.insert(
            peer_id,
            PeerRecord {
                state,
                since,
                attempt,
                can_retry,
                reason,
            },
        );
    }

    fn current_attempt(&self, peer_id: &PeerId) -> u32 {
        self.peers.get(peer_id).map_or(0, |r| r.attempt)
    }

    /// How long to wait before initiating again; `None` once retries are exhausted
    pub fn retry_delay(&self, peer_id: &PeerId) -> Option<Duration> {
        let Some(record) = self.peers.get(peer_id) else {
            return Some(Duration::ZERO);
        };
        let elapsed = self.elapsed_ms(record.since);
        let remaining = match record.state {
            CoordinationState::Failed if !record.can_retry => return None,
            CoordinationState::Failed => self.config.retry_delay_ms.saturating_sub(elapsed),
            CoordinationState::Initiating => self
                .config
                .min_time_between_handshakes_ms
                .saturating_sub(elapsed),
            _ => 0,
        };
        Some(Duration::from_millis(remaining))
    }

    /// Remember a handshake frame; `true` if it was seen before
    pub fn is_duplicate_message(&mut self, data: &[u8]) -> bool {
        let digest: [u8; 32] = Sha256::digest(data).into();
        if self.seen_messages.contains(&digest) {
            return true;
        }
        if self.seen_order.len() >= self.config.message_history_limit {
            if let Some(oldest) = self.seen_order.pop_front() {
                self.seen_messages.remove(&oldest);
            }
        }
        self.seen_messages.insert(digest);
        self.seen_order.push_back(digest);
        false
    }

    /// Forget a peer's coordination record
    pub fn reset(&mut self, peer_id: &PeerId) {
        self.peers.remove(peer_id);
    }

    /// Drop initiating/responding records idle longer than the stale timeout
    pub fn cleanup_stale(&mut self) -> Vec<PeerId> {
        let now = self.time_source.now();
        let timeout = self.config.stale_timeout_ms;
        let stale: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|(_, r)| {
                matches!(
                    r.state,
                    CoordinationState::Initiating | CoordinationState::Responding
                ) && now.duration_since(r.since).as_millis() as u64 > timeout
            })
            .map(|(peer_id, _)| *peer_id)
            .collect();
        for peer_id in &stale {
            self.peers.remove(peer_id);
        }
        stale
    }

    pub fn state(&self, peer_id: &PeerId) -> CoordinationState {
        self.peers
            .get(peer_id)
            .map_or(CoordinationState::Idle, |r| r.state)
    }

    /// Reason given for the last failure with this peer
    pub fn failure_reason(&self, peer_id: &PeerId) -> Option<&str> {
        self.peers.get(peer_id).and_then(|r| r.reason.as_deref())
    }

    /// Retries made so far (initiations beyond the first)
    pub fn retry_count(&self, peer_id: &PeerId) -> u32 {
        self.current_attempt(peer_id).saturating_sub(1)
    }

    pub fn clear(&mut self) {
        self.peers.clear();
        self.seen_messages.clear();
        self.seen_order.clear();
    }
}
