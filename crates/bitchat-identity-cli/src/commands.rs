//! Command handlers for the BitChat identity CLI

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use bitchat_identity::{
    BitchatConfig, EncryptionService, Fingerprint, HandshakeCoordinator, HandshakeRole,
    MemoryStorage, PeerId, PeerSessions, SecureIdentityStateManager, SecureStorage,
    SocialMutation, SystemTimeSource, TrustLevel,
};

use crate::app::IdentityApp;
use crate::cli::{Cli, Commands};
use crate::error::{CliError, Result};

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub fn execute(cli: Cli, app: &IdentityApp) -> Result<()> {
        match cli.command {
            Commands::Whoami => Self::handle_whoami_command(app),
            Commands::Peers { json } => Self::handle_peers_command(app, json),
            Commands::Petname { peer, name } => Self::handle_petname_command(app, &peer, name),
            Commands::Trust { peer, level } => Self::handle_trust_command(app, &peer, level),
            Commands::Verify { peer } => Self::handle_verify_command(app, &peer),
            Commands::ResetTrust { peer } => Self::handle_reset_trust_command(app, &peer),
            Commands::Block { peer, off } => Self::handle_block_command(app, &peer, !off),
            Commands::Forget { peer } => Self::handle_forget_command(app, &peer),
            Commands::Panic { yes } => Self::handle_panic_command(app, yes),
            Commands::Demo { message } => Self::handle_demo_command(app, &message),
        }
    }

    fn handle_whoami_command(app: &IdentityApp) -> Result<()> {
        let encryption = app.encryption();
        let fingerprint = encryption
            .local_fingerprint()
            .ok_or_else(|| CliError::Config("no persistent identity loaded".into()))?;

        println!("Fingerprint:  {}", fingerprint);
        println!("Short:        {}", fingerprint.short());
        if let Some(public_key) = encryption.local_identity_public_key() {
            println!("Identity key: {}", hex::encode(public_key));
        }
        println!("Data dir:     {}", app.data_dir().display());
        Ok(())
    }

    fn handle_peers_command(app: &IdentityApp, json: bool) -> Result<()> {
        let rows = peer_rows(app.identities());

        if json {
            println!("{}", serde_json::to_string_pretty(&rows)?);
            return Ok(());
        }

        if rows.is_empty() {
            println!("No known peers");
            return Ok(());
        }
        for row in &rows {
            let mut flags = Vec::new();
            if row.verified {
                flags.push("verified");
            }
            if row.favorite {
                flags.push("favorite");
            }
            if row.blocked {
                flags.push("blocked");
            }
            println!(
                "{}  {:<20}  {:<8}  handshakes={}  {}",
                &row.fingerprint[..16],
                row.name.as_deref().unwrap_or("-"),
                row.trust,
                row.handshake_count,
                flags.join(",")
            );
        }

        let stats = app.identities().cache_stats();
        println!(
            "{} identities, {} verified, {} favorites, {} blocked",
            stats.total_social_identities.max(stats.total_cryptographic_identities),
            stats.total_verified,
            stats.total_favorites,
            stats.total_blocked
        );
        Ok(())
    }

    fn handle_petname_command(app: &IdentityApp, peer: &str, name: Option<String>) -> Result<()> {
        let fingerprint = app.resolve_peer(peer)?;
        let name = name.filter(|n| !n.trim().is_empty());
        match &name {
            Some(name) => println!("Petname for {} set to {}", fingerprint.short(), name),
            None => println!("Petname for {} cleared", fingerprint.short()),
        }
        app.identities()
            .upsert_social(&fingerprint, SocialMutation::SetPetname(name));
        Ok(())
    }

    fn handle_trust_command(app: &IdentityApp, peer: &str, level: TrustLevel) -> Result<()> {
        let fingerprint = app.resolve_peer(peer)?;
        let identities = app.identities();
        identities.upsert_social(&fingerprint, SocialMutation::RaiseTrust(level));

        let current = identities
            .social_identity(&fingerprint)
            .map(|s| s.trust_level)
            .unwrap_or_default();
        if current > level {
            warn!(
                fingerprint = %fingerprint.short(),
                %current,
                requested = %level,
                "Trust is only raised here; use reset-trust to lower it"
            );
        }
        println!("Trust for {} is {}", fingerprint.short(), current);
        Ok(())
    }

    fn handle_verify_command(app: &IdentityApp, peer: &str) -> Result<()> {
        let fingerprint = app.resolve_peer(peer)?;
        app.identities()
            .upsert_social(&fingerprint, SocialMutation::MarkVerified);
        println!("Verified {}", fingerprint);
        Ok(())
    }

    fn handle_reset_trust_command(app: &IdentityApp, peer: &str) -> Result<()> {
        let fingerprint = app.resolve_peer(peer)?;
        if app.identities().reset_trust(&fingerprint) {
            println!("Trust for {} reset to {}", fingerprint.short(), TrustLevel::Unknown);
            Ok(())
        } else {
            Err(CliError::UnknownPeer(peer.to_string()))
        }
    }

    fn handle_block_command(app: &IdentityApp, peer: &str, blocked: bool) -> Result<()> {
        let fingerprint = app.resolve_peer(peer)?;
        app.identities()
            .upsert_social(&fingerprint, SocialMutation::SetBlocked(blocked));
        let action = if blocked { "Blocked" } else { "Unblocked" };
        println!("{} {}", action, fingerprint.short());
        Ok(())
    }

    fn handle_forget_command(app: &IdentityApp, peer: &str) -> Result<()> {
        let fingerprint = app.resolve_peer(peer)?;
        if app.identities().forget_peer(&fingerprint) {
            println!("Forgot {}", fingerprint.short());
            Ok(())
        } else {
            Err(CliError::UnknownPeer(peer.to_string()))
        }
    }

    fn handle_panic_command(app: &IdentityApp, confirmed: bool) -> Result<()> {
        if !confirmed {
            return Err(CliError::NotConfirmed("wipe all identity data".into()));
        }
        app.identities().panic_clear_all_data()?;
        app.encryption().reset_persistent_identity()?;
        println!("All identity data wiped; a new identity is created on next start");
        Ok(())
    }

    /// Two throwaway peers in memory: handshake, then one sealed message
    fn handle_demo_command(app: &IdentityApp, message: &str) -> Result<()> {
        let config = app.config().core.clone();
        let alice = DemoPeer::new("alice", &config)?;
        let bob = DemoPeer::new("bob", &config)?;

        let mut coordinator =
            HandshakeCoordinator::new(config.handshake.clone(), SystemTimeSource::new());
        let (initiator, responder) =
            match HandshakeCoordinator::<SystemTimeSource>::determine_role(&alice.peer_id, &bob.peer_id)
            {
                HandshakeRole::Initiator => (&alice, &bob),
                HandshakeRole::Responder => (&bob, &alice),
            };
        println!(
            "{} ({}) initiates to {} ({})",
            initiator.name, initiator.peer_id, responder.name, responder.peer_id
        );

        coordinator.record_initiation(responder.peer_id);
        let mut frame = initiator
            .sessions
            .connect(responder.peer_id, HandshakeRole::Initiator)?
            .ok_or_else(|| CliError::Config("initiator produced no first message".into()))?;

        let (mut sender, mut receiver) = (initiator, responder);
        loop {
            if coordinator.is_duplicate_message(&frame) {
                warn!(len = frame.len(), "Duplicate handshake frame dropped");
                break;
            }
            println!(
                "  {} -> {}: message {} ({} bytes)",
                sender.name,
                receiver.name,
                frame.first().copied().unwrap_or_default(),
                frame.len()
            );

            let event = receiver
                .sessions
                .handle_handshake_frame(sender.peer_id, &frame)?;
            if let Some(fingerprint) = &event.completed {
                println!("  {} authenticated peer {}", receiver.name, fingerprint.short());
            }
            match event.reply {
                Some(reply) => {
                    frame = reply;
                    std::mem::swap(&mut sender, &mut receiver);
                }
                None => break,
            }
        }
        coordinator.record_success(responder.peer_id);

        let sealed = initiator.sessions.seal(&responder.peer_id, message.as_bytes())?;
        let opened = responder.sessions.open(&initiator.peer_id, &sealed)?;
        println!(
            "{} sealed {} bytes, {} opened: {}",
            initiator.name,
            sealed.len(),
            responder.name,
            String::from_utf8_lossy(&opened)
        );
        debug!(
            initiator = %initiator.fingerprint.short(),
            responder = %responder.fingerprint.short(),
            "Demo complete"
        );
        Ok(())
    }
}

/// One line of `peers` output
#[derive(Debug, Serialize)]
struct PeerRow {
    fingerprint: String,
    name: Option<String>,
    trust: TrustLevel,
    verified: bool,
    favorite: bool,
    blocked: bool,
    handshake_count: u32,
    last_handshake_ms: Option<u64>,
}

fn peer_rows(identities: &SecureIdentityStateManager) -> Vec<PeerRow> {
    let mut fingerprints: Vec<Fingerprint> = identities
        .cryptographic_identities()
        .into_iter()
        .map(|c| c.fingerprint)
        .chain(identities.social_identities().into_iter().map(|s| s.fingerprint))
        .collect();
    fingerprints.sort();
    fingerprints.dedup();

    fingerprints
        .into_iter()
        .map(|fingerprint| {
            let social = identities.social_identity(&fingerprint);
            let crypto = identities.cryptographic_identity(&fingerprint);
            PeerRow {
                fingerprint: fingerprint.to_string(),
                name: identities.display_name(&fingerprint),
                trust: social.as_ref().map(|s| s.trust_level).unwrap_or_default(),
                verified: identities.is_verified(&fingerprint),
                favorite: social.as_ref().is_some_and(|s| s.is_favorite),
                blocked: social.as_ref().is_some_and(|s| s.is_blocked),
                handshake_count: crypto.as_ref().map_or(0, |c| c.handshake_count),
                last_handshake_ms: crypto
                    .as_ref()
                    .and_then(|c| c.last_handshake)
                    .map(|t| t.as_millis()),
            }
        })
        .collect()
}

/// In-memory peer used by the demo
struct DemoPeer {
    name: &'static str,
    peer_id: PeerId,
    fingerprint: Fingerprint,
    sessions: PeerSessions,
}

impl DemoPeer {
    fn new(name: &'static str, config: &BitchatConfig) -> Result<Self> {
        let storage: Arc<dyn SecureStorage> = Arc::new(MemoryStorage::new());
        let encryption = Arc::new(EncryptionService::new(storage.clone(), &config.identity));
        let fingerprint = encryption.initialize()?;
        let identities = Arc::new(SecureIdentityStateManager::new(
            storage,
            config.identity.clone(),
        ));
        let peer_id = PeerId::random();
        info!(peer_name = name, peer = %peer_id, fingerprint = %fingerprint.short(), "Demo peer created");
        Ok(Self {
            name,
            peer_id,
            fingerprint,
            sessions: PeerSessions::new(encryption, identities, config.handshake.clone()),
        })
    }
}
