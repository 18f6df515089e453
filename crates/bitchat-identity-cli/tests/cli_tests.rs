//! End-to-end tests for the identity CLI against a temporary data directory

use clap::Parser;
use tempfile::TempDir;

use bitchat_identity::{BitchatConfig, Fingerprint, TrustLevel};
use bitchat_identity_cli::{
    commands::CommandDispatcher, config::StorageSettings, AppConfig, Cli, CliError, IdentityApp,
};

fn open(dir: &TempDir) -> IdentityApp {
    let config = AppConfig {
        core: BitchatConfig::testing(),
        storage: StorageSettings {
            data_dir: Some(dir.path().to_path_buf()),
        },
    };
    IdentityApp::new(config).unwrap()
}

fn run(app: &IdentityApp, args: &[&str]) -> Result<(), CliError> {
    let cli = Cli::parse_from(std::iter::once("bitchat-id").chain(args.iter().copied()));
    CommandDispatcher::execute(cli, app)
}

#[test]
fn test_identity_survives_restart() {
    let dir = TempDir::new().unwrap();
    let first = open(&dir).encryption().local_fingerprint().unwrap();
    let second = open(&dir).encryption().local_fingerprint().unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_trust_and_petname_persist() {
    let dir = TempDir::new().unwrap();
    let peer = Fingerprint::new([0xab; 32]);
    let peer_hex = peer.to_string();

    {
        let app = open(&dir);
        run(&app, &["trust", &peer_hex, "trusted"]).unwrap();
        run(&app, &["trust", "abababab", "casual"]).unwrap();
        run(&app, &["petname", &peer_hex, "bob"]).unwrap();
        app.shutdown().unwrap();
    }

    let app = open(&dir);
    assert_eq!(app.resolve_peer("bob").unwrap(), peer);
    let social = app.identities().social_identity(&peer).unwrap();
    assert_eq!(social.trust_level, TrustLevel::Trusted);

    run(&app, &["verify", "bob"]).unwrap();
    assert!(app.identities().is_verified(&peer));

    run(&app, &["reset-trust", "bob"]).unwrap();
    assert!(!app.identities().is_verified(&peer));
    assert_eq!(
        app.identities().social_identity(&peer).unwrap().trust_level,
        TrustLevel::Unknown
    );
}

#[test]
fn test_unknown_peer_is_reported() {
    let dir = TempDir::new().unwrap();
    let app = open(&dir);
    assert!(matches!(
        run(&app, &["forget", "nobody"]),
        Err(CliError::UnknownPeer(_))
    ));
    assert!(matches!(
        app.resolve_peer("abc"),
        Err(CliError::UnknownPeer(_))
    ));
    assert!(matches!(
        app.resolve_peer(&"z".repeat(64)),
        Err(CliError::HexDecoding(_))
    ));
}

#[test]
fn test_panic_requires_confirmation_and_replaces_identity() {
    let dir = TempDir::new().unwrap();
    let before = {
        let app = open(&dir);
        run(&app, &["block", &Fingerprint::new([3; 32]).to_string()]).unwrap();
        assert!(matches!(
            run(&app, &["panic"]),
            Err(CliError::NotConfirmed(_))
        ));
        let fingerprint = app.encryption().local_fingerprint().unwrap();
        run(&app, &["panic", "--yes"]).unwrap();
        fingerprint
    };

    let app = open(&dir);
    assert_ne!(app.encryption().local_fingerprint().unwrap(), before);
    assert!(app.identities().social_identities().is_empty());
}

#[test]
fn test_demo_runs_a_full_handshake() {
    let dir = TempDir::new().unwrap();
    let app = open(&dir);
    run(&app, &["demo", "hi there"]).unwrap();
    run(&app, &["peers", "--json"]).unwrap();
}
