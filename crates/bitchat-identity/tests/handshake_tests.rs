//! End-to-end handshake tests
//!
//! Two fully wired peers exchange handshake frames in memory and then
//! application payloads over the resulting session.


use bitchat_identity::*;
use test_utils::{handshake, TestPeer};

// ----------------------------------------------------------------------------
// Establishment
// ----------------------------------------------------------------------------

#[test]
fn hello_and_reply_after_handshake() {
    let alice = TestPeer::new(1);
    let bob = TestPeer::new(2);

    let (bob_seen_by_alice, alice_seen_by_bob) = handshake(&alice, &bob);
    assert_eq!(bob_seen_by_alice, bob.fingerprint());
    assert_eq!(alice_seen_by_bob, alice.fingerprint());

    let hello = alice.sessions.seal(&bob.peer_id, b"hello").unwrap();
    assert_eq!(bob.sessions.open(&alice.peer_id, &hello).unwrap(), b"hello");

    let reply = bob.sessions.seal(&alice.peer_id, b"hi alice").unwrap();
    assert_eq!(
        alice.sessions.open(&bob.peer_id, &reply).unwrap(),
        b"hi alice"
    );
}

#[test]
fn completed_handshake_is_recorded_and_resolvable() {
    let alice = TestPeer::new(1);
    let bob = TestPeer::new(2);
    handshake(&alice, &bob);

    let identities = alice.sessions.identities();
    assert_eq!(
        identities.resolve_fingerprint(&bob.peer_id),
        Some(bob.fingerprint())
    );
    assert_eq!(
        identities.handshake_state(&bob.peer_id),
        Some(HandshakeState::Completed {
            fingerprint: bob.fingerprint()
        })
    );

    let crypto = identities.cryptographic_identity(&bob.fingerprint()).unwrap();
    assert_eq!(crypto.handshake_count, 1);
    assert_eq!(crypto.first_seen, Timestamp::new(1_000_000));
    assert_eq!(
        crypto.signing_public_key.map(protocol::generate_fingerprint),
        Some(bob.fingerprint())
    );

    let social = identities.social_identity(&bob.fingerprint()).unwrap();
    assert_eq!(social.trust_level, TrustLevel::Unknown);
    assert_eq!(
        alice.sessions.session_state(&bob.peer_id),
        Some(SessionState::Established)
    );
}

#[test]
fn reconnect_with_new_peer_id_resolves_same_fingerprint() {
    let alice = TestPeer::new(1);
    let bob = TestPeer::new(2);
    handshake(&alice, &bob);
    alice.sessions.disconnect(&bob.peer_id);
    bob.sessions.disconnect(&alice.peer_id);

    let bob_again = TestPeer::with_storage(3, bob.storage.clone());
    alice.clock.advance(60_000);
    let (fingerprint, _) = handshake(&alice, &bob_again);

    assert_eq!(fingerprint, bob.fingerprint());
    assert_eq!(alice.sessions.fingerprint(&bob.peer_id), None);
    let crypto = alice
        .sessions
        .identities()
        .cryptographic_identity(&fingerprint)
        .unwrap();
    assert_eq!(crypto.handshake_count, 2);
    assert_eq!(crypto.first_seen, Timestamp::new(1_000_000));
    assert_eq!(crypto.last_handshake, Some(Timestamp::new(1_060_000)));
}

// ----------------------------------------------------------------------------
// Failure Handling
// ----------------------------------------------------------------------------

#[test]
fn failed_session_never_completes() {
    let alice = TestPeer::new(1);
    let bob = TestPeer::new(2);

    let m1 = alice
        .sessions
        .connect(bob.peer_id, HandshakeRole::Initiator)
        .unwrap()
        .unwrap();
    let m2 = bob
        .sessions
        .handle_handshake_frame(alice.peer_id, &m1)
        .unwrap()
        .reply
        .unwrap();

    // A second message 1 while in progress is rejected and fails the session
    let err = bob
        .sessions
        .handle_handshake_frame(alice.peer_id, &m1)
        .unwrap_err();
    assert!(err.is_handshake_failed());
    assert!(matches!(
        bob.sessions.session_state(&alice.peer_id),
        Some(SessionState::Failed(_))
    ));

    let m3 = alice
        .sessions
        .handle_handshake_frame(bob.peer_id, &m2)
        .unwrap()
        .reply
        .unwrap();
    assert!(bob.sessions.handle_handshake_frame(alice.peer_id, &m3).is_err());
    assert!(matches!(
        bob.sessions.identities().handshake_state(&alice.peer_id),
        Some(HandshakeState::Failed { .. })
    ));
    assert_eq!(bob.sessions.fingerprint(&alice.peer_id), None);
    assert!(bob
        .sessions
        .seal(&alice.peer_id, b"x")
        .unwrap_err()
        .is_no_shared_secret());
}

#[test]
fn tampered_message_fails_handshake() {
    let alice = TestPeer::new(1);
    let bob = TestPeer::new(2);

    let m1 = alice
        .sessions
        .connect(bob.peer_id, HandshakeRole::Initiator)
        .unwrap()
        .unwrap();
    let mut m2 = bob
        .sessions
        .handle_handshake_frame(alice.peer_id, &m1)
        .unwrap()
        .reply
        .unwrap();
    let last = m2.len() - 1;
    m2[last] ^= 0x01;

    assert!(alice
        .sessions
        .handle_handshake_frame(bob.peer_id, &m2)
        .unwrap_err()
        .is_handshake_failed());
    assert!(!alice.sessions.encryption().has_shared_secret(&bob.peer_id));
}

#[test]
fn oversized_frame_is_rejected() {
    let alice = TestPeer::new(1);
    let bob = TestPeer::new(2);
    alice
        .sessions
        .connect(bob.peer_id, HandshakeRole::Responder)
        .unwrap();

    // Sequence byte plus one byte over the message limit
    let mut frame = vec![0u8; config::MAX_HANDSHAKE_MESSAGE_SIZE + 2];
    frame[0] = 1;
    assert!(alice
        .sessions
        .handle_handshake_frame(bob.peer_id, &frame)
        .is_err());
    assert!(matches!(
        alice.sessions.session_state(&bob.peer_id),
        Some(SessionState::Failed(_))
    ));
}

#[test]
fn unknown_peer_must_start_with_message_one() {
    let alice = TestPeer::new(1);
    let stranger = PeerId::new([9; 8]);
    let err = alice
        .sessions
        .handle_handshake_frame(stranger, &[2, 0, 0])
        .unwrap_err();
    assert!(matches!(
        err,
        BitchatError::Session(SessionError::SessionNotFound { .. })
    ));
    assert_eq!(alice.sessions.session_count(), 0);
}

#[test]
fn abandon_releases_only_that_peer() {
    let alice = TestPeer::new(1);
    let bob = TestPeer::new(2);
    let carol = TestPeer::new(3);
    handshake(&alice, &carol);

    let m1 = alice
        .sessions
        .connect(bob.peer_id, HandshakeRole::Initiator)
        .unwrap()
        .unwrap();
    let m2 = bob
        .sessions
        .handle_handshake_frame(alice.peer_id, &m1)
        .unwrap()
        .reply
        .unwrap();

    assert!(bob.sessions.abandon(&alice.peer_id));
    assert_eq!(
        bob.sessions.session_state(&alice.peer_id),
        Some(SessionState::Failed(protocol::handshake::CANCELLED.to_string()))
    );
    assert!(matches!(
        bob.sessions.identities().handshake_state(&alice.peer_id),
        Some(HandshakeState::Failed { .. })
    ));
    assert!(!bob.sessions.encryption().has_shared_secret(&alice.peer_id));

    // Alice completes her side but the cancelled responder never does
    let m3 = alice
        .sessions
        .handle_handshake_frame(bob.peer_id, &m2)
        .unwrap()
        .reply
        .unwrap();
    assert!(bob.sessions.handle_handshake_frame(alice.peer_id, &m3).is_err());
    assert_eq!(bob.sessions.fingerprint(&alice.peer_id), None);

    let sealed = alice.sessions.seal(&carol.peer_id, b"still here").unwrap();
    assert_eq!(
        carol.sessions.open(&alice.peer_id, &sealed).unwrap(),
        b"still here"
    );
}

#[test]
fn abandon_does_not_touch_established_session() {
    let alice = TestPeer::new(1);
    let bob = TestPeer::new(2);
    handshake(&alice, &bob);

    assert!(!alice.sessions.abandon(&bob.peer_id));
    assert_eq!(
        alice.sessions.session_state(&bob.peer_id),
        Some(SessionState::Established)
    );
    assert!(alice
        .sessions
        .identities()
        .handshake_state(&bob.peer_id)
        .is_some_and(|state| state.is_complete()));
    assert_eq!(alice.sessions.fingerprint(&bob.peer_id), Some(bob.fingerprint()));
    assert!(alice.sessions.encryption().has_shared_secret(&bob.peer_id));

    let sealed = alice.sessions.seal(&bob.peer_id, b"after abandon").unwrap();
    assert_eq!(
        bob.sessions.open(&alice.peer_id, &sealed).unwrap(),
        b"after abandon"
    );

    assert!(alice.sessions.disconnect(&bob.peer_id));
    assert!(!alice.sessions.encryption().has_shared_secret(&bob.peer_id));
}

#[test]
fn blocked_peer_payloads_are_refused() {
    let alice = TestPeer::new(1);
    let bob = TestPeer::new(2);
    handshake(&alice, &bob);

    let sealed = bob.sessions.seal(&alice.peer_id, b"spam").unwrap();
    alice
        .sessions
        .identities()
        .upsert_social(&bob.fingerprint(), SocialMutation::SetBlocked(true));

    assert!(matches!(
        alice.sessions.open(&bob.peer_id, &sealed),
        Err(BitchatError::Session(SessionError::PeerBlocked { .. }))
    ));
    assert!(alice.sessions.seal(&bob.peer_id, b"no").is_err());
}

// ----------------------------------------------------------------------------
// Forward Secrecy
// ----------------------------------------------------------------------------

#[test]
fn new_run_uses_new_session_keys_with_same_fingerprints() {
    let alice_storage = std::sync::Arc::new(MemoryStorage::new());
    let bob_storage = std::sync::Arc::new(MemoryStorage::new());

    let alice = TestPeer::with_storage(1, alice_storage.clone());
    let bob = TestPeer::with_storage(2, bob_storage.clone());
    let (first_bob, first_alice) = handshake(&alice, &bob);
    let recorded = alice.sessions.seal(&bob.peer_id, b"run one").unwrap();
    drop((alice, bob));

    let alice = TestPeer::with_storage(1, alice_storage);
    let bob = TestPeer::with_storage(2, bob_storage);
    let (second_bob, second_alice) = handshake(&alice, &bob);

    assert_eq!(first_bob, second_bob);
    assert_eq!(first_alice, second_alice);
    assert!(bob
        .sessions
        .open(&alice.peer_id, &recorded)
        .unwrap_err()
        .is_decryption_failed());
}

// ----------------------------------------------------------------------------
// Coordination
// ----------------------------------------------------------------------------

#[test]
fn coordinator_picks_one_initiator_and_drops_replays() {
    let alice = TestPeer::new(1);
    let bob = TestPeer::new(2);
    let mut alice_coord =
        HandshakeCoordinator::new(HandshakeConfig::default(), alice.clock.clone());
    let mut bob_coord = HandshakeCoordinator::new(HandshakeConfig::default(), bob.clock.clone());

    assert!(alice_coord.should_initiate(&alice.peer_id, &bob.peer_id));
    assert!(!bob_coord.should_initiate(&bob.peer_id, &alice.peer_id));

    let m1 = alice
        .sessions
        .connect(bob.peer_id, HandshakeRole::Initiator)
        .unwrap()
        .unwrap();
    alice_coord.record_initiation(bob.peer_id);

    assert!(!bob_coord.is_duplicate_message(&m1));
    assert!(bob_coord.should_accept_initiation(&alice.peer_id));
    bob_coord.record_response(alice.peer_id);
    bob.sessions
        .handle_handshake_frame(alice.peer_id, &m1)
        .unwrap();

    // The replayed frame is caught before it reaches the state machine
    assert!(bob_coord.is_duplicate_message(&m1));
}
