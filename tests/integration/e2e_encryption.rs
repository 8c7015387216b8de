//! Encrypted exchange between two managers: agreement, disagreement
//! and wrong-key scenarios.

use tokio::sync::mpsc;

use peerchat::crypto::CipherMode;
use peerchat::history::MemoryBackend;
use peerchat::manager::{ChatEvent, SessionManager};
use peerchat::transport::loopback::{LoopbackConnector, LoopbackNetwork};
use peerchat::transport::{PeerId, SignalingEvent};

type Manager = SessionManager<LoopbackConnector, MemoryBackend>;

struct Agent {
    manager: Manager,
    events: mpsc::Receiver<ChatEvent>,
    signaling: mpsc::Receiver<SignalingEvent>,
}

fn agent(network: &LoopbackNetwork, id: &str) -> Agent {
    let (connector, signaling) = network.register(PeerId::new(id)).unwrap();
    let (manager, events) =
        SessionManager::new(PeerId::new(id), connector, MemoryBackend::new(), 64);
    Agent {
        manager,
        events,
        signaling,
    }
}

async fn establish(a: &mut Agent, b: &mut Agent, b_id: &str) {
    a.manager.connect(&PeerId::new(b_id)).await.unwrap();
    let Some(SignalingEvent::IncomingConnection(handle)) = b.signaling.recv().await else {
        panic!("expected incoming connection");
    };
    b.manager.accept(handle);
    assert!(a.manager.process_one().await);
    assert!(b.manager.process_one().await);
    assert!(a.manager.process_one().await);
    assert!(b.manager.process_one().await);
}

fn drain(events: &mut mpsc::Receiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn shared_passphrase_round_trips_plaintext() {
    let network = LoopbackNetwork::new();
    let mut alice = agent(&network, "alice");
    let mut bob = agent(&network, "bob");
    establish(&mut alice, &mut bob, "bob").await;

    for side in [&mut alice, &mut bob] {
        side.manager.derive_key("our shared secret").await.unwrap();
        side.manager.set_cipher(CipherMode::Aes);
    }

    alice.manager.send("sealed hello").await.unwrap();
    bob.manager.process_one().await;

    assert_eq!(
        bob.manager.history().lines(&PeerId::new("alice")),
        "<< connected to alice\n<< sealed hello\n"
    );
}

#[tokio::test]
async fn wrong_key_drops_the_message_with_a_warning() {
    let network = LoopbackNetwork::new();
    let mut alice = agent(&network, "alice");
    let mut bob = agent(&network, "bob");
    establish(&mut alice, &mut bob, "bob").await;

    alice.manager.derive_key("alice's secret").await.unwrap();
    alice.manager.set_cipher(CipherMode::Aes);
    bob.manager.derive_key("bob's secret").await.unwrap();
    bob.manager.set_cipher(CipherMode::Aes);

    alice.manager.send("for your eyes only").await.unwrap();
    drain(&mut bob.events);
    bob.manager.process_one().await;

    // Dropped and warned; the failure is part of the record, but the
    // plaintext never is, and the connection stays intact.
    let log = bob.manager.history().lines(&PeerId::new("alice"));
    assert_eq!(
        log,
        "<< connected to alice\n<< failed to decrypt a message\n"
    );
    assert!(!log.contains("for your eyes only"));
    let events = drain(&mut bob.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, ChatEvent::Warning { peer: Some(p), .. } if *p == PeerId::new("alice"))));
    assert!(bob.manager.session_state(&PeerId::new("alice")).is_some());

    // A later agreed key flows again.
    bob.manager.derive_key("alice's secret").await.unwrap();
    alice.manager.send("take two").await.unwrap();
    bob.manager.process_one().await;
    assert_eq!(
        bob.manager.history().lines(&PeerId::new("alice")),
        "<< connected to alice\n<< failed to decrypt a message\n<< take two\n"
    );
}

#[tokio::test]
async fn sealed_message_without_local_key_is_dropped() {
    let network = LoopbackNetwork::new();
    let mut alice = agent(&network, "alice");
    let mut bob = agent(&network, "bob");
    establish(&mut alice, &mut bob, "bob").await;

    alice.manager.derive_key("secret").await.unwrap();
    alice.manager.set_cipher(CipherMode::Aes);
    // bob stays in plaintext mode.

    alice.manager.send("can you read this").await.unwrap();
    drain(&mut bob.events);
    bob.manager.process_one().await;

    let log = bob.manager.history().lines(&PeerId::new("alice"));
    assert!(!log.contains("can you read this"));
    assert!(!log.contains("failed to decrypt"));
    let events = drain(&mut bob.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, ChatEvent::Warning { .. })));
}

#[tokio::test]
async fn plaintext_while_expecting_sealed_is_dropped() {
    let network = LoopbackNetwork::new();
    let mut alice = agent(&network, "alice");
    let mut bob = agent(&network, "bob");
    establish(&mut alice, &mut bob, "bob").await;

    bob.manager.derive_key("secret").await.unwrap();
    bob.manager.set_cipher(CipherMode::Aes);

    alice.manager.send("in the clear").await.unwrap();
    drain(&mut bob.events);
    bob.manager.process_one().await;

    let log = bob.manager.history().lines(&PeerId::new("alice"));
    assert_eq!(log, "<< connected to alice\n");
    let events = drain(&mut bob.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, ChatEvent::Warning { .. })));
}

#[tokio::test]
async fn cipher_without_key_falls_back_to_plaintext() {
    let network = LoopbackNetwork::new();
    let mut alice = agent(&network, "alice");
    let mut bob = agent(&network, "bob");
    establish(&mut alice, &mut bob, "bob").await;

    // Mode on, but no key derived yet: messages still flow unsealed.
    alice.manager.set_cipher(CipherMode::Aes);
    alice.manager.send("not sealed yet").await.unwrap();
    bob.manager.process_one().await;

    assert_eq!(
        bob.manager.history().lines(&PeerId::new("alice")),
        "<< connected to alice\n<< not sealed yet\n"
    );
}
