//! Two managers exchanging plaintext messages over the loopback
//! network, driven event by event.

use tokio::sync::mpsc;

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

/// Connect `a` to `b` and settle both sides: open events plus the
/// version handshakes that cross on open.
async fn establish(a: &mut Agent, b: &mut Agent, b_id: &str) {
    a.manager.connect(&PeerId::new(b_id)).await.unwrap();

    let Some(SignalingEvent::IncomingConnection(handle)) = b.signaling.recv().await else {
        panic!("expected incoming connection");
    };
    b.manager.accept(handle);

    // Opened on both sides, then each side's handshake frame.
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
async fn message_crosses_and_is_stored_once_per_side() {
    let network = LoopbackNetwork::new();
    let mut alice = agent(&network, "alice");
    let mut bob = agent(&network, "bob");
    establish(&mut alice, &mut bob, "bob").await;

    // Outbound connect focuses the initiator.
    assert_eq!(alice.manager.active_peer(), Some(&PeerId::new("bob")));
    // The acceptor keeps no focus until a message arrives.
    assert_eq!(bob.manager.active_peer(), None);

    alice.manager.send("hello bob").await.unwrap();
    assert!(bob.manager.process_one().await);

    // One connected notice from the open, then exactly one entry per
    // side for the one message.
    assert_eq!(
        alice.manager.history().lines(&PeerId::new("bob")),
        "<< connected to bob\n>> hello bob\n"
    );
    assert_eq!(
        bob.manager.history().lines(&PeerId::new("alice")),
        "<< connected to alice\n<< hello bob\n"
    );
}

#[tokio::test]
async fn first_incoming_message_takes_focus_on_the_acceptor() {
    let network = LoopbackNetwork::new();
    let mut alice = agent(&network, "alice");
    let mut bob = agent(&network, "bob");
    establish(&mut alice, &mut bob, "bob").await;

    alice.manager.send("ping").await.unwrap();
    bob.manager.process_one().await;

    assert_eq!(bob.manager.active_peer(), Some(&PeerId::new("alice")));
    let events = drain(&mut bob.events);
    assert!(events.iter().any(|e| matches!(
        e,
        ChatEvent::Switched { peer, log }
            if *peer == PeerId::new("alice") && log == "<< connected to alice\n<< ping\n"
    )));
}

#[tokio::test]
async fn reply_renders_into_the_initiators_log() {
    let network = LoopbackNetwork::new();
    let mut alice = agent(&network, "alice");
    let mut bob = agent(&network, "bob");
    establish(&mut alice, &mut bob, "bob").await;

    alice.manager.send("ping").await.unwrap();
    bob.manager.process_one().await;
    bob.manager.send("pong").await.unwrap();

    drain(&mut alice.events);
    alice.manager.process_one().await;

    let events = drain(&mut alice.events);
    assert!(events.iter().any(|e| matches!(
        e,
        ChatEvent::Rendered { peer, line } if *peer == PeerId::new("bob") && line == "<< pong\n"
    )));
    assert_eq!(
        alice.manager.history().lines(&PeerId::new("bob")),
        "<< connected to bob\n>> ping\n<< pong\n"
    );
}

#[tokio::test]
async fn messages_arrive_in_send_order() {
    let network = LoopbackNetwork::new();
    let mut alice = agent(&network, "alice");
    let mut bob = agent(&network, "bob");
    establish(&mut alice, &mut bob, "bob").await;

    for text in ["one", "two", "three"] {
        alice.manager.send(text).await.unwrap();
    }
    for _ in 0..3 {
        bob.manager.process_one().await;
    }

    assert_eq!(
        bob.manager.history().lines(&PeerId::new("alice")),
        "<< connected to alice\n<< one\n<< two\n<< three\n"
    );
}

#[tokio::test]
async fn empty_and_whitespace_messages_are_rejected() {
    let network = LoopbackNetwork::new();
    let mut alice = agent(&network, "alice");
    let mut bob = agent(&network, "bob");
    establish(&mut alice, &mut bob, "bob").await;

    assert!(alice.manager.send("").await.is_err());
    assert!(alice.manager.send("   ").await.is_err());
    // Only the connected notice; nothing outgoing was recorded.
    assert_eq!(
        alice.manager.history().lines(&PeerId::new("bob")),
        "<< connected to bob\n"
    );
}

#[tokio::test]
async fn connecting_to_an_existing_conversation_just_refocuses() {
    let network = LoopbackNetwork::new();
    let mut alice = agent(&network, "alice");
    let mut bob = agent(&network, "bob");
    establish(&mut alice, &mut bob, "bob").await;

    drain(&mut alice.events);
    // Second connect to the same peer opens nothing new.
    alice.manager.connect(&PeerId::new("bob")).await.unwrap();

    assert!(bob.signaling.try_recv().is_err());
    let events = drain(&mut alice.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, ChatEvent::Switched { peer, .. } if *peer == PeerId::new("bob"))));
}
