//! Session lifecycle behaviour at the manager level: focus rules,
//! unread markers, close handling, failure classification and the
//! signaling reconnect policy.

use tokio::sync::mpsc;

use peerchat::history::MemoryBackend;
use peerchat::manager::{ChatEvent, Command, ConnectError, SessionManager};
use peerchat::transport::loopback::{handle_pair, LoopbackConnector, LoopbackNetwork};
use peerchat::transport::{FailureKind, PeerId, SignalingEvent, TransportError};
use peerchat_proto::codec;
use peerchat_proto::frame::{Frame, VersionFrame};

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
async fn switching_is_idempotent() {
    let network = LoopbackNetwork::new();
    let mut alice = agent(&network, "alice");
    let mut bob = agent(&network, "bob");
    establish(&mut alice, &mut bob, "bob").await;

    alice.manager.send("once").await.unwrap();
    drain(&mut alice.events);

    assert!(alice.manager.switch(&PeerId::new("bob")));
    assert!(alice.manager.switch(&PeerId::new("bob")));

    let switches: Vec<String> = drain(&mut alice.events)
        .into_iter()
        .filter_map(|e| match e {
            ChatEvent::Switched { log, .. } => Some(log),
            _ => None,
        })
        .collect();
    // Both switches replace the log with the same content.
    let expected = "<< connected to bob\n>> once\n";
    assert_eq!(switches, vec![expected, expected]);
}

#[tokio::test]
async fn connecting_to_self_is_refused() {
    let network = LoopbackNetwork::new();
    let mut alice = agent(&network, "alice");

    let result = alice.manager.connect(&PeerId::new("alice")).await;
    assert!(matches!(result, Err(ConnectError::Validation(_))));
    // Nothing reached our own signaling inbox.
    assert!(alice.signaling.try_recv().is_err());
}

#[tokio::test]
async fn unreachable_peer_is_classified() {
    let network = LoopbackNetwork::new();
    let mut alice = agent(&network, "alice");

    let result = alice.manager.connect(&PeerId::new("ghost")).await;
    let Err(ConnectError::Transport(e)) = result else {
        panic!("expected transport error");
    };
    assert!(matches!(e, TransportError::Unreachable(_)));
    assert_eq!(e.kind(), FailureKind::PeerUnavailable);
}

#[tokio::test]
async fn peer_disconnect_leaves_a_notice_and_disables_sending() {
    let network = LoopbackNetwork::new();
    let mut alice = agent(&network, "alice");
    let mut bob = agent(&network, "bob");
    establish(&mut alice, &mut bob, "bob").await;

    alice.manager.send("still there?").await.unwrap();
    bob.manager.process_one().await;
    drain(&mut alice.events);

    // Bob's process dies; its half of the pipe is dropped.
    drop(bob.manager);
    assert!(alice.manager.process_one().await); // Closed

    assert!(alice
        .manager
        .session_state(&PeerId::new("bob"))
        .is_none());
    assert_eq!(
        alice.manager.history().lines(&PeerId::new("bob")),
        "<< connected to bob\n>> still there?\n<< chat closed: bob\n"
    );
    let events = drain(&mut alice.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, ChatEvent::ActiveClosed { peer } if *peer == PeerId::new("bob"))));

    // Sending now fails; history keeps the record of the attempt gone.
    assert!(alice.manager.send("anyone?").await.is_err());
}

#[tokio::test]
async fn background_messages_set_unread_until_switched() {
    let network = LoopbackNetwork::new();
    let mut alice = agent(&network, "alice");
    let mut bob = agent(&network, "bob");
    let mut carol = agent(&network, "carol");
    establish(&mut alice, &mut bob, "bob").await;
    establish(&mut alice, &mut carol, "carol").await;

    // Last outbound connect focused carol.
    assert_eq!(alice.manager.active_peer(), Some(&PeerId::new("carol")));

    bob.manager.switch(&PeerId::new("alice"));
    bob.manager.send("pst").await.unwrap();
    drain(&mut alice.events);
    alice.manager.process_one().await;

    assert!(alice.manager.has_unread(&PeerId::new("bob")));
    let events = drain(&mut alice.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, ChatEvent::Unread { peer } if *peer == PeerId::new("bob"))));
    // Focus did not move.
    assert_eq!(alice.manager.active_peer(), Some(&PeerId::new("carol")));

    alice.manager.switch(&PeerId::new("bob"));
    assert!(!alice.manager.has_unread(&PeerId::new("bob")));
}

#[tokio::test]
async fn version_mismatch_is_noted_once() {
    let (mut manager, _events) = SessionManager::new(
        PeerId::new("alice"),
        // A live network is not needed to exercise inbound frames.
        LoopbackNetwork::new()
            .register(PeerId::new("alice"))
            .unwrap()
            .0,
        MemoryBackend::new(),
        64,
    );

    let (bob_side, alice_side) = handle_pair(PeerId::new("bob"), PeerId::new("alice"), 8);
    manager.accept(alice_side);
    manager.process_one().await; // Opened

    let (bob_tx, _bob_events) = bob_side.split();
    let stale = codec::encode(&Frame::Version(VersionFrame {
        version: "9.9.9".into(),
    }))
    .unwrap();
    bob_tx.send(stale.clone()).await.unwrap();
    bob_tx.send(stale).await.unwrap();
    manager.process_one().await;
    manager.process_one().await;

    let log = manager.history().lines(&PeerId::new("bob"));
    assert_eq!(
        log,
        "<< connected to bob\n<< peer is running protocol version 9.9.9\n"
    );
}

#[tokio::test]
async fn peer_list_merges_live_and_stored_conversations() {
    let network = LoopbackNetwork::new();
    let mut alice = agent(&network, "alice");
    let mut bob = agent(&network, "bob");
    establish(&mut alice, &mut bob, "bob").await;

    alice.manager.send("hi").await.unwrap();
    drop(bob.manager);
    alice.manager.process_one().await; // Closed — bob is history-only now

    assert_eq!(alice.manager.peer_list(), vec![PeerId::new("bob")]);
}

#[tokio::test(start_paused = true)]
async fn signaling_loss_triggers_one_delayed_reconnect() {
    let network = LoopbackNetwork::new();
    let (connector, signaling) = network.register(PeerId::new("alice")).unwrap();
    let (manager, mut events) =
        SessionManager::new(PeerId::new("alice"), connector, MemoryBackend::new(), 64);

    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    tokio::spawn(manager.run(cmd_rx, signaling));

    network.drop_signaling(&PeerId::new("alice"));
    assert_eq!(
        events.recv().await,
        Some(ChatEvent::SignalingDown { retrying: true })
    );
    assert!(matches!(events.recv().await, Some(ChatEvent::Notice { .. })));

    cmd_tx.send(Command::Shutdown).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn failed_reconnect_is_not_retried() {
    let network = LoopbackNetwork::new();
    let (connector, signaling) = network.register(PeerId::new("alice")).unwrap();
    let (manager, mut events) =
        SessionManager::new(PeerId::new("alice"), connector, MemoryBackend::new(), 64);
    network.set_reconnect_fails(&PeerId::new("alice"), true);

    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    tokio::spawn(manager.run(cmd_rx, signaling));

    network.drop_signaling(&PeerId::new("alice"));
    assert_eq!(
        events.recv().await,
        Some(ChatEvent::SignalingDown { retrying: true })
    );
    assert_eq!(
        events.recv().await,
        Some(ChatEvent::SignalingDown { retrying: false })
    );

    cmd_tx.send(Command::Shutdown).await.unwrap();
}
