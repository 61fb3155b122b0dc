//! Integration tests for the full messaging flow between two devices.

use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

use navguard_link::bluetooth::{
    decode, encode_message, DuplexConnector, Frame, ListenerRelay, ManualContext, TransportSession,
};
use navguard_link::chat::{EmergencyMessage, MessageKind, MessageStatus};
use navguard_link::events::ChatController;
use navguard_link::state::{ConnectionStatus, LinkState};
use navguard_link::storage::{ChatSink, ChatStore, MemoryStore};

struct Device {
    ctx: Arc<ManualContext>,
    relay: Arc<ListenerRelay>,
    state: Arc<LinkState>,
    controller: Arc<ChatController>,
}

impl Device {
    fn new(peer_id: &str, sink: Arc<dyn ChatSink>) -> Self {
        let ctx = ManualContext::new();
        let relay = ListenerRelay::new(ctx.clone());
        let session = TransportSession::new(relay.clone(), Handle::current());
        let state = LinkState::new();
        let (controller, _events) = ChatController::new(session, state.clone(), peer_id, sink);
        relay.attach(controller.clone()).unwrap();
        Self {
            ctx,
            relay,
            state,
            controller,
        }
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

async fn connected_pair() -> (Device, Device) {
    let alice = Device::new("bob", Arc::new(MemoryStore::new()));
    let bob = Device::new("alice", Arc::new(MemoryStore::new()));

    let (to_bob, to_alice) = DuplexConnector::pair("alice", "bob", 4096);
    alice.controller.connect(Arc::new(to_bob)).unwrap();
    bob.controller.connect(Arc::new(to_alice)).unwrap();
    settle().await;
    alice.ctx.run_pending();
    bob.ctx.run_pending();
    (alice, bob)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_message_is_delivered_then_read() {
    let (alice, bob) = connected_pair().await;
    assert_eq!(alice.state.get_status(), ConnectionStatus::Connected);
    assert_eq!(bob.state.get_status_line(), "Connected to device");

    let sent = alice
        .controller
        .send_message(MessageKind::Sos, "trapped at the bridge", Some((48.1, 11.5)))
        .unwrap();
    assert_eq!(sent.status, MessageStatus::Sent);

    // Bob records it and acknowledges delivery.
    settle().await;
    bob.ctx.run_pending();
    let received = bob.controller.messages();
    assert_eq!(received.len(), 1);
    assert!(!received[0].is_sent);
    assert_eq!(received[0].message.id, sent.id);
    assert_eq!(received[0].message.kind, MessageKind::Sos);
    assert_eq!(received[0].message.latitude, 48.1);

    settle().await;
    alice.ctx.run_pending();
    assert_eq!(
        alice.controller.status_of(&sent.id),
        Some(MessageStatus::Delivered)
    );

    // Reading it sends the final ACK.
    assert!(bob.controller.mark_read(&sent.id));
    settle().await;
    alice.ctx.run_pending();
    assert_eq!(alice.controller.status_of(&sent.id), Some(MessageStatus::Read));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_events_while_detached_are_replayed() {
    let (alice, bob) = connected_pair().await;

    bob.relay.detach().unwrap();
    alice
        .controller
        .send_message(MessageKind::Regular, "are you there?", None)
        .unwrap();
    settle().await;
    bob.ctx.run_pending();
    assert!(bob.controller.messages().is_empty());
    assert!(bob.relay.queued() > 0);

    bob.relay.attach(bob.controller.clone()).unwrap();
    let received = bob.controller.messages();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].message.content, "are you there?");
    assert_eq!(bob.relay.queued(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_live_location_round_trip() {
    let (alice, bob) = connected_pair().await;

    alice.controller.send_location_update(52.52, 13.405).unwrap();
    settle().await;
    bob.ctx.run_pending();
    assert!(bob.state.is_receiving_live_location());
    assert_eq!(bob.state.get_last_live_location(), Some((52.52, 13.405)));
    assert!(bob.controller.messages().is_empty());

    // The Delivered ACK for a live fix matches nothing on Alice's side.
    settle().await;
    alice.ctx.run_pending();
    assert!(alice.controller.messages().is_empty());

    alice.controller.stop_location_sharing().unwrap();
    settle().await;
    bob.ctx.run_pending();
    assert!(!bob.state.is_receiving_live_location());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_peer_disconnect_is_reported() {
    let (alice, bob) = connected_pair().await;

    bob.controller.disconnect();
    assert_eq!(bob.state.get_status(), ConnectionStatus::Disconnected);

    settle().await;
    alice.ctx.run_pending();
    assert_eq!(alice.state.get_status(), ConnectionStatus::Error);
    assert!(alice.state.get_status_line().starts_with("Connection lost: "));

    // Sending now fails fast and leaves the message pending.
    let msg = alice
        .controller
        .send_message(MessageKind::Regular, "hello?", None)
        .unwrap();
    assert_eq!(msg.status, MessageStatus::Sending);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_conversation_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    let id = {
        let store: Arc<dyn ChatSink> = Arc::new(ChatStore::new(dir.path()).unwrap());
        let device = Device::new("AA:BB:CC:DD:EE:FF", store);
        device
            .controller
            .send_message(MessageKind::Emergency, "gas leak", None)
            .unwrap()
            .id
    };

    let store: Arc<dyn ChatSink> = Arc::new(ChatStore::new(dir.path()).unwrap());
    let device = Device::new("AA:BB:CC:DD:EE:FF", store);
    let messages = device.controller.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message.id, id);
    assert_eq!(messages[0].message.kind, MessageKind::Emergency);
    assert_eq!(messages[0].message.status, MessageStatus::Sending);
}

#[test]
fn test_encoded_message_decodes_to_same_fields() {
    let msg = EmergencyMessage::new(MessageKind::Relay, "pass it on").with_location(Some((-33.9, 18.4)));
    let frame = encode_message(&msg).unwrap();

    match decode(&frame) {
        Some(Frame::Message(decoded)) => {
            assert_eq!(decoded.id, msg.id);
            assert_eq!(decoded.kind, MessageKind::Relay);
            assert_eq!(decoded.content, "pass it on");
            assert_eq!(decoded.latitude, -33.9);
            assert_eq!(decoded.longitude, 18.4);
            assert_eq!(decoded.status, MessageStatus::Sending);
        }
        other => panic!("unexpected frame: {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_live_location_flag_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    ChatStore::new(dir.path())
        .unwrap()
        .set_live_receiving("AA:BB:CC:DD:EE:FF", true)
        .unwrap();

    let store: Arc<dyn ChatSink> = Arc::new(ChatStore::new(dir.path()).unwrap());
    let device = Device::new("AA:BB:CC:DD:EE:FF", store);
    assert!(device.state.is_receiving_live_location());
}
