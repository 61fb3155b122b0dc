// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Conversation controller.
//!
//! Attached to the relay as the serial listener. Turns incoming frames
//! into tracker updates and ACKs, and turns user actions into frames.

use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::bluetooth::{
    decode_bytes, encode_ack, encode_message, encode_stop_location, Connector, EncodeError, Frame,
    SerialListener, SessionError, TransportSession,
};
use crate::chat::{DeliveryTracker, EmergencyMessage, MessageDisplay, MessageKind, MessageStatus};
use crate::state::LinkState;
use crate::storage::ChatSink;

/// Events for whatever is presenting the conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Connected { peer: String },
    ConnectFailed(String),
    ConnectionLost(String),
    MessageReceived(EmergencyMessage),
    /// An ACK arrived; `updated` messages now carry `status`.
    StatusChanged {
        id: String,
        status: MessageStatus,
        updated: usize,
    },
    LiveLocation { latitude: f64, longitude: f64 },
    LiveLocationStopped,
}

/// Failure to put a frame on the link.
#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// One conversation over one session.
pub struct ChatController {
    session: TransportSession,
    tracker: Mutex<DeliveryTracker>,
    sink: Arc<dyn ChatSink>,
    state: Arc<LinkState>,
    events: mpsc::UnboundedSender<ChatEvent>,
}

impl ChatController {
    /// Create a controller for `peer_id`, restoring its stored conversation.
    pub fn new(
        session: TransportSession,
        state: Arc<LinkState>,
        peer_id: &str,
        sink: Arc<dyn ChatSink>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ChatEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        match sink.is_live_receiving(peer_id) {
            Ok(true) => state.resume_live_location(),
            Ok(false) => {}
            Err(e) => error!("Failed to read live-location flag for {}: {}", peer_id, e),
        }
        let controller = Arc::new(Self {
            session,
            tracker: Mutex::new(DeliveryTracker::load(peer_id, sink.clone())),
            sink,
            state,
            events,
        });
        (controller, rx)
    }

    pub fn session(&self) -> &TransportSession {
        &self.session
    }

    pub fn peer_id(&self) -> String {
        self.tracker.lock().peer_id().to_string()
    }

    /// Snapshot of the conversation, oldest first.
    pub fn messages(&self) -> Vec<MessageDisplay> {
        self.tracker.lock().messages().to_vec()
    }

    pub fn status_of(&self, id: &str) -> Option<MessageStatus> {
        self.tracker.lock().get(id).map(|msg| msg.status)
    }

    /// Start connecting through `connector`.
    pub fn connect(&self, connector: Arc<dyn Connector>) -> Result<(), SessionError> {
        if self.session.peer_name().is_some() {
            return Err(SessionError::AlreadyConnected);
        }
        // Set before connecting; the Connected callback may follow at once.
        self.state.set_connecting(connector.name());
        self.session.connect(connector)
    }

    pub fn disconnect(&self) {
        self.session.disconnect();
        self.state.set_disconnected();
    }

    /// Send a chat message.
    ///
    /// The message is recorded either way. It ends up `Sent` when the
    /// transport wrote it and stays `Sending` when the write failed; only
    /// frames that cannot be encoded are refused outright.
    pub fn send_message(
        &self,
        kind: MessageKind,
        content: &str,
        location: Option<(f64, f64)>,
    ) -> Result<EmergencyMessage, EncodeError> {
        let mut message = EmergencyMessage::new(kind, content.trim()).with_location(location);
        let frame = encode_message(&message)?;

        // Held across the write so an early ACK cannot be overwritten by Sent.
        let mut tracker = self.tracker.lock();
        tracker.record_outgoing(message.clone());
        match self.session.write(frame.as_bytes()) {
            Ok(()) => {
                tracker.set_status(&message.id, MessageStatus::Sent);
                message.status = MessageStatus::Sent;
                info!("Sent {} message {}", message.kind.as_str(), message.id);
            }
            Err(e) => warn!("Message {} not sent: {}", message.id, e),
        }
        Ok(message)
    }

    /// Share one live-location fix. Not recorded in the conversation.
    pub fn send_location_update(&self, latitude: f64, longitude: f64) -> Result<(), SendError> {
        let frame = encode_message(&EmergencyMessage::live_location(latitude, longitude))?;
        self.session.write(frame.as_bytes())?;
        debug!("Live location {:.6}, {:.6} sent", latitude, longitude);
        Ok(())
    }

    pub fn stop_location_sharing(&self) -> Result<(), SendError> {
        self.session.write(encode_stop_location().as_bytes())?;
        info!("Location sharing stopped");
        Ok(())
    }

    /// Mark a received message read and tell the peer.
    ///
    /// Returns false when no received message has that id.
    pub fn mark_read(&self, id: &str) -> bool {
        let Some(ack) = self.tracker.lock().mark_read(id) else {
            return false;
        };
        self.acknowledge(&ack.id, ack.status);
        true
    }

    pub fn clear_history(&self) {
        self.tracker.lock().clear();
        info!("Conversation cleared");
    }

    /// Best-effort ACK; a failed write is only logged.
    fn acknowledge(&self, id: &str, status: MessageStatus) {
        if let Err(e) = self.session.write(encode_ack(id, status).as_bytes()) {
            debug!("ACK {} for {} not sent: {}", status.as_str(), id, e);
        }
    }

    fn set_live_receiving(&self, enabled: bool) {
        let peer_id = self.peer_id();
        if let Err(e) = self.sink.set_live_receiving(&peer_id, enabled) {
            error!("Failed to store live-location flag for {}: {}", peer_id, e);
        }
    }

    fn emit(&self, event: ChatEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn handle_message(&self, message: EmergencyMessage) {
        if message.is_live_location() {
            self.state
                .set_live_location(message.latitude, message.longitude);
            self.set_live_receiving(true);
            self.acknowledge(&message.id, MessageStatus::Delivered);
            self.emit(ChatEvent::LiveLocation {
                latitude: message.latitude,
                longitude: message.longitude,
            });
            return;
        }

        info!(
            "Received {} message {} from peer",
            message.kind.as_str(),
            message.id
        );
        self.tracker.lock().record_incoming(message.clone());
        self.acknowledge(&message.id, MessageStatus::Delivered);
        self.emit(ChatEvent::MessageReceived(message));
    }
}

impl SerialListener for ChatController {
    fn on_connect(&self) {
        let peer = self.session.peer_name().unwrap_or_default();
        info!("Connected to {}", peer);
        self.state.set_connected();
        self.emit(ChatEvent::Connected { peer });
    }

    fn on_connect_error(&self, reason: &str) {
        error!("Connection failed: {}", reason);
        self.state.set_connect_failed(reason);
        self.emit(ChatEvent::ConnectFailed(reason.to_string()));
    }

    fn on_read(&self, data: &[u8]) {
        let Some(frame) = decode_bytes(data) else {
            debug!("Ignoring {} byte(s) that do not decode", data.len());
            return;
        };

        match frame {
            Frame::Ack(ack) => {
                let updated = self.tracker.lock().apply_ack(&ack);
                self.emit(ChatEvent::StatusChanged {
                    id: ack.id,
                    status: ack.status,
                    updated,
                });
            }
            Frame::StopLocation => {
                info!("Peer stopped sharing location");
                self.state.stop_live_location();
                self.set_live_receiving(false);
                self.emit(ChatEvent::LiveLocationStopped);
            }
            Frame::Message(message) => self.handle_message(message),
        }
    }

    fn on_io_error(&self, reason: &str) {
        warn!("Connection lost: {}", reason);
        self.state.set_connection_lost(reason);
        self.emit(ChatEvent::ConnectionLost(reason.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::{BrokenPipeConnector, ListenerRelay, ManualContext};
    use crate::state::ConnectionStatus;
    use crate::storage::MemoryStore;
    use std::time::Duration;
    use tokio::runtime::Handle;

    fn controller() -> (Arc<ChatController>, mpsc::UnboundedReceiver<ChatEvent>) {
        let relay = ListenerRelay::new(ManualContext::new());
        let session = TransportSession::new(relay, Handle::current());
        ChatController::new(
            session,
            LinkState::new(),
            "peer",
            Arc::new(MemoryStore::new()),
        )
    }

    #[tokio::test]
    async fn test_send_while_disconnected_stays_sending() {
        let (controller, _rx) = controller();

        let message = controller
            .send_message(MessageKind::Sos, "help", Some((1.5, 2.5)))
            .unwrap();
        assert_eq!(message.status, MessageStatus::Sending);
        assert_eq!(controller.status_of(&message.id), Some(MessageStatus::Sending));
        assert!(controller.messages()[0].is_sent);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_write_leaves_message_sending() {
        let ctx = ManualContext::new();
        let relay = ListenerRelay::new(ctx.clone());
        let session = TransportSession::new(relay.clone(), Handle::current());
        let state = LinkState::new();
        let (controller, _rx) =
            ChatController::new(session, state.clone(), "peer", Arc::new(MemoryStore::new()));
        relay.attach(controller.clone()).unwrap();

        let (connector, _idle) = BrokenPipeConnector::new();
        controller.connect(Arc::new(connector)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx.run_pending();
        assert_eq!(state.get_status(), ConnectionStatus::Connected);

        let message = controller
            .send_message(MessageKind::Sos, "help", None)
            .unwrap();
        assert_eq!(message.status, MessageStatus::Sending);
        assert_eq!(controller.status_of(&message.id), Some(MessageStatus::Sending));

        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx.run_pending();
        assert!(state.get_status_line().starts_with("Connection lost: "));
    }

    #[tokio::test]
    async fn test_unknown_ack_status_changes_nothing() {
        let (controller, mut rx) = controller();
        let message = controller
            .send_message(MessageKind::Regular, "hi", None)
            .unwrap();

        let ack = format!("ACK|{}|99", message.id);
        controller.on_read(ack.as_bytes());

        assert_eq!(controller.status_of(&message.id), Some(MessageStatus::Sending));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stored_live_flag_is_restored() {
        let sink = Arc::new(MemoryStore::new());
        sink.set_live_receiving("peer", true).unwrap();

        let relay = ListenerRelay::new(ManualContext::new());
        let session = TransportSession::new(relay, Handle::current());
        let state = LinkState::new();
        let (_controller, _rx) = ChatController::new(session, state.clone(), "peer", sink);

        assert!(state.is_receiving_live_location());
        assert!(state.get_last_live_location().is_none());
    }

    #[tokio::test]
    async fn test_unencodable_message_is_not_recorded() {
        let (controller, _rx) = controller();

        assert!(controller
            .send_message(MessageKind::Regular, "a|b", None)
            .is_err());
        assert!(controller
            .send_message(MessageKind::Regular, "   ", None)
            .is_err());
        assert!(controller.messages().is_empty());
    }

    #[tokio::test]
    async fn test_ack_updates_outgoing_status() {
        let (controller, mut rx) = controller();
        let message = controller
            .send_message(MessageKind::Regular, "hi", None)
            .unwrap();

        let ack = format!("ACK|{}|2", message.id);
        controller.on_read(ack.as_bytes());

        assert_eq!(
            controller.status_of(&message.id),
            Some(MessageStatus::Delivered)
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ChatEvent::StatusChanged {
                id: message.id.clone(),
                status: MessageStatus::Delivered,
                updated: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_incoming_message_recorded_and_read() {
        let (controller, mut rx) = controller();

        controller.on_read(b"EMERGENCY|fire|0.0|0.0|ABC123|1");
        let messages = controller.messages();
        assert_eq!(messages.len(), 1);
        assert!(!messages[0].is_sent);
        assert_eq!(messages[0].message.kind, MessageKind::Emergency);
        assert!(matches!(
            rx.try_recv().unwrap(),
            ChatEvent::MessageReceived(msg) if msg.id == "ABC123"
        ));

        assert!(controller.mark_read("ABC123"));
        assert_eq!(controller.status_of("ABC123"), Some(MessageStatus::Read));
        assert!(!controller.mark_read("ZZZZZZ"));
    }

    #[tokio::test]
    async fn test_live_location_is_not_stored() {
        let (controller, mut rx) = controller();

        controller.on_read(b"REGULAR|LOC|12.5|-3.25|LOC001|1");
        assert!(controller.messages().is_empty());
        assert!(controller.state.is_receiving_live_location());
        assert_eq!(controller.state.get_last_live_location(), Some((12.5, -3.25)));
        assert_eq!(
            rx.try_recv().unwrap(),
            ChatEvent::LiveLocation {
                latitude: 12.5,
                longitude: -3.25
            }
        );

        controller.on_read(b"CTRL|LOC_STOP");
        assert!(!controller.state.is_receiving_live_location());
        assert_eq!(rx.try_recv().unwrap(), ChatEvent::LiveLocationStopped);
    }

    #[tokio::test]
    async fn test_garbage_is_ignored() {
        let (controller, mut rx) = controller();

        controller.on_read(b"ACK|");
        controller.on_read(b"  ");
        assert!(controller.messages().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connection_callbacks_update_state() {
        let (controller, mut rx) = controller();

        controller.on_connect_error("refused");
        assert_eq!(controller.state.get_status(), ConnectionStatus::Error);
        assert_eq!(
            controller.state.get_status_line(),
            "Connection failed: refused"
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ChatEvent::ConnectFailed("refused".to_string())
        );

        controller.on_io_error("reset");
        assert_eq!(controller.state.get_status_line(), "Connection lost: reset");
    }
}
