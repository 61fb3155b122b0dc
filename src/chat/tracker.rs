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

//! Per-peer conversation and delivery status tracking.

use std::sync::Arc;
use tracing::{debug, error, info};

use super::identity;
use super::message::{EmergencyMessage, MessageDisplay, MessageStatus};
use crate::bluetooth::Ack;
use crate::storage::ChatSink;

/// Conversation with one peer plus the status state machine
/// `Sending -> Sent -> Delivered -> Read`.
///
/// ACKs are applied as received. An older ACK arriving late can move a
/// message backwards (e.g. `Read` then `Delivered`); that is accepted.
pub struct DeliveryTracker {
    peer_id: String,
    messages: Vec<MessageDisplay>,
    sink: Arc<dyn ChatSink>,
}

impl DeliveryTracker {
    /// Create a tracker, restoring any stored conversation for `peer_id`.
    pub fn load(peer_id: impl Into<String>, sink: Arc<dyn ChatSink>) -> Self {
        let peer_id = peer_id.into();
        let messages = match sink.load(&peer_id) {
            Ok(messages) => messages,
            Err(e) => {
                error!("Failed to load messages for {}: {}", peer_id, e);
                Vec::new()
            }
        };
        info!("Loaded {} messages for {}", messages.len(), peer_id);

        Self {
            peer_id,
            messages,
            sink,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn messages(&self) -> &[MessageDisplay] {
        &self.messages
    }

    pub fn get(&self, id: &str) -> Option<&EmergencyMessage> {
        self.messages
            .iter()
            .map(|entry| &entry.message)
            .find(|msg| msg.id == id)
    }

    /// Record a message this device sent (or tried to send).
    pub fn record_outgoing(&mut self, message: EmergencyMessage) {
        self.messages.push(MessageDisplay::outgoing(message));
        self.persist();
    }

    /// Record a message received from the peer.
    pub fn record_incoming(&mut self, message: EmergencyMessage) {
        self.messages.push(MessageDisplay::incoming(message));
        self.persist();
    }

    /// Set the status of the message with exactly this id.
    pub fn set_status(&mut self, id: &str, status: MessageStatus) -> bool {
        let Some(entry) = self.messages.iter_mut().find(|e| e.message.id == id) else {
            return false;
        };
        entry.message.status = status;
        self.persist();
        true
    }

    /// Apply an ACK to every message whose id starts with the ACK id.
    ///
    /// Returns the number of messages updated.
    pub fn apply_ack(&mut self, ack: &Ack) -> usize {
        let mut updated = 0;
        for entry in &mut self.messages {
            if identity::matches_prefix(&entry.message.id, &ack.id) {
                entry.message.status = ack.status;
                updated += 1;
            }
        }

        if updated > 0 {
            debug!(
                "ACK {} -> {} updated {} message(s)",
                ack.id,
                ack.status.description(),
                updated
            );
            self.persist();
        } else {
            debug!("ACK {} matched no message", ack.id);
        }
        updated
    }

    /// Mark a received message as read.
    ///
    /// Returns the `Read` ACK to send back, or `None` when there is no
    /// incoming message with that id.
    pub fn mark_read(&mut self, id: &str) -> Option<Ack> {
        let entry = self
            .messages
            .iter_mut()
            .find(|e| !e.is_sent && e.message.id == id)?;
        entry.message.status = MessageStatus::Read;
        let ack = Ack::new(entry.message.id.clone(), MessageStatus::Read);
        self.persist();
        Some(ack)
    }

    /// Drop the whole conversation, locally and in storage.
    pub fn clear(&mut self) {
        self.messages.clear();
        if let Err(e) = self.sink.clear(&self.peer_id) {
            error!("Failed to clear messages for {}: {}", self.peer_id, e);
        }
    }

    fn persist(&self) {
        if let Err(e) = self.sink.save(&self.peer_id, &self.messages) {
            error!("Failed to save messages for {}: {}", self.peer_id, e);
        }
    }
}
