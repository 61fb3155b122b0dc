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


//! Conversation persistence.

mod chat_store;

pub use chat_store::{ChatStore, StoredMessage};

use anyhow::Result;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::chat::MessageDisplay;

/// Save/load collaborator for conversations, keyed by peer id.
///
/// Callers log and swallow failures; nothing here reaches the transport.
pub trait ChatSink: Send + Sync {
    /// Replace the stored conversation for `peer_id`.
    fn save(&self, peer_id: &str, messages: &[MessageDisplay]) -> Result<()>;

    /// Load the stored conversation, oldest first.
    fn load(&self, peer_id: &str) -> Result<Vec<MessageDisplay>>;

    /// Remove the stored conversation.
    fn clear(&self, peer_id: &str) -> Result<()>;

    /// Remember whether the peer is streaming its location to us.
    fn set_live_receiving(&self, peer_id: &str, enabled: bool) -> Result<()>;

    /// Last value stored with `set_live_receiving`, false if never set.
    fn is_live_receiving(&self, peer_id: &str) -> Result<bool>;
}

/// In-memory sink, used when persistence is disabled.
#[derive(Default)]
pub struct MemoryStore {
    conversations: Mutex<HashMap<String, Vec<MessageDisplay>>>,
    live_receiving: Mutex<HashMap<String, bool>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChatSink for MemoryStore {
    fn save(&self, peer_id: &str, messages: &[MessageDisplay]) -> Result<()> {
        self.conversations
            .lock()
            .insert(peer_id.to_string(), messages.to_vec());
        Ok(())
    }

    fn load(&self, peer_id: &str) -> Result<Vec<MessageDisplay>> {
        Ok(self
            .conversations
            .lock()
            .get(peer_id)
            .cloned()
            .unwrap_or_default())
    }

    fn clear(&self, peer_id: &str) -> Result<()> {
        self.conversations.lock().remove(peer_id);
        Ok(())
    }

    fn set_live_receiving(&self, peer_id: &str, enabled: bool) -> Result<()> {
        self.live_receiving
            .lock()
            .insert(peer_id.to_string(), enabled);
        Ok(())
    }

    fn is_live_receiving(&self, peer_id: &str) -> Result<bool> {
        Ok(self
            .live_receiving
            .lock()
            .get(peer_id)
            .copied()
            .unwrap_or(false))
    }
}
