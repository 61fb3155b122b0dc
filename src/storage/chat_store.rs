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

//! Chat history storage using SQLite.

use anyhow::Result;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::ChatSink;
use crate::chat::{generate_id, EmergencyMessage, MessageDisplay, MessageKind, MessageStatus};

/// A conversation entry as stored and exported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub message_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: i64,
    pub is_sent: bool,
    pub status: String,
}

impl StoredMessage {
    fn from_display(entry: &MessageDisplay) -> Self {
        let msg = &entry.message;
        Self {
            message_id: msg.id.clone(),
            content: msg.content.clone(),
            kind: msg.kind.as_str().to_string(),
            latitude: msg.latitude,
            longitude: msg.longitude,
            timestamp: msg.created_at,
            is_sent: entry.is_sent,
            status: msg.status.as_str().to_string(),
        }
    }

    /// Rebuild a display entry. Unknown kinds are rejected; unknown
    /// statuses fall back to `Sending` and empty ids get a fresh one.
    fn into_display(self) -> Option<MessageDisplay> {
        let kind = MessageKind::parse(&self.kind)?;
        let id = if self.message_id.is_empty() {
            generate_id()
        } else {
            self.message_id
        };

        let message = EmergencyMessage {
            id,
            sender_id: None,
            recipient_id: None,
            content: self.content,
            kind,
            latitude: self.latitude,
            longitude: self.longitude,
            created_at: self.timestamp,
            hop_count: 0,
            status: MessageStatus::parse(&self.status).unwrap_or(MessageStatus::Sending),
        };

        Some(MessageDisplay {
            message,
            is_sent: self.is_sent,
        })
    }
}

/// SQLite-backed conversation store.
#[derive(Clone)]
pub struct ChatStore {
    conn: Arc<Mutex<Connection>>,
    max_messages: u32,
}

impl ChatStore {
    /// Create or open the chat database in `data_dir`.
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("chat.db");
        info!("Opening chat database: {:?}", db_path);

        let conn = Connection::open(&db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                peer TEXT NOT NULL,
                position INTEGER NOT NULL,
                message_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                content TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                timestamp INTEGER NOT NULL,
                is_sent INTEGER NOT NULL,
                status TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_peer_position ON messages(peer, position)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS peer_flags (
                peer TEXT PRIMARY KEY,
                live_receiving INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            max_messages: 5000,
        })
    }

    /// Set maximum number of messages kept per peer.
    pub fn set_max_messages(&mut self, max: u32) {
        self.max_messages = max;
    }

    /// Whether anything is stored for this peer.
    pub fn has_messages(&self, peer_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE peer = ?1",
            [peer_key(peer_id)],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Remember whether the peer is currently streaming its location to us.
    pub fn set_live_receiving(&self, peer_id: &str, enabled: bool) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO peer_flags (peer, live_receiving) VALUES (?1, ?2)
             ON CONFLICT(peer) DO UPDATE SET live_receiving = excluded.live_receiving",
            params![peer_key(peer_id), enabled],
        )?;
        Ok(())
    }

    pub fn is_live_receiving(&self, peer_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let enabled: Option<bool> = conn
            .query_row(
                "SELECT live_receiving FROM peer_flags WHERE peer = ?1",
                [peer_key(peer_id)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(enabled.unwrap_or(false))
    }

    /// Export a conversation as pretty JSON.
    pub fn export_json(&self, peer_id: &str, path: &Path) -> Result<()> {
        let stored = self.load_stored(peer_id)?;
        let content = serde_json::to_string_pretty(&stored)?;
        std::fs::write(path, content)?;
        info!("Exported {} messages to {:?}", stored.len(), path);
        Ok(())
    }

    fn load_stored(&self, peer_id: &str) -> Result<Vec<StoredMessage>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT message_id, content, kind, latitude, longitude, timestamp, is_sent, status
             FROM messages
             WHERE peer = ?1
             ORDER BY position ASC",
        )?;

        let stored = stmt
            .query_map([peer_key(peer_id)], |row| {
                Ok(StoredMessage {
                    message_id: row.get(0)?,
                    content: row.get(1)?,
                    kind: row.get(2)?,
                    latitude: row.get(3)?,
                    longitude: row.get(4)?,
                    timestamp: row.get(5)?,
                    is_sent: row.get(6)?,
                    status: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(stored)
    }
}

impl ChatSink for ChatStore {
    fn save(&self, peer_id: &str, messages: &[MessageDisplay]) -> Result<()> {
        let key = peer_key(peer_id);
        let skip = messages.len().saturating_sub(self.max_messages as usize);

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM messages WHERE peer = ?1", [&key])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO messages
                 (peer, position, message_id, kind, content, latitude, longitude, timestamp, is_sent, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for (position, entry) in messages.iter().skip(skip).enumerate() {
                let stored = StoredMessage::from_display(entry);
                stmt.execute(params![
                    key,
                    position as i64,
                    stored.message_id,
                    stored.kind,
                    stored.content,
                    stored.latitude,
                    stored.longitude,
                    stored.timestamp,
                    stored.is_sent,
                    stored.status,
                ])?;
            }
        }
        tx.commit()?;

        debug!("Saved {} messages for {}", messages.len() - skip, peer_id);
        Ok(())
    }

    fn load(&self, peer_id: &str) -> Result<Vec<MessageDisplay>> {
        let messages: Vec<MessageDisplay> = self
            .load_stored(peer_id)?
            .into_iter()
            .filter_map(|stored| {
                let kind = stored.kind.clone();
                let entry = stored.into_display();
                if entry.is_none() {
                    warn!("Skipping stored message with unknown kind '{}'", kind);
                }
                entry
            })
            .collect();

        debug!("Loaded {} messages for {}", messages.len(), peer_id);
        Ok(messages)
    }

    fn clear(&self, peer_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM messages WHERE peer = ?1", [peer_key(peer_id)])?;
        info!("Cleared messages for {}", peer_id);
        Ok(())
    }

    fn set_live_receiving(&self, peer_id: &str, enabled: bool) -> Result<()> {
        ChatStore::set_live_receiving(self, peer_id, enabled)
    }

    fn is_live_receiving(&self, peer_id: &str) -> Result<bool> {
        ChatStore::is_live_receiving(self, peer_id)
    }
}

/// Bluetooth addresses are stored with `:` replaced by `_`.
fn peer_key(peer_id: &str) -> String {
    peer_id.replace(':', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PEER: &str = "AA:BB:CC:DD:EE:FF";

    fn entry(id: &str, content: &str, is_sent: bool) -> MessageDisplay {
        let mut msg = EmergencyMessage::regular(content);
        msg.id = id.to_string();
        MessageDisplay {
            message: msg,
            is_sent,
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let store = ChatStore::new(dir.path()).unwrap();

        let mut sos = entry("SOS001", "help", true);
        sos.message.kind = MessageKind::Sos;
        sos.message.status = MessageStatus::Delivered;
        sos.message.latitude = 46.5;
        sos.message.longitude = 7.25;

        store
            .save(PEER, &[entry("AAAAAA", "first", false), sos])
            .unwrap();

        let loaded = store.load(PEER).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].message.content, "first");
        assert!(!loaded[0].is_sent);
        assert_eq!(loaded[1].message.kind, MessageKind::Sos);
        assert_eq!(loaded[1].message.status, MessageStatus::Delivered);
        assert_eq!(loaded[1].message.latitude, 46.5);
        assert!(store.has_messages(PEER).unwrap());
        assert!(!store.has_messages("other").unwrap());
    }

    #[test]
    fn test_save_replaces_conversation() {
        let dir = tempdir().unwrap();
        let store = ChatStore::new(dir.path()).unwrap();

        store.save(PEER, &[entry("AAAAAA", "one", true)]).unwrap();
        store
            .save(PEER, &[entry("AAAAAA", "one", true), entry("BBBBBB", "two", false)])
            .unwrap();

        assert_eq!(store.load(PEER).unwrap().len(), 2);

        store.clear(PEER).unwrap();
        assert!(store.load(PEER).unwrap().is_empty());
    }

    #[test]
    fn test_max_messages_keeps_newest() {
        let dir = tempdir().unwrap();
        let mut store = ChatStore::new(dir.path()).unwrap();
        store.set_max_messages(2);

        store
            .save(
                PEER,
                &[
                    entry("AAAAAA", "one", true),
                    entry("BBBBBB", "two", true),
                    entry("CCCCCC", "three", true),
                ],
            )
            .unwrap();

        let loaded = store.load(PEER).unwrap();
        let contents: Vec<_> = loaded.iter().map(|e| e.message.content.as_str()).collect();
        assert_eq!(contents, vec!["two", "three"]);
    }

    #[test]
    fn test_legacy_rows_are_repaired() {
        let dir = tempdir().unwrap();
        let store = ChatStore::new(dir.path()).unwrap();

        {
            let conn = store.conn.lock();
            conn.execute(
                "INSERT INTO messages
                 (peer, position, message_id, kind, content, latitude, longitude, timestamp, is_sent, status)
                 VALUES ('p', 0, '', 'REGULAR', 'old', 0.0, 0.0, 1, 0, 'BOGUS'),
                        ('p', 1, 'X', 'TEXT', 'bad kind', 0.0, 0.0, 2, 0, 'SENT')",
                [],
            )
            .unwrap();
        }

        let loaded = store.load("p").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].message.id.len(), 6);
        assert_eq!(loaded[0].message.status, MessageStatus::Sending);
    }

    #[test]
    fn test_live_receiving_flag() {
        let dir = tempdir().unwrap();
        let store = ChatStore::new(dir.path()).unwrap();

        assert!(!store.is_live_receiving(PEER).unwrap());
        store.set_live_receiving(PEER, true).unwrap();
        assert!(store.is_live_receiving(PEER).unwrap());
        store.set_live_receiving(PEER, false).unwrap();
        assert!(!store.is_live_receiving(PEER).unwrap());
    }

    #[test]
    fn test_export_json() {
        let dir = tempdir().unwrap();
        let store = ChatStore::new(dir.path()).unwrap();
        store.save(PEER, &[entry("AAAAAA", "export me", true)]).unwrap();

        let path = dir.path().join("export.json");
        store.export_json(PEER, &path).unwrap();

        let exported: Vec<StoredMessage> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].content, "export me");
        assert_eq!(exported[0].kind, "REGULAR");
    }
}
