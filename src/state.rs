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

//! Link state shown to the user.

use parking_lot::RwLock;
use std::sync::Arc;

/// Connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Connecting => "Connecting...",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Error => "Error",
        }
    }
}

/// Shared link state.
#[derive(Debug)]
pub struct LinkState {
    /// Current connection status.
    pub connection_status: RwLock<ConnectionStatus>,

    /// Connected peer name.
    pub peer_name: RwLock<Option<String>>,

    /// Last human-readable status line.
    pub status_line: RwLock<String>,

    /// Whether the peer is streaming its live location.
    pub receiving_live_location: RwLock<bool>,

    /// Last live coordinate received.
    pub last_live_location: RwLock<Option<(f64, f64)>>,
}

impl Default for LinkState {
    fn default() -> Self {
        Self {
            connection_status: RwLock::new(ConnectionStatus::Disconnected),
            peer_name: RwLock::new(None),
            status_line: RwLock::new(String::new()),
            receiving_live_location: RwLock::new(false),
            last_live_location: RwLock::new(None),
        }
    }
}

impl LinkState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_connecting(&self, peer_name: String) {
        *self.connection_status.write() = ConnectionStatus::Connecting;
        *self.peer_name.write() = Some(peer_name);
        *self.status_line.write() = "Connecting...".to_string();
    }

    pub fn set_connected(&self) {
        *self.connection_status.write() = ConnectionStatus::Connected;
        *self.status_line.write() = "Connected to device".to_string();
    }

    pub fn set_connect_failed(&self, reason: &str) {
        *self.connection_status.write() = ConnectionStatus::Error;
        *self.status_line.write() = format!("Connection failed: {}", reason);
    }

    pub fn set_connection_lost(&self, reason: &str) {
        *self.connection_status.write() = ConnectionStatus::Error;
        *self.status_line.write() = format!("Connection lost: {}", reason);
    }

    pub fn set_disconnected(&self) {
        *self.connection_status.write() = ConnectionStatus::Disconnected;
        *self.peer_name.write() = None;
        *self.status_line.write() = "Disconnected".to_string();
    }

    pub fn get_status(&self) -> ConnectionStatus {
        *self.connection_status.read()
    }

    pub fn get_peer_name(&self) -> Option<String> {
        self.peer_name.read().clone()
    }

    pub fn get_status_line(&self) -> String {
        self.status_line.read().clone()
    }

    pub fn set_live_location(&self, latitude: f64, longitude: f64) {
        *self.receiving_live_location.write() = true;
        *self.last_live_location.write() = Some((latitude, longitude));
    }

    /// Peer was streaming when we last ran; no fix yet this session.
    pub fn resume_live_location(&self) {
        *self.receiving_live_location.write() = true;
    }

    pub fn stop_live_location(&self) {
        *self.receiving_live_location.write() = false;
    }

    pub fn is_receiving_live_location(&self) -> bool {
        *self.receiving_live_location.read()
    }

    pub fn get_last_live_location(&self) -> Option<(f64, f64)> {
        *self.last_live_location.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_lines() {
        let state = LinkState::new();
        assert_eq!(state.get_status(), ConnectionStatus::Disconnected);

        state.set_connecting("AA:BB".to_string());
        assert_eq!(state.get_status().as_str(), "Connecting...");
        assert_eq!(state.get_peer_name().as_deref(), Some("AA:BB"));

        state.set_connect_failed("refused");
        assert_eq!(state.get_status(), ConnectionStatus::Error);
        assert_eq!(state.get_status_line(), "Connection failed: refused");

        state.set_connection_lost("reset");
        assert_eq!(state.get_status_line(), "Connection lost: reset");

        state.set_disconnected();
        assert!(state.get_peer_name().is_none());
    }

    #[test]
    fn test_live_location_keeps_last_fix() {
        let state = LinkState::new();
        state.set_live_location(1.0, 2.0);
        assert!(state.is_receiving_live_location());

        state.stop_live_location();
        assert!(!state.is_receiving_live_location());
        assert_eq!(state.get_last_live_location(), Some((1.0, 2.0)));
    }
}
