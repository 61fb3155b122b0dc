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

//! Emergency message data model.

use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::identity;

/// Content marker used by live-location updates.
pub const LIVE_LOCATION_CONTENT: &str = "LOC";

/// Classification of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "REGULAR")]
    Regular,
    #[serde(rename = "EMERGENCY")]
    Emergency,
    #[serde(rename = "SOS")]
    Sos,
    #[serde(rename = "RELAY")]
    Relay,
}

impl MessageKind {
    /// Wire and storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regular => "REGULAR",
            Self::Emergency => "EMERGENCY",
            Self::Sos => "SOS",
            Self::Relay => "RELAY",
        }
    }

    /// Parse from the exact wire name. Unknown names yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "REGULAR" => Some(Self::Regular),
            "EMERGENCY" => Some(Self::Emergency),
            "SOS" => Some(Self::Sos),
            "RELAY" => Some(Self::Relay),
            _ => None,
        }
    }
}

/// Delivery status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageStatus {
    #[serde(rename = "SENDING")]
    Sending,
    #[serde(rename = "SENT")]
    Sent,
    #[serde(rename = "DELIVERED")]
    Delivered,
    #[serde(rename = "READ")]
    Read,
}

impl MessageStatus {
    /// Numeric code carried on the wire.
    pub fn code(&self) -> u8 {
        match self {
            Self::Sending => 0,
            Self::Sent => 1,
            Self::Delivered => 2,
            Self::Read => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Sending),
            1 => Some(Self::Sent),
            2 => Some(Self::Delivered),
            3 => Some(Self::Read),
            _ => None,
        }
    }

    /// Storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sending => "SENDING",
            Self::Sent => "SENT",
            Self::Delivered => "DELIVERED",
            Self::Read => "READ",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SENDING" => Some(Self::Sending),
            "SENT" => Some(Self::Sent),
            "DELIVERED" => Some(Self::Delivered),
            "READ" => Some(Self::Read),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Sending => "⏳",
            Self::Sent => "✔",
            Self::Delivered | Self::Read => "✔✔",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Sending => "Sending...",
            Self::Sent => "Sent",
            Self::Delivered => "Delivered",
            Self::Read => "Read",
        }
    }
}

/// One unit of communication.
///
/// A location of `(0.0, 0.0)` means "no location"; a real fix on the
/// equator at the prime meridian cannot be told apart from an absent one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyMessage {
    pub id: String,
    pub sender_id: Option<String>,
    pub recipient_id: Option<String>,
    pub content: String,
    pub kind: MessageKind,
    pub latitude: f64,
    pub longitude: f64,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    pub hop_count: u32,
    pub status: MessageStatus,
}

impl EmergencyMessage {
    /// Create a locally originated message with a fresh id, in `Sending`.
    pub fn new(kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            id: identity::generate_id(),
            sender_id: None,
            recipient_id: None,
            content: content.into(),
            kind,
            latitude: 0.0,
            longitude: 0.0,
            created_at: now_millis(),
            hop_count: 0,
            status: MessageStatus::Sending,
        }
    }

    /// Create a REGULAR message.
    pub fn regular(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Regular, content)
    }

    /// Attach a location. `None` leaves the "no location" sentinel in place.
    pub fn with_location(mut self, location: Option<(f64, f64)>) -> Self {
        if let Some((lat, lon)) = location {
            self.latitude = lat;
            self.longitude = lon;
        }
        self
    }

    /// Live-location update frame content.
    pub fn live_location(latitude: f64, longitude: f64) -> Self {
        Self::regular(LIVE_LOCATION_CONTENT).with_location(Some((latitude, longitude)))
    }

    pub fn has_location(&self) -> bool {
        self.latitude != 0.0 && self.longitude != 0.0
    }

    /// Whether this is a receiver-side live-location update rather than chat.
    pub fn is_live_location(&self) -> bool {
        self.content == LIVE_LOCATION_CONTENT && self.has_location()
    }

    pub fn location_string(&self) -> String {
        if self.has_location() {
            format!("{:.6}, {:.6}", self.latitude, self.longitude)
        } else {
            "No location".to_string()
        }
    }

    pub fn maps_url(&self) -> Option<String> {
        self.has_location().then(|| {
            format!(
                "https://www.google.com/maps?q={},{}",
                self.latitude, self.longitude
            )
        })
    }

    pub fn formatted_timestamp(&self) -> String {
        match Local.timestamp_millis_opt(self.created_at).single() {
            Some(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => self.created_at.to_string(),
        }
    }

    pub fn increment_hop_count(&mut self) {
        self.hop_count += 1;
    }

    pub fn is_emergency(&self) -> bool {
        matches!(self.kind, MessageKind::Emergency | MessageKind::Sos)
    }

    pub fn is_sent(&self) -> bool {
        self.status >= MessageStatus::Sent
    }

    pub fn is_delivered(&self) -> bool {
        self.status >= MessageStatus::Delivered
    }

    pub fn is_read(&self) -> bool {
        self.status == MessageStatus::Read
    }
}

impl fmt::Display for EmergencyMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.kind.as_str())?;
        if self.is_emergency() {
            write!(f, "🚨 ")?;
        }
        write!(f, "{}", self.content)?;
        if self.has_location() {
            write!(f, " 📍 {}", self.location_string())?;
        }
        write!(f, " ({})", self.formatted_timestamp())?;
        if self.hop_count > 0 {
            write!(f, " [Relayed {}x]", self.hop_count)?;
        }
        write!(f, " [{}]", self.status.description())
    }
}

/// A message paired with which side originated it; the persisted unit.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDisplay {
    pub message: EmergencyMessage,
    /// True when this device sent the message.
    pub is_sent: bool,
}

impl MessageDisplay {
    pub fn outgoing(message: EmergencyMessage) -> Self {
        Self {
            message,
            is_sent: true,
        }
    }

    pub fn incoming(message: EmergencyMessage) -> Self {
        Self {
            message,
            is_sent: false,
        }
    }
}

/// Current wall-clock time in milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
