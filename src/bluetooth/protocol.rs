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

//! Pipe-delimited wire format.
//!
//! Every write is one frame. Three frame shapes exist:
//!
//! ```text
//! KIND|CONTENT|LAT|LON|ID|STATUS_CODE        message (compact)
//! ACK|ID_OR_PREFIX|STATUS_CODE               acknowledgment
//! CTRL|LOC_STOP                              stop live location
//! ```
//!
//! The decoder also accepts the two legacy message shapes still sent by
//! older peers, and falls back to plain text for anything without enough
//! delimiters. There is no version handshake, so none of these shapes can
//! ever be dropped.

use thiserror::Error;
use tracing::{debug, warn};

use crate::chat::identity;
use crate::chat::message::{now_millis, EmergencyMessage, MessageKind, MessageStatus};

/// Field separator.
pub const DELIMITER: char = '|';

/// Prefix of acknowledgment frames.
pub const ACK_PREFIX: &str = "ACK|";

/// Stop-control frame.
pub const CTRL_LOC_STOP: &str = "CTRL|LOC_STOP";

/// Digits at or above which an all-numeric trailing field is a timestamp.
const TIMESTAMP_MIN_DIGITS: usize = 12;

/// Acknowledgment of a message (or every message sharing an id prefix).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub id: String,
    pub status: MessageStatus,
}

impl Ack {
    pub fn new(id: impl Into<String>, status: MessageStatus) -> Self {
        Self {
            id: id.into(),
            status,
        }
    }

    pub fn encode(&self) -> String {
        format!("ACK|{}|{}", self.id, self.status.code())
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Message(EmergencyMessage),
    Ack(Ack),
    StopLocation,
}

/// Reasons a message cannot be put on the wire.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("message content is empty")]
    EmptyContent,
    #[error("message content contains the '|' delimiter")]
    EmbeddedDelimiter,
}

/// Encode a message in the compact six-field format.
///
/// The timestamp is left out; the receiver stamps the message on arrival.
pub fn encode_message(message: &EmergencyMessage) -> Result<String, EncodeError> {
    if message.content.trim().is_empty() {
        return Err(EncodeError::EmptyContent);
    }
    if message.content.contains(DELIMITER) {
        return Err(EncodeError::EmbeddedDelimiter);
    }

    Ok(format!(
        "{}|{}|{:?}|{:?}|{}|{}",
        message.kind.as_str(),
        message.content,
        message.latitude,
        message.longitude,
        message.id,
        message.status.code()
    ))
}

/// Encode an acknowledgment frame.
pub fn encode_ack(id: &str, status: MessageStatus) -> String {
    Ack::new(id, status).encode()
}

/// Encode the stop-live-location control frame.
pub fn encode_stop_location() -> String {
    CTRL_LOC_STOP.to_string()
}

/// Decode raw bytes as one frame. Invalid UTF-8 is replaced, not rejected.
pub fn decode_bytes(data: &[u8]) -> Option<Frame> {
    decode(&String::from_utf8_lossy(data))
}

/// Decode one frame of text.
///
/// Malformed frames return `None`; transport noise never surfaces as an
/// error past this point.
pub fn decode(raw: &str) -> Option<Frame> {
    let text = raw.trim();

    if text.starts_with(ACK_PREFIX) {
        return decode_ack(text).map(Frame::Ack);
    }
    if text.starts_with(CTRL_LOC_STOP) {
        return Some(Frame::StopLocation);
    }

    decode_message(text).map(Frame::Message)
}

fn decode_ack(text: &str) -> Option<Ack> {
    let parts: Vec<&str> = text.split(DELIMITER).collect();
    if parts.len() < 3 {
        debug!("ACK with {} fields ignored: {}", parts.len(), text);
        return None;
    }

    let id = parts[1].trim();
    if id.is_empty() {
        debug!("ACK without id ignored");
        return None;
    }

    let status = match parts[2].trim().parse::<u8>().ok().and_then(MessageStatus::from_code) {
        Some(status) => status,
        None => {
            warn!("ACK for {} with unknown status code '{}'", id, parts[2]);
            return None;
        }
    };

    Some(Ack::new(id, status))
}

fn decode_message(text: &str) -> Option<EmergencyMessage> {
    let parts: Vec<&str> = text.split(DELIMITER).collect();

    let message = match parts.len() {
        // KIND|CONTENT|LAT|LON|TIMESTAMP|ID|STATUS
        n if n >= 7 => build(
            &parts,
            Some(parse_timestamp(parts[4])?),
            Some(parts[5]),
            parse_status(parts[6])?,
        ),
        // KIND|CONTENT|LAT|LON|ID|STATUS
        6 => build(&parts, None, Some(parts[4]), parse_status(parts[5])?),
        // KIND|CONTENT|LAT|LON|(ID or TIMESTAMP)
        5 => {
            let last = parts[4].trim();
            if looks_like_timestamp(last) {
                build(&parts, Some(parse_timestamp(last)?), None, MessageStatus::Sending)
            } else {
                build(&parts, None, Some(last), MessageStatus::Sending)
            }
        }
        _ => Some(EmergencyMessage::regular(text)),
    }?;

    if message.content.trim().is_empty() {
        debug!("Frame with blank content dropped");
        return None;
    }

    Some(message)
}

/// Shared tail of the structured formats: kind, content and location are
/// always the first four fields.
fn build(
    parts: &[&str],
    timestamp: Option<i64>,
    id: Option<&str>,
    status: MessageStatus,
) -> Option<EmergencyMessage> {
    let kind = match MessageKind::parse(parts[0].trim()) {
        Some(kind) => kind,
        None => {
            debug!("Unknown message kind '{}'", parts[0]);
            return None;
        }
    };
    let latitude = parse_coordinate(parts[2])?;
    let longitude = parse_coordinate(parts[3])?;

    let id = match id.map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => identity::generate_id(),
    };

    Some(EmergencyMessage {
        id,
        sender_id: None,
        recipient_id: None,
        content: parts[1].to_string(),
        kind,
        latitude,
        longitude,
        created_at: timestamp.unwrap_or_else(now_millis),
        hop_count: 0,
        status,
    })
}

fn looks_like_timestamp(field: &str) -> bool {
    field.len() >= TIMESTAMP_MIN_DIGITS && field.bytes().all(|b| b.is_ascii_digit())
}

fn parse_coordinate(field: &str) -> Option<f64> {
    match field.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Some(value),
        _ => {
            debug!("Unparsable coordinate '{}'", field);
            None
        }
    }
}

fn parse_timestamp(field: &str) -> Option<i64> {
    field
        .trim()
        .parse::<i64>()
        .map_err(|_| debug!("Unparsable timestamp '{}'", field))
        .ok()
}

fn parse_status(field: &str) -> Option<MessageStatus> {
    let status = field.trim().parse::<u8>().ok().and_then(MessageStatus::from_code);
    if status.is_none() {
        debug!("Unparsable status code '{}'", field);
    }
    status
}
