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


//! Serial link to the peer device.
//!
//! A [`TransportSession`] owns the byte stream, the [`ListenerRelay`]
//! hands its events to whichever [`SerialListener`] is attached on the UI
//! context, and `protocol` turns the text on the wire into [`Frame`]s.

mod dispatch;
mod protocol;
mod relay;
mod session;
mod transport;

pub use dispatch::{Job, ManualContext, UiContext, UiLoop};
pub use protocol::{
    decode, decode_bytes, encode_ack, encode_message, encode_stop_location, Ack, EncodeError,
    Frame, ACK_PREFIX, CTRL_LOC_STOP, DELIMITER,
};
pub use relay::{ListenerRelay, RelayEvent, SerialListener};
pub use session::{SessionError, TransportSession};
#[cfg(feature = "rfcomm")]
pub use transport::RfcommConnector;
pub use transport::{Connector, DeviceFileConnector, DuplexConnector, LinkReader, LinkWriter};

#[cfg(test)]
pub(crate) use transport::BrokenPipeConnector;
