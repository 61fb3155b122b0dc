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

//! Byte-stream connectors.
//!
//! A connector opens one point-to-point stream and hands back its read and
//! write halves. The session owns everything after that.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tracing::info;

/// Read half of a connected stream.
pub type LinkReader = Box<dyn AsyncRead + Send + Unpin>;
/// Write half of a connected stream.
pub type LinkWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Opens the underlying byte stream.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Human-readable peer name, used for logging and status lines.
    fn name(&self) -> String;

    /// Stable key for the peer's conversation.
    fn peer_id(&self) -> String {
        self.name()
    }

    async fn connect(&self) -> io::Result<(LinkReader, LinkWriter)>;
}

/// Serial device node, e.g. `/dev/rfcomm0` bound with `rfcomm bind`.
pub struct DeviceFileConnector {
    path: PathBuf,
}

impl DeviceFileConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Connector for DeviceFileConnector {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    async fn connect(&self) -> io::Result<(LinkReader, LinkWriter)> {
        info!("Opening serial device {:?}", self.path);
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .await?;
        let (reader, writer) = tokio::io::split(file);
        Ok((Box::new(reader), Box::new(writer)))
    }
}

/// In-process stream, one end of a `tokio::io::duplex` pair.
///
/// Each instance connects once; a second attempt fails like a refused
/// connection would.
pub struct DuplexConnector {
    name: String,
    stream: Mutex<Option<DuplexStream>>,
}

impl DuplexConnector {
    pub fn new(name: impl Into<String>, stream: DuplexStream) -> Self {
        Self {
            name: name.into(),
            stream: Mutex::new(Some(stream)),
        }
    }

    /// Two connectors wired to each other.
    pub fn pair(a: &str, b: &str, max_buf_size: usize) -> (Self, Self) {
        let (left, right) = tokio::io::duplex(max_buf_size);
        (Self::new(b, left), Self::new(a, right))
    }
}

#[async_trait]
impl Connector for DuplexConnector {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn connect(&self) -> io::Result<(LinkReader, LinkWriter)> {
        let stream = self.stream.lock().take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::ConnectionRefused, "stream already used")
        })?;
        let (reader, writer) = tokio::io::split(stream);
        Ok((Box::new(reader), Box::new(writer)))
    }
}

#[cfg(feature = "rfcomm")]
pub use rfcomm::RfcommConnector;

#[cfg(feature = "rfcomm")]
mod rfcomm {
    use super::*;
    use bluer::rfcomm::{SocketAddr, Stream};
    use bluer::Address;

    /// Direct RFCOMM (SPP) client connection through BlueZ.
    pub struct RfcommConnector {
        address: Address,
        channel: u8,
    }

    impl RfcommConnector {
        pub fn new(address: Address, channel: u8) -> Self {
            Self { address, channel }
        }
    }

    #[async_trait]
    impl Connector for RfcommConnector {
        fn name(&self) -> String {
            self.address.to_string()
        }

        async fn connect(&self) -> io::Result<(LinkReader, LinkWriter)> {
            info!(
                "Connecting RFCOMM to {} channel {}",
                self.address, self.channel
            );
            let stream = Stream::connect(SocketAddr::new(self.address, self.channel)).await?;
            let (reader, writer) = stream.into_split();
            Ok((Box::new(reader), Box::new(writer)))
        }
    }
}

/// Test connector: reads never complete and every write fails.
#[cfg(test)]
pub(crate) struct BrokenPipeConnector {
    idle: Mutex<Option<DuplexStream>>,
}

#[cfg(test)]
impl BrokenPipeConnector {
    /// The returned stream must be kept alive or reads end immediately.
    pub(crate) fn new() -> (Self, DuplexStream) {
        let (ours, theirs) = tokio::io::duplex(64);
        (
            Self {
                idle: Mutex::new(Some(ours)),
            },
            theirs,
        )
    }
}

#[cfg(test)]
struct BrokenWriter;

#[cfg(test)]
impl AsyncWrite for BrokenWriter {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        _buf: &[u8],
    ) -> std::task::Poll<io::Result<usize>> {
        std::task::Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe")))
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
#[async_trait]
impl Connector for BrokenPipeConnector {
    fn name(&self) -> String {
        "broken".to_string()
    }

    async fn connect(&self) -> io::Result<(LinkReader, LinkWriter)> {
        let stream = self.idle.lock().take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::ConnectionRefused, "stream already used")
        })?;
        let (reader, _) = tokio::io::split(stream);
        Ok((Box::new(reader), Box::new(BrokenWriter)))
    }
}
