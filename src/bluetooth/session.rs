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

//! Connection lifecycle of one byte stream.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use std::io;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

use super::relay::ListenerRelay;
use super::transport::{Connector, LinkReader, LinkWriter};
use crate::bus::FrameBus;

/// Read buffer size per transport read.
const READ_BUFFER_SIZE: usize = 1024;

/// Writes waiting for the writer task.
const WRITE_QUEUE_DEPTH: usize = 32;

/// A write that has not completed by then fails the link.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors surfaced synchronously to callers.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not connected")]
    NotConnected,
    #[error("already connected")]
    AlreadyConnected,
    #[error("connection closed")]
    Closed,
    #[error("must be called on the UI context")]
    NotOnUiContext,
    #[error("write failed: {0}")]
    Io(String),
}

/// One frame for the writer task, plus where to report the outcome.
struct WriteRequest {
    data: Vec<u8>,
    reply: async_channel::Sender<io::Result<()>>,
}

struct ActiveLink {
    id: u64,
    name: String,
    /// Set once the stream is up; writes fail until then.
    established: Arc<AtomicBool>,
    /// Cleared on teardown so a finishing task stays silent.
    alive: Arc<AtomicBool>,
    writer_tx: Option<async_channel::Sender<WriteRequest>>,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    relay: Arc<ListenerRelay>,
    bus: FrameBus,
    runtime: Handle,
    link: Mutex<Option<ActiveLink>>,
    next_id: AtomicU64,
}

/// Owns one connect/read/write byte stream and feeds the relay.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct TransportSession {
    inner: Arc<Inner>,
}

impl TransportSession {
    /// Create a session. I/O tasks are spawned on `runtime`.
    pub fn new(relay: Arc<ListenerRelay>, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                relay,
                bus: FrameBus::new(),
                runtime,
                link: Mutex::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn relay(&self) -> &Arc<ListenerRelay> {
        &self.inner.relay
    }

    /// Raw incoming text, for components other than the attached listener.
    pub fn bus(&self) -> &FrameBus {
        &self.inner.bus
    }

    /// Whether the stream is established and writable.
    pub fn is_connected(&self) -> bool {
        self.inner
            .link
            .lock()
            .as_ref()
            .map(|link| link.established.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Name of the current peer, if any connection is in progress or up.
    pub fn peer_name(&self) -> Option<String> {
        self.inner.link.lock().as_ref().map(|link| link.name.clone())
    }

    /// Start connecting in the background.
    ///
    /// Success arrives as `Connected` on the relay, failure as
    /// `ConnectError`, which also tears the session down.
    pub fn connect(&self, connector: Arc<dyn Connector>) -> Result<(), SessionError> {
        let mut link = self.inner.link.lock();
        if link.is_some() {
            return Err(SessionError::AlreadyConnected);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let name = connector.name();
        let established = Arc::new(AtomicBool::new(false));
        let alive = Arc::new(AtomicBool::new(true));
        let (writer_tx, writer_rx) = async_channel::bounded(WRITE_QUEUE_DEPTH);

        info!("Connecting to {}", name);
        self.inner.relay.open();

        let task = self.inner.runtime.spawn(run_link(
            Arc::downgrade(&self.inner),
            id,
            connector,
            established.clone(),
            alive.clone(),
            writer_rx,
        ));

        *link = Some(ActiveLink {
            id,
            name,
            established,
            alive,
            writer_tx: Some(writer_tx),
            task: Some(task),
        });
        Ok(())
    }

    /// Close the connection. Calling it again is a no-op.
    pub fn disconnect(&self) {
        match self.inner.link.lock().take() {
            Some(link) => {
                info!("Disconnecting from {}", link.name);
                self.inner.teardown(link);
            }
            None => debug!("Disconnect while not connected"),
        }
    }

    /// Write one frame and wait until the transport has taken it.
    ///
    /// Fails fast when not connected; nothing is buffered or retried. An
    /// I/O failure is returned here and also ends the link with an
    /// `IoError` on the relay.
    ///
    /// Blocks the calling thread, so it must not run on the only thread of
    /// a current-thread runtime that also drives the link.
    pub fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        let (reply, outcome) = async_channel::bounded(1);
        {
            let link = self.inner.link.lock();
            let link = link.as_ref().ok_or(SessionError::NotConnected)?;
            if !link.established.load(Ordering::SeqCst) {
                return Err(SessionError::NotConnected);
            }
            let tx = link.writer_tx.as_ref().ok_or(SessionError::Closed)?;
            let request = WriteRequest {
                data: data.to_vec(),
                reply,
            };
            tx.try_send(request).map_err(|e| match e {
                async_channel::TrySendError::Full(_) => {
                    SessionError::Io("write queue full".to_string())
                }
                async_channel::TrySendError::Closed(_) => SessionError::Closed,
            })?;
            trace!("Queued {} byte(s) for {}", data.len(), link.name);
        }

        match outcome.recv_blocking() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SessionError::Io(e.to_string())),
            // The link was torn down before the write ran.
            Err(_) => Err(SessionError::Closed),
        }
    }
}

impl Inner {
    fn teardown(&self, mut link: ActiveLink) {
        link.alive.store(false, Ordering::SeqCst);
        link.established.store(false, Ordering::SeqCst);
        self.relay.close();
        // Dropping the sender ends the writer loop.
        link.writer_tx.take();
        if let Some(task) = link.task.take() {
            task.abort();
        }
    }

    /// Tear down link `id` if it is still the current one.
    fn teardown_if_current(&self, id: u64) {
        let mut slot = self.link.lock();
        if slot.as_ref().map(|link| link.id) == Some(id) {
            if let Some(link) = slot.take() {
                debug!("Tearing down link to {}", link.name);
                self.teardown(link);
            }
        }
    }
}

/// Connect, then pump reads and writes until either side fails.
async fn run_link(
    inner: std::sync::Weak<Inner>,
    id: u64,
    connector: Arc<dyn Connector>,
    established: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    writer_rx: async_channel::Receiver<WriteRequest>,
) {
    let name = connector.name();

    let (reader, writer) = match connector.connect().await {
        Ok(halves) => halves,
        Err(e) => {
            error!("Connection to {} failed: {}", name, e);
            if let Some(inner) = inner.upgrade() {
                if alive.load(Ordering::SeqCst) {
                    inner.relay.on_connect_error(e.to_string());
                }
                inner.teardown_if_current(id);
            }
            return;
        }
    };

    {
        let Some(session) = inner.upgrade() else {
            return;
        };
        if !alive.load(Ordering::SeqCst) {
            return;
        }
        established.store(true, Ordering::SeqCst);
        info!("Connected to {}", name);
        session.relay.on_connect();
    }

    let reason = tokio::select! {
        reason = read_loop(&inner, reader, &alive) => reason,
        reason = write_loop(writer, writer_rx) => reason,
    };

    if let Some(reason) = reason {
        error!("Connection to {} lost: {}", name, reason);
        if let Some(inner) = inner.upgrade() {
            if alive.load(Ordering::SeqCst) {
                inner.relay.on_io_error(reason);
            }
            inner.teardown_if_current(id);
        }
    }
}

/// Returns the failure reason, or `None` when the session went away.
async fn read_loop(
    inner: &std::sync::Weak<Inner>,
    mut reader: LinkReader,
    alive: &AtomicBool,
) -> Option<String> {
    let mut buffer = [0u8; READ_BUFFER_SIZE];
    loop {
        let len = match reader.read(&mut buffer).await {
            Ok(0) => return Some("connection closed by peer".to_string()),
            Ok(len) => len,
            Err(e) => return Some(e.to_string()),
        };

        let inner = inner.upgrade()?;
        if !alive.load(Ordering::SeqCst) {
            return None;
        }
        let chunk = &buffer[..len];
        trace!("Read {} byte(s): {}", len, hex::encode(chunk));
        inner.bus.publish(&String::from_utf8_lossy(chunk));
        inner.relay.on_read(chunk);
    }
}

/// Returns the failure reason, or `None` once the session drops its sender.
///
/// Every request gets its outcome back before the next one is taken.
async fn write_loop(
    mut writer: LinkWriter,
    writer_rx: async_channel::Receiver<WriteRequest>,
) -> Option<String> {
    while let Ok(request) = writer_rx.recv().await {
        let result = match tokio::time::timeout(WRITE_TIMEOUT, async {
            writer.write_all(&request.data).await?;
            writer.flush().await
        })
        .await
        {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out")),
        };

        let failure = result.as_ref().err().map(|e| e.to_string());
        // The caller may have given up; the link state is what matters.
        let _ = request.reply.try_send(result);
        if failure.is_some() {
            return failure;
        }
    }
    let _ = writer.shutdown().await;
    None
}
