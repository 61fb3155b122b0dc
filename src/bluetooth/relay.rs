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

//! Listener relay between the I/O context and the UI context.
//!
//! The background connection keeps producing events while no listener is
//! attached. Events are never dropped or reordered:
//!
//! - attached: the event is posted to the UI context and delivered there;
//! - posted while attached but run after a detach: it goes to `pre_attach`;
//! - produced while detached: it goes to `post_detach`.
//!
//! `attach` replays `pre_attach` then `post_detach`. Both queues are needed;
//! with a single queue a posted event could land behind one produced later.
//!
//! Reads are coalesced: only the first chunk since the last drain posts a
//! job, and that job delivers everything accumulated by the time it runs.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::dispatch::UiContext;
use super::session::SessionError;

/// Callbacks received on the UI context.
pub trait SerialListener: Send + Sync {
    fn on_connect(&self);
    fn on_connect_error(&self, reason: &str);
    /// One or more coalesced reads, concatenated in arrival order.
    fn on_read(&self, data: &[u8]);
    fn on_io_error(&self, reason: &str);
}

/// An event waiting for, or on its way to, a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Connected,
    ConnectError(String),
    DataReceived(Vec<u8>),
    IoError(String),
}

impl RelayEvent {
    fn deliver_to(self, listener: &dyn SerialListener) {
        match self {
            Self::Connected => listener.on_connect(),
            Self::ConnectError(reason) => listener.on_connect_error(&reason),
            Self::DataReceived(data) => listener.on_read(&data),
            Self::IoError(reason) => listener.on_io_error(&reason),
        }
    }
}

struct RelayState {
    listener: Option<Arc<dyn SerialListener>>,
    pre_attach: VecDeque<RelayEvent>,
    post_detach: VecDeque<RelayEvent>,
    /// Events are accepted only while a connection is open.
    open: bool,
}

#[derive(Default)]
struct PendingRead {
    data: Vec<u8>,
    scheduled: bool,
}

/// Multiplexes one background connection onto at most one listener.
pub struct ListenerRelay {
    ui: Arc<dyn UiContext>,
    state: Mutex<RelayState>,
    /// Separate from `state` so producers never wait behind delivery.
    pending: Mutex<PendingRead>,
}

impl ListenerRelay {
    pub fn new(ui: Arc<dyn UiContext>) -> Arc<Self> {
        Arc::new(Self {
            ui,
            state: Mutex::new(RelayState {
                listener: None,
                pre_attach: VecDeque::new(),
                post_detach: VecDeque::new(),
                open: false,
            }),
            pending: Mutex::new(PendingRead::default()),
        })
    }

    /// Install `listener`, first replaying every queued event to it.
    ///
    /// Must be called on the UI context.
    pub fn attach(&self, listener: Arc<dyn SerialListener>) -> Result<(), SessionError> {
        if !self.ui.is_current() {
            return Err(SessionError::NotOnUiContext);
        }

        // Installing under the lock stops new events landing in post_detach.
        // pre_attach is only written on the UI context, which we occupy.
        let (pre_attach, post_detach) = {
            let mut state = self.state.lock();
            if state.listener.is_some() {
                warn!("Replacing attached listener");
            }
            state.listener = Some(listener.clone());
            (
                std::mem::take(&mut state.pre_attach),
                std::mem::take(&mut state.post_detach),
            )
        };

        let replayed = pre_attach.len() + post_detach.len();
        if replayed > 0 {
            debug!("Replaying {} queued event(s)", replayed);
        }
        for event in pre_attach.into_iter().chain(post_detach) {
            event.deliver_to(listener.as_ref());
        }
        Ok(())
    }

    /// Stop delivering. Later events are queued until the next attach.
    ///
    /// Must be called on the UI context.
    pub fn detach(&self) -> Result<(), SessionError> {
        if !self.ui.is_current() {
            return Err(SessionError::NotOnUiContext);
        }
        self.state.lock().listener = None;
        Ok(())
    }

    pub fn is_attached(&self) -> bool {
        self.state.lock().listener.is_some()
    }

    /// Number of events waiting for a listener.
    pub fn queued(&self) -> usize {
        let state = self.state.lock();
        state.pre_attach.len() + state.post_detach.len()
    }

    /// Start accepting events for a new connection.
    pub(crate) fn open(&self) {
        self.state.lock().open = true;
    }

    /// Ignore events from here on. Queued events are kept.
    pub(crate) fn close(&self) {
        self.state.lock().open = false;
    }

    pub fn on_connect(self: &Arc<Self>) {
        self.dispatch(RelayEvent::Connected);
    }

    pub fn on_connect_error(self: &Arc<Self>, reason: impl Into<String>) {
        self.dispatch(RelayEvent::ConnectError(reason.into()));
    }

    pub fn on_io_error(self: &Arc<Self>, reason: impl Into<String>) {
        self.dispatch(RelayEvent::IoError(reason.into()));
    }

    /// Feed one chunk read from the transport.
    pub fn on_read(self: &Arc<Self>, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }

        let mut state = self.state.lock();
        if !state.open {
            trace!("Dropping {} byte(s) read while closed", chunk.len());
            return;
        }

        if state.listener.is_some() {
            let first = {
                let mut pending = self.pending.lock();
                pending.data.extend_from_slice(chunk);
                !std::mem::replace(&mut pending.scheduled, true)
            };
            if first {
                let relay = Arc::clone(self);
                self.ui.post(Box::new(move || relay.drain_pending()));
            }
        } else {
            match state.post_detach.back_mut() {
                Some(RelayEvent::DataReceived(data)) => data.extend_from_slice(chunk),
                _ => state
                    .post_detach
                    .push_back(RelayEvent::DataReceived(chunk.to_vec())),
            }
        }
    }

    fn dispatch(self: &Arc<Self>, event: RelayEvent) {
        let mut state = self.state.lock();
        if !state.open {
            trace!("Dropping {:?} while closed", event);
            return;
        }

        if state.listener.is_some() {
            let relay = Arc::clone(self);
            self.ui.post(Box::new(move || relay.deliver(event)));
        } else {
            state.post_detach.push_back(event);
        }
    }

    /// Runs on the UI context.
    fn drain_pending(&self) {
        let data = {
            let mut pending = self.pending.lock();
            pending.scheduled = false;
            std::mem::take(&mut pending.data)
        };
        if !data.is_empty() {
            self.deliver(RelayEvent::DataReceived(data));
        }
    }

    /// Runs on the UI context. The listener may have been detached since
    /// the job was posted; then the event waits in `pre_attach`.
    fn deliver(&self, event: RelayEvent) {
        let listener = {
            let mut state = self.state.lock();
            match &state.listener {
                Some(listener) => Arc::clone(listener),
                None => {
                    state.pre_attach.push_back(event);
                    return;
                }
            }
        };
        event.deliver_to(listener.as_ref());
    }
}
