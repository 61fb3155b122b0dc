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

//! The single UI-owning execution context.
//!
//! Listener callbacks, `attach` and `detach` all run here. Other threads
//! hand work over with [`UiContext::post`]; jobs run one at a time in the
//! order they were posted.

use anyhow::Result;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, warn};

/// Unit of work marshaled onto the UI context.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A serial executor that owns listener delivery.
pub trait UiContext: Send + Sync {
    /// Queue a job. Must not block and must not run the job inline.
    fn post(&self, job: Job);

    /// Whether the caller is running on this context.
    fn is_current(&self) -> bool;
}

/// Dedicated thread draining a job channel.
pub struct UiLoop {
    tx: async_channel::Sender<Job>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl UiLoop {
    /// Start the loop on a new named thread.
    pub fn spawn(name: &str) -> Result<Arc<Self>> {
        let (tx, rx) = async_channel::unbounded::<Job>();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv_blocking() {
                    job();
                }
                debug!("UI loop finished");
            })?;

        Ok(Arc::new(Self {
            tx,
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        }))
    }

    /// Convenience wrapper around [`UiContext::post`].
    pub fn run<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.post(Box::new(f));
    }

    /// Stop accepting jobs and wait for queued ones to finish.
    pub fn shutdown(&self) {
        self.tx.close();
        if let Some(handle) = self.handle.lock().take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("UI loop panicked");
            }
        }
    }
}

impl UiContext for UiLoop {
    fn post(&self, job: Job) {
        if self.tx.try_send(job).is_err() {
            warn!("UI loop closed, dropping job");
        }
    }

    fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

/// Context pumped by a host event loop.
///
/// The thread that creates it owns it; jobs run only when that thread
/// calls [`ManualContext::run_pending`].
pub struct ManualContext {
    jobs: Mutex<VecDeque<Job>>,
    owner: ThreadId,
}

impl ManualContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            jobs: Mutex::new(VecDeque::new()),
            owner: thread::current().id(),
        })
    }

    /// Number of jobs waiting.
    pub fn pending(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Run one queued job. Returns false if none was queued.
    pub fn run_one(&self) -> bool {
        // Pop before running so a job may post more jobs.
        let job = self.jobs.lock().pop_front();
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Run jobs until the queue is empty, including ones posted meanwhile.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }
}

impl UiContext for ManualContext {
    fn post(&self, job: Job) {
        self.jobs.lock().push_back(job);
    }

    fn is_current(&self) -> bool {
        thread::current().id() == self.owner
    }
}
