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


//! Publish/subscribe channel for raw incoming text.
//!
//! Screens other than the attached chat listener (e.g. a direction finder)
//! subscribe here. There is no replay: a subscriber only sees lines
//! published after it subscribed.

use tokio::sync::broadcast;
use tracing::trace;

/// Lines buffered per subscriber before the slowest one starts lagging.
pub const BUS_CAPACITY: usize = 64;

/// Broadcast of every received chunk as text.
#[derive(Clone)]
pub struct FrameBus {
    tx: broadcast::Sender<String>,
}

impl FrameBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Publish without blocking. Lines with no subscriber are dropped.
    pub fn publish(&self, line: &str) {
        if self.tx.send(line.to_string()).is_err() {
            trace!("No bus subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for FrameBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_replay() {
        let bus = FrameBus::new();
        bus.publish("before");

        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        bus.publish("after");
        assert_eq!(rx.recv().await.unwrap(), "after");
    }

    #[tokio::test]
    async fn test_every_subscriber_gets_each_line() {
        let bus = FrameBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish("ACK|AB12|2");
        assert_eq!(a.recv().await.unwrap(), "ACK|AB12|2");
        assert_eq!(b.recv().await.unwrap(), "ACK|AB12|2");
    }
}
