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


//! NavGuard serial link.
//!
//! Emergency messaging between two devices over a point-to-point Bluetooth
//! serial stream: the pipe-delimited wire format, per-message delivery
//! tracking, and the relay that delivers connection events to whichever
//! listener the UI has attached.

pub mod bluetooth;
pub mod bus;
pub mod chat;
pub mod config;
pub mod events;
pub mod state;
pub mod storage;
