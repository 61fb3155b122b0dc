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


//! Configuration module.
//!
//! Handles loading and saving application settings.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const APP_DIR: &str = "navguard";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for the chat database.
    #[serde(skip)]
    pub data_dir: PathBuf,

    /// Serial link settings.
    pub link: LinkConfig,

    /// Conversation settings.
    pub chat: ChatConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial device node bound to the peer, e.g. with `rfcomm bind`.
    pub device_path: PathBuf,

    /// Peer Bluetooth address for a direct RFCOMM connection.
    /// Takes precedence over `device_path` when the `rfcomm` feature is on.
    pub address: Option<String>,

    /// RFCOMM channel.
    pub channel: u8,

    /// Conversation key override. Defaults to the connector's name.
    pub peer_id: Option<String>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device_path: PathBuf::from("/dev/rfcomm0"),
            address: None,
            channel: 1,
            peer_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Keep conversations in SQLite; otherwise they live in memory only.
    pub persist: bool,

    /// Messages kept per peer.
    pub max_messages: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            persist: true,
            max_messages: 5000,
        }
    }
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

impl Config {
    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        let config_dir = config_dir();
        std::fs::create_dir_all(&config_dir)?;

        let mut config = Self::load_from(&config_dir.join("config.toml"))?;

        config.data_dir = data_dir();
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(config)
    }

    /// Load from `path`, writing the defaults there if it does not exist.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            std::fs::write(path, toml::to_string_pretty(&config)?)?;
            Ok(config)
        }
    }
}
