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


//! NavGuard link terminal front-end.
//!
//! Connects to the peer, prints the conversation and reads commands from
//! stdin. Anything that is not a command is sent as a regular message.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use navguard_link::bluetooth::{
    Connector, DeviceFileConnector, ListenerRelay, SerialListener, TransportSession, UiLoop,
};
use navguard_link::chat::{MessageDisplay, MessageKind};
use navguard_link::config::Config;
use navguard_link::events::{ChatController, ChatEvent};
use navguard_link::state::LinkState;
use navguard_link::storage::{ChatSink, ChatStore, MemoryStore};

const HELP: &str = "commands: /sos TEXT, /emergency TEXT, /read ID, /loc LAT LON, \
/stoploc, /history, /clear, /export [FILE], /quit";

const EXPORT_FILE: &str = "navguard-chat.json";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("navguard_link=info".parse()?),
        )
        .init();

    info!("Starting NavGuard link v{}...", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    info!("Configuration loaded");

    let connector = create_connector(&config)?;
    let peer_id = config
        .link
        .peer_id
        .clone()
        .unwrap_or_else(|| connector.peer_id());

    // Initialize storage
    let store = if config.chat.persist {
        let mut store = ChatStore::new(&config.data_dir)?;
        store.set_max_messages(config.chat.max_messages);
        Some(Arc::new(store))
    } else {
        None
    };
    let sink: Arc<dyn ChatSink> = match &store {
        Some(store) => store.clone() as Arc<dyn ChatSink>,
        None => Arc::new(MemoryStore::new()),
    };

    let ui = UiLoop::spawn("navguard-ui")?;
    let relay = ListenerRelay::new(ui.clone());
    let session = TransportSession::new(relay.clone(), Handle::current());
    let state = LinkState::new();

    let (controller, mut events) = ChatController::new(session.clone(), state, &peer_id, sink);
    for entry in controller.messages() {
        print_entry(&entry);
    }

    let listener: Arc<dyn SerialListener> = controller.clone();
    let attach_relay = relay.clone();
    ui.run(move || {
        if let Err(e) = attach_relay.attach(listener) {
            error!("Failed to attach listener: {}", e);
        }
    });

    let mut raw = session.bus().subscribe();
    tokio::spawn(async move {
        loop {
            match raw.recv().await {
                Ok(line) => debug!("<< {}", line),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    debug!("Raw log skipped {} line(s)", n)
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    controller.connect(connector)?;
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if !handle_line(&controller, store.as_deref(), &line) {
                            break;
                        }
                    }
                    None => break,
                }
            }
            Some(event) = events.recv() => print_event(&event),
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    controller.disconnect();
    let detach_relay = relay.clone();
    ui.run(move || {
        if let Err(e) = detach_relay.detach() {
            warn!("Failed to detach listener: {}", e);
        }
    });
    ui.shutdown();

    info!("NavGuard link stopped");
    Ok(())
}

#[cfg(feature = "rfcomm")]
fn create_connector(config: &Config) -> Result<Arc<dyn Connector>> {
    if let Some(address) = &config.link.address {
        let address: bluer::Address = address
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid address {}: {}", address, e))?;
        return Ok(Arc::new(navguard_link::bluetooth::RfcommConnector::new(
            address,
            config.link.channel,
        )));
    }
    Ok(Arc::new(DeviceFileConnector::new(&config.link.device_path)))
}

#[cfg(not(feature = "rfcomm"))]
fn create_connector(config: &Config) -> Result<Arc<dyn Connector>> {
    if config.link.address.is_some() {
        warn!(
            "Built without RFCOMM support, using {:?}",
            config.link.device_path
        );
    }
    Ok(Arc::new(DeviceFileConnector::new(&config.link.device_path)))
}

/// Handle one line of input. Returns false to quit.
fn handle_line(controller: &ChatController, store: Option<&ChatStore>, line: &str) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return true;
    }

    let (command, rest) = match line.split_once(' ') {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    match command {
        "/quit" => return false,
        "/help" => println!("{}", HELP),
        "/sos" => send(controller, MessageKind::Sos, rest),
        "/emergency" => send(controller, MessageKind::Emergency, rest),
        "/read" => {
            if !controller.mark_read(rest) {
                println!("no received message {}", rest);
            }
        }
        "/loc" => match parse_location(rest) {
            Some((lat, lon)) => {
                if let Err(e) = controller.send_location_update(lat, lon) {
                    println!("location not sent: {}", e);
                }
            }
            None => println!("usage: /loc LAT LON"),
        },
        "/stoploc" => {
            if let Err(e) = controller.stop_location_sharing() {
                println!("stop not sent: {}", e);
            }
        }
        "/history" => {
            for entry in controller.messages() {
                print_entry(&entry);
            }
        }
        "/clear" => controller.clear_history(),
        "/export" => match store {
            Some(store) => {
                let path = if rest.is_empty() { EXPORT_FILE } else { rest };
                match store.export_json(&controller.peer_id(), Path::new(path)) {
                    Ok(()) => println!("exported to {}", path),
                    Err(e) => println!("export failed: {}", e),
                }
            }
            None => println!("persistence is disabled"),
        },
        _ if command.starts_with('/') => println!("{}", HELP),
        _ => send(controller, MessageKind::Regular, line),
    }
    true
}

fn send(controller: &ChatController, kind: MessageKind, content: &str) {
    match controller.send_message(kind, content, None) {
        Ok(message) => print_entry(&MessageDisplay::outgoing(message)),
        Err(e) => println!("not sent: {}", e),
    }
}

fn parse_location(args: &str) -> Option<(f64, f64)> {
    let mut parts = args.split_whitespace();
    let lat = parts.next()?.parse().ok()?;
    let lon = parts.next()?.parse().ok()?;
    Some((lat, lon))
}

fn print_entry(entry: &MessageDisplay) {
    let direction = if entry.is_sent { ">>" } else { "<<" };
    let msg = &entry.message;
    let mut line = format!(
        "{} [{}] {} {} {}",
        direction,
        msg.formatted_timestamp(),
        msg.id,
        msg.kind.as_str(),
        msg.content
    );
    if let Some(url) = msg.maps_url() {
        line.push_str(&format!(" ({})", url));
    }
    if entry.is_sent {
        line.push_str(&format!(" {}", msg.status.symbol()));
    }
    println!("{}", line);
}

fn print_event(event: &ChatEvent) {
    match event {
        ChatEvent::Connected { peer } => println!("-- connected to {}", peer),
        ChatEvent::ConnectFailed(reason) => println!("-- connection failed: {}", reason),
        ChatEvent::ConnectionLost(reason) => println!("-- connection lost: {}", reason),
        ChatEvent::MessageReceived(message) => {
            print_entry(&MessageDisplay::incoming(message.clone()))
        }
        ChatEvent::StatusChanged { id, status, updated } if *updated > 0 => {
            println!("-- {} {}", id, status.description())
        }
        ChatEvent::StatusChanged { .. } => {}
        ChatEvent::LiveLocation { latitude, longitude } => {
            println!("-- peer at {:.6}, {:.6}", latitude, longitude)
        }
        ChatEvent::LiveLocationStopped => println!("-- peer stopped sharing location"),
    }
}
