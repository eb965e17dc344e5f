//! Command-line WebSocket client
//!
//! Connects to `websocket.url` from config.toml (or the first argument),
//! prints inbound messages and forwards stdin lines as text frames.
//!
//! ```text
//! rust-ws wss://stream.example.com/ws
//! CONFIG_PATH=prod.toml rust-ws
//! ```

use anyhow::{bail, Context, Result};
use rust_ws::infrastructure::logging::init_logging;
use rust_ws::{CloseCode, Config, WebSocket};
use std::io::BufRead;
use std::time::{Duration, Instant};

fn main() -> Result<()> {
    let mut config = Config::load().context("loading configuration")?;
    if let Some(url) = std::env::args().nth(1) {
        config.websocket.url = url;
    }
    if config.websocket.url.is_empty() {
        bail!("no URL: pass one as the first argument or set websocket.url");
    }

    // Guards flush the non-blocking writers on exit
    let _guards = init_logging(&config.logging).context("initializing logging")?;

    let ws = WebSocket::new(config.websocket);
    ws.on_connect(|| tracing::info!("Session open"));
    ws.on_raw_message(|text| println!("{text}"));
    ws.on_binary(|data| println!("<{} binary bytes>", data.len()));
    ws.on_error(|code, message| eprintln!("error {}: {message}", code));
    ws.on_disconnect(|code| eprintln!("disconnected ({code})"));

    if !ws.connect() {
        bail!("failed to connect to {}", ws.url());
    }

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("reading stdin")?;
        if line.is_empty() {
            continue;
        }
        ws.send_async(line);
    }

    // Let the I/O thread drain queued lines
    let deadline = Instant::now() + Duration::from_secs(2);
    while ws.pending_async() > 0 && ws.is_connected() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }

    let stats = ws.stats();
    tracing::info!(
        sent = stats.frames_sent,
        received = stats.messages_received,
        reconnects = stats.reconnects,
        "Shutting down"
    );
    ws.disconnect_with(CloseCode::Normal.as_u16());
    Ok(())
}
