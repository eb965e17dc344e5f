//! Subscribe to a public stream and print ten messages
//!
//! ```text
//! cargo run --example basic_client -- wss://fstream.binance.com/ws
//! ```

use rust_ws::{PingMode, WebSocket, WebSocketConfig};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

fn main() {
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "wss://fstream.binance.com/ws".to_string());

    let mut config = WebSocketConfig::new(&url);
    config.ping.mode = PingMode::Opcode;
    config.ping.interval_ms = 15_000;
    config.auto_reconnect = true;

    let ws = WebSocket::new(config);
    let (done_tx, done_rx) = mpsc::channel();
    let done_tx = Mutex::new(done_tx);
    let received = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&received);
    ws.on_message(move |value| {
        let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
        println!("[{n}] {value}");
        if n == 10 {
            let _ = done_tx.lock().map(|tx| tx.send(()));
        }
    });
    ws.on_error(|code, message| eprintln!("error {code}: {message}"));
    ws.on_disconnect(|code| println!("disconnected ({code})"));

    println!("Connecting to {url}...");
    if !ws.connect() {
        eprintln!("connect failed");
        return;
    }
    println!("Connected!");

    let subscribe = json!({
        "method": "SUBSCRIBE",
        "params": ["btcusdt@bookTicker"],
        "id": 1
    });
    ws.send_json(&subscribe);

    if done_rx.recv_timeout(Duration::from_secs(30)).is_err() {
        println!("Timed out waiting for messages");
    }

    let stats = ws.stats();
    println!(
        "frames in {} / out {}, {:.1} msg/s",
        stats.frames_received, stats.frames_sent, stats.message_rate
    );
    ws.disconnect();
}
