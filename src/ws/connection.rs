//! WebSocket connection state machine
//!
//! One `WebSocket` owns:
//! - a blocking I/O thread (`ws-io`) that reads, decodes and dispatches
//!   inbound frames, drains the async send queue and reconnects
//! - a heartbeat timer thread
//! - a send lock serializing direct sends from any thread
//!
//! All inbound callbacks run on the I/O thread.

use bytes::BytesMut;
use parking_lot::{Mutex, MutexGuard, RwLock};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::core::{close_payload, CloseCode, Endpoint, FrameCodec, FrameHeader, Opcode};
use crate::infrastructure::affinity;
use crate::infrastructure::config::{PingMode, WebSocketConfig};
use crate::infrastructure::metrics::{ConnectionStats, StatsSnapshot};
use crate::infrastructure::pool::BufferPool;
use crate::infrastructure::queue::OutboundQueue;
use crate::ws::dispatch::{Handlers, Inbound, MessageAssembler};
use crate::ws::handshake;
use crate::ws::ping::{HeartbeatManager, PingHooks};
use crate::ws::reconnect::{ReconnectPolicy, StopSignal};
use crate::ws::transport::{Connector, ReadOutcome, TcpConnector, Transport};
use crate::{ErrorCode, WsError};

/// Read scratch buffers per connection
const SCRATCH_SIZE: usize = 8 * 1024;
const SCRATCH_COUNT: usize = 8;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Resolving,
    TransportConnecting,
    TlsHandshake,
    WsHandshake,
    /// The only state in which sends are delivered
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    #[inline(always)]
    pub fn is_open(self) -> bool {
        self == ConnectionState::Open
    }

    /// Connect sequence in progress
    #[inline]
    pub fn is_connecting(self) -> bool {
        matches!(
            self,
            ConnectionState::Resolving
                | ConnectionState::TransportConnecting
                | ConnectionState::TlsHandshake
                | ConnectionState::WsHandshake
        )
    }
}

/// How a session on the I/O thread ended
enum SessionEnd {
    /// `disconnect()` was called
    Stopped,
    /// Server sent a close frame with this code
    PeerClosed(u16),
    /// Transport or protocol failure; `None` when already reported
    Failed(Option<WsError>),
}

/// Send-side state guarded by the send lock
struct FrameWriter {
    rng: SmallRng,
    buf: BytesMut,
}

struct Shared {
    config: WebSocketConfig,
    codec: FrameCodec,
    connector: Arc<dyn Connector>,
    endpoint: Mutex<Option<Endpoint>>,
    state: RwLock<ConnectionState>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    writer: Mutex<FrameWriter>,
    callbacks: Mutex<Handlers>,
    outbound: OutboundQueue<String>,
    heartbeat: HeartbeatManager,
    buffers: BufferPool,
    reconnect: Mutex<ReconnectPolicy>,
    auto_reconnect: AtomicBool,
    auto_pong: AtomicBool,
    close_on_timeout: AtomicBool,
    connected: AtomicBool,
    /// Transport shut down locally after a send failure
    aborted: AtomicBool,
    pinned_core: Mutex<Option<usize>>,
    /// Serializes `connect()` callers
    connecting: Mutex<()>,
    stop: StopSignal,
    io_thread: Mutex<Option<JoinHandle<()>>>,
    stats: ConnectionStats,
}

/// Thread-safe WebSocket client
///
/// # Example
/// ```no_run
/// use rust_ws::WebSocket;
///
/// let ws = WebSocket::with_url("wss://stream.example.com/ws");
/// ws.on_raw_message(|text| println!("{text}"));
/// if ws.connect() {
///     ws.send(r#"{"op":"subscribe","args":["trades"]}"#);
///     ws.wait();
/// }
/// ```
pub struct WebSocket {
    shared: Arc<Shared>,
}

impl WebSocket {
    pub fn new(config: WebSocketConfig) -> Self {
        Self::with_connector(config, Arc::new(TcpConnector::new()))
    }

    /// Default configuration for `url`
    pub fn with_url(url: impl Into<String>) -> Self {
        Self::new(WebSocketConfig::new(url))
    }

    /// Use a custom transport factory
    pub fn with_connector(config: WebSocketConfig, connector: Arc<dyn Connector>) -> Self {
        let shared = Shared {
            codec: FrameCodec::new(config.max_message_size),
            connector,
            endpoint: Mutex::new(None),
            state: RwLock::new(ConnectionState::Disconnected),
            transport: RwLock::new(None),
            writer: Mutex::new(FrameWriter {
                rng: SmallRng::from_entropy(),
                buf: BytesMut::with_capacity(SCRATCH_SIZE),
            }),
            callbacks: Mutex::new(Handlers::default()),
            outbound: OutboundQueue::new(),
            heartbeat: HeartbeatManager::from_config(&config.ping),
            buffers: BufferPool::new(SCRATCH_SIZE, SCRATCH_COUNT),
            reconnect: Mutex::new(ReconnectPolicy::new(
                config.max_reconnect_attempts,
                config.reconnect_delay(),
            )),
            auto_reconnect: AtomicBool::new(config.auto_reconnect),
            auto_pong: AtomicBool::new(config.ping.auto_pong),
            close_on_timeout: AtomicBool::new(config.ping.close_on_timeout),
            connected: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            pinned_core: Mutex::new(None),
            connecting: Mutex::new(()),
            stop: StopSignal::new(),
            io_thread: Mutex::new(None),
            stats: ConnectionStats::new(),
            config,
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Connect, handshake and start the I/O thread
    ///
    /// Returns true if already open. On failure `on_error` is invoked and the
    /// state returns to `Disconnected`.
    pub fn connect(&self) -> bool {
        // Errors are reported after the connect lock is released
        let result = {
            let _connecting = self.shared.connecting.lock();
            self.connect_locked()
        };
        match result {
            Ok(opened) => opened,
            Err(e) => {
                self.shared.emit_error(&e);
                false
            }
        }
    }

    fn connect_locked(&self) -> Result<bool, WsError> {
        let shared = &self.shared;
        if shared.connected.load(Ordering::Acquire) {
            return Ok(true);
        }
        if shared.io_thread_alive() {
            tracing::debug!("Connect ignored, I/O thread still running");
            return Ok(false);
        }
        shared.join_io_thread();
        shared.stop.clear();

        let fail = |e: WsError| {
            shared.set_state(ConnectionState::Disconnected);
            e
        };

        let endpoint = Endpoint::parse(&shared.config.url).map_err(fail)?;
        *shared.endpoint.lock() = Some(endpoint.clone());

        tracing::info!(url = %endpoint, "Connecting");
        let inbound = shared.establish(&endpoint).map_err(fail)?;

        shared.open();

        let io_shared = Arc::clone(shared);
        match thread::Builder::new()
            .name("ws-io".to_string())
            .spawn(move || io_shared.io_main(inbound))
        {
            Ok(handle) => {
                *shared.io_thread.lock() = Some(handle);
                Ok(true)
            }
            Err(e) => {
                shared.connected.store(false, Ordering::Release);
                shared.heartbeat.stop();
                shared.teardown();
                Err(fail(WsError::ConnectionFailed(format!(
                    "cannot spawn I/O thread: {e}"
                ))))
            }
        }
    }

    /// Close with `Normal` (1000)
    pub fn disconnect(&self) {
        self.disconnect_with(CloseCode::Normal.as_u16());
    }

    /// Close with `code`; idempotent
    ///
    /// `on_disconnect(code)` fires only if the connection was open.
    pub fn disconnect_with(&self, code: u16) {
        let shared = &self.shared;
        shared.stop.raise();
        let was_connected = shared.connected.swap(false, Ordering::AcqRel);

        if was_connected {
            shared.set_state(ConnectionState::Closing);
            shared.write_close(code, "");
        }

        // Shut the socket before waiting on anything a stuck writer holds
        shared.teardown();
        shared.heartbeat.stop();
        shared.join_io_thread();

        // A reconnect may have completed while stopping
        let reopened = shared.connected.swap(false, Ordering::AcqRel);
        shared.heartbeat.stop();
        shared.teardown();

        if was_connected || reopened {
            shared.set_state(ConnectionState::Closed);
            tracing::info!(code, "Disconnected");
            shared.emit_disconnect(code);
        }
    }

    /// Block until the I/O thread exits
    pub fn wait(&self) {
        self.shared.join_io_thread();
    }

    /// Send a text frame; false unless open and fully written
    pub fn send(&self, text: &str) -> bool {
        self.shared.send_frame(Opcode::Text, text.as_bytes())
    }

    pub fn send_json(&self, value: &Value) -> bool {
        match serde_json::to_string(value) {
            Ok(text) => self.send(&text),
            Err(e) => {
                tracing::warn!(error = %e, "JSON serialization failed");
                false
            }
        }
    }

    pub fn send_binary(&self, data: &[u8]) -> bool {
        self.shared.send_frame(Opcode::Binary, data)
    }

    /// Queue a text message for the I/O thread; never blocks
    ///
    /// Accepted before `connect()`; delivered in order once the loop runs.
    pub fn send_async(&self, text: impl Into<String>) {
        self.shared.outbound.push(text.into());
    }

    pub fn send_ping(&self) -> bool {
        self.send_ping_with(&[])
    }

    pub fn send_ping_with(&self, payload: &[u8]) -> bool {
        let sent = self.shared.send_frame(Opcode::Ping, payload);
        if sent {
            self.shared.stats.record_ping_sent();
        }
        sent
    }

    pub fn send_pong(&self, payload: &[u8]) -> bool {
        self.shared.send_frame(Opcode::Pong, payload)
    }

    pub fn on_connect(&self, f: impl Fn() + Send + Sync + 'static) {
        self.shared.callbacks.lock().on_connect = Some(Arc::new(f));
    }

    pub fn on_disconnect(&self, f: impl Fn(u16) + Send + Sync + 'static) {
        self.shared.callbacks.lock().on_disconnect = Some(Arc::new(f));
    }

    pub fn on_error(&self, f: impl Fn(ErrorCode, &str) + Send + Sync + 'static) {
        self.shared.callbacks.lock().on_error = Some(Arc::new(f));
    }

    /// Text (or binary) messages that parse as JSON
    pub fn on_message(&self, f: impl Fn(&Value) + Send + Sync + 'static) {
        self.shared.callbacks.lock().on_message = Some(Arc::new(f));
    }

    pub fn on_raw_message(&self, f: impl Fn(&str) + Send + Sync + 'static) {
        self.shared.callbacks.lock().on_raw_message = Some(Arc::new(f));
    }

    pub fn on_binary(&self, f: impl Fn(&[u8]) + Send + Sync + 'static) {
        self.shared.callbacks.lock().on_binary = Some(Arc::new(f));
    }

    pub fn on_ping(&self, f: impl Fn(&[u8]) + Send + Sync + 'static) {
        self.shared.callbacks.lock().on_ping = Some(Arc::new(f));
    }

    pub fn on_pong(&self, f: impl Fn(&[u8]) + Send + Sync + 'static) {
        self.shared.callbacks.lock().on_pong = Some(Arc::new(f));
    }

    pub fn set_ping_mode(&self, mode: PingMode) {
        self.shared.heartbeat.set_mode(mode);
    }

    pub fn set_ping_interval(&self, interval: Duration) {
        self.shared.heartbeat.set_interval(interval);
    }

    pub fn set_ping_timeout(&self, timeout: Duration) {
        self.shared.heartbeat.set_timeout(timeout);
    }

    pub fn set_auto_pong(&self, enabled: bool) {
        self.shared.auto_pong.store(enabled, Ordering::Relaxed);
    }

    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.shared.auto_reconnect.store(enabled, Ordering::Relaxed);
    }

    /// Pin the I/O thread to `core` from its next start
    ///
    /// False if the index is out of range.
    pub fn pin_thread(&self, core: usize) -> bool {
        if !affinity::is_valid_core(core) {
            tracing::warn!(core, cores = affinity::core_count(), "Invalid core index");
            return false;
        }
        *self.shared.pinned_core.lock() = Some(core);
        true
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    pub fn url(&self) -> &str {
        &self.shared.config.url
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.shared.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Attempts used since the last successful handshake
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.reconnect.lock().attempts_used()
    }

    /// Async payloads not yet written
    pub fn pending_async(&self) -> usize {
        self.shared.outbound.len()
    }

    pub fn is_waiting_pong(&self) -> bool {
        self.shared.heartbeat.is_waiting_pong()
    }
}

impl Drop for WebSocket {
    fn drop(&mut self) {
        self.disconnect_with(CloseCode::GoingAway.as_u16());
    }
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let prev = std::mem::replace(&mut *self.state.write(), state);
        if prev != state {
            tracing::debug!(from = ?prev, to = ?state, "State change");
        }
    }

    /// Transport + upgrade; returns bytes already read past the response head
    fn establish(&self, endpoint: &Endpoint) -> Result<BytesMut, WsError> {
        let timeout = self.config.connect_timeout();
        let transport = self
            .connector
            .connect(endpoint, timeout, &|state| self.set_state(state))?;

        self.set_state(ConnectionState::WsHandshake);
        let mut inbound = BytesMut::with_capacity(SCRATCH_SIZE);
        let result = {
            let mut scratch = self.buffers.acquire();
            let mut writer = self.writer.lock();
            handshake::perform(
                &*transport,
                endpoint,
                &self.config.headers,
                self.config.verify_accept,
                timeout,
                &mut writer.rng,
                &mut scratch,
                &mut inbound,
            )
        };
        if let Err(e) = result {
            transport.shutdown();
            return Err(e);
        }

        let timeouts = transport
            .set_read_timeout(Some(self.config.poll_interval()))
            .and_then(|()| transport.set_write_timeout(self.config.write_timeout()));
        if let Err(e) = timeouts {
            transport.shutdown();
            return Err(WsError::ConnectionFailed(e.to_string()));
        }

        *self.transport.write() = Some(transport);
        Ok(inbound)
    }

    fn open(self: &Arc<Self>) {
        self.reconnect.lock().reset();
        self.aborted.store(false, Ordering::Release);
        self.connected.store(true, Ordering::Release);
        self.set_state(ConnectionState::Open);
        self.start_heartbeat();
        tracing::info!(url = %self.config.url, "Connected");
    }

    fn start_heartbeat(self: &Arc<Self>) {
        let weak: Weak<Shared> = Arc::downgrade(self);

        let ping = weak.clone();
        let text = weak.clone();
        let timeout = weak;

        self.heartbeat.start(PingHooks {
            send_ping: Box::new(move || {
                ping.upgrade().is_some_and(|s| {
                    let sent = s.send_frame(Opcode::Ping, &[]);
                    if sent {
                        s.stats.record_ping_sent();
                    }
                    sent
                })
            }),
            send_text: Box::new(move |message| {
                text.upgrade().is_some_and(|s| {
                    let sent = s.send_frame(Opcode::Text, message.as_bytes());
                    if sent {
                        s.stats.record_ping_sent();
                    }
                    sent
                })
            }),
            on_timeout: Box::new(move |after| {
                if let Some(s) = timeout.upgrade() {
                    s.on_ping_timeout(after);
                }
            }),
        });
    }

    fn on_ping_timeout(&self, after: Duration) {
        self.emit_error(&WsError::PingTimeout(after));
        if self.close_on_timeout.load(Ordering::Relaxed) && self.connected.load(Ordering::Acquire) {
            self.abort_transport();
        }
    }

    /// Encode and write one frame under the send lock
    fn write_frame(&self, opcode: Opcode, payload: &[u8]) -> Result<(), WsError> {
        let writer = self.writer.lock();
        self.write_locked(writer, opcode, payload)
    }

    fn write_locked(
        &self,
        mut writer: MutexGuard<'_, FrameWriter>,
        opcode: Opcode,
        payload: &[u8],
    ) -> Result<(), WsError> {
        let transport = self
            .transport
            .read()
            .clone()
            .ok_or(WsError::Disconnected)?;

        let FrameWriter { rng, buf } = &mut *writer;
        buf.clear();
        self.codec
            .encode_into(&FrameHeader::final_frame(opcode), payload, rng, buf)?;
        transport
            .write_all(&buf[..])
            .map_err(|e| WsError::SendFailed(e.to_string()))?;
        self.stats.record_frame_sent(buf.len());
        Ok(())
    }

    /// Send path shared by every public send
    fn send_frame(&self, opcode: Opcode, payload: &[u8]) -> bool {
        if !self.connected.load(Ordering::Acquire) {
            tracing::debug!(?opcode, "Send while not connected");
            return false;
        }
        match self.write_frame(opcode, payload) {
            Ok(()) => true,
            Err(e @ (WsError::MessageTooLarge { .. } | WsError::InvalidFrame(_))) => {
                tracing::warn!(error = %e, ?opcode, "Frame rejected");
                false
            }
            Err(WsError::Disconnected) => false,
            // Socket shut by disconnect() under a blocked write
            Err(_) if self.stop.is_raised() => false,
            Err(e) => {
                self.emit_error(&e);
                self.abort_transport();
                false
            }
        }
    }

    /// Best-effort close frame, bypassing the connected check
    ///
    /// Skipped if the send lock stays busy for a poll interval.
    fn write_close(&self, code: u16, reason: &str) {
        let Some(writer) = self.writer.try_lock_for(self.config.poll_interval()) else {
            tracing::debug!(code, "Send lock busy, close frame skipped");
            return;
        };
        let payload = close_payload(code, reason);
        if let Err(e) = self.write_locked(writer, Opcode::Close, &payload) {
            tracing::debug!(error = %e, code, "Close frame not sent");
        }
    }

    /// Shut the transport down so the I/O loop sees an abnormal disconnect
    fn abort_transport(&self) {
        self.aborted.store(true, Ordering::Release);
        let transport = self.transport.read().clone();
        if let Some(transport) = transport {
            transport.shutdown();
        }
    }

    fn teardown(&self) {
        let transport = self.transport.write().take();
        if let Some(transport) = transport {
            transport.shutdown();
        }
    }

    fn io_thread_alive(&self) -> bool {
        self.io_thread
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished() && h.thread().id() != thread::current().id())
    }

    fn join_io_thread(&self) {
        let handle = self.io_thread.lock().take();
        if let Some(handle) = handle {
            // From a callback on the I/O thread itself the loop exits on its own
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::error!("I/O thread panicked");
            }
        }
    }

    fn handlers(&self) -> Handlers {
        self.callbacks.lock().clone()
    }

    fn emit_connect(&self) {
        let cb = self.callbacks.lock().on_connect.clone();
        if let Some(cb) = cb {
            cb();
        }
    }

    fn emit_disconnect(&self, code: u16) {
        let cb = self.callbacks.lock().on_disconnect.clone();
        if let Some(cb) = cb {
            cb(code);
        }
    }

    fn emit_error(&self, error: &WsError) {
        self.stats.record_error();
        let code = error.code();
        tracing::warn!(code = code.as_u16(), kind = code.name(), error = %error, "WebSocket error");
        let cb = self.callbacks.lock().on_error.clone();
        if let Some(cb) = cb {
            cb(code, &error.to_string());
        }
    }

    fn io_main(self: Arc<Self>, mut inbound: BytesMut) {
        let core = *self.pinned_core.lock();
        if let Some(core) = core {
            if affinity::pin_current_thread(core) {
                tracing::debug!(core, "I/O thread pinned");
            } else {
                tracing::warn!(core, "Failed to pin I/O thread");
            }
        }

        let mut assembler = MessageAssembler::new(self.config.max_message_size);

        loop {
            self.emit_connect();

            match self.run_session(&mut inbound, &mut assembler) {
                SessionEnd::Stopped => break,
                SessionEnd::PeerClosed(code) => {
                    self.finish_peer_close(code);
                    break;
                }
                SessionEnd::Failed(error) => {
                    if self.stop.is_raised() {
                        break;
                    }
                    // disconnect() already owns the shutdown
                    if !self.connected.swap(false, Ordering::AcqRel) {
                        break;
                    }
                    if let Some(error) = error {
                        self.emit_error(&error);
                    }
                    self.heartbeat.stop();
                    self.teardown();
                    self.set_state(ConnectionState::Disconnected);

                    match self.reconnect_loop() {
                        Some(fresh) => {
                            inbound = fresh;
                            assembler.reset();
                        }
                        None => {
                            if !self.stop.is_raised() {
                                let code = CloseCode::AbnormalClosure.as_u16();
                                tracing::info!(code, "Connection lost");
                                self.emit_disconnect(code);
                            }
                            break;
                        }
                    }
                }
            }
        }

        tracing::debug!("I/O thread exiting");
    }

    fn run_session(&self, inbound: &mut BytesMut, assembler: &mut MessageAssembler) -> SessionEnd {
        let Some(transport) = self.transport.read().clone() else {
            return SessionEnd::Failed(None);
        };
        let mut scratch = self.buffers.acquire();

        loop {
            if self.stop.is_raised() {
                return SessionEnd::Stopped;
            }

            while let Some(payload) = self.outbound.pop() {
                if !self.send_frame(Opcode::Text, payload.as_bytes()) {
                    break;
                }
            }

            match self.codec.decode(inbound) {
                Ok(Some(frame)) => {
                    self.stats.record_frame_received(frame.payload.len());
                    if frame.masked {
                        tracing::debug!(opcode = ?frame.opcode, "Server sent a masked frame");
                    }
                    match assembler.push(frame) {
                        Ok(Some(unit)) => {
                            if let Some(end) = self.handle_inbound(unit) {
                                return end;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => return self.protocol_error(e),
                    }
                    continue;
                }
                Ok(None) => {}
                Err(e) => return self.protocol_error(e),
            }

            let failure = match transport.read_into(&mut scratch, inbound) {
                Ok(ReadOutcome::Data(_)) | Ok(ReadOutcome::Idle) => continue,
                Ok(ReadOutcome::Eof) => "connection closed by peer".to_string(),
                Err(e) => e.to_string(),
            };

            if self.stop.is_raised() {
                return SessionEnd::Stopped;
            }
            // A failed send already reported SendFailed
            if self.aborted.load(Ordering::Acquire) {
                return SessionEnd::Failed(None);
            }
            return SessionEnd::Failed(Some(WsError::ReceiveFailed(failure)));
        }
    }

    fn handle_inbound(&self, unit: Inbound) -> Option<SessionEnd> {
        let handlers = self.handlers();
        match unit {
            Inbound::Text(payload) => {
                self.stats.record_message();
                let is_pong = self
                    .config
                    .ping
                    .text_pong
                    .as_deref()
                    .is_some_and(|pong| pong.as_bytes() == &payload[..]);
                if is_pong {
                    self.heartbeat.on_pong_received();
                    self.stats.record_pong();
                }
                handlers.deliver_text(&payload);
            }
            Inbound::Binary(payload) => {
                self.stats.record_message();
                handlers.deliver_binary(&payload);
            }
            Inbound::Ping(payload) => {
                if self.auto_pong.load(Ordering::Relaxed) {
                    self.send_frame(Opcode::Pong, &payload);
                }
                if let Some(cb) = &handlers.on_ping {
                    cb(&payload);
                }
            }
            Inbound::Pong(payload) => {
                self.heartbeat.on_pong_received();
                self.stats.record_pong();
                if let Some(cb) = &handlers.on_pong {
                    cb(&payload);
                }
            }
            Inbound::Close(frame) => {
                tracing::info!(code = frame.code, reason = %frame.reason, "Server closed connection");
                return Some(SessionEnd::PeerClosed(frame.code));
            }
        }
        None
    }

    /// Tell the peer why, then end the session abnormally
    fn protocol_error(&self, error: WsError) -> SessionEnd {
        let code = error.close_code();
        tracing::warn!(error = %error, close_code = code.as_u16(), "Protocol error");
        if !code.is_local_only() {
            self.write_close(code.as_u16(), "");
        }
        SessionEnd::Failed(Some(error))
    }

    fn finish_peer_close(&self, code: u16) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        self.heartbeat.stop();

        let reply = match CloseCode::from_u16(code) {
            Some(c) if c.is_local_only() => CloseCode::Normal.as_u16(),
            _ => code,
        };
        self.write_close(reply, "");
        self.teardown();
        self.set_state(ConnectionState::Closed);
        self.emit_disconnect(code);
    }

    /// Backoff and retry until connected, stopped or out of attempts
    fn reconnect_loop(self: &Arc<Self>) -> Option<BytesMut> {
        loop {
            let (delay, attempt) = {
                let mut policy = self.reconnect.lock();
                let delay = policy.next_delay(self.auto_reconnect.load(Ordering::Relaxed))?;
                (delay, policy.attempts_used())
            };

            tracing::info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting"
            );
            if self.stop.wait_timeout(delay) {
                return None;
            }

            let endpoint = self.endpoint.lock().clone()?;
            match self.establish(&endpoint) {
                Ok(inbound) => {
                    if self.stop.is_raised() {
                        self.teardown();
                        return None;
                    }
                    self.stats.record_reconnect();
                    self.open();
                    return Some(inbound);
                }
                Err(e) => {
                    self.emit_error(&e);
                    self.set_state(ConnectionState::Disconnected);
                }
            }
        }
    }
}
