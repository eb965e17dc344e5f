//! WebSocket client
//!
//! - `connection`: the `WebSocket` facade and its I/O thread
//! - `transport`: plain TCP and rustls byte streams
//! - `handshake`: HTTP upgrade
//! - `dispatch`: fragment reassembly and callbacks
//! - `ping`: heartbeat timer
//! - `reconnect`: backoff policy

pub mod connection;
pub mod dispatch;
pub mod handshake;
pub mod ping;
pub mod reconnect;
pub mod transport;

pub use connection::{ConnectionState, WebSocket};
pub use dispatch::{Handlers, Inbound, MessageAssembler};
pub use ping::{HeartbeatManager, PingHooks, PingSettings};
pub use reconnect::{ReconnectPolicy, StopSignal};
pub use transport::{Connector, ReadOutcome, TcpConnector, TcpTransport, TlsTransport, Transport};
