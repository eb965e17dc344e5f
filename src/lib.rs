//! Low-latency, thread-safe WebSocket client engine
//!
//! Client-side RFC 6455 over plain TCP or rustls, with a blocking I/O thread
//! per connection, a heartbeat timer, a mutex-serialized direct send path and
//! a lock-free queue for fire-and-forget sends.

pub mod core;
pub mod infrastructure;
pub mod ws;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types
pub use crate::core::{CloseCode, Endpoint, Frame, FrameCodec, Opcode};
pub use infrastructure::config::{Config, PingConfig, PingMode, WebSocketConfig};
pub use ws::{ConnectionState, WebSocket};

use std::fmt;
use thiserror::Error;

/// Numeric error taxonomy reported through `on_error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    ConnectionFailed = 1001,
    HandshakeFailed = 1002,
    Timeout = 1003,
    InvalidUrl = 1004,
    TlsError = 1005,
    SendFailed = 1006,
    ReceiveFailed = 1007,
    MessageTooLarge = 1008,
    InvalidFrame = 1009,
    PingTimeout = 1010,
    Disconnected = 1011,
}

impl ErrorCode {
    /// Numeric value of the code
    #[inline(always)]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    pub const fn name(self) -> &'static str {
        match self {
            ErrorCode::ConnectionFailed => "ConnectionFailed",
            ErrorCode::HandshakeFailed => "HandshakeFailed",
            ErrorCode::Timeout => "Timeout",
            ErrorCode::InvalidUrl => "InvalidUrl",
            ErrorCode::TlsError => "TlsError",
            ErrorCode::SendFailed => "SendFailed",
            ErrorCode::ReceiveFailed => "ReceiveFailed",
            ErrorCode::MessageTooLarge => "MessageTooLarge",
            ErrorCode::InvalidFrame => "InvalidFrame",
            ErrorCode::PingTimeout => "PingTimeout",
            ErrorCode::Disconnected => "Disconnected",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u16())
    }
}

/// Main error type for the WebSocket engine
#[derive(Error, Debug)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: u64, max: usize },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Pong timeout after {0:?}")]
    PingTimeout(std::time::Duration),

    #[error("Not connected")]
    Disconnected,
}

impl WsError {
    /// Error code reported to `on_error`
    pub fn code(&self) -> ErrorCode {
        match self {
            WsError::ConnectionFailed(_) => ErrorCode::ConnectionFailed,
            WsError::HandshakeFailed(_) => ErrorCode::HandshakeFailed,
            WsError::Timeout(_) => ErrorCode::Timeout,
            WsError::InvalidUrl(_) => ErrorCode::InvalidUrl,
            WsError::Tls(_) => ErrorCode::TlsError,
            WsError::SendFailed(_) => ErrorCode::SendFailed,
            WsError::ReceiveFailed(_) => ErrorCode::ReceiveFailed,
            WsError::MessageTooLarge { .. } => ErrorCode::MessageTooLarge,
            WsError::InvalidFrame(_) => ErrorCode::InvalidFrame,
            WsError::PingTimeout(_) => ErrorCode::PingTimeout,
            WsError::Disconnected => ErrorCode::Disconnected,
        }
    }

    /// Close code sent to the peer when this error ends a session
    pub fn close_code(&self) -> CloseCode {
        match self {
            WsError::InvalidFrame(_) => CloseCode::ProtocolError,
            WsError::MessageTooLarge { .. } => CloseCode::MessageTooBig,
            WsError::Tls(_) => CloseCode::TlsHandshake,
            _ => CloseCode::AbnormalClosure,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, WsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_match_wire_values() {
        assert_eq!(ErrorCode::ConnectionFailed.as_u16(), 1001);
        assert_eq!(ErrorCode::InvalidUrl.as_u16(), 1004);
        assert_eq!(ErrorCode::PingTimeout.as_u16(), 1010);
        assert_eq!(ErrorCode::Disconnected.as_u16(), 1011);
    }

    #[test]
    fn test_error_to_code_mapping() {
        let err = WsError::MessageTooLarge { size: 20, max: 10 };
        assert_eq!(err.code(), ErrorCode::MessageTooLarge);
        assert_eq!(err.close_code(), CloseCode::MessageTooBig);

        let err = WsError::InvalidFrame("reserved bits set".to_string());
        assert_eq!(err.code(), ErrorCode::InvalidFrame);
        assert_eq!(err.close_code(), CloseCode::ProtocolError);

        assert_eq!(WsError::Disconnected.close_code(), CloseCode::AbnormalClosure);
    }

    #[test]
    fn test_error_display() {
        let err = WsError::MessageTooLarge { size: 20, max: 10 };
        assert_eq!(err.to_string(), "Message too large: 20 bytes (max: 10)");
        assert_eq!(WsError::Disconnected.to_string(), "Not connected");
        assert_eq!(ErrorCode::Timeout.to_string(), "Timeout (1003)");
    }
}
