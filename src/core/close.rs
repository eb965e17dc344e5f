//! Close codes and close-frame payloads (RFC 6455 Section 7.4)

use crate::WsError;
use bytes::{BufMut, Bytes, BytesMut};

/// Close status codes used by this client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CloseCode {
    Normal = 1000,
    GoingAway = 1001,
    ProtocolError = 1002,
    UnsupportedData = 1003,
    /// Never sent on the wire; reported when a close frame carries no code
    NoStatusReceived = 1005,
    /// Never sent on the wire; reported when the connection drops
    AbnormalClosure = 1006,
    InvalidPayload = 1007,
    PolicyViolation = 1008,
    MessageTooBig = 1009,
    MandatoryExtension = 1010,
    InternalError = 1011,
    TlsHandshake = 1015,
}

impl CloseCode {
    #[inline(always)]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Map a raw status code to a known close code
    pub fn from_u16(code: u16) -> Option<Self> {
        Some(match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnsupportedData,
            1005 => CloseCode::NoStatusReceived,
            1006 => CloseCode::AbnormalClosure,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::InternalError,
            1015 => CloseCode::TlsHandshake,
            _ => return None,
        })
    }

    /// Codes reserved for local reporting that must not appear in a close frame
    #[inline]
    pub const fn is_local_only(self) -> bool {
        matches!(
            self,
            CloseCode::NoStatusReceived | CloseCode::AbnormalClosure | CloseCode::TlsHandshake
        )
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

/// Decoded close frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl CloseFrame {
    /// Parse a close payload: empty, or a big-endian code plus optional reason
    ///
    /// The reason is decoded lossily; it is informational only.
    pub fn parse(payload: &[u8]) -> Result<Self, WsError> {
        match payload.len() {
            0 => Ok(Self {
                code: CloseCode::NoStatusReceived.as_u16(),
                reason: String::new(),
            }),
            1 => Err(WsError::InvalidFrame(
                "close payload must be empty or at least 2 bytes".to_string(),
            )),
            _ => Ok(Self {
                code: u16::from_be_bytes([payload[0], payload[1]]),
                reason: String::from_utf8_lossy(&payload[2..]).into_owned(),
            }),
        }
    }
}

/// Build a close payload for `code`
///
/// Local-only codes produce an empty payload.
pub fn close_payload(code: u16, reason: &str) -> Bytes {
    if CloseCode::from_u16(code).is_some_and(CloseCode::is_local_only) {
        return Bytes::new();
    }
    // Control frames carry at most 125 bytes
    let reason = truncate_utf8(reason, 123);
    let mut buf = BytesMut::with_capacity(2 + reason.len());
    buf.put_u16(code);
    buf.put_slice(reason.as_bytes());
    buf.freeze()
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_code_and_reason() {
        let frame = CloseFrame::parse(&[0x03, 0xE8, b'b', b'y', b'e']).unwrap();
        assert_eq!(frame.code, 1000);
        assert_eq!(frame.reason, "bye");
    }

    #[test]
    fn test_parse_empty_payload_is_no_status() {
        let frame = CloseFrame::parse(&[]).unwrap();
        assert_eq!(frame.code, CloseCode::NoStatusReceived.as_u16());
        assert!(frame.reason.is_empty());
    }

    #[test]
    fn test_parse_single_byte_is_invalid() {
        assert!(matches!(
            CloseFrame::parse(&[0x03]),
            Err(WsError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_parse_accepts_invalid_utf8_reason() {
        let frame = CloseFrame::parse(&[0x0F, 0xA0, 0xFF, 0xFE]).unwrap();
        assert_eq!(frame.code, 4000);
        assert!(!frame.reason.is_empty());
    }

    #[test]
    fn test_close_payload_layout() {
        let payload = close_payload(CloseCode::GoingAway.as_u16(), "");
        assert_eq!(&payload[..], &[0x03, 0xE9]);

        let payload = close_payload(1000, "done");
        assert_eq!(&payload[..2], &[0x03, 0xE8]);
        assert_eq!(&payload[2..], b"done");
    }

    #[test]
    fn test_local_only_codes_send_empty_payload() {
        assert!(close_payload(CloseCode::AbnormalClosure.as_u16(), "x").is_empty());
        assert!(close_payload(CloseCode::NoStatusReceived.as_u16(), "").is_empty());
    }

    #[test]
    fn test_reason_truncated_to_control_limit() {
        let reason = "é".repeat(100);
        let payload = close_payload(1000, &reason);
        assert!(payload.len() <= 125);
        assert!(std::str::from_utf8(&payload[2..]).is_ok());
    }

    #[test]
    fn test_close_code_round_trip() {
        for code in [1000u16, 1001, 1002, 1003, 1005, 1006, 1007, 1008, 1009, 1010, 1011, 1015] {
            assert_eq!(CloseCode::from_u16(code).map(u16::from), Some(code));
        }
        assert_eq!(CloseCode::from_u16(4000), None);
    }
}
