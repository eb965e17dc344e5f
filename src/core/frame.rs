//! WebSocket frame codec (RFC 6455 Section 5.2)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```
//!
//! Encoding always masks (client role). Decoding is incremental over a
//! reusable `BytesMut`: it returns `Ok(None)` until a whole frame is
//! buffered, and rejects oversized frames as soon as the length is known.

use crate::core::close::{close_payload, CloseCode};
use crate::WsError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::Rng;

/// Largest payload a control frame may carry
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Largest possible client frame header (2 + 8 length + 4 mask)
pub const MAX_HEADER_LEN: usize = 14;

/// Default maximum message size (16 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Frame opcode (4 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    /// Parse the low nibble of the first header byte
    #[inline]
    pub fn from_u8(value: u8) -> Result<Self, WsError> {
        match value {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            other => Err(WsError::InvalidFrame(format!("unknown opcode 0x{other:X}"))),
        }
    }

    /// Close, Ping and Pong
    #[inline(always)]
    pub const fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

/// One WebSocket frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    /// MASK bit as seen on the wire
    pub masked: bool,
    /// Masking key (outbound frames only; decoded payloads are already unmasked)
    pub mask_key: Option<[u8; 4]>,
    pub payload: Bytes,
}

impl Frame {
    /// Final frame with the given opcode
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode,
            masked: false,
            mask_key: None,
            payload: payload.into(),
        }
    }

    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Text, payload)
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Binary, payload)
    }

    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Ping, payload)
    }

    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Pong, payload)
    }

    pub fn close(code: CloseCode, reason: &str) -> Self {
        Self::new(Opcode::Close, close_payload(code.as_u16(), reason))
    }

    /// Non-final fragment
    pub fn fragment(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin: false,
            ..Self::new(opcode, payload)
        }
    }
}

/// XOR `buf` with `key`, byte `i` with `key[i % 4]`
///
/// Applying the same key twice restores the input.
#[inline]
pub fn apply_mask(buf: &mut [u8], key: [u8; 4]) {
    let mut chunks = buf.chunks_exact_mut(4);
    for chunk in &mut chunks {
        chunk[0] ^= key[0];
        chunk[1] ^= key[1];
        chunk[2] ^= key[2];
        chunk[3] ^= key[3];
    }
    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= key[i];
    }
}

/// Stateless client frame codec
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_message_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl FrameCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    #[inline(always)]
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Encode a final, masked frame into a new buffer
    pub fn encode<R: Rng + ?Sized>(
        &self,
        opcode: Opcode,
        payload: &[u8],
        rng: &mut R,
    ) -> Result<Bytes, WsError> {
        let mut dst = BytesMut::with_capacity(MAX_HEADER_LEN + payload.len());
        self.encode_into(&FrameHeader::final_frame(opcode), payload, rng, &mut dst)?;
        Ok(dst.freeze())
    }

    /// Encode `payload` as one masked frame appended to `dst`, drawing the mask from `rng`
    #[inline]
    pub fn encode_into<R: Rng + ?Sized>(
        &self,
        header: &FrameHeader,
        payload: &[u8],
        rng: &mut R,
        dst: &mut BytesMut,
    ) -> Result<(), WsError> {
        let key: [u8; 4] = rng.gen();
        self.encode_with_key(header, payload, key, dst)
    }

    /// Encode with an explicit mask key
    pub fn encode_with_key(
        &self,
        header: &FrameHeader,
        payload: &[u8],
        key: [u8; 4],
        dst: &mut BytesMut,
    ) -> Result<(), WsError> {
        let len = payload.len();
        if header.opcode.is_control() {
            if !header.fin {
                return Err(WsError::InvalidFrame(
                    "control frames cannot be fragmented".to_string(),
                ));
            }
            if len > MAX_CONTROL_PAYLOAD {
                return Err(WsError::InvalidFrame(format!(
                    "control frame payload of {len} bytes exceeds {MAX_CONTROL_PAYLOAD}"
                )));
            }
        }
        if len > self.max_message_size {
            return Err(WsError::MessageTooLarge {
                size: len as u64,
                max: self.max_message_size,
            });
        }

        dst.reserve(MAX_HEADER_LEN + len);
        let fin = if header.fin { 0x80 } else { 0x00 };
        dst.put_u8(fin | header.opcode as u8);

        // Minimal length form, MASK bit always set
        if len < 126 {
            dst.put_u8(0x80 | len as u8);
        } else if len <= u16::MAX as usize {
            dst.put_u8(0x80 | 126);
            dst.put_u16(len as u16);
        } else {
            dst.put_u8(0x80 | 127);
            dst.put_u64(len as u64);
        }

        dst.put_slice(&key);
        let start = dst.len();
        dst.put_slice(payload);
        apply_mask(&mut dst[start..], key);
        Ok(())
    }

    /// Decode one frame from the front of `src`
    ///
    /// Returns `Ok(None)` when more bytes are needed; `src` is only consumed
    /// when a whole frame is returned. Masked server frames are unmasked.
    pub fn decode(&self, src: &mut BytesMut) -> Result<Option<Frame>, WsError> {
        if src.len() < 2 {
            return Ok(None);
        }

        let b0 = src[0];
        let b1 = src[1];

        if b0 & 0x70 != 0 {
            return Err(WsError::InvalidFrame(
                "reserved bits set without a negotiated extension".to_string(),
            ));
        }

        let fin = b0 & 0x80 != 0;
        let opcode = Opcode::from_u8(b0 & 0x0F)?;
        let masked = b1 & 0x80 != 0;
        let len7 = b1 & 0x7F;

        let (payload_len, mut offset) = match len7 {
            126 => {
                if src.len() < 4 {
                    return Ok(None);
                }
                (u64::from(u16::from_be_bytes([src[2], src[3]])), 4)
            }
            127 => {
                if src.len() < 10 {
                    return Ok(None);
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&src[2..10]);
                (u64::from_be_bytes(raw), 10)
            }
            n => (u64::from(n), 2),
        };

        if opcode.is_control() {
            if !fin {
                return Err(WsError::InvalidFrame(
                    "fragmented control frame".to_string(),
                ));
            }
            if payload_len > MAX_CONTROL_PAYLOAD as u64 {
                return Err(WsError::InvalidFrame(format!(
                    "control frame payload of {payload_len} bytes exceeds {MAX_CONTROL_PAYLOAD}"
                )));
            }
        }

        if payload_len > self.max_message_size as u64 {
            return Err(WsError::MessageTooLarge {
                size: payload_len,
                max: self.max_message_size,
            });
        }

        let mask_key = if masked {
            if src.len() < offset + 4 {
                return Ok(None);
            }
            let key = [src[offset], src[offset + 1], src[offset + 2], src[offset + 3]];
            offset += 4;
            Some(key)
        } else {
            None
        };

        // Bounded by max_message_size, fits in usize
        let payload_len = payload_len as usize;
        if src.len() < offset + payload_len {
            src.reserve(offset + payload_len - src.len());
            return Ok(None);
        }

        src.advance(offset);
        let mut payload = src.split_to(payload_len);
        if let Some(key) = mask_key {
            apply_mask(&mut payload, key);
        }

        Ok(Some(Frame {
            fin,
            opcode,
            masked,
            mask_key: None,
            payload: payload.freeze(),
        }))
    }
}

/// FIN bit and opcode of a frame about to be encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: Opcode,
}

impl FrameHeader {
    /// Final frame header
    #[inline(always)]
    pub const fn final_frame(opcode: Opcode) -> Self {
        Self { fin: true, opcode }
    }
}

impl Frame {
    /// Header used when re-encoding this frame
    #[inline(always)]
    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            fin: self.fin,
            opcode: self.opcode,
        }
    }
}
