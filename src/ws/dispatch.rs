//! Inbound dispatch
//!
//! - `MessageAssembler`: reassembles fragmented data frames
//! - `Handlers`: user callbacks, cloned out of the connection's lock and
//!   invoked without it

use bytes::{Bytes, BytesMut};
use serde_json::Value;
use std::sync::Arc;

use crate::core::{CloseFrame, Frame, Opcode};
use crate::{ErrorCode, WsError};

/// A complete inbound unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(Bytes),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(CloseFrame),
}

/// Fragment reassembly for one connection
pub struct MessageAssembler {
    max_message_size: usize,
    /// Opcode of the message in progress
    opcode: Option<Opcode>,
    buf: BytesMut,
}

impl MessageAssembler {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            opcode: None,
            buf: BytesMut::new(),
        }
    }

    /// Feed one decoded frame; returns a unit once it is complete
    ///
    /// Control frames pass straight through, including between fragments.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Inbound>, WsError> {
        match frame.opcode {
            Opcode::Ping => Ok(Some(Inbound::Ping(frame.payload))),
            Opcode::Pong => Ok(Some(Inbound::Pong(frame.payload))),
            Opcode::Close => CloseFrame::parse(&frame.payload).map(|c| Some(Inbound::Close(c))),
            Opcode::Text | Opcode::Binary => {
                if self.opcode.is_some() {
                    return Err(WsError::InvalidFrame(
                        "new data frame while a fragmented message is in progress".to_string(),
                    ));
                }
                if frame.fin {
                    return Ok(Some(Self::complete(frame.opcode, frame.payload)));
                }
                self.opcode = Some(frame.opcode);
                self.buf.clear();
                self.buf.extend_from_slice(&frame.payload);
                Ok(None)
            }
            Opcode::Continuation => {
                let Some(opcode) = self.opcode else {
                    return Err(WsError::InvalidFrame(
                        "continuation frame without a message in progress".to_string(),
                    ));
                };
                let size = self.buf.len() + frame.payload.len();
                if size > self.max_message_size {
                    self.reset();
                    return Err(WsError::MessageTooLarge {
                        size: size as u64,
                        max: self.max_message_size,
                    });
                }
                self.buf.extend_from_slice(&frame.payload);
                if !frame.fin {
                    return Ok(None);
                }
                self.opcode = None;
                let payload = self.buf.split().freeze();
                Ok(Some(Self::complete(opcode, payload)))
            }
        }
    }

    /// Drop any partial message
    pub fn reset(&mut self) {
        self.opcode = None;
        self.buf.clear();
    }

    #[inline]
    pub fn in_progress(&self) -> bool {
        self.opcode.is_some()
    }

    fn complete(opcode: Opcode, payload: Bytes) -> Inbound {
        if opcode == Opcode::Binary {
            Inbound::Binary(payload)
        } else {
            Inbound::Text(payload)
        }
    }
}

pub type ConnectHandler = Arc<dyn Fn() + Send + Sync>;
pub type DisconnectHandler = Arc<dyn Fn(u16) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(ErrorCode, &str) + Send + Sync>;
pub type MessageHandler = Arc<dyn Fn(&Value) + Send + Sync>;
pub type RawMessageHandler = Arc<dyn Fn(&str) + Send + Sync>;
pub type BytesHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Registered callbacks
#[derive(Default, Clone)]
pub struct Handlers {
    pub on_connect: Option<ConnectHandler>,
    pub on_disconnect: Option<DisconnectHandler>,
    pub on_error: Option<ErrorHandler>,
    pub on_message: Option<MessageHandler>,
    pub on_raw_message: Option<RawMessageHandler>,
    pub on_binary: Option<BytesHandler>,
    pub on_ping: Option<BytesHandler>,
    pub on_pong: Option<BytesHandler>,
}

impl Handlers {
    /// Raw text callback, then the JSON callback if the payload parses
    pub fn deliver_text(&self, payload: &[u8]) {
        if self.on_raw_message.is_none() && self.on_message.is_none() {
            return;
        }
        let text = String::from_utf8_lossy(payload);
        if let Some(cb) = &self.on_raw_message {
            cb(&text);
        }
        if let Some(cb) = &self.on_message {
            match serde_json::from_str::<Value>(&text) {
                Ok(value) => cb(&value),
                Err(e) => tracing::trace!(error = %e, "Message is not JSON"),
            }
        }
    }

    /// Binary callback, then the text path with the payload decoded lossily
    pub fn deliver_binary(&self, payload: &[u8]) {
        if let Some(cb) = &self.on_binary {
            cb(payload);
        }
        self.deliver_text(payload);
    }
}
