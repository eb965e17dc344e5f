//! Protocol-level types with no I/O
//!
//! - Frame / FrameCodec: RFC 6455 framing, client-side masking
//! - CloseCode / CloseFrame: close-frame payloads
//! - Endpoint: ws/wss URL parsing

pub mod close;
pub mod endpoint;
pub mod frame;

pub use close::{close_payload, CloseCode, CloseFrame};
pub use endpoint::Endpoint;
pub use frame::{apply_mask, Frame, FrameCodec, FrameHeader, Opcode, MAX_CONTROL_PAYLOAD};
