//! Loopback WebSocket server for connection tests
//!
//! Accepts one client at a time, answers the upgrade and speaks unmasked
//! server frames. Reads use a 5s timeout so a broken test fails instead of
//! hanging.

use bytes::{BufMut, BytesMut};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

use crate::core::{close_payload, Frame, FrameCodec, Opcode};
use crate::ws::handshake::compute_accept_key;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestServer {
    listener: TcpListener,
    pub port: u16,
}

impl TestServer {
    pub fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let port = listener.local_addr().expect("local addr").port();
        Self { listener, port }
    }

    /// A port with nothing listening on it
    pub fn unused_port() -> u16 {
        Self::bind().port
    }

    pub fn url(&self) -> String {
        format!("ws://127.0.0.1:{}/test", self.port)
    }

    /// Accept and complete the upgrade
    pub fn accept(&self) -> ServerConn {
        self.accept_with_trailer(&[])
    }

    /// Accept, then send `trailer` in the same write as the 101 response
    pub fn accept_with_trailer(&self, trailer: &[u8]) -> ServerConn {
        let (mut sock, request) = self.accept_request();
        let key = header(&request, "sec-websocket-key").expect("client key");
        let mut response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\r\n",
            compute_accept_key(&key)
        )
        .into_bytes();
        response.extend_from_slice(trailer);
        sock.write_all(&response).expect("write upgrade response");

        ServerConn {
            sock,
            inbound: BytesMut::new(),
            codec: FrameCodec::default(),
            request,
        }
    }

    /// Accept, read the request and answer with `response` verbatim
    pub fn reject(&self, response: &str) {
        let (mut sock, _) = self.accept_request();
        let _ = sock.write_all(response.as_bytes());
        let _ = sock.flush();
    }

    fn accept_request(&self) -> (TcpStream, String) {
        let (mut sock, _) = self.listener.accept().expect("accept");
        sock.set_read_timeout(Some(READ_TIMEOUT)).expect("read timeout");
        sock.set_nodelay(true).expect("nodelay");

        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            let n = sock.read(&mut byte).expect("read request");
            assert!(n > 0, "client closed during handshake");
            head.push(byte[0]);
        }
        (sock, String::from_utf8_lossy(&head).into_owned())
    }
}

fn header(request: &str, name: &str) -> Option<String> {
    request.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim().to_string())
    })
}

/// Unmasked frame as a server writes it
pub fn server_frame(fin: bool, opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(payload.len() + 10);
    buf.put_u8(if fin { 0x80 } else { 0x00 } | opcode as u8);
    let len = payload.len();
    if len < 126 {
        buf.put_u8(len as u8);
    } else if len <= u16::MAX as usize {
        buf.put_u8(126);
        buf.put_u16(len as u16);
    } else {
        buf.put_u8(127);
        buf.put_u64(len as u64);
    }
    buf.put_slice(payload);
    buf.to_vec()
}

/// Server side of one accepted connection
pub struct ServerConn {
    sock: TcpStream,
    inbound: BytesMut,
    codec: FrameCodec,
    pub request: String,
}

impl ServerConn {
    /// Next client frame, unmasked; `None` on EOF, timeout or bad frame
    pub fn read_frame(&mut self) -> Option<Frame> {
        let mut scratch = [0u8; 4096];
        loop {
            match self.codec.decode(&mut self.inbound) {
                Ok(Some(frame)) => return Some(frame),
                Ok(None) => {}
                Err(_) => return None,
            }
            match self.sock.read(&mut scratch) {
                Ok(0) | Err(_) => return None,
                Ok(n) => self.inbound.extend_from_slice(&scratch[..n]),
            }
        }
    }

    pub fn send_frame(&mut self, fin: bool, opcode: Opcode, payload: &[u8]) {
        self.send_raw(&server_frame(fin, opcode, payload));
    }

    pub fn send_close(&mut self, code: u16, reason: &str) {
        self.send_frame(true, Opcode::Close, &close_payload(code, reason));
    }

    pub fn send_raw(&mut self, bytes: &[u8]) {
        let _ = self.sock.write_all(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_frame_layout() {
        assert_eq!(server_frame(true, Opcode::Text, b"hi"), vec![0x81, 0x02, b'h', b'i']);
        assert_eq!(server_frame(false, Opcode::Binary, &[])[0], 0x02);

        let long = server_frame(true, Opcode::Binary, &[0u8; 300]);
        assert_eq!(&long[..4], &[0x82, 126, 0x01, 0x2C]);
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let req = "GET / HTTP/1.1\r\nsec-WebSocket-KEY: abc==\r\n\r\n";
        assert_eq!(header(req, "Sec-WebSocket-Key").as_deref(), Some("abc=="));
        assert_eq!(header(req, "Origin"), None);
    }
}
