//! Byte-stream transports
//!
//! - `Transport`: full-duplex stream shared by the I/O thread (reads) and
//!   senders (writes, serialized by the connection's send lock)
//! - `Connector`: creates a transport for an endpoint
//! - `TcpConnector`: blocking `std::net` TCP, rustls on top for `wss`

use bytes::BytesMut;
use parking_lot::Mutex;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::Endpoint;
use crate::ws::connection::ConnectionState;
use crate::WsError;

/// Result of one read attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes appended to the inbound buffer
    Data(usize),
    /// Read timeout elapsed with nothing new
    Idle,
    /// Peer closed the stream
    Eof,
}

/// Connected byte stream
pub trait Transport: Send + Sync {
    /// Read once (bounded by the read timeout), appending to `dst`
    ///
    /// `scratch` is reusable raw space for the socket read.
    fn read_into(&self, scratch: &mut [u8], dst: &mut BytesMut) -> io::Result<ReadOutcome>;

    /// Write every byte, retrying partial writes
    fn write_all(&self, data: &[u8]) -> io::Result<()>;

    /// `None` or a zero duration blocks indefinitely
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Bound on a blocked write; `None` blocks indefinitely
    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Close both directions; pending and future reads fail or see EOF
    fn shutdown(&self);

    fn is_secure(&self) -> bool;
}

/// Establishes transports for the connection state machine
pub trait Connector: Send + Sync {
    /// Resolve, connect and (for `wss`) complete the TLS handshake
    ///
    /// `progress` is told each state entered along the way.
    fn connect(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
        progress: &dyn Fn(ConnectionState),
    ) -> Result<Arc<dyn Transport>, WsError>;
}

#[inline]
pub(crate) fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

#[inline]
fn non_zero(timeout: Option<Duration>) -> Option<Duration> {
    timeout.filter(|d| !d.is_zero())
}

/// Plain TCP stream
pub struct TcpTransport {
    sock: TcpStream,
}

impl TcpTransport {
    pub fn new(sock: TcpStream) -> Self {
        Self { sock }
    }
}

impl Transport for TcpTransport {
    fn read_into(&self, scratch: &mut [u8], dst: &mut BytesMut) -> io::Result<ReadOutcome> {
        match (&self.sock).read(scratch) {
            Ok(0) => Ok(ReadOutcome::Eof),
            Ok(n) => {
                dst.extend_from_slice(&scratch[..n]);
                Ok(ReadOutcome::Data(n))
            }
            Err(e) if is_timeout(&e) => Ok(ReadOutcome::Idle),
            Err(e) => Err(e),
        }
    }

    fn write_all(&self, data: &[u8]) -> io::Result<()> {
        (&self.sock).write_all(data)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.sock.set_read_timeout(non_zero(timeout))
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.sock.set_write_timeout(non_zero(timeout))
    }

    fn shutdown(&self) {
        let _ = self.sock.shutdown(Shutdown::Both);
    }

    fn is_secure(&self) -> bool {
        false
    }
}

/// rustls client session over TCP
///
/// Socket reads happen outside the session lock so writers are not held up
/// by an idle read; records are fed to the session under the lock.
pub struct TlsTransport {
    sock: TcpStream,
    conn: Mutex<ClientConnection>,
}

impl TlsTransport {
    /// Run the TLS handshake to completion within `timeout`
    pub fn handshake(
        mut sock: TcpStream,
        mut conn: ClientConnection,
        timeout: Duration,
    ) -> Result<Self, WsError> {
        let deadline = Instant::now() + timeout;
        sock.set_read_timeout(non_zero(Some(timeout)))
            .map_err(|e| WsError::Tls(e.to_string()))?;

        while conn.is_handshaking() {
            if Instant::now() >= deadline {
                return Err(WsError::Timeout(format!(
                    "TLS handshake not complete after {timeout:?}"
                )));
            }
            match conn.complete_io(&mut sock) {
                Ok(_) => {}
                Err(e) if is_timeout(&e) => {
                    return Err(WsError::Timeout(format!(
                        "TLS handshake not complete after {timeout:?}"
                    )))
                }
                Err(e) => return Err(WsError::Tls(e.to_string())),
            }
        }

        tracing::debug!(
            protocol = ?conn.protocol_version(),
            cipher = ?conn.negotiated_cipher_suite().map(|s| s.suite()),
            "TLS session established"
        );

        Ok(Self {
            sock,
            conn: Mutex::new(conn),
        })
    }

    fn flush_tls(&self, conn: &mut ClientConnection) -> io::Result<()> {
        let mut sock = &self.sock;
        while conn.wants_write() {
            conn.write_tls(&mut sock)?;
        }
        Ok(())
    }
}

/// Move decrypted bytes into `dst`; returns (bytes, peer sent close_notify)
fn drain_plaintext(conn: &mut ClientConnection, dst: &mut BytesMut) -> io::Result<(usize, bool)> {
    let state = conn
        .process_new_packets()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let available = state.plaintext_bytes_to_read();
    if available > 0 {
        let start = dst.len();
        dst.resize(start + available, 0);
        conn.reader().read_exact(&mut dst[start..])?;
    }
    Ok((available, state.peer_has_closed()))
}

impl Transport for TlsTransport {
    fn read_into(&self, scratch: &mut [u8], dst: &mut BytesMut) -> io::Result<ReadOutcome> {
        // Plaintext left over from the handshake flight
        {
            let mut conn = self.conn.lock();
            let (got, closed) = drain_plaintext(&mut conn, dst)?;
            if got > 0 {
                return Ok(ReadOutcome::Data(got));
            }
            if closed {
                return Ok(ReadOutcome::Eof);
            }
        }

        let n = match (&self.sock).read(scratch) {
            Ok(0) => return Ok(ReadOutcome::Eof),
            Ok(n) => n,
            Err(e) if is_timeout(&e) => return Ok(ReadOutcome::Idle),
            Err(e) => return Err(e),
        };

        let mut conn = self.conn.lock();
        let mut records = &scratch[..n];
        let mut total = 0;
        let mut closed = false;
        while !records.is_empty() {
            conn.read_tls(&mut records)?;
            let (got, peer_closed) = drain_plaintext(&mut conn, dst)?;
            total += got;
            closed |= peer_closed;
        }
        // Session tickets and key updates may queue a reply
        self.flush_tls(&mut conn)?;

        Ok(match (total, closed) {
            (0, true) => ReadOutcome::Eof,
            (0, false) => ReadOutcome::Idle,
            (n, _) => ReadOutcome::Data(n),
        })
    }

    fn write_all(&self, data: &[u8]) -> io::Result<()> {
        let mut conn = self.conn.lock();
        let mut rest = data;
        while !rest.is_empty() {
            let n = conn.writer().write(rest)?;
            rest = &rest[n..];
            self.flush_tls(&mut conn)?;
        }
        Ok(())
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.sock.set_read_timeout(non_zero(timeout))
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.sock.set_write_timeout(non_zero(timeout))
    }

    fn shutdown(&self) {
        // A writer stuck on a dead socket must not block teardown
        if let Some(mut conn) = self.conn.try_lock() {
            conn.send_close_notify();
            let _ = self.flush_tls(&mut conn);
        }
        let _ = self.sock.shutdown(Shutdown::Both);
    }

    fn is_secure(&self) -> bool {
        true
    }
}

/// Default connector: blocking TCP, rustls with native roots for `wss`
pub struct TcpConnector {
    tls: Mutex<Option<Arc<ClientConfig>>>,
}

impl TcpConnector {
    pub fn new() -> Self {
        Self {
            tls: Mutex::new(None),
        }
    }

    /// Use a caller-built TLS configuration instead of the platform trust store
    pub fn with_tls_config(config: Arc<ClientConfig>) -> Self {
        Self {
            tls: Mutex::new(Some(config)),
        }
    }

    fn tls_config(&self) -> Result<Arc<ClientConfig>, WsError> {
        let mut cached = self.tls.lock();
        if let Some(config) = cached.as_ref() {
            return Ok(Arc::clone(config));
        }
        let config = build_tls_config()?;
        *cached = Some(Arc::clone(&config));
        Ok(config)
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

/// rustls client config over the platform's root certificates
pub fn build_tls_config() -> Result<Arc<ClientConfig>, WsError> {
    let result = rustls_native_certs::load_native_certs();
    for err in &result.errors {
        tracing::warn!(error = %err, "Error loading native certificate");
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(result.certs);
    tracing::debug!(added, ignored, "Loaded native root certificates");
    if roots.is_empty() {
        return Err(WsError::Tls("no root certificates available".to_string()));
    }

    let config =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| WsError::Tls(e.to_string()))?
            .with_root_certificates(roots)
            .with_no_client_auth();

    Ok(Arc::new(config))
}

/// Resolve `endpoint` and connect to the first reachable address
pub fn connect_tcp(endpoint: &Endpoint, timeout: Duration) -> Result<TcpStream, WsError> {
    let (target, addrs) = resolve(endpoint)?;
    connect_any(&target, &addrs, timeout)
}

fn resolve(endpoint: &Endpoint) -> Result<(String, Vec<SocketAddr>), WsError> {
    let target = endpoint.socket_addr();
    let addrs: Vec<SocketAddr> = target
        .to_socket_addrs()
        .map_err(|e| WsError::ConnectionFailed(format!("cannot resolve {target}: {e}")))?
        .collect();
    if addrs.is_empty() {
        return Err(WsError::ConnectionFailed(format!(
            "{target} resolved to no addresses"
        )));
    }
    Ok((target, addrs))
}

fn connect_any(target: &str, addrs: &[SocketAddr], timeout: Duration) -> Result<TcpStream, WsError> {
    let timeout = timeout.max(Duration::from_millis(1));
    let mut last_err = None;

    for addr in addrs {
        match TcpStream::connect_timeout(addr, timeout) {
            Ok(sock) => {
                if let Err(e) = sock.set_nodelay(true) {
                    tracing::debug!(error = %e, "TCP_NODELAY not set");
                }
                tracing::debug!(%addr, "TCP connected");
                return Ok(sock);
            }
            Err(e) => {
                tracing::debug!(%addr, error = %e, "TCP connect attempt failed");
                last_err = Some(e);
            }
        }
    }

    match last_err {
        Some(e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock => {
            Err(WsError::Timeout(format!("connect to {target} timed out after {timeout:?}")))
        }
        Some(e) => Err(WsError::ConnectionFailed(format!("{target}: {e}"))),
        None => Err(WsError::ConnectionFailed(format!("{target}: no address"))),
    }
}

impl Connector for TcpConnector {
    fn connect(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
        progress: &dyn Fn(ConnectionState),
    ) -> Result<Arc<dyn Transport>, WsError> {
        progress(ConnectionState::Resolving);
        let (target, addrs) = resolve(endpoint)?;

        progress(ConnectionState::TransportConnecting);
        let sock = connect_any(&target, &addrs, timeout)?;

        if !endpoint.secure {
            return Ok(Arc::new(TcpTransport::new(sock)));
        }

        progress(ConnectionState::TlsHandshake);
        let config = self.tls_config()?;
        let server_name = ServerName::try_from(endpoint.host.clone())
            .map_err(|e| WsError::Tls(format!("invalid server name {}: {e}", endpoint.host)))?;
        let conn = ClientConnection::new(config, server_name)
            .map_err(|e| WsError::Tls(e.to_string()))?;

        Ok(Arc::new(TlsTransport::handshake(sock, conn, timeout)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn endpoint_for(listener: &TcpListener) -> Endpoint {
        let port = listener.local_addr().unwrap().port();
        Endpoint::parse(&format!("ws://127.0.0.1:{port}/")).unwrap()
    }

    #[test]
    fn test_tcp_connect_reports_progress() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = endpoint_for(&listener);

        let seen = Mutex::new(Vec::new());
        let transport = TcpConnector::new()
            .connect(&endpoint, Duration::from_secs(2), &|s| seen.lock().push(s))
            .unwrap();

        assert!(!transport.is_secure());
        assert_eq!(
            *seen.lock(),
            vec![ConnectionState::Resolving, ConnectionState::TransportConnecting]
        );
    }

    #[test]
    fn test_tcp_transport_read_write() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = endpoint_for(&listener);

        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 5];
            sock.read_exact(&mut buf).unwrap();
            sock.write_all(&buf).unwrap();
        });

        let sock = connect_tcp(&endpoint, Duration::from_secs(2)).unwrap();
        let transport = TcpTransport::new(sock);
        transport
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        transport.write_all(b"hello").unwrap();

        let mut scratch = [0u8; 64];
        let mut inbound = BytesMut::new();
        while inbound.len() < 5 {
            match transport.read_into(&mut scratch, &mut inbound).unwrap() {
                ReadOutcome::Data(_) | ReadOutcome::Idle => {}
                ReadOutcome::Eof => break,
            }
        }
        assert_eq!(&inbound[..], b"hello");

        server.join().unwrap();
        // Server dropped its socket
        let mut outcome = ReadOutcome::Idle;
        for _ in 0..100 {
            outcome = transport.read_into(&mut scratch, &mut inbound).unwrap();
            if outcome != ReadOutcome::Idle {
                break;
            }
        }
        assert_eq!(outcome, ReadOutcome::Eof);
    }

    #[test]
    fn test_read_timeout_yields_idle() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = endpoint_for(&listener);
        let sock = connect_tcp(&endpoint, Duration::from_secs(2)).unwrap();
        let _peer = listener.accept().unwrap();

        let transport = TcpTransport::new(sock);
        transport
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();

        let mut scratch = [0u8; 16];
        let mut inbound = BytesMut::new();
        assert_eq!(
            transport.read_into(&mut scratch, &mut inbound).unwrap(),
            ReadOutcome::Idle
        );
        assert!(inbound.is_empty());
    }

    #[test]
    fn test_write_timeout_bounds_stuck_write() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = endpoint_for(&listener);
        let sock = connect_tcp(&endpoint, Duration::from_secs(2)).unwrap();
        // Peer never reads
        let _peer = listener.accept().unwrap();

        let transport = TcpTransport::new(sock);
        transport
            .set_write_timeout(Some(Duration::from_millis(50)))
            .unwrap();

        let chunk = vec![0u8; 1024 * 1024];
        let start = Instant::now();
        let mut failed = false;
        for _ in 0..512 {
            if transport.write_all(&chunk).is_err() {
                failed = true;
                break;
            }
        }
        assert!(failed, "write never blocked on a full socket buffer");
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_connection_refused() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let endpoint = Endpoint::parse(&format!("ws://127.0.0.1:{port}/")).unwrap();
        let err = connect_tcp(&endpoint, Duration::from_secs(2)).unwrap_err();
        assert!(matches!(err, WsError::ConnectionFailed(_) | WsError::Timeout(_)));
    }
}
