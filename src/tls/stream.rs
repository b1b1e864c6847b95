//! TLS transport over a non-blocking TCP socket.
//!
//! `TlsSocket` pumps ciphertext between the socket and a rustls
//! [`ServerConnection`] and exposes the plaintext side through
//! [`Transport`]. Records rustls could not hand to the socket right away
//! stay buffered inside the session until [`Transport::flush`] is called on
//! the next writable event.

use crate::net::websocket::{nonblocking, HandshakeProgress, IoStatus, Transport};
use crate::runtime::reactor::{raw_source, RawSource};
use crate::tracing_compat::{debug, trace};

use rustls::ServerConnection;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};

/// Server-side TLS session bound to one TCP socket.
pub struct TlsSocket {
    stream: TcpStream,
    conn: ServerConnection,
    peer: Option<SocketAddr>,
    closed: bool,
}

impl TlsSocket {
    /// Wraps `stream`, switching it to non-blocking mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be made non-blocking.
    pub fn new(stream: TcpStream, conn: ServerConnection) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().ok();
        Ok(Self {
            stream,
            conn,
            peer,
            closed: false,
        })
    }

    /// Pulls ciphertext off the socket and processes it.
    ///
    /// Returns `Ready(0)` at end of stream.
    fn fill(&mut self) -> io::Result<IoStatus> {
        let status = nonblocking(|| self.conn.read_tls(&mut self.stream))?;
        if let IoStatus::Ready(n) = status {
            if n > 0 {
                trace!(bytes = n, "tls records received");
                if let Err(err) = self.conn.process_new_packets() {
                    // Let the alert describing the failure reach the peer.
                    let _ = self.conn.write_tls(&mut self.stream);
                    return Err(io::Error::new(io::ErrorKind::InvalidData, err));
                }
            }
        }
        Ok(status)
    }

    /// Writes buffered records until the socket would block.
    fn drain(&mut self) -> io::Result<IoStatus> {
        let mut written = 0;
        while self.conn.wants_write() {
            match nonblocking(|| self.conn.write_tls(&mut self.stream))? {
                IoStatus::Ready(n) => written += n,
                IoStatus::WouldBlock => return Ok(IoStatus::WouldBlock),
            }
        }
        Ok(IoStatus::Ready(written))
    }
}

impl Transport for TlsSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<IoStatus> {
        loop {
            match self.conn.reader().read(buf) {
                Ok(n) => return Ok(IoStatus::Ready(n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
            let status = self.fill()?;
            self.drain()?;
            match status {
                IoStatus::Ready(0) => return Ok(IoStatus::Ready(0)),
                IoStatus::Ready(_) => {}
                IoStatus::WouldBlock => return Ok(IoStatus::WouldBlock),
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<IoStatus> {
        let accepted = self.conn.writer().write(buf)?;
        self.drain()?;
        if accepted == 0 && !buf.is_empty() {
            return Ok(IoStatus::WouldBlock);
        }
        Ok(IoStatus::Ready(accepted))
    }

    fn flush(&mut self) -> io::Result<IoStatus> {
        self.drain()
    }

    fn has_pending_output(&self) -> bool {
        self.conn.wants_write()
    }

    fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    fn drive_handshake(&mut self) -> io::Result<HandshakeProgress> {
        while self.conn.is_handshaking() {
            let status = self.fill()?;
            self.drain()?;
            match status {
                IoStatus::Ready(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "peer closed during TLS handshake",
                    ))
                }
                IoStatus::Ready(_) => {}
                IoStatus::WouldBlock => return Ok(HandshakeProgress::Pending),
            }
        }
        debug!(peer = ?self.peer, "TLS session established");
        Ok(HandshakeProgress::Complete)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.conn.send_close_notify();
            let _ = self.drain();
            let _ = self.stream.shutdown(Shutdown::Both);
        }
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn raw_source(&self) -> Option<RawSource> {
        Some(raw_source(&self.stream))
    }
}

impl std::fmt::Debug for TlsSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSocket")
            .field("peer", &self.peer)
            .field("handshaking", &self.conn.is_handshaking())
            .finish_non_exhaustive()
    }
}
