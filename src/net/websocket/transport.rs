//! Byte transports a [`Connection`](super::Connection) runs over.
//!
//! Both implementations wrap a non-blocking [`TcpStream`]. Reads and writes
//! never block: a socket that is not ready reports [`IoStatus::WouldBlock`]
//! and the worker waits for the next readiness event.

use crate::runtime::reactor::{raw_source, RawSource};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};

/// Outcome of a non-blocking read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    /// `n` bytes were transferred. A read of zero bytes means end of stream.
    Ready(usize),
    /// The operation would block.
    WouldBlock,
}

/// Progress of a transport-level (TLS) handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeProgress {
    /// More I/O is needed.
    Pending,
    /// The session is established.
    Complete,
}

/// Non-blocking byte stream owned by one connection.
pub trait Transport: Send {
    /// Reads available bytes into `buf`.
    ///
    /// # Errors
    ///
    /// Any I/O error other than `WouldBlock`.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<IoStatus>;

    /// Writes as much of `buf` as the socket accepts.
    ///
    /// # Errors
    ///
    /// Any I/O error other than `WouldBlock`.
    fn write(&mut self, buf: &[u8]) -> io::Result<IoStatus>;

    /// Pushes out bytes the transport buffered internally.
    ///
    /// # Errors
    ///
    /// Any I/O error other than `WouldBlock`.
    fn flush(&mut self) -> io::Result<IoStatus> {
        Ok(IoStatus::Ready(0))
    }

    /// True while the transport holds bytes not yet handed to the socket.
    fn has_pending_output(&self) -> bool {
        false
    }

    /// True until the transport-level handshake has completed.
    fn is_handshaking(&self) -> bool {
        false
    }

    /// Advances the transport-level handshake.
    ///
    /// # Errors
    ///
    /// A failed handshake or I/O error.
    fn drive_handshake(&mut self) -> io::Result<HandshakeProgress> {
        Ok(HandshakeProgress::Complete)
    }

    /// Shuts the stream down. Idempotent.
    fn close(&mut self);

    /// Remote address, when known.
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// OS handle for readiness registration; `None` for in-memory transports.
    fn raw_source(&self) -> Option<RawSource>;
}

/// Maps `WouldBlock` onto [`IoStatus`] and retries `Interrupted`.
pub(crate) fn nonblocking<F>(mut op: F) -> io::Result<IoStatus>
where
    F: FnMut() -> io::Result<usize>,
{
    loop {
        match op() {
            Ok(n) => return Ok(IoStatus::Ready(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(IoStatus::WouldBlock),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

/// Plain TCP transport.
#[derive(Debug)]
pub struct PlaintextSocket {
    stream: TcpStream,
    peer: Option<SocketAddr>,
    closed: bool,
}

impl PlaintextSocket {
    /// Wraps `stream`, switching it to non-blocking mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be made non-blocking.
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().ok();
        Ok(Self {
            stream,
            peer,
            closed: false,
        })
    }
}

impl Transport for PlaintextSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<IoStatus> {
        nonblocking(|| self.stream.read(buf))
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<IoStatus> {
        nonblocking(|| self.stream.write(buf))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::net::TcpListener;

    #[test]
    fn plaintext_read_would_block_then_data() {
        init_test_logging();
        crate::test_phase!("plaintext_read_would_block_then_data");
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        let mut socket = PlaintextSocket::new(server).unwrap();
        assert_eq!(socket.peer_addr(), client.local_addr().ok());
        assert!(socket.raw_source().is_some());

        let mut buf = [0u8; 16];
        assert_eq!(socket.read(&mut buf).unwrap(), IoStatus::WouldBlock);

        client.write_all(b"abc").unwrap();
        let status = loop {
            match socket.read(&mut buf).unwrap() {
                IoStatus::WouldBlock => std::thread::yield_now(),
                ready => break ready,
            }
        };
        assert_eq!(status, IoStatus::Ready(3));
        assert_eq!(&buf[..3], b"abc");

        assert_eq!(socket.write(b"xyz").unwrap(), IoStatus::Ready(3));
        let mut echo = [0u8; 3];
        client.read_exact(&mut echo).unwrap();
        assert_eq!(&echo, b"xyz");

        socket.close();
        socket.close();
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());
        crate::test_complete!("plaintext_read_would_block_then_data");
    }
}
