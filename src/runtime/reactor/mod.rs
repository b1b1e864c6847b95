//! Reactor abstraction for I/O event multiplexing.
//!
//! Each I/O worker owns one [`Reactor`] and drives it from a single thread.
//! The listener thread owns another.
//!
//! # Key Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`Reactor`] | Trait for I/O event notification backends |
//! | [`Interest`] | Bitflags for readable/writable/error events |
//! | [`Events`] | Container for poll results |
//! | [`Event`] | Single readiness notification |
//! | [`Token`] | Identifier linking registrations to events |
//! | [`PollReactor`] | Backend over the `polling` crate (epoll/kqueue/wepoll) |
//!
//! # Usage Pattern
//!
//! ```ignore
//! use wsengine::runtime::reactor::{Events, Interest, PollReactor, Reactor, Token};
//!
//! let reactor = PollReactor::new()?;
//! reactor.register(raw_source(&socket), Token::new(42), Interest::READABLE)?;
//!
//! let mut events = Events::with_capacity(64);
//! loop {
//!     reactor.poll(&mut events, Some(Duration::from_millis(100)))?;
//!     for event in &events {
//!         handle(event);
//!         // Registrations are one-shot: re-arm after every event.
//!         reactor.modify(event.token, Interest::READABLE)?;
//!     }
//! }
//! ```
//!
//! # One-shot Delivery
//!
//! A registration reports at most one event and is then disarmed until
//! [`Reactor::modify`] re-arms it. A source's state can therefore only be
//! touched by the thread that handled its last event.

pub mod interest;
mod poll;

pub use interest::Interest;
pub use poll::PollReactor;

use std::io;
use std::time::Duration;

/// OS handle a reactor can watch.
#[cfg(unix)]
pub type RawSource = std::os::unix::io::RawFd;

/// OS handle a reactor can watch.
#[cfg(windows)]
pub type RawSource = std::os::windows::io::RawSocket;

/// The OS handle of a socket.
#[cfg(unix)]
pub fn raw_source<S: std::os::unix::io::AsRawFd>(socket: &S) -> RawSource {
    socket.as_raw_fd()
}

/// The OS handle of a socket.
#[cfg(windows)]
pub fn raw_source<S: std::os::windows::io::AsRawSocket>(socket: &S) -> RawSource {
    socket.as_raw_socket()
}

/// Token identifying a registered source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub usize);

impl Token {
    /// Creates a new token.
    #[must_use]
    pub const fn new(val: usize) -> Self {
        Self(val)
    }
}

/// Readiness reported for one registration.
///
/// # Example
///
/// ```
/// use wsengine::runtime::reactor::{Event, Interest, Token};
///
/// let event = Event::new(Token::new(1), Interest::READABLE | Interest::WRITABLE);
/// assert!(event.is_readable());
/// assert!(event.is_writable());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// Token identifying the registered source.
    pub token: Token,
    /// Readiness flags that triggered.
    pub ready: Interest,
}

impl Event {
    /// An event for `token` with readiness `ready`.
    #[must_use]
    pub const fn new(token: Token, ready: Interest) -> Self {
        Self { token, ready }
    }

    /// Returns true if the source is readable.
    #[must_use]
    pub const fn is_readable(&self) -> bool {
        self.ready.is_readable()
    }

    /// Returns true if the source is writable.
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.ready.is_writable()
    }
}

/// Buffer filled by [`Reactor::poll`], reused across polls.
///
/// Registrations are one-shot, so every reported event is kept: the buffer
/// grows past its initial capacity rather than drop one. Its length after a
/// poll is the worker's event queue depth.
#[derive(Debug, Default)]
pub struct Events {
    inner: Vec<Event>,
}

impl Events {
    /// An empty buffer with room for `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
        }
    }

    /// Clears all events, keeping the allocation.
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub(crate) fn push(&mut self, event: Event) {
        self.inner.push(event);
    }

    /// Returns the number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if no events are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterates over events.
    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.inner.iter()
    }
}

impl<'a> IntoIterator for &'a Events {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Readiness multiplexer.
///
/// Implementations must be `Send + Sync`; the worker shares its reactor with
/// [`WorkerHandle`](crate::server::WorkerHandle)s that call [`wake`](Self::wake).
pub trait Reactor: Send + Sync {
    /// Registers interest in I/O events for a source.
    ///
    /// # Errors
    ///
    /// `io::ErrorKind::AlreadyExists` if the token is in use, or the OS error
    /// from the underlying multiplexer.
    fn register(&self, source: RawSource, token: Token, interest: Interest) -> io::Result<()>;

    /// Re-arms or changes the interest set of an existing registration.
    ///
    /// # Errors
    ///
    /// `io::ErrorKind::NotFound` if the token is not registered.
    fn modify(&self, token: Token, interest: Interest) -> io::Result<()>;

    /// Removes a registration. Must be called before the source is closed.
    ///
    /// # Errors
    ///
    /// `io::ErrorKind::NotFound` if the token is not registered.
    fn deregister(&self, token: Token) -> io::Result<()>;

    /// Polls for I/O events, blocking up to `timeout`.
    ///
    /// `events` is cleared first. Returns the number of events stored; `Ok(0)`
    /// on timeout or wake.
    ///
    /// # Errors
    ///
    /// Returns the OS error from the wait call.
    fn poll(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize>;

    /// Wakes the reactor from a blocking [`poll()`](Self::poll) call.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the wake signal cannot be sent.
    fn wake(&self) -> io::Result<()>;

    /// Returns the number of active registrations.
    fn registration_count(&self) -> usize;

    /// Returns `true` if no sources are currently registered.
    fn is_empty(&self) -> bool {
        self.registration_count() == 0
    }
}
