//! Bounded MPSC (multi-producer, single-consumer) blocking channel.
//!
//! Used as each worker's inbound queue: the listener thread sends accepted
//! sockets, the worker receives them between reactor polls.
//!
//! ```text
//! listener ──send()──► [ VecDeque, capacity N ] ──try_recv()/recv_timeout()──► worker
//!            blocks while full                      never blocks / bounded wait
//! ```
//!
//! Dropping every `Sender` closes the channel once the queue drains; dropping
//! the `Receiver` makes every pending and future send fail with the value
//! handed back.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Error returned when a value could not be sent. The value is handed back.
#[derive(PartialEq, Eq)]
pub enum SendError<T> {
    /// The receiver was dropped.
    Disconnected(T),
    /// The channel is at capacity (non-blocking sends only).
    Full(T),
}

impl<T> SendError<T> {
    /// Recovers the value that was not sent.
    pub fn into_inner(self) -> T {
        match self {
            Self::Disconnected(value) | Self::Full(value) => value,
        }
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected(_) => f.write_str("Disconnected(..)"),
            Self::Full(_) => f.write_str("Full(..)"),
        }
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected(_) => write!(f, "sending on a closed channel"),
            Self::Full(_) => write!(f, "channel is full"),
        }
    }
}

impl<T> std::error::Error for SendError<T> {}

/// Error returned when no value could be received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    /// Nothing queued right now.
    Empty,
    /// Nothing arrived within the wait.
    Timeout,
    /// Every sender was dropped and the queue is empty.
    Disconnected,
}

impl fmt::Display for RecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "channel is empty"),
            Self::Timeout => write!(f, "timed out waiting on channel"),
            Self::Disconnected => write!(f, "receiving on a closed channel"),
        }
    }
}

impl std::error::Error for RecvError {}

/// Internal channel state shared between senders and receivers.
#[derive(Debug)]
struct ChannelInner<T> {
    queue: VecDeque<T>,
    capacity: usize,
    receiver_dropped: bool,
    sender_count: usize,
}

impl<T> ChannelInner<T> {
    fn has_capacity(&self) -> bool {
        self.queue.len() < self.capacity
    }

    fn is_closed(&self) -> bool {
        self.sender_count == 0
    }
}

/// Shared state wrapper with condition variables for notification.
struct ChannelShared<T> {
    inner: Mutex<ChannelInner<T>>,
    /// Notifies senders when space becomes available.
    space_available: Condvar,
    /// Notifies the receiver when a message becomes available.
    message_available: Condvar,
}

/// Creates a bounded MPSC channel with the given capacity.
///
/// A capacity of zero is raised to one.
///
/// # Example
///
/// ```
/// use wsengine::channel::mpsc;
///
/// let (tx, rx) = mpsc::channel::<u32>(4);
/// tx.send(7).unwrap();
/// assert_eq!(rx.try_recv(), Ok(7));
/// ```
#[must_use]
pub fn channel<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let capacity = capacity.max(1);
    let shared = Arc::new(ChannelShared {
        inner: Mutex::new(ChannelInner {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            receiver_dropped: false,
            sender_count: 1,
        }),
        space_available: Condvar::new(),
        message_available: Condvar::new(),
    });
    let sender = Sender {
        shared: Arc::clone(&shared),
    };
    (sender, Receiver { shared })
}

/// The sending side of an MPSC channel.
pub struct Sender<T> {
    shared: Arc<ChannelShared<T>>,
}

impl<T> Sender<T> {
    /// Sends a value, blocking while the channel is full.
    ///
    /// # Errors
    ///
    /// `SendError::Disconnected(value)` if the receiver has been dropped.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        let mut inner = self.shared.inner.lock();
        loop {
            if inner.receiver_dropped {
                return Err(SendError::Disconnected(value));
            }
            if inner.has_capacity() {
                inner.queue.push_back(value);
                drop(inner);
                self.shared.message_available.notify_one();
                return Ok(());
            }
            self.shared.space_available.wait(&mut inner);
        }
    }

    /// Attempts to send a value without blocking.
    ///
    /// # Errors
    ///
    /// - `SendError::Disconnected(value)` if the receiver has been dropped
    /// - `SendError::Full(value)` if the channel is at capacity
    pub fn try_send(&self, value: T) -> Result<(), SendError<T>> {
        let mut inner = self.shared.inner.lock();
        if inner.receiver_dropped {
            return Err(SendError::Disconnected(value));
        }
        if !inner.has_capacity() {
            return Err(SendError::Full(value));
        }
        inner.queue.push_back(value);
        drop(inner);
        self.shared.message_available.notify_one();
        Ok(())
    }

    /// Returns true if the receiver has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.inner.lock().receiver_dropped
    }

    /// Returns the number of queued values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.inner.lock().queue.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.shared.inner.lock().sender_count += 1;
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock();
        inner.sender_count -= 1;
        let all_senders_gone = inner.sender_count == 0;
        drop(inner);
        if all_senders_gone {
            self.shared.message_available.notify_all();
        }
    }
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender").field("len", &self.len()).finish()
    }
}

/// The receiving side of an MPSC channel.
pub struct Receiver<T> {
    shared: Arc<ChannelShared<T>>,
}

impl<T> Receiver<T> {
    /// Attempts to receive a value without blocking.
    ///
    /// # Errors
    ///
    /// - `RecvError::Empty` if the channel is empty but senders exist
    /// - `RecvError::Disconnected` if all senders dropped and queue is empty
    pub fn try_recv(&self) -> Result<T, RecvError> {
        let mut inner = self.shared.inner.lock();
        match inner.queue.pop_front() {
            Some(value) => {
                drop(inner);
                self.shared.space_available.notify_one();
                Ok(value)
            }
            None if inner.is_closed() => Err(RecvError::Disconnected),
            None => Err(RecvError::Empty),
        }
    }

    /// Receives a value, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// - `RecvError::Timeout` if nothing arrived in time
    /// - `RecvError::Disconnected` if all senders dropped and queue is empty
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.shared.inner.lock();
        loop {
            if let Some(value) = inner.queue.pop_front() {
                drop(inner);
                self.shared.space_available.notify_one();
                return Ok(value);
            }
            if inner.is_closed() {
                return Err(RecvError::Disconnected);
            }
            if self
                .shared
                .message_available
                .wait_until(&mut inner, deadline)
                .timed_out()
                && inner.queue.is_empty()
            {
                return Err(if inner.is_closed() {
                    RecvError::Disconnected
                } else {
                    RecvError::Timeout
                });
            }
        }
    }

    /// Returns true if all senders have been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.inner.lock().is_closed()
    }

    /// Returns the number of messages waiting in the queue.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.inner.lock().queue.len()
    }

    /// Returns true if the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the channel's capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.inner.lock().capacity
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.shared.inner.lock().receiver_dropped = true;
        self.shared.space_available.notify_all();
    }
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
