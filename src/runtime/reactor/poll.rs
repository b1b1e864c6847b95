//! Reactor backed by the `polling` crate.
//!
//! `polling` wraps epoll on Linux, kqueue on the BSDs and macOS, and wepoll
//! on Windows. Its registrations are one-shot, which matches the worker
//! loop: every handled event is followed by a `modify` that re-arms the
//! source with the interest the connection needs next.
//!
//! Only readable and writable readiness is reported. A hangup or socket
//! error wakes the source as readable (or writable); the connection then
//! sees end of stream from `read` or an error from `write` and is
//! disconnected by the worker.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 PollReactor                  │
//! │  ┌─────────────┐       ┌──────────────────┐  │
//! │  │   Poller    │       │ registration map │  │
//! │  │  (polling)  │       │ Token → raw, int │  │
//! │  └─────────────┘       └──────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```

use super::{Event, Events, Interest, RawSource, Reactor, Token};
use crate::tracing_compat::trace;
use parking_lot::Mutex;
use polling::{Event as PollEvent, Poller};
use std::collections::HashMap;
use std::io;
use std::time::Duration;

/// Registration state for a source.
#[derive(Debug, Clone, Copy)]
struct RegistrationInfo {
    raw: RawSource,
    interest: Interest,
}

/// Readiness reactor over [`polling::Poller`].
pub struct PollReactor {
    poller: Poller,
    registrations: Mutex<HashMap<Token, RegistrationInfo>>,
    /// Scratch buffer reused across polls (polling 2.x uses `Vec<Event>`).
    scratch: Mutex<Vec<PollEvent>>,
}

impl PollReactor {
    /// Creates a new reactor.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS multiplexer cannot be created (e.g. out of
    /// file descriptors).
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poller: Poller::new()?,
            registrations: Mutex::new(HashMap::new()),
            scratch: Mutex::new(Vec::new()),
        })
    }

    fn interest_to_poll_event(token: Token, interest: Interest) -> PollEvent {
        let key = token.0;
        match (interest.is_readable(), interest.is_writable()) {
            (true, true) => PollEvent::all(key),
            (true, false) => PollEvent::readable(key),
            (false, true) => PollEvent::writable(key),
            (false, false) => PollEvent::none(key),
        }
    }

    fn poll_event_to_interest(event: &PollEvent) -> Interest {
        let mut interest = Interest::NONE;
        if event.readable {
            interest |= Interest::READABLE;
        }
        if event.writable {
            interest |= Interest::WRITABLE;
        }
        interest
    }
}

impl Reactor for PollReactor {
    fn register(&self, source: RawSource, token: Token, interest: Interest) -> io::Result<()> {
        if token.0 == usize::MAX {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "token usize::MAX is reserved",
            ));
        }
        let mut regs = self.registrations.lock();
        if regs.contains_key(&token) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "token already registered",
            ));
        }
        self.poller
            .add(source, Self::interest_to_poll_event(token, interest))?;
        regs.insert(
            token,
            RegistrationInfo {
                raw: source,
                interest,
            },
        );
        trace!(token = token.0, "source registered");
        Ok(())
    }

    fn modify(&self, token: Token, interest: Interest) -> io::Result<()> {
        let mut regs = self.registrations.lock();
        let info = regs
            .get_mut(&token)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "token not registered"))?;
        self.poller
            .modify(info.raw, Self::interest_to_poll_event(token, interest))?;
        info.interest = interest;
        Ok(())
    }

    fn deregister(&self, token: Token) -> io::Result<()> {
        let info = self
            .registrations
            .lock()
            .remove(&token)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "token not registered"))?;
        self.poller.delete(info.raw)?;
        trace!(token = token.0, "source deregistered");
        Ok(())
    }

    fn poll(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        events.clear();
        let mut scratch = self.scratch.lock();
        scratch.clear();
        match self.poller.wait(&mut scratch, timeout) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(err) => return Err(err),
        }
        for poll_event in scratch.iter() {
            events.push(Event::new(
                Token(poll_event.key),
                Self::poll_event_to_interest(poll_event),
            ));
        }
        Ok(events.len())
    }

    fn wake(&self) -> io::Result<()> {
        self.poller.notify()
    }

    fn registration_count(&self) -> usize {
        self.registrations.lock().len()
    }
}

impl std::fmt::Debug for PollReactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reg_count = self.registrations.lock().len();
        f.debug_struct("PollReactor")
            .field("registration_count", &reg_count)
            .finish_non_exhaustive()
    }
}
