//! Shutdown coordination between the listener and the workers.
//!
//! One [`ShutdownSignal`] is cloned into the listener thread and every worker.
//! Each loop checks it once per iteration; since all of them block for at
//! most one poll timeout, a shutdown is observed within that bound.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Phases of a server shutdown, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ShutdownPhase {
    /// Accepting and serving connections.
    Running = 0,
    /// The listener stopped accepting; workers close their connections.
    Draining = 1,
    /// Every thread has exited.
    Stopped = 2,
}

impl ShutdownPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Draining => write!(f, "Draining"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

struct SignalState {
    phase: AtomicU8,
    lock: Mutex<()>,
    changed: Condvar,
}

/// Shared shutdown flag with phase tracking.
///
/// ```
/// use wsengine::server::{ShutdownPhase, ShutdownSignal};
///
/// let signal = ShutdownSignal::new();
/// let worker_view = signal.clone();
/// assert!(signal.begin_shutdown());
/// assert!(worker_view.is_shutting_down());
/// signal.mark_stopped();
/// assert_eq!(worker_view.phase(), ShutdownPhase::Stopped);
/// ```
#[derive(Clone)]
pub struct ShutdownSignal {
    state: Arc<SignalState>,
}

impl ShutdownSignal {
    /// A signal in the [`Running`](ShutdownPhase::Running) phase.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(SignalState {
                phase: AtomicU8::new(ShutdownPhase::Running as u8),
                lock: Mutex::new(()),
                changed: Condvar::new(),
            }),
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> ShutdownPhase {
        ShutdownPhase::from_u8(self.state.phase.load(Ordering::Acquire))
    }

    /// True once shutdown has begun.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.phase() != ShutdownPhase::Running
    }

    /// True once every thread has exited.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.phase() == ShutdownPhase::Stopped
    }

    /// Moves from `Running` to `Draining`.
    ///
    /// Returns `false` if shutdown had already begun.
    pub fn begin_shutdown(&self) -> bool {
        let result = self.state.phase.compare_exchange(
            ShutdownPhase::Running as u8,
            ShutdownPhase::Draining as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if result.is_ok() {
            self.notify();
        }
        result.is_ok()
    }

    /// Marks the server as fully stopped.
    pub fn mark_stopped(&self) {
        self.state
            .phase
            .store(ShutdownPhase::Stopped as u8, Ordering::Release);
        self.notify();
    }

    /// Blocks until the server is stopped or `timeout` elapses.
    ///
    /// Returns `true` if the server stopped.
    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.state.lock.lock();
        while !self.is_stopped() {
            if self
                .state
                .changed
                .wait_until(&mut guard, deadline)
                .timed_out()
            {
                return self.is_stopped();
            }
        }
        true
    }

    fn notify(&self) {
        let _guard = self.state.lock.lock();
        self.state.changed.notify_all();
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("phase", &self.phase())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn initial_state_is_running() {
        init_test("initial_state_is_running");
        let signal = ShutdownSignal::new();
        crate::assert_with_log!(
            signal.phase() == ShutdownPhase::Running,
            "phase",
            ShutdownPhase::Running,
            signal.phase()
        );
        crate::assert_with_log!(
            !signal.is_shutting_down(),
            "not shutting down",
            false,
            signal.is_shutting_down()
        );
        crate::test_complete!("initial_state_is_running");
    }

    #[test]
    fn begin_shutdown_is_idempotent() {
        init_test("begin_shutdown_is_idempotent");
        let signal = ShutdownSignal::new();
        let first = signal.begin_shutdown();
        crate::assert_with_log!(first, "first shutdown", true, first);
        let second = signal.begin_shutdown();
        crate::assert_with_log!(!second, "second shutdown rejected", false, second);
        crate::assert_with_log!(
            signal.phase() == ShutdownPhase::Draining,
            "draining",
            ShutdownPhase::Draining,
            signal.phase()
        );
        crate::test_complete!("begin_shutdown_is_idempotent");
    }

    #[test]
    fn wait_stopped_wakes_on_mark() {
        init_test("wait_stopped_wakes_on_mark");
        let signal = ShutdownSignal::new();
        let waiter = signal.clone();
        let thread = std::thread::spawn(move || waiter.wait_stopped(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(20));
        signal.begin_shutdown();
        signal.mark_stopped();
        let stopped = thread.join().unwrap();
        crate::assert_with_log!(stopped, "waiter saw stop", true, stopped);
        crate::test_complete!("wait_stopped_wakes_on_mark");
    }

    #[test]
    fn wait_stopped_times_out() {
        init_test("wait_stopped_times_out");
        let signal = ShutdownSignal::new();
        let stopped = signal.wait_stopped(Duration::from_millis(10));
        crate::assert_with_log!(!stopped, "timed out", false, stopped);
        crate::test_complete!("wait_stopped_times_out");
    }

    #[test]
    fn display_formatting() {
        init_test("display_formatting");
        let cases = [
            (ShutdownPhase::Running, "Running"),
            (ShutdownPhase::Draining, "Draining"),
            (ShutdownPhase::Stopped, "Stopped"),
        ];
        for (phase, expected) in cases {
            let actual = format!("{phase}");
            crate::assert_with_log!(actual == expected, "phase display", expected, actual);
        }
        crate::test_complete!("display_formatting");
    }
}
