//! Acceptor thread: accepts sockets and hands them to the pool.

use super::pool::WorkerPool;
use super::shutdown::ShutdownSignal;
use crate::error::ServerError;
use crate::runtime::reactor::{raw_source, Events, Interest, PollReactor, Reactor, Token};
use crate::tracing_compat::{debug, error, info, warn};

use std::io;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

const LISTENER: Token = Token(0);

pub(crate) struct Listener {
    pub(crate) listener: TcpListener,
    pub(crate) reactor: Arc<PollReactor>,
    pub(crate) pool: WorkerPool,
    pub(crate) shutdown: ShutdownSignal,
    pub(crate) poll_timeout: Duration,
}

impl Listener {
    /// Accepts until shutdown or failure, then stops the pool.
    pub(crate) fn run(mut self) -> Result<(), ServerError> {
        let result = self.accept_loop();
        if let Err(err) = &result {
            error!(error = %err, "listener failed");
        }
        if let Err(err) = self.reactor.deregister(LISTENER) {
            debug!(error = %err, "listener deregister failed");
        }
        self.shutdown.begin_shutdown();
        self.pool.join();
        self.shutdown.mark_stopped();
        info!("server stopped");
        result
    }

    fn accept_loop(&mut self) -> Result<(), ServerError> {
        self.reactor
            .register(raw_source(&self.listener), LISTENER, Interest::READABLE)?;
        let mut events = Events::with_capacity(8);
        while !self.shutdown.is_shutting_down() {
            self.reactor.poll(&mut events, Some(self.poll_timeout))?;
            if events.iter().any(|event| event.token == LISTENER) {
                self.accept_ready()?;
                self.reactor.modify(LISTENER, Interest::READABLE)?;
            }
        }
        Ok(())
    }

    fn accept_ready(&mut self) -> Result<(), ServerError> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    self.pool.dispatch(stream, peer)?;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    return Ok(());
                }
            }
        }
    }
}
