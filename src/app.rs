//! Application layer: handlers bound to request paths.
//!
//! The engine resolves the upgrade request's path through an [`AppRegistry`]
//! once per connection. The resolved [`Application`] then receives every
//! whole data message on that connection and may answer each with a reply.
//!
//! ```
//! use std::sync::Arc;
//! use wsengine::app::{AppRegistry, EchoApp, Registry};
//!
//! let mut registry = Registry::new();
//! registry.register("/echo", Arc::new(EchoApp));
//! assert!(registry.find("/echo").is_some());
//! assert!(registry.find("/other").is_none());
//! ```

use crate::net::websocket::{ConnectionHandle, Message};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A message an application sends back on the connection it was called for.
pub type Reply = Message;

/// Handler for the messages of one kind of endpoint.
///
/// One instance serves every connection routed to it, from every worker
/// thread at once.
pub trait Application: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Subprotocol advertised in `Sec-WebSocket-Protocol` when the client offers it.
    fn protocol(&self) -> Option<&str> {
        None
    }

    /// Called once the upgrade has been answered with 101.
    fn on_open(&self, _conn: &ConnectionHandle) {}

    /// Called with every whole Text or Binary message.
    fn on_message(&self, conn: &ConnectionHandle, message: Message) -> Option<Reply>;

    /// Called once when an opened connection is disconnected, for any reason.
    fn on_close(&self, _conn: &ConnectionHandle) {}
}

/// Resolves a request path to the application serving it.
pub trait AppRegistry: Send + Sync {
    /// The application for `path`, if any.
    fn find(&self, path: &str) -> Option<Arc<dyn Application>>;
}

/// Exact-match path registry.
#[derive(Default)]
pub struct Registry {
    apps: HashMap<String, Arc<dyn Application>>,
}

impl Registry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `app` to `path`, replacing any previous binding.
    pub fn register(&mut self, path: impl Into<String>, app: Arc<dyn Application>) -> &mut Self {
        self.apps.insert(path.into(), app);
        self
    }

    /// Number of bound paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.apps.len()
    }

    /// True when nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}

impl AppRegistry for Registry {
    fn find(&self, path: &str) -> Option<Arc<dyn Application>> {
        self.apps.get(path).cloned()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut paths: Vec<&String> = self.apps.keys().collect();
        paths.sort();
        f.debug_struct("Registry").field("paths", &paths).finish()
    }
}

/// Replies to every message with an identical one.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoApp;

impl Application for EchoApp {
    fn name(&self) -> &str {
        "echo"
    }

    fn on_message(&self, _conn: &ConnectionHandle, message: Message) -> Option<Reply> {
        Some(message)
    }
}
