//! Event-loop machinery shared by the listener and the I/O workers.
//!
//! - [`reactor`]: readiness polling over the `polling` crate

pub mod reactor;
