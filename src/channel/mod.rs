//! Cross-thread handoff primitives.
//!
//! The only queue on the per-connection path is [`mpsc`], the bounded
//! inbound queue between the listener and each worker.

pub mod mpsc;
