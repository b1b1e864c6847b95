//! Tracing compatibility layer for structured logging.
//!
//! Every module logs through this shim rather than naming `tracing` directly:
//!
//! - **With `tracing-integration`** (default): re-exports the `tracing` macros.
//! - **Without it**: the same macro names expand to nothing, so the engine
//!   carries no logging cost at all.
//!
//! # Usage
//!
//! ```rust,ignore
//! use wsengine::tracing_compat::{debug, warn};
//!
//! debug!(worker = id, peer = %addr, "connection admitted");
//! warn!(code = 1002, "protocol violation");
//! ```

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    //! No-op implementations when tracing is disabled.

    /// No-op trace-level logging macro.
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {};
    }

    /// No-op debug-level logging macro.
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => {};
    }

    /// No-op info-level logging macro.
    #[macro_export]
    macro_rules! info {
        ($($arg:tt)*) => {};
    }

    /// No-op warn-level logging macro.
    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {};
    }

    /// No-op error-level logging macro.
    #[macro_export]
    macro_rules! error {
        ($($arg:tt)*) => {};
    }

    pub use crate::{debug, error, info, trace, warn};
}

#[cfg(not(feature = "tracing-integration"))]
pub use noop::*;
