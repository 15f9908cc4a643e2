//! Diagnostic logging setup for the Engine.
//!
//! The Policy Engine's `verbose` flag routes allow/deny/transform
//! decisions through this facade rather than printing directly, keeping
//! diagnostics out of the core and in the hands of whichever collaborator
//! initializes the subscriber.

use crate::error::{EngineError, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global `tracing` subscriber at the given filter level
/// (e.g. `"info"`, `"engine=debug"`).
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level)
                .map_err(|e| EngineError::InvalidArgument(format!("invalid log level: {e}")))?,
        )
        .with_target(true)
        .try_init()
        .map_err(|_| EngineError::InvalidArgument("logging already initialized".into()))
}
