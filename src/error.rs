//! Error handling for Engine operations.
//!
//! This module defines the closed error taxonomy used throughout the
//! Engine. All public APIs return `Result<T, EngineError>` for consistent
//! error handling.

use std::io;

use thiserror::Error;

/// Result type for Engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur during Engine operations.
///
/// This is a closed taxonomy: every failure mode the Engine can produce
/// maps to exactly one of these variants. `ok` and the informational
/// `transformed` status from the design are not represented here — a
/// transform always returns `Ok(())` and is surfaced through the audit
/// verdict, not the error channel.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A request argument was malformed or out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested path, view, branch, or blob does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The destination of a create/move/hardlink already exists.
    #[error("already exists: {0}")]
    Exists(String),

    /// A path component expected to be a directory was not one.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// A path expected to be a file (or non-directory) was a directory.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// The access context lacked the permission or capability required.
    #[error("permission denied: {0}")]
    PermDenied(String),

    /// A quota limit would be exceeded by the mutation.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// A three-way merge produced a conflicting path.
    #[error("merge conflict: {0}")]
    Conflict(String),

    /// The Policy Engine denied the operation outright.
    #[error("denied by policy: {0}")]
    DeniedByPolicy(String),

    /// I/O error from the underlying sector device.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The on-disk volume format failed validation (magic, version,
    /// length, or checksum mismatch).
    #[error("format error: {0}")]
    Format(String),

    /// A fixed-capacity structure (e.g. the audit ring) would overflow.
    #[error("capacity exceeded: {0}")]
    Capacity(String),

    /// Symlink resolution exceeded the bounded dereference depth.
    #[error("symlink loop detected: {0}")]
    LoopDetected(String),
}
