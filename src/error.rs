use std::io;

use thiserror::Error;

/// Errors surfaced by the public selector and timer interfaces.
///
/// Removal calls that match nothing are not errors; they return
/// success silently.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The descriptor set cannot hold another pollable entry.
    #[error("listener table is full")]
    Capacity,

    /// The target loop has shut down or the timer is stopped.
    #[error("already shut down")]
    AlreadyShutDown,

    /// The operation may not be called from the worker thread it targets.
    #[error("not allowed on the owning worker thread")]
    WrongThread,

    /// An underlying system call failed.
    #[error("system error: {0}")]
    System(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, crate::Error>;
