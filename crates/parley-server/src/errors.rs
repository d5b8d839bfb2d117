//! Server startup errors.

use thiserror::Error;

use crate::bus::BusError;

/// Errors that prevent the server from starting.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding the listener failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The bus receive stream could not be opened.
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
}
