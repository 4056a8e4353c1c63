use std::time::Duration;

use thiserror::Error;

/// Errors when starting a [`Dispatcher`](crate::Dispatcher).
#[derive(Debug, Error, Eq, PartialEq)]
pub enum DispatchError {
    /// Workers were already started once.
    #[error("workers have already been started")]
    AlreadyStarted,

    /// The dispatcher has been shut down.
    #[error("dispatcher has been shut down")]
    Stopped,
}

/// Errors when shutting down a [`Dispatcher`](crate::Dispatcher).
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ShutdownError {
    /// Some workers did not terminate within the shutdown timeout and were abandoned.
    #[error("workers {workers:?} did not stop within {timeout:?}")]
    StuckWorkers {
        /// Indexes of the abandoned workers, in ascending order.
        workers: Vec<usize>,
        /// The timeout that elapsed.
        timeout: Duration,
    },
}
