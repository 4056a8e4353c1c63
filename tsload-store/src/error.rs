use thiserror::Error;

/// Errors returned by a [`SampleStore`](crate::SampleStore).
///
/// The harness treats all of these as per-operation failures: they are counted and the worker
/// moves on to its next unit of work.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or did not accept the connection.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store received the request but refused to process it.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Any error emitted from the underlying [`reqwest`] client.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Errors encoding or decoding JSON payloads.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// A convenience alias that defaults our [`StoreError`] type.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;
