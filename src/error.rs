use thiserror::Error;

/// Errors surfaced by the streaming tool-call extraction core.
///
/// Mirrors the shape of a provider-client error enum, but from the server
/// side: configuration and validation errors are returned before a stream
/// starts, while parse errors and disconnects are handled entirely inside
/// the driver and never escape as a top-level `Err` once streaming begins.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("tool-call parse error: {0}")]
    Parse(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("client disconnected")]
    ClientDisconnect,

    #[error("sink write failed: {0}")]
    Sink(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type StreamResult<T> = Result<T, StreamError>;
