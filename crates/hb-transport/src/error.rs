use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport not initialized")]
    NotInitialized,
    #[error("transport initialization failed: {0}")]
    InitFailed(String),
    #[error("transmit queue full ({0} messages)")]
    QueueFull(usize),
    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),
    #[error("I/O error: {0}")]
    Io(String),
}
