//! Top-level error type for the Ranging Service.

use thiserror::Error;

use super::traits::GattError;

/// Aggregate error covering every layer of the profile.
#[derive(Debug, Error)]
pub enum RasError {
    /// Wire codec error.
    #[error("frame error: {0}")]
    Frame(#[from] crate::wire::FrameError),

    /// Ranging data buffer pool error.
    #[error("buffer error: {0}")]
    Buffer(#[from] crate::buffer::BufferError),

    /// GATT boundary error.
    #[error("gatt error: {0}")]
    Gatt(#[from] GattError),

    /// Server session error.
    #[cfg(feature = "server")]
    #[error("server error: {0}")]
    Server(#[from] crate::server::ServerError),

    /// Client session error.
    #[cfg(feature = "client")]
    #[error("client error: {0}")]
    Client(#[from] crate::client::ClientError),
}
