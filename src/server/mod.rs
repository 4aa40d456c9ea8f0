//! Server role (RRSP): holds reassembled ranging data and streams it to
//! the requesting peer.
//!
//! - [`RrspSession`]: per-connection control-point and streaming state
//!   machine, driven by its single owner
//! - [`RrspService`] (feature `service`): the async work-queue owner tying
//!   sessions, the buffer pool, and the GATT boundary together

mod session;
#[cfg(feature = "service")]
mod service;

pub use session::RrspSession;
#[cfg(feature = "service")]
pub use service::{RrspEvent, RrspHandle, RrspService, RrspServiceBuilder, SessionStatus};

use std::time::Duration;

use thiserror::Error;

use crate::core::GattError;
use crate::core::constants::DEFAULT_ACK_TIMEOUT;
use crate::wire::RasFeatures;

/// Server configuration.
#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    /// Feature bitmap exposed through the RAS Features characteristic.
    pub features: RasFeatures,
    /// Concurrent connections served.
    pub max_sessions: usize,
    /// Ranging data records retained per connection.
    pub buffers_per_conn: usize,
    /// How long to wait for the client's ACK after the Complete Ranging
    /// Data response before dropping the stalled record. `None` disables
    /// the timeout.
    pub ack_timeout: Option<Duration>,
    /// Free a record as soon as the client acknowledges it. When `false`
    /// the record is kept, marked acknowledged, and evicted first.
    pub release_acked: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            features: RasFeatures::NONE,
            max_sessions: 2,
            buffers_per_conn: 2,
            ack_timeout: Some(DEFAULT_ACK_TIMEOUT),
            release_acked: true,
        }
    }
}

/// Errors that can occur in the server role.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Control point written without an indicate subscription.
    #[error("peer has not subscribed to control point indications")]
    NotSubscribed,

    /// Control point write oversized or otherwise rejected before parsing.
    #[error("control point write rejected")]
    WriteRejected,

    /// No session bound to the connection.
    #[error("no session for connection")]
    UnknownConnection,

    /// A session is already bound to the connection.
    #[error("session already allocated")]
    AlreadyAllocated,

    /// Every session slot is in use.
    #[error("no free session slot")]
    SessionsExhausted,

    /// GATT boundary failure.
    #[error("gatt error: {0}")]
    Gatt(#[from] GattError),

    /// The service task is gone.
    #[error("service shut down")]
    Shutdown,
}
