//! # RAS Protocol
//!
//! **R**anging **S**ervice over GATT - bulk transport for Bluetooth
//! Channel Sounding ranging data.
//!
//! A Server (RRSP) reassembles raw controller subevent reports into
//! canonical ranging data records, keeps a bounded per-connection pool of
//! them, and streams them on demand in MTU-sized, sequence-numbered
//! segments gated by a control point handshake. A Client (RREQ) drives
//! the GET/ACK handshake, validates segment ordering, and reconstructs
//! the original record byte for byte.
//!
//! - **Bounded memory**: fixed buffer pool, oldest-unused eviction,
//!   claims pin records while they stream
//! - **One transfer per connection**: concurrent requests answered with
//!   Server Busy, ordering enforced end to end
//! - **Failure containment**: disconnect tears everything down, transport
//!   hiccups rewind and retry, peers never see partial state
//!
//! ## Feature Flags
//!
//! - `server` (default): RRSP session state machine
//! - `client` (default): RREQ session state machine
//! - `service` (default): tokio work-queue service owning pool + sessions
//!
//! ## Modules
//!
//! - [`core`]: constants, boundary traits, controller event types
//! - [`wire`]: bit-exact frame codecs
//! - [`buffer`]: ranging data buffer pool with claim lifecycle
//! - [`server`]: server role (requires `server` feature)
//! - [`client`]: client role (requires `client` feature)
//! - [`steps`]: step-data walk over reassembled records
//!
//! ## Example Usage
//!
//! ```rust
//! use ras_protocol::buffer::{PoolConfig, RdBufferPool};
//! use ras_protocol::core::{ConnId, CsStep, SubeventResult};
//! use ras_protocol::core::constants::CS_DONE_STATUS_COMPLETE;
//!
//! let mut pool = RdBufferPool::new(PoolConfig::default());
//! let conn = ConnId(1);
//!
//! // One subevent carrying the terminal status completes the record.
//! let events = pool.on_subevent_result(conn, &SubeventResult {
//!     procedure_counter: 5,
//!     config_id: 0,
//!     start_acl_conn_event: 0,
//!     frequency_compensation: 0,
//!     procedure_done_status: CS_DONE_STATUS_COMPLETE,
//!     subevent_done_status: CS_DONE_STATUS_COMPLETE,
//!     procedure_abort_reason: 0,
//!     subevent_abort_reason: 0,
//!     reference_power_level: -40,
//!     selected_tx_power: 0,
//!     antenna_paths_mask: 1,
//!     steps: vec![CsStep { mode: 1, channel: 2, data: vec![0; 12] }],
//! });
//!
//! assert!(!events.is_empty());
//! assert!(pool.ready_check(conn, 5));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core types and boundary traits (always included)
pub mod core;

// Wire codecs (always included)
pub mod wire;

// Ranging data buffer pool (always included)
pub mod buffer;

// Step-data walk (always included)
pub mod steps;

// Server role (feature-gated)
#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub mod server;

// Client role (feature-gated)
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod client;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core types
    pub use crate::core::{
        Characteristic, ConnId, CsStep, GattClient, GattError, RasError, RasGatt, SubeventResult,
        Subscription,
    };

    // Wire types
    pub use crate::wire::{
        FrameError, RangingHeader, RasCpCommand, RasCpResponse, RasFeatures, ResponseCode,
        Segment, SegmentHeader, SubeventHeader,
    };

    // Buffer pool
    pub use crate::buffer::{BufferError, ClaimTicket, PoolConfig, RdBufferEvent, RdBufferPool};

    // Step walk
    pub use crate::steps::{StepLengthTable, parse_ranging_data};

    // Server role (when enabled)
    #[cfg(feature = "server")]
    pub use crate::server::{RrspSession, ServerConfig, ServerError};
    #[cfg(feature = "service")]
    pub use crate::server::{RrspEvent, RrspHandle, RrspService, RrspServiceBuilder};

    // Client role (when enabled)
    #[cfg(feature = "client")]
    pub use crate::client::{
        ClientError, OverwrittenOutcome, RasHandles, RreqSession, TransferComplete, TransferError,
    };
}

// Re-export commonly used items at crate root
pub use buffer::{RdBufferEvent, RdBufferPool};
pub use core::{ConnId, RasError, SubeventResult};

#[cfg(feature = "client")]
pub use client::RreqSession;
#[cfg(feature = "server")]
pub use server::RrspSession;
#[cfg(feature = "service")]
pub use server::{RrspHandle, RrspService};
