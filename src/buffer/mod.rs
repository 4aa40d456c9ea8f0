//! Ranging data buffer pool with reassembly and claim lifecycle.
//!
//! - [`RdBufferPool`]: the shared fixed pool, keyed by (connection,
//!   ranging counter)
//! - [`ClaimTicket`]: move-only read claim pinning a record against
//!   eviction while it streams
//! - [`RdBufferEvent`]: stored/overwritten notifications for the owner to
//!   fan out

mod pool;
mod slot;

pub use pool::{BufferError, ClaimTicket, PoolConfig, RdBufferEvent, RdBufferPool};
