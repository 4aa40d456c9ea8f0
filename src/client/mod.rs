//! Client role (RREQ): retrieves ranging data from a peer server.
//!
//! [`RreqSession`] drives the GET_RD/ACK_RD handshake and reassembles the
//! segment stream for one connection. Service discovery, subscription,
//! and pairing stay with the embedding application; the session only
//! needs the discovered [`RasHandles`] and a [`GattClient`]
//! implementation for control point writes.
//!
//! [`GattClient`]: crate::core::GattClient

mod session;

pub use session::{
    ClientError, OverwrittenOutcome, RasHandles, RreqSession, TransferComplete, TransferError,
};
