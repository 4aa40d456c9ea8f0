//! Core types, constants, and boundary traits.
//!
//! This module carries everything the other layers share:
//!
//! - **Constants**: profile UUIDs, record geometry, segmentation limits
//! - **Boundary traits**: [`RasGatt`], [`GattClient`] toward the host stack
//! - **Controller events**: [`SubeventResult`] from the CS event source
//! - **Errors**: the top-level [`RasError`]

pub mod constants;
mod cs;
mod error;
mod traits;

pub use cs::{CsStep, SubeventResult};
pub use error::RasError;
pub use traits::{Characteristic, ConnId, GattClient, GattError, RasGatt, Subscription};
