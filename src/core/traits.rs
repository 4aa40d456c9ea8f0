//! Boundary types and traits toward the platform Bluetooth stack.
//!
//! The Ranging Service does not talk to a controller or an ATT bearer
//! directly. Everything below the profile - attribute registration,
//! encryption enforcement, subscription bookkeeping, the actual
//! notify/indicate/write primitives - lives behind the traits in this
//! module and is supplied by the embedding application.

use thiserror::Error;

use super::constants;

/// Connection identity.
///
/// Opaque handle for one ACL connection, assigned by the host stack.
/// All pool and session state is keyed by this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub u16);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn:{:04x}", self.0)
    }
}

/// Characteristics of the Ranging Service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    /// RAS Features (read-only feature bitmap).
    RasFeatures,
    /// Real-time Ranging Data (unsupported, present as a stub).
    RealtimeRangingData,
    /// On-demand Ranging Data (segmented record transport).
    OnDemandRangingData,
    /// RAS Control Point (command/response).
    ControlPoint,
    /// Ranging Data Ready (16-bit counter status).
    RangingDataReady,
    /// Ranging Data Overwritten (16-bit counter status).
    RangingDataOverwritten,
}

impl Characteristic {
    /// Profile-assigned 16-bit UUID of this characteristic.
    pub fn uuid(self) -> u16 {
        match self {
            Self::RasFeatures => constants::UUID_RAS_FEATURES,
            Self::RealtimeRangingData => constants::UUID_RAS_REALTIME_RD,
            Self::OnDemandRangingData => constants::UUID_RAS_ONDEMAND_RD,
            Self::ControlPoint => constants::UUID_RAS_CP,
            Self::RangingDataReady => constants::UUID_RAS_RD_READY,
            Self::RangingDataOverwritten => constants::UUID_RAS_RD_OVERWRITTEN,
        }
    }
}

/// Client Characteristic Configuration subscription kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    /// Unacknowledged notifications.
    Notify,
    /// Acknowledged indications.
    Indicate,
}

/// Errors surfaced by the GATT boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GattError {
    /// The peer has not subscribed to the required CCC configuration.
    #[error("peer not subscribed")]
    NotSubscribed,

    /// The host has no resources to queue the PDU; retry later.
    #[error("no host resources to queue PDU")]
    NoResources,

    /// The connection is gone.
    #[error("connection disconnected")]
    Disconnected,
}

/// Server-side GATT operations consumed by the RRSP session.
///
/// One implementation per host stack. All methods are invoked from the
/// single task that owns the session, so `&mut self` access is never
/// contended.
pub trait RasGatt {
    /// Negotiated ATT MTU for the connection.
    fn att_mtu(&self, conn: ConnId) -> u16;

    /// Whether the peer subscribed to `chrc` with the given CCC kind.
    fn is_subscribed(&self, conn: ConnId, chrc: Characteristic, sub: Subscription) -> bool;

    /// Send an unacknowledged notification.
    ///
    /// Completion of the transmission must be reported back through the
    /// owning session's data-sent path before the next segment is sent.
    fn notify(&mut self, conn: ConnId, chrc: Characteristic, data: &[u8])
    -> Result<(), GattError>;

    /// Send an acknowledged indication.
    fn indicate(
        &mut self,
        conn: ConnId,
        chrc: Characteristic,
        data: &[u8],
    ) -> Result<(), GattError>;
}

/// Client-side GATT operations consumed by the RREQ session.
pub trait GattClient {
    /// Write without response to the attribute at `handle`.
    fn write_without_response(
        &mut self,
        conn: ConnId,
        handle: u16,
        data: &[u8],
    ) -> Result<(), GattError>;
}
