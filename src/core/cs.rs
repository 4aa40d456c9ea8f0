//! Channel Sounding controller event types.
//!
//! The local controller delivers one [`SubeventResult`] per CS subevent.
//! The buffer pool reassembles these into the on-air ranging data format.
//! Delivery itself (HCI parsing, event routing) is the host stack's job.

/// One measurement step inside a subevent, as reported by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsStep {
    /// CS mode (0-3) of this step.
    pub mode: u8,
    /// Channel index the step was measured on. Not part of the stored
    /// ranging data format.
    pub channel: u8,
    /// Mode-dependent measurement data.
    pub data: Vec<u8>,
}

/// One CS subevent result from the local controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubeventResult {
    /// Procedure counter this subevent belongs to (12-bit).
    pub procedure_counter: u16,
    /// CS configuration identifier (4-bit).
    pub config_id: u8,
    /// ACL connection event the subevent started in.
    pub start_acl_conn_event: u16,
    /// Frequency compensation value.
    pub frequency_compensation: i16,
    /// Procedure done status (4-bit, see `CS_DONE_STATUS_*`).
    pub procedure_done_status: u8,
    /// Subevent done status (4-bit).
    pub subevent_done_status: u8,
    /// Procedure abort reason (4-bit).
    pub procedure_abort_reason: u8,
    /// Subevent abort reason (4-bit).
    pub subevent_abort_reason: u8,
    /// Reference power level in dBm.
    pub reference_power_level: i8,
    /// Transmit power selected for the procedure, in dBm.
    pub selected_tx_power: i8,
    /// Bitmask of antenna paths used.
    pub antenna_paths_mask: u8,
    /// Steps reported in this subevent.
    pub steps: Vec<CsStep>,
}

impl SubeventResult {
    /// Whether this result carries the terminal procedure status.
    pub fn procedure_complete(&self) -> bool {
        self.procedure_done_status == super::constants::CS_DONE_STATUS_COMPLETE
    }
}
