//! Protocol constants from the Ranging Service profile.
//!
//! These values are fixed by the profile and MUST NOT be changed.

use std::time::Duration;

// =============================================================================
// ASSIGNED UUIDS
// =============================================================================

/// Ranging Service UUID (16-bit).
pub const UUID_RANGING_SERVICE: u16 = 0x185B;

/// RAS Features characteristic UUID.
pub const UUID_RAS_FEATURES: u16 = 0x2C14;

/// Real-time Ranging Data characteristic UUID.
pub const UUID_RAS_REALTIME_RD: u16 = 0x2C15;

/// On-demand Ranging Data characteristic UUID.
pub const UUID_RAS_ONDEMAND_RD: u16 = 0x2C16;

/// RAS Control Point characteristic UUID.
pub const UUID_RAS_CP: u16 = 0x2C17;

/// Ranging Data Ready characteristic UUID.
pub const UUID_RAS_RD_READY: u16 = 0x2C18;

/// Ranging Data Overwritten characteristic UUID.
pub const UUID_RAS_RD_OVERWRITTEN: u16 = 0x2C19;

// =============================================================================
// RECORD GEOMETRY
// =============================================================================

/// Maximum number of subevents a procedure can report.
pub const MAX_SUBEVENTS_PER_PROCEDURE: usize = 32;

/// Maximum number of steps across all subevents of a procedure.
pub const MAX_STEPS_PER_PROCEDURE: usize = 256;

/// Size of one step-mode entry in the stored ranging data.
pub const STEP_MODE_LEN: usize = 1;

/// Upper bound on mode-dependent step data for a single step.
pub const MAX_STEP_DATA_LEN: usize = 35;

/// Ranging header size (12-bit counter + 4-bit config id, TX power, antenna mask).
pub const RANGING_HEADER_LEN: usize = 4;

/// Subevent header size.
pub const SUBEVENT_HEADER_LEN: usize = 8;

/// Arena capacity for one reassembled ranging procedure (worst case).
pub const PROCEDURE_MEM: usize = RANGING_HEADER_LEN
    + (MAX_SUBEVENTS_PER_PROCEDURE * SUBEVENT_HEADER_LEN)
    + (MAX_STEPS_PER_PROCEDURE * STEP_MODE_LEN)
    + (MAX_STEPS_PER_PROCEDURE * MAX_STEP_DATA_LEN);

// =============================================================================
// SEGMENTATION
// =============================================================================

/// Segmentation header size (first/last flags + rolling counter).
pub const SEGMENT_HEADER_LEN: usize = 1;

/// Mask for the 6-bit rolling segment counter.
pub const SEGMENT_COUNTER_MASK: u8 = 0x3F;

/// ATT octets reserved per segment notification, excluding the segment header.
pub const ATT_OVERHEAD: usize = 4;

/// Smallest ATT MTU a connection can negotiate.
pub const MIN_ATT_MTU: u16 = 23;

// =============================================================================
// RAS CONTROL POINT
// =============================================================================

/// RAS-CP command opcode size.
pub const RASCP_OPCODE_LEN: usize = 1;

/// Maximum RAS-CP command parameter size.
pub const RASCP_PARAMS_MAX_LEN: usize = 4;

/// Maximum RAS-CP write length (opcode + parameters).
pub const RASCP_WRITE_MAX_LEN: usize = RASCP_OPCODE_LEN + RASCP_PARAMS_MAX_LEN;

/// Default wait between the Complete Ranging Data response and the client ACK.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// ATT APPLICATION ERRORS
// =============================================================================

/// CCC descriptor improperly configured for the requested operation.
pub const ATT_ERR_CCC_CONFIG: u8 = 0xFD;

/// Write request rejected (command already pending or oversized).
pub const ATT_ERR_WRITE_REQ_REJECTED: u8 = 0xFC;

// =============================================================================
// CHANNEL SOUNDING STATUS CODES (4-bit, controller-reported)
// =============================================================================

/// Procedure or subevent finished with all data reported.
pub const CS_DONE_STATUS_COMPLETE: u8 = 0x0;

/// More data to come for this procedure or subevent.
pub const CS_DONE_STATUS_PARTIAL: u8 = 0x1;

/// Procedure or subevent aborted.
pub const CS_DONE_STATUS_ABORTED: u8 = 0xF;
