//! A single ranging data buffer slot.
//!
//! Each slot owns a fixed-capacity byte arena holding one reassembled
//! ranging procedure in the on-air format: ranging header, then per
//! subevent a subevent header, the step-mode bytes, and the concatenated
//! step data. The arena is written through an append cursor during
//! reassembly and drained through an independent read cursor during
//! streaming.

use tracing::warn;

use crate::core::SubeventResult;
use crate::core::constants::{PROCEDURE_MEM, RANGING_HEADER_LEN, SUBEVENT_HEADER_LEN};
use crate::core::ConnId;
use crate::wire::{RangingHeader, SubeventHeader};

/// One element of the ranging data buffer pool.
#[derive(Debug)]
pub(crate) struct RdBufferSlot {
    /// Owning connection; `None` means the slot is free.
    pub(crate) conn: Option<ConnId>,
    /// Ranging counter of the stored procedure.
    pub(crate) ranging_counter: u16,
    /// All ranging data has been written.
    pub(crate) ready: bool,
    /// Reassembly from the controller is in progress.
    pub(crate) busy: bool,
    /// The client acknowledged this record.
    pub(crate) acked: bool,
    /// Outstanding read claims.
    pub(crate) refcount: u8,
    /// Bumped on every free; stale claim tickets fail the comparison.
    pub(crate) generation: u32,
    /// Bytes appended past the ranging header.
    pub(crate) subevent_cursor: usize,
    /// Read-out position within the record.
    pub(crate) read_cursor: usize,
    arena: Box<[u8]>,
}

impl RdBufferSlot {
    pub(crate) fn new() -> Self {
        Self {
            conn: None,
            ranging_counter: 0,
            ready: false,
            busy: false,
            acked: false,
            refcount: 0,
            generation: 0,
            subevent_cursor: 0,
            read_cursor: 0,
            arena: vec![0u8; PROCEDURE_MEM].into_boxed_slice(),
        }
    }

    /// Bind the slot to a connection and start a fresh record.
    pub(crate) fn init(&mut self, conn: ConnId, ranging_counter: u16) {
        self.conn = Some(conn);
        self.ranging_counter = ranging_counter;
        self.ready = false;
        self.busy = true;
        self.acked = false;
        self.refcount = 0;
        self.subevent_cursor = 0;
        self.read_cursor = 0;
    }

    /// Unbind the slot and invalidate outstanding claims.
    pub(crate) fn free(&mut self) {
        if self.refcount > 0 {
            warn!(
                refcount = self.refcount,
                ranging_counter = self.ranging_counter,
                "freeing buffer with outstanding claims"
            );
        }

        self.conn = None;
        self.ranging_counter = 0;
        self.ready = false;
        self.busy = false;
        self.acked = false;
        self.refcount = 0;
        self.subevent_cursor = 0;
        self.read_cursor = 0;
        self.generation = self.generation.wrapping_add(1);
    }

    /// Write the ranging header at the start of the arena.
    pub(crate) fn write_ranging_header(&mut self, header: &RangingHeader) {
        self.arena[..RANGING_HEADER_LEN].copy_from_slice(&header.to_bytes());
    }

    /// Parsed ranging header of the stored record.
    pub(crate) fn ranging_header(&self) -> RangingHeader {
        RangingHeader::from_bytes(&self.arena[..RANGING_HEADER_LEN])
            .expect("arena holds a full ranging header")
    }

    /// Append one subevent to the record.
    ///
    /// Panics when the append would overflow the arena: capacity is sized
    /// to the protocol's documented worst case, so overflow means the
    /// controller violated the protocol and nothing here is recoverable.
    pub(crate) fn append_subevent(&mut self, result: &SubeventResult) {
        let step_data_len: usize = result.steps.iter().map(|s| s.data.len()).sum();
        let needed = SUBEVENT_HEADER_LEN + result.steps.len() + step_data_len;
        let start = RANGING_HEADER_LEN + self.subevent_cursor;

        assert!(
            start + needed <= self.arena.len(),
            "subevent exceeds ranging data arena"
        );

        let header = SubeventHeader {
            start_acl_conn_event: result.start_acl_conn_event,
            freq_compensation: result.frequency_compensation,
            ranging_done_status: result.procedure_done_status,
            subevent_done_status: result.subevent_done_status,
            ranging_abort_reason: result.procedure_abort_reason,
            subevent_abort_reason: result.subevent_abort_reason,
            ref_power_level: result.reference_power_level,
            num_steps_reported: result.steps.len() as u8,
        };
        self.arena[start..start + SUBEVENT_HEADER_LEN].copy_from_slice(&header.to_bytes());

        let mut mode_at = start + SUBEVENT_HEADER_LEN;
        let mut data_at = mode_at + result.steps.len();
        for step in &result.steps {
            self.arena[mode_at] = step.mode;
            mode_at += 1;
            self.arena[data_at..data_at + step.data.len()].copy_from_slice(&step.data);
            data_at += step.data.len();
        }

        self.subevent_cursor += needed;
    }

    /// Total stored record length.
    pub(crate) fn record_len(&self) -> usize {
        RANGING_HEADER_LEN + self.subevent_cursor
    }

    /// Pull up to `max_len` bytes from the read cursor forward.
    ///
    /// Returns nothing while the record is not ready.
    pub(crate) fn pull_bytes(&mut self, max_len: usize) -> Vec<u8> {
        if !self.ready {
            return Vec::new();
        }

        let len = self.record_len();
        assert!(self.read_cursor <= len, "read cursor past record end");
        let pull = max_len.min(len - self.read_cursor);

        let out = self.arena[self.read_cursor..self.read_cursor + pull].to_vec();
        self.read_cursor += pull;
        out
    }

    /// Move the read cursor back `n` bytes (failed-send retry).
    pub(crate) fn rewind(&mut self, n: usize) {
        if !self.ready {
            return;
        }

        assert!(self.read_cursor >= n, "rewind past start of record");
        self.read_cursor -= n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CsStep;

    fn subevent(counter: u16, steps: usize, step_len: usize, done: u8) -> SubeventResult {
        SubeventResult {
            procedure_counter: counter,
            config_id: 1,
            start_acl_conn_event: 7,
            frequency_compensation: -3,
            procedure_done_status: done,
            subevent_done_status: 0x0,
            procedure_abort_reason: 0,
            subevent_abort_reason: 0,
            reference_power_level: -50,
            selected_tx_power: 4,
            antenna_paths_mask: 1,
            steps: (0..steps)
                .map(|i| CsStep {
                    mode: 2,
                    channel: i as u8,
                    data: vec![i as u8; step_len],
                })
                .collect(),
        }
    }

    #[test]
    fn test_append_layout() {
        let mut slot = RdBufferSlot::new();
        slot.init(ConnId(1), 5);
        slot.write_ranging_header(&RangingHeader {
            ranging_counter: 5,
            config_id: 1,
            selected_tx_power: 4,
            antenna_paths_mask: 1,
        });
        slot.append_subevent(&subevent(5, 2, 3, 0x0));

        // Header (8) + 2 mode bytes + 2x3 data bytes.
        assert_eq!(slot.subevent_cursor, 8 + 2 + 6);
        assert_eq!(slot.record_len(), 4 + 16);

        slot.ready = true;
        let bytes = slot.pull_bytes(usize::MAX);
        // Step modes come right after the subevent header, data after them.
        assert_eq!(bytes[12], 2);
        assert_eq!(bytes[13], 2);
        assert_eq!(&bytes[14..17], &[0, 0, 0]);
        assert_eq!(&bytes[17..20], &[1, 1, 1]);
    }

    #[test]
    fn test_pull_not_ready_returns_nothing() {
        let mut slot = RdBufferSlot::new();
        slot.init(ConnId(1), 5);
        slot.append_subevent(&subevent(5, 1, 4, 0x1));
        assert!(slot.pull_bytes(16).is_empty());
    }

    #[test]
    fn test_pull_and_rewind() {
        let mut slot = RdBufferSlot::new();
        slot.init(ConnId(1), 5);
        slot.write_ranging_header(&RangingHeader {
            ranging_counter: 5,
            config_id: 0,
            selected_tx_power: 0,
            antenna_paths_mask: 0,
        });
        slot.append_subevent(&subevent(5, 1, 4, 0x0));
        slot.ready = true;

        let first = slot.pull_bytes(10);
        assert_eq!(first.len(), 10);
        slot.rewind(10);
        let again = slot.pull_bytes(10);
        assert_eq!(first, again);

        let rest = slot.pull_bytes(usize::MAX);
        assert_eq!(10 + rest.len(), slot.record_len());
        assert!(slot.pull_bytes(16).is_empty());
    }

    #[test]
    #[should_panic(expected = "rewind past start of record")]
    fn test_rewind_past_start_panics() {
        let mut slot = RdBufferSlot::new();
        slot.init(ConnId(1), 5);
        slot.ready = true;
        slot.rewind(1);
    }

    #[test]
    fn test_free_bumps_generation() {
        let mut slot = RdBufferSlot::new();
        slot.init(ConnId(1), 5);
        let generation = slot.generation;
        slot.free();
        assert_eq!(slot.generation, generation + 1);
        assert!(slot.conn.is_none());
    }
}
