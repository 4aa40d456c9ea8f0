//! Ranging data buffer pool.
//!
//! Receives CS subevent results from the local controller and reassembles
//! them into the on-air ranging data format, one record per (connection,
//! ranging counter). The pool is a single construction-sized array shared
//! by all connections; each connection is capped at
//! [`PoolConfig::buffers_per_conn`] simultaneously bound slots, with the
//! oldest unused ready record overwritten once the cap is reached.
//!
//! All mutation must happen on one logical owner (the service task); the
//! pool itself takes no locks.

use tracing::{debug, error};

use super::slot::RdBufferSlot;
use crate::core::{ConnId, SubeventResult};
use crate::wire::RangingHeader;
use thiserror::Error;

/// Buffer pool sizing.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Connections the pool serves simultaneously.
    pub max_connections: usize,
    /// Records retained per connection before eviction starts.
    pub buffers_per_conn: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 2,
            buffers_per_conn: 2,
        }
    }
}

/// Pool lifecycle events, returned to the owner for fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdBufferEvent {
    /// A complete ranging procedure has been reassembled and stored.
    NewRangingData {
        /// Owning connection.
        conn: ConnId,
        /// Ranging counter of the stored procedure.
        ranging_counter: u16,
    },
    /// A stored procedure was overwritten to make room for a newer one.
    RangingDataOverwritten {
        /// Owning connection.
        conn: ConnId,
        /// Ranging counter of the evicted procedure.
        ranging_counter: u16,
    },
}

/// Errors from pool operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// No free slot and no evictable record.
    #[error("buffer pool exhausted")]
    Exhausted,

    /// The claim ticket no longer matches a live record.
    #[error("stale claim ticket")]
    StaleClaim,

    /// Release on a record with no outstanding claims.
    #[error("release with zero refcount")]
    ReleaseUnderflow,

    /// No record matches the (connection, counter) pair.
    #[error("no matching record")]
    NotFound,
}

/// Read claim on a stored record.
///
/// Obtained from [`RdBufferPool::claim`]; move-only, so each claim is
/// released at most once. A ticket outlives its record only across a
/// disconnect teardown, in which case every operation through it reports
/// [`BufferError::StaleClaim`] (or pulls nothing) instead of touching the
/// reused slot.
#[derive(Debug)]
#[must_use = "claims pin the record until released"]
pub struct ClaimTicket {
    slot: usize,
    generation: u32,
    conn: ConnId,
    ranging_counter: u16,
}

impl ClaimTicket {
    /// Connection the claimed record belongs to.
    pub fn conn(&self) -> ConnId {
        self.conn
    }

    /// Ranging counter of the claimed record.
    pub fn ranging_counter(&self) -> u16 {
        self.ranging_counter
    }
}

/// Fixed pool of ranging data buffers shared by all connections.
#[derive(Debug)]
pub struct RdBufferPool {
    config: PoolConfig,
    slots: Vec<RdBufferSlot>,
}

impl RdBufferPool {
    /// Create a pool with `max_connections * buffers_per_conn` slots.
    pub fn new(config: PoolConfig) -> Self {
        let count = config.max_connections * config.buffers_per_conn;
        Self {
            config,
            slots: (0..count).map(|_| RdBufferSlot::new()).collect(),
        }
    }

    /// Total slots in the pool.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Slots currently bound to `conn`.
    pub fn bound_count(&self, conn: ConnId) -> usize {
        self.slots.iter().filter(|s| s.conn == Some(conn)).count()
    }

    /// Ingest one CS subevent result.
    ///
    /// Allocates a record on first sight of the procedure counter, appends
    /// the reassembled bytes, and marks the record ready when the result
    /// carries the terminal procedure status. Returned events cover both
    /// any eviction performed by the allocation and the ready transition.
    pub fn on_subevent_result(
        &mut self,
        conn: ConnId,
        result: &SubeventResult,
    ) -> Vec<RdBufferEvent> {
        let mut events = Vec::new();
        let counter = result.procedure_counter;

        let slot = match self.find(conn, counter, false, true) {
            Some(i) => i,
            None => {
                // First subevent of this procedure - allocate a record.
                match self.allocate(conn, counter) {
                    Ok((i, evicted)) => {
                        events.extend(evicted);
                        self.slots[i].write_ranging_header(&RangingHeader {
                            ranging_counter: counter,
                            config_id: result.config_id,
                            selected_tx_power: result.selected_tx_power,
                            antenna_paths_mask: result.antenna_paths_mask,
                        });
                        i
                    }
                    Err(_) => {
                        error!(%conn, counter, "failed to allocate buffer for procedure");
                        return events;
                    }
                }
            }
        };

        self.slots[slot].append_subevent(result);

        if result.procedure_complete() {
            self.slots[slot].ready = true;
            self.slots[slot].busy = false;
            debug!(%conn, counter, "ranging data stored");
            events.push(RdBufferEvent::NewRangingData {
                conn,
                ranging_counter: counter,
            });
        }

        events
    }

    /// Bind a slot for a new procedure.
    ///
    /// Uses a free slot while the connection is under its cap; otherwise
    /// evicts the connection's oldest ready, unclaimed record (lowest
    /// ranging counter; acknowledged records first) and reports the
    /// eviction. Fails when neither is possible, in which case the caller
    /// must drop the incoming data.
    pub fn allocate(
        &mut self,
        conn: ConnId,
        ranging_counter: u16,
    ) -> Result<(usize, Option<RdBufferEvent>), BufferError> {
        let bound = self.bound_count(conn);

        if bound < self.config.buffers_per_conn {
            if let Some(i) = self.slots.iter().position(|s| s.conn.is_none()) {
                self.slots[i].init(conn, ranging_counter);
                return Ok((i, None));
            }
            return Err(BufferError::Exhausted);
        }

        // Only records that hold complete data and are not being read are
        // eligible victims.
        let victim = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| {
                s.conn == Some(conn) && s.ready && !s.busy && s.refcount == 0
            })
            .min_by_key(|(_, s)| (!s.acked, s.ranging_counter))
            .map(|(i, _)| i);

        match victim {
            Some(i) => {
                let evicted = RdBufferEvent::RangingDataOverwritten {
                    conn,
                    ranging_counter: self.slots[i].ranging_counter,
                };
                debug!(%conn, counter = self.slots[i].ranging_counter, "overwriting oldest record");
                self.slots[i].free();
                self.slots[i].init(conn, ranging_counter);
                Ok((i, Some(evicted)))
            }
            None => Err(BufferError::Exhausted),
        }
    }

    /// Whether a complete record for `ranging_counter` is stored.
    pub fn ready_check(&self, conn: ConnId, ranging_counter: u16) -> bool {
        self.find(conn, ranging_counter, true, false).is_some()
    }

    /// Claim read access to a stored record, pinning it against eviction.
    pub fn claim(&mut self, conn: ConnId, ranging_counter: u16) -> Option<ClaimTicket> {
        let i = self.find(conn, ranging_counter, true, false)?;
        self.slots[i].refcount += 1;
        Some(ClaimTicket {
            slot: i,
            generation: self.slots[i].generation,
            conn,
            ranging_counter,
        })
    }

    /// Release a claim.
    ///
    /// The record stays stored - only acknowledgment or eviction frees it.
    pub fn release(&mut self, ticket: ClaimTicket) -> Result<(), BufferError> {
        let slot = self
            .slots
            .get_mut(ticket.slot)
            .filter(|s| s.generation == ticket.generation)
            .ok_or(BufferError::StaleClaim)?;

        if slot.refcount == 0 {
            return Err(BufferError::ReleaseUnderflow);
        }
        slot.refcount -= 1;
        Ok(())
    }

    /// Pull up to `max_len` record bytes from the claim's read cursor.
    pub fn pull_bytes(&mut self, ticket: &ClaimTicket, max_len: usize) -> Vec<u8> {
        match self.live_slot_mut(ticket) {
            Some(slot) => slot.pull_bytes(max_len),
            None => Vec::new(),
        }
    }

    /// Move the claim's read cursor back `n` bytes.
    pub fn rewind(&mut self, ticket: &ClaimTicket, n: usize) {
        if let Some(slot) = self.live_slot_mut(ticket) {
            slot.rewind(n);
        }
    }

    /// Restart read-out from the beginning of the record.
    pub fn restart(&mut self, ticket: &ClaimTicket) {
        if let Some(slot) = self.live_slot_mut(ticket) {
            slot.read_cursor = 0;
        }
    }

    /// Current read-out position of the claim.
    pub fn read_offset(&self, ticket: &ClaimTicket) -> usize {
        self.live_slot(ticket).map_or(0, |s| s.read_cursor)
    }

    /// Stored length of the claimed record.
    pub fn record_len(&self, ticket: &ClaimTicket) -> usize {
        self.live_slot(ticket).map_or(0, RdBufferSlot::record_len)
    }

    /// Parsed ranging header of the claimed record.
    pub fn ranging_header(&self, ticket: &ClaimTicket) -> Option<RangingHeader> {
        self.live_slot(ticket).map(RdBufferSlot::ranging_header)
    }

    /// Acknowledge a stored record.
    ///
    /// With `free` the slot is reclaimed immediately; otherwise the record
    /// is kept, marked acknowledged, and becomes a preferred eviction
    /// victim.
    pub fn mark_acked(
        &mut self,
        conn: ConnId,
        ranging_counter: u16,
        free: bool,
    ) -> Result<(), BufferError> {
        let i = self
            .find(conn, ranging_counter, true, false)
            .ok_or(BufferError::NotFound)?;

        if free {
            self.slots[i].free();
        } else {
            self.slots[i].acked = true;
        }
        Ok(())
    }

    /// Drop a stored record without acknowledgment (stalled-transfer expiry).
    pub fn evict(&mut self, conn: ConnId, ranging_counter: u16) -> bool {
        match self.find(conn, ranging_counter, true, false) {
            Some(i) => {
                self.slots[i].free();
                true
            }
            None => false,
        }
    }

    /// Release every slot owned by `conn`, regardless of claims or
    /// reassembly state. Disconnect always wins.
    pub fn free_on_disconnect(&mut self, conn: ConnId) {
        for slot in self.slots.iter_mut().filter(|s| s.conn == Some(conn)) {
            slot.free();
        }
        debug!(%conn, "released all buffers");
    }

    fn find(&self, conn: ConnId, ranging_counter: u16, ready: bool, busy: bool) -> Option<usize> {
        self.slots.iter().position(|s| {
            s.conn == Some(conn)
                && s.ranging_counter == ranging_counter
                && s.ready == ready
                && s.busy == busy
        })
    }

    fn live_slot(&self, ticket: &ClaimTicket) -> Option<&RdBufferSlot> {
        self.slots
            .get(ticket.slot)
            .filter(|s| s.generation == ticket.generation)
    }

    fn live_slot_mut(&mut self, ticket: &ClaimTicket) -> Option<&mut RdBufferSlot> {
        self.slots
            .get_mut(ticket.slot)
            .filter(|s| s.generation == ticket.generation)
    }
}
