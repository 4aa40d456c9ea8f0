//! Per-connection server session state machine.
//!
//! Owns the RAS-CP command handling and the segment stream for one
//! connection. The session is sans-IO in the work-queue sense: every
//! entry point runs on the session's single owner, GATT traffic goes out
//! through the [`RasGatt`] boundary, and transport send-completions come
//! back in through [`RrspSession::on_ranging_data_sent`] - the explicit
//! form of the resubmit-on-completion chain.

use std::time::Instant;

use tracing::{debug, trace, warn};

use super::{ServerConfig, ServerError};
use crate::buffer::{ClaimTicket, RdBufferPool};
use crate::core::constants::{RASCP_WRITE_MAX_LEN, SEGMENT_COUNTER_MASK};
use crate::core::{Characteristic, ConnId, GattError, RasGatt, Subscription};
use crate::wire::{
    self, FrameError, RasCpCommand, RasCpResponse, ResponseCode, Segment, SegmentHeader,
    max_segment_data_len,
};

/// Server-side (RRSP) session for one connection.
///
/// State walks `Idle` (no claim) to `Streaming` (claim held, segments in
/// flight) to awaiting-ACK (claim held, all segments sent) and back to
/// `Idle` on ACK, disconnect, or ACK timeout.
#[derive(Debug)]
pub struct RrspSession {
    conn: ConnId,
    config: ServerConfig,

    /// Claim on the record currently being transferred, held from GET_RD
    /// until ACK. At most one per session.
    active: Option<ClaimTicket>,
    streaming: bool,
    /// A segment send failed and no transport completion will arrive;
    /// the stream advances again only through [`RrspSession::pump`].
    stalled: bool,
    segment_counter: u8,

    ready_counter: u16,
    overwritten_counter: u16,
    notify_ready: bool,
    notify_overwritten: bool,

    ack_deadline: Option<Instant>,
}

impl RrspSession {
    /// Create a session bound to `conn`.
    pub fn new(conn: ConnId, config: ServerConfig) -> Self {
        Self {
            conn,
            config,
            active: None,
            streaming: false,
            stalled: false,
            segment_counter: 0,
            ready_counter: 0,
            overwritten_counter: 0,
            notify_ready: false,
            notify_overwritten: false,
            ack_deadline: None,
        }
    }

    /// Connection this session serves.
    pub fn conn(&self) -> ConnId {
        self.conn
    }

    /// Whether a segment stream is in flight.
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Value of the Ranging Data Ready characteristic.
    pub fn ready_counter(&self) -> u16 {
        self.ready_counter
    }

    /// Value of the Ranging Data Overwritten characteristic.
    pub fn overwritten_counter(&self) -> u16 {
        self.overwritten_counter
    }

    /// Handle a RAS-CP write from the peer.
    ///
    /// Protocol-level failures are answered over the control point; only
    /// ATT-level rejections (missing subscription, oversized write)
    /// surface as errors.
    pub fn on_control_point_write<G: RasGatt>(
        &mut self,
        pool: &mut RdBufferPool,
        gatt: &mut G,
        data: &[u8],
    ) -> Result<(), ServerError> {
        if !gatt.is_subscribed(self.conn, Characteristic::ControlPoint, Subscription::Indicate) {
            debug!(conn = %self.conn, "control point write without indicate subscription");
            return Err(ServerError::NotSubscribed);
        }

        if data.len() > RASCP_WRITE_MAX_LEN {
            debug!(conn = %self.conn, len = data.len(), "control point write rejected");
            return Err(ServerError::WriteRejected);
        }

        let command = match RasCpCommand::decode(data) {
            Ok(command) => command,
            Err(FrameError::UnsupportedOpcode(opcode)) => {
                debug!(conn = %self.conn, opcode, "opcode invalid or unsupported");
                self.respond(gatt, ResponseCode::OpcodeNotSupported);
                return Ok(());
            }
            Err(_) => {
                self.respond(gatt, ResponseCode::InvalidParameter);
                return Ok(());
            }
        };

        // Only one transfer per connection at a time.
        if self.streaming {
            self.respond(gatt, ResponseCode::ServerBusy);
            return Ok(());
        }

        match command {
            RasCpCommand::GetRangingData { ranging_counter } => {
                self.handle_get_rd(pool, gatt, ranging_counter);
            }
            RasCpCommand::AckRangingData { ranging_counter } => {
                self.handle_ack_rd(pool, gatt, ranging_counter);
            }
        }

        Ok(())
    }

    fn handle_get_rd<G: RasGatt>(
        &mut self,
        pool: &mut RdBufferPool,
        gatt: &mut G,
        ranging_counter: u16,
    ) {
        debug!(conn = %self.conn, ranging_counter, "GET_RD");

        if let Some(active) = &self.active {
            if active.ranging_counter() != ranging_counter {
                // A different record is claimed and not yet acknowledged.
                self.respond(gatt, ResponseCode::ServerBusy);
                return;
            }
            // Same record requested again: restart the stream.
            pool.restart(active);
        } else {
            if !pool.ready_check(self.conn, ranging_counter) {
                self.respond(gatt, ResponseCode::NoRecordsFound);
                return;
            }
            let Some(ticket) = pool.claim(self.conn, ranging_counter) else {
                self.respond(gatt, ResponseCode::NoRecordsFound);
                return;
            };
            self.active = Some(ticket);
        }

        self.segment_counter = 0;
        self.streaming = true;
        self.stalled = false;
        self.ack_deadline = None;
        self.respond(gatt, ResponseCode::Success);

        if let Err(err) = self.send_chunk(pool, gatt) {
            warn!(conn = %self.conn, %err, "initial segment send failed");
            self.stalled = true;
        }
    }

    fn handle_ack_rd<G: RasGatt>(
        &mut self,
        pool: &mut RdBufferPool,
        gatt: &mut G,
        ranging_counter: u16,
    ) {
        debug!(conn = %self.conn, ranging_counter, "ACK_RD");

        let matches = self
            .active
            .as_ref()
            .is_some_and(|t| t.ranging_counter() == ranging_counter);
        if !matches {
            self.respond(gatt, ResponseCode::NoRecordsFound);
            return;
        }

        let ticket = self.active.take().expect("matched claim is present");
        if let Err(err) = pool.release(ticket) {
            warn!(conn = %self.conn, %err, "claim release failed");
        }
        if let Err(err) = pool.mark_acked(self.conn, ranging_counter, self.config.release_acked) {
            warn!(conn = %self.conn, %err, "ack bookkeeping failed");
        }
        self.ack_deadline = None;

        self.respond(gatt, ResponseCode::Success);
    }

    /// Transport completion for the previous on-demand data PDU.
    ///
    /// Sends the next segment, if any. This is the only place the stream
    /// advances after the first segment, which keeps one PDU in flight
    /// per connection and yields between segments.
    pub fn on_ranging_data_sent<G: RasGatt>(&mut self, pool: &mut RdBufferPool, gatt: &mut G) {
        if !self.streaming {
            return;
        }

        if let Err(err) = self.send_chunk(pool, gatt) {
            warn!(conn = %self.conn, %err, "segment send failed");
            self.stalled = true;
        }
    }

    /// Retry entry point for a stalled stream (periodic sweep).
    pub fn pump<G: RasGatt>(&mut self, pool: &mut RdBufferPool, gatt: &mut G) {
        if !self.streaming || !self.stalled {
            return;
        }

        match self.send_chunk(pool, gatt) {
            Ok(()) => self.stalled = false,
            Err(err) => warn!(conn = %self.conn, %err, "segment resend failed"),
        }
    }

    fn send_chunk<G: RasGatt>(
        &mut self,
        pool: &mut RdBufferPool,
        gatt: &mut G,
    ) -> Result<(), GattError> {
        let Some(ticket) = &self.active else {
            return Ok(());
        };

        // The profile fills each characteristic message with up to
        // ATT_MTU-4 octets; one more octet is the segmentation header.
        let max_data_len = max_segment_data_len(gatt.att_mtu(self.conn));

        let first_seg = pool.read_offset(ticket) == 0;
        let data = pool.pull_bytes(ticket, max_data_len);
        let last_seg = pool.read_offset(ticket) == pool.record_len(ticket);

        trace!(conn = %self.conn, pulled = data.len(), max_data_len, "chunk");

        if data.is_empty() && !first_seg {
            // Racing with reassembly state; nothing to transmit.
            return Ok(());
        }

        let segment = Segment {
            header: SegmentHeader {
                first_seg,
                last_seg,
                seg_counter: self.segment_counter & SEGMENT_COUNTER_MASK,
            },
            data: &data,
        };

        if let Err(err) = self.notify_or_indicate(
            gatt,
            Characteristic::OnDemandRangingData,
            &segment.encode(),
        ) {
            // Put the bytes back so the next attempt repeats this segment.
            pool.rewind(ticket, data.len());
            return Err(err);
        }

        self.segment_counter = (self.segment_counter + 1) & SEGMENT_COUNTER_MASK;
        trace!(conn = %self.conn, counter = self.segment_counter, "segment sent");

        if last_seg {
            let ranging_counter = ticket.ranging_counter();
            debug!(conn = %self.conn, ranging_counter, "all segments sent");
            self.streaming = false;
            self.ack_deadline = self
                .config
                .ack_timeout
                .map(|timeout| Instant::now() + timeout);
            self.indicate_response(
                gatt,
                &RasCpResponse::CompleteRangingData { ranging_counter },
            );
        }

        Ok(())
    }

    /// Queue a Ranging Data Ready status for `ranging_counter`.
    pub fn ranging_data_ready(&mut self, ranging_counter: u16) {
        self.ready_counter = ranging_counter;
        self.notify_ready = true;
    }

    /// Queue a Ranging Data Overwritten status for `ranging_counter`.
    pub fn ranging_data_overwritten(&mut self, ranging_counter: u16) {
        self.overwritten_counter = ranging_counter;
        self.notify_overwritten = true;
    }

    /// Flush queued status notifications.
    ///
    /// Overwritten and ready flags are independent and both flushed in one
    /// pass, notify preferred over indicate.
    pub fn flush_status<G: RasGatt>(&mut self, gatt: &mut G) {
        if self.notify_overwritten {
            if let Err(err) = self.notify_or_indicate(
                gatt,
                Characteristic::RangingDataOverwritten,
                &wire::encode_status_counter(self.overwritten_counter),
            ) {
                warn!(conn = %self.conn, %err, "overwritten status send failed");
            }
            self.notify_overwritten = false;
        }

        if self.notify_ready {
            if let Err(err) = self.notify_or_indicate(
                gatt,
                Characteristic::RangingDataReady,
                &wire::encode_status_counter(self.ready_counter),
            ) {
                warn!(conn = %self.conn, %err, "ready status send failed");
            }
            self.notify_ready = false;
        }
    }

    /// Whether the post-stream ACK wait has expired at `now`.
    pub fn ack_overdue(&self, now: Instant) -> bool {
        !self.streaming && self.ack_deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Drop the claim on a record whose ACK never arrived.
    ///
    /// Frees the stalled slot and queues an overwritten status so the
    /// peer learns the record is gone. Returns the dropped counter.
    pub fn expire_ack(&mut self, pool: &mut RdBufferPool) -> Option<u16> {
        let ticket = self.active.take()?;
        let ranging_counter = ticket.ranging_counter();
        warn!(conn = %self.conn, ranging_counter, "ACK timeout, dropping record");

        if let Err(err) = pool.release(ticket) {
            warn!(conn = %self.conn, %err, "claim release failed");
        }
        pool.evict(self.conn, ranging_counter);

        self.ack_deadline = None;
        self.ranging_data_overwritten(ranging_counter);
        Some(ranging_counter)
    }

    /// Tear the session down on disconnect. The owner frees the pool
    /// slots separately; this only drops the session's claim.
    pub fn on_disconnect(&mut self, pool: &mut RdBufferPool) {
        if let Some(ticket) = self.active.take() {
            // The slot may already be reassigned; a stale release is fine.
            let _ = pool.release(ticket);
        }
        self.streaming = false;
        self.stalled = false;
        self.ack_deadline = None;
    }

    fn respond<G: RasGatt>(&self, gatt: &mut G, code: ResponseCode) {
        self.indicate_response(gatt, &RasCpResponse::ResponseCode(code));
    }

    fn indicate_response<G: RasGatt>(&self, gatt: &mut G, response: &RasCpResponse) {
        if let Err(err) = gatt.indicate(self.conn, Characteristic::ControlPoint, &response.encode())
        {
            warn!(conn = %self.conn, %err, "control point indication failed");
        }
    }

    fn notify_or_indicate<G: RasGatt>(
        &self,
        gatt: &mut G,
        chrc: Characteristic,
        data: &[u8],
    ) -> Result<(), GattError> {
        if gatt.is_subscribed(self.conn, chrc, Subscription::Notify) {
            gatt.notify(self.conn, chrc, data)
        } else if gatt.is_subscribed(self.conn, chrc, Subscription::Indicate) {
            gatt.indicate(self.conn, chrc, data)
        } else {
            Err(GattError::NotSubscribed)
        }
    }
}
