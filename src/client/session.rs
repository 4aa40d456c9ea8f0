//! Per-connection client session state machine.

use thiserror::Error;
use tracing::{debug, warn};

use crate::core::constants::SEGMENT_COUNTER_MASK;
use crate::core::{ConnId, GattClient, GattError};
use crate::wire::{self, RasCpCommand, RasCpResponse, RasFeatures, ResponseCode, Segment};

/// Discovered attribute handles of the peer's Ranging Service.
///
/// Produced by GATT service discovery, which stays with the embedding
/// application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasHandles {
    /// RAS Features characteristic value handle.
    pub features: u16,
    /// Real-time Ranging Data value handle, when the peer has one.
    pub realtime_rd: Option<u16>,
    /// On-demand Ranging Data value handle.
    pub on_demand_rd: u16,
    /// RAS Control Point value handle.
    pub control_point: u16,
    /// Ranging Data Ready value handle.
    pub rd_ready: u16,
    /// Ranging Data Overwritten value handle.
    pub rd_overwritten: u16,
}

/// Errors returned by client session entry points.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A command or data transfer is already in progress.
    #[error("transfer already in progress")]
    Busy,

    /// Local GATT write failure; no state was committed.
    #[error("gatt error: {0}")]
    Gatt(#[from] GattError),
}

/// A ranging data transfer failed.
///
/// Out-of-order segments, truncation, peer aborts, and overwritten
/// records all surface as this one error: the record is unusable and the
/// cause is in the log.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("ranging data transfer failed")]
pub struct TransferError;

/// Terminal outcome of one [`RreqSession::get_ranging_data`] call.
///
/// Produced exactly once per transfer, carrying the caller's buffer back.
#[derive(Debug)]
pub struct TransferComplete {
    /// Ranging counter the transfer was for.
    pub ranging_counter: u16,
    /// The output buffer; holds the full record on success.
    pub data: Vec<u8>,
    /// Whether the record was received completely and in order.
    pub result: Result<(), TransferError>,
}

/// Outcome of an overwritten status notification.
#[derive(Debug)]
pub enum OverwrittenOutcome {
    /// The record being transferred is gone; the transfer is finished.
    Completed(TransferComplete),
    /// The in-progress transfer is now doomed, but a control point
    /// exchange is pending and will deliver the completion.
    Deferred,
    /// Unrelated record; hand the counter to the application.
    Notify(u16),
    /// Malformed notification, dropped.
    Ignored,
}

/// RAS-CP exchange sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CpState {
    None,
    GetRdWritten,
    AckRdWritten,
}

/// Data-plane state of one transfer.
#[derive(Debug)]
struct Transfer {
    ranging_counter: u16,
    out: Vec<u8>,
    capacity: usize,
    next_expected_segment_counter: u8,
    received_any: bool,
    last_segment_received: bool,
    error_with_data_receive: bool,
}

impl Transfer {
    fn fail(&mut self, why: &str) {
        warn!(ranging_counter = self.ranging_counter, why, "segment receive error");
        self.error_with_data_receive = true;
    }
}

/// Client-side (RREQ) session for one connection.
#[derive(Debug)]
pub struct RreqSession {
    conn: ConnId,
    handles: RasHandles,
    remote_features: Option<RasFeatures>,
    cp_state: CpState,
    transfer: Option<Transfer>,
}

impl RreqSession {
    /// Create a session from discovered handles.
    pub fn new(conn: ConnId, handles: RasHandles) -> Self {
        Self {
            conn,
            handles,
            remote_features: None,
            cp_state: CpState::None,
            transfer: None,
        }
    }

    /// Connection this session serves.
    pub fn conn(&self) -> ConnId {
        self.conn
    }

    /// Discovered handle set.
    pub fn handles(&self) -> &RasHandles {
        &self.handles
    }

    /// Peer feature bitmap, once read.
    pub fn remote_features(&self) -> Option<RasFeatures> {
        self.remote_features
    }

    /// Whether a transfer is in progress.
    pub fn transfer_in_progress(&self) -> bool {
        self.transfer.is_some()
    }

    /// Ingest a RAS Features characteristic read.
    pub fn on_features_read(&mut self, data: &[u8]) -> Result<RasFeatures, wire::FrameError> {
        let features = RasFeatures::from_bytes(data)?;
        debug!(
            conn = %self.conn,
            realtime = features.realtime_rd(),
            retrieve_lost = features.retrieve_lost_segments(),
            abort = features.abort_op(),
            filter = features.filter_rd(),
            "peer features read"
        );
        self.remote_features = Some(features);
        Ok(features)
    }

    /// Request the record with `ranging_counter` from the peer.
    ///
    /// Segments accumulate into `out`, whose spare capacity bounds the
    /// transfer; the buffer comes back through the [`TransferComplete`]
    /// the other entry points eventually return. On a local write failure
    /// nothing is committed and the buffer is dropped.
    pub fn get_ranging_data<G: GattClient>(
        &mut self,
        gatt: &mut G,
        ranging_counter: u16,
        out: Vec<u8>,
    ) -> Result<(), ClientError> {
        if self.cp_state != CpState::None || self.transfer.is_some() {
            return Err(ClientError::Busy);
        }

        debug!(conn = %self.conn, ranging_counter, "get ranging data");

        let command = RasCpCommand::GetRangingData { ranging_counter };
        gatt.write_without_response(self.conn, self.handles.control_point, &command.encode())?;

        self.cp_state = CpState::GetRdWritten;
        let capacity = out.capacity();
        self.transfer = Some(Transfer {
            ranging_counter,
            out,
            capacity,
            next_expected_segment_counter: 0,
            received_any: false,
            last_segment_received: false,
            error_with_data_receive: false,
        });

        Ok(())
    }

    /// Ingest an On-demand Ranging Data notification.
    ///
    /// Errors are sticky: after the first violation the rest of the
    /// stream is ignored and the transfer only waits for the control
    /// point sequence to terminate it.
    pub fn on_segment(&mut self, data: &[u8]) {
        let Some(transfer) = &mut self.transfer else {
            debug!("unexpected ranging data notification");
            return;
        };
        if transfer.last_segment_received || transfer.error_with_data_receive {
            debug!("late ranging data notification dropped");
            return;
        }

        let segment = match Segment::parse(data) {
            Ok(segment) => segment,
            Err(_) => {
                transfer.fail("invalid segment length");
                return;
            }
        };
        let header = segment.header;

        if header.first_seg {
            if transfer.received_any {
                transfer.fail("duplicate first segment");
                return;
            }
            if header.seg_counter != 0 {
                transfer.fail("first segment with nonzero counter");
                return;
            }
        } else if !transfer.received_any {
            transfer.fail("stream did not start with a first segment");
            return;
        }

        if header.seg_counter != transfer.next_expected_segment_counter {
            transfer.fail("no support for receiving segments out of order");
            return;
        }

        if transfer.capacity - transfer.out.len() < segment.data.len() {
            transfer.fail("output buffer too small for next segment");
            return;
        }

        transfer.out.extend_from_slice(segment.data);
        transfer.received_any = true;
        if header.last_seg {
            transfer.last_segment_received = true;
        }
        transfer.next_expected_segment_counter = (header.seg_counter + 1) & SEGMENT_COUNTER_MASK;
    }

    /// Ingest a RAS-CP indication.
    ///
    /// Drives the GET_RD/ACK_RD handshake; returns the completion when
    /// the exchange reaches a terminal state.
    pub fn on_cp_indication<G: GattClient>(
        &mut self,
        gatt: &mut G,
        data: &[u8],
    ) -> Option<TransferComplete> {
        let response = match RasCpResponse::decode(data) {
            Ok(response) => response,
            Err(err) => {
                warn!(conn = %self.conn, %err, "bad control point indication");
                return None;
            }
        };

        match response {
            RasCpResponse::CompleteRangingData { ranging_counter } => {
                let in_progress = self
                    .transfer
                    .as_ref()
                    .is_some_and(|t| t.ranging_counter == ranging_counter);
                if !in_progress {
                    warn!(conn = %self.conn, ranging_counter, "unexpected complete response");
                    return None;
                }

                self.ack_ranging_data(gatt, ranging_counter)
            }
            RasCpResponse::CompleteLostSegments { .. } => {
                warn!(conn = %self.conn, "unsupported complete lost segments response");
                None
            }
            RasCpResponse::ResponseCode(code) => self.on_response_code(code),
        }
    }

    fn ack_ranging_data<G: GattClient>(
        &mut self,
        gatt: &mut G,
        ranging_counter: u16,
    ) -> Option<TransferComplete> {
        debug!(conn = %self.conn, ranging_counter, "ack ranging data");

        let command = RasCpCommand::AckRangingData { ranging_counter };
        match gatt.write_without_response(self.conn, self.handles.control_point, &command.encode())
        {
            Ok(()) => {
                self.cp_state = CpState::AckRdWritten;
                None
            }
            Err(err) => {
                // The data is here but the handshake cannot finish.
                warn!(conn = %self.conn, %err, "ack write failed");
                if let Some(transfer) = &mut self.transfer {
                    transfer.error_with_data_receive = true;
                }
                self.complete()
            }
        }
    }

    fn on_response_code(&mut self, code: ResponseCode) -> Option<TransferComplete> {
        match self.cp_state {
            CpState::None => {
                if self.transfer.is_some() && code == ResponseCode::ProcedureNotCompleted {
                    // The peer aborted the transfer.
                    if let Some(transfer) = &mut self.transfer {
                        transfer.error_with_data_receive = true;
                    }
                    return self.complete();
                }

                warn!(conn = %self.conn, ?code, "unexpected response code");
                None
            }
            CpState::GetRdWritten => {
                self.cp_state = CpState::None;

                if code != ResponseCode::Success {
                    debug!(conn = %self.conn, ?code, "get ranging data refused");
                    if let Some(transfer) = &mut self.transfer {
                        transfer.error_with_data_receive = true;
                    }
                    return self.complete();
                }

                debug!(conn = %self.conn, "get ranging data accepted");
                None
            }
            CpState::AckRdWritten => {
                self.cp_state = CpState::None;

                if code != ResponseCode::Success {
                    // The record arrived; a failed ACK does not undo that.
                    warn!(conn = %self.conn, ?code, "ack ranging data refused");
                }

                self.complete()
            }
        }
    }

    /// Ingest a Ranging Data Ready notification, yielding the counter for
    /// the application to request.
    pub fn on_ranging_data_ready(&mut self, data: &[u8]) -> Option<u16> {
        match wire::decode_status_counter(data) {
            Ok(ranging_counter) => {
                debug!(conn = %self.conn, ranging_counter, "ranging data ready");
                Some(ranging_counter)
            }
            Err(_) => {
                debug!(conn = %self.conn, "ranging data ready size error");
                None
            }
        }
    }

    /// Ingest a Ranging Data Overwritten notification.
    ///
    /// Overwriting the record currently in transfer is fatal for that
    /// transfer; with a control point exchange pending the completion is
    /// left to that exchange so only one terminal path runs.
    pub fn on_ranging_data_overwritten(&mut self, data: &[u8]) -> OverwrittenOutcome {
        let Ok(ranging_counter) = wire::decode_status_counter(data) else {
            debug!(conn = %self.conn, "ranging data overwritten size error");
            return OverwrittenOutcome::Ignored;
        };

        debug!(conn = %self.conn, ranging_counter, "ranging data overwritten");

        let in_progress = self
            .transfer
            .as_ref()
            .is_some_and(|t| t.ranging_counter == ranging_counter);
        if !in_progress {
            return OverwrittenOutcome::Notify(ranging_counter);
        }

        if let Some(transfer) = &mut self.transfer {
            transfer.error_with_data_receive = true;
        }

        if self.cp_state != CpState::None {
            return OverwrittenOutcome::Deferred;
        }

        match self.complete() {
            Some(complete) => OverwrittenOutcome::Completed(complete),
            None => OverwrittenOutcome::Ignored,
        }
    }

    /// Tear the session down on disconnect, failing a pending transfer.
    pub fn on_disconnect(&mut self) -> Option<TransferComplete> {
        self.cp_state = CpState::None;
        if self.transfer.is_some() {
            if let Some(transfer) = &mut self.transfer {
                transfer.error_with_data_receive = true;
            }
            return self.complete();
        }
        None
    }

    fn complete(&mut self) -> Option<TransferComplete> {
        let transfer = self.transfer.take()?;

        let ok = !transfer.error_with_data_receive && transfer.last_segment_received;
        let complete = TransferComplete {
            ranging_counter: transfer.ranging_counter,
            data: transfer.out,
            result: if ok { Ok(()) } else { Err(TransferError) },
        };

        debug!(
            conn = %self.conn,
            ranging_counter = complete.ranging_counter,
            ok,
            "ranging data get complete"
        );
        Some(complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::SegmentHeader;

    const CONN: ConnId = ConnId(3);

    const HANDLES: RasHandles = RasHandles {
        features: 0x10,
        realtime_rd: None,
        on_demand_rd: 0x12,
        control_point: 0x14,
        rd_ready: 0x16,
        rd_overwritten: 0x18,
    };

    struct MockWriter {
        fail_writes: usize,
        written: Vec<(u16, Vec<u8>)>,
    }

    impl MockWriter {
        fn new() -> Self {
            Self {
                fail_writes: 0,
                written: Vec::new(),
            }
        }

        fn last_command(&self) -> RasCpCommand {
            let (handle, data) = self.written.last().expect("a control point write");
            assert_eq!(*handle, HANDLES.control_point);
            RasCpCommand::decode(data).unwrap()
        }
    }

    impl GattClient for MockWriter {
        fn write_without_response(
            &mut self,
            _conn: ConnId,
            handle: u16,
            data: &[u8],
        ) -> Result<(), GattError> {
            if self.fail_writes > 0 {
                self.fail_writes -= 1;
                return Err(GattError::NoResources);
            }
            self.written.push((handle, data.to_vec()));
            Ok(())
        }
    }

    fn session() -> RreqSession {
        RreqSession::new(CONN, HANDLES)
    }

    fn segment(first: bool, last: bool, counter: u8, data: &[u8]) -> Vec<u8> {
        Segment {
            header: SegmentHeader {
                first_seg: first,
                last_seg: last,
                seg_counter: counter,
            },
            data,
        }
        .encode()
    }

    fn response(code: ResponseCode) -> Vec<u8> {
        RasCpResponse::ResponseCode(code).encode()
    }

    fn complete_rd(counter: u16) -> Vec<u8> {
        RasCpResponse::CompleteRangingData {
            ranging_counter: counter,
        }
        .encode()
    }

    fn start(session: &mut RreqSession, gatt: &mut MockWriter, counter: u16) {
        session
            .get_ranging_data(gatt, counter, Vec::with_capacity(256))
            .unwrap();
        assert!(session.on_cp_indication(gatt, &response(ResponseCode::Success)).is_none());
    }

    /// Run the terminal CompleteRD -> ACK -> Success sequence.
    fn finish(session: &mut RreqSession, gatt: &mut MockWriter, counter: u16) -> TransferComplete {
        assert!(session.on_cp_indication(gatt, &complete_rd(counter)).is_none());
        assert_eq!(
            gatt.last_command(),
            RasCpCommand::AckRangingData {
                ranging_counter: counter
            }
        );
        session
            .on_cp_indication(gatt, &response(ResponseCode::Success))
            .expect("transfer completes")
    }

    mod handshake {
        use super::*;

        #[test]
        fn test_get_writes_command_and_sets_state() {
            let mut session = session();
            let mut gatt = MockWriter::new();

            session
                .get_ranging_data(&mut gatt, 5, Vec::with_capacity(64))
                .unwrap();

            assert_eq!(
                gatt.last_command(),
                RasCpCommand::GetRangingData { ranging_counter: 5 }
            );
            assert!(session.transfer_in_progress());
        }

        #[test]
        fn test_busy_while_in_progress() {
            let mut session = session();
            let mut gatt = MockWriter::new();

            session
                .get_ranging_data(&mut gatt, 5, Vec::with_capacity(64))
                .unwrap();
            let result = session.get_ranging_data(&mut gatt, 6, Vec::with_capacity(64));
            assert!(matches!(result, Err(ClientError::Busy)));
        }

        #[test]
        fn test_local_write_failure_commits_nothing() {
            let mut session = session();
            let mut gatt = MockWriter::new();
            gatt.fail_writes = 1;

            let result = session.get_ranging_data(&mut gatt, 5, Vec::with_capacity(64));
            assert!(matches!(result, Err(ClientError::Gatt(_))));
            assert!(!session.transfer_in_progress());

            // The session is reusable right away.
            session
                .get_ranging_data(&mut gatt, 5, Vec::with_capacity(64))
                .unwrap();
        }

        #[test]
        fn test_happy_path_reassembles() {
            let mut session = session();
            let mut gatt = MockWriter::new();
            start(&mut session, &mut gatt, 5);

            session.on_segment(&segment(true, false, 0, &[1, 2, 3]));
            session.on_segment(&segment(false, false, 1, &[4, 5, 6]));
            session.on_segment(&segment(false, true, 2, &[7]));

            let complete = finish(&mut session, &mut gatt, 5);
            assert_eq!(complete.ranging_counter, 5);
            assert!(complete.result.is_ok());
            assert_eq!(complete.data, vec![1, 2, 3, 4, 5, 6, 7]);
            assert!(!session.transfer_in_progress());
        }

        #[test]
        fn test_get_refused_completes_with_error() {
            let mut session = session();
            let mut gatt = MockWriter::new();

            session
                .get_ranging_data(&mut gatt, 5, Vec::with_capacity(64))
                .unwrap();
            let complete = session
                .on_cp_indication(&mut gatt, &response(ResponseCode::NoRecordsFound))
                .expect("refusal completes the transfer");
            assert!(complete.result.is_err());
        }

        #[test]
        fn test_ack_refusal_still_completes_ok() {
            let mut session = session();
            let mut gatt = MockWriter::new();
            start(&mut session, &mut gatt, 5);
            session.on_segment(&segment(true, true, 0, &[1]));

            assert!(session.on_cp_indication(&mut gatt, &complete_rd(5)).is_none());
            let complete = session
                .on_cp_indication(&mut gatt, &response(ResponseCode::ServerBusy))
                .expect("ack response completes");
            // The data arrived; a refused ACK does not fail the transfer.
            assert!(complete.result.is_ok());
        }

        #[test]
        fn test_ack_write_failure_completes_with_error() {
            let mut session = session();
            let mut gatt = MockWriter::new();
            start(&mut session, &mut gatt, 5);
            session.on_segment(&segment(true, true, 0, &[1]));

            gatt.fail_writes = 1;
            let complete = session
                .on_cp_indication(&mut gatt, &complete_rd(5))
                .expect("failed ack write completes");
            assert!(complete.result.is_err());
        }

        #[test]
        fn test_complete_rd_counter_mismatch_ignored() {
            let mut session = session();
            let mut gatt = MockWriter::new();
            start(&mut session, &mut gatt, 5);

            assert!(session.on_cp_indication(&mut gatt, &complete_rd(9)).is_none());
            assert!(session.transfer_in_progress());
        }

        #[test]
        fn test_peer_abort_completes_with_error() {
            let mut session = session();
            let mut gatt = MockWriter::new();
            start(&mut session, &mut gatt, 5);
            session.on_segment(&segment(true, false, 0, &[1]));

            let complete = session
                .on_cp_indication(&mut gatt, &response(ResponseCode::ProcedureNotCompleted))
                .expect("abort completes the transfer");
            assert!(complete.result.is_err());
        }

        #[test]
        fn test_missing_last_segment_is_error() {
            let mut session = session();
            let mut gatt = MockWriter::new();
            start(&mut session, &mut gatt, 5);

            session.on_segment(&segment(true, false, 0, &[1, 2]));
            // CompleteRD arrives although no last segment was seen.
            let complete = finish(&mut session, &mut gatt, 5);
            assert!(complete.result.is_err());
        }
    }

    mod segments {
        use super::*;

        #[test]
        fn test_out_of_order_is_sticky_error() {
            let mut session = session();
            let mut gatt = MockWriter::new();
            start(&mut session, &mut gatt, 5);

            session.on_segment(&segment(true, false, 0, &[1]));
            // Counter skips ahead by one.
            session.on_segment(&segment(false, false, 2, &[2]));
            // Later segments are ignored, even valid ones.
            session.on_segment(&segment(false, true, 1, &[3]));

            let complete = finish(&mut session, &mut gatt, 5);
            assert!(complete.result.is_err());
            assert_eq!(complete.data, vec![1]);
        }

        #[test]
        fn test_first_segment_with_nonzero_counter() {
            let mut session = session();
            let mut gatt = MockWriter::new();
            start(&mut session, &mut gatt, 5);

            session.on_segment(&segment(true, true, 1, &[1]));
            let complete = finish(&mut session, &mut gatt, 5);
            assert!(complete.result.is_err());
        }

        #[test]
        fn test_duplicate_first_segment() {
            let mut session = session();
            let mut gatt = MockWriter::new();
            start(&mut session, &mut gatt, 5);

            session.on_segment(&segment(true, false, 0, &[1]));
            session.on_segment(&segment(true, false, 0, &[1]));

            let complete = finish(&mut session, &mut gatt, 5);
            assert!(complete.result.is_err());
        }

        #[test]
        fn test_stream_must_start_with_first() {
            let mut session = session();
            let mut gatt = MockWriter::new();
            start(&mut session, &mut gatt, 5);

            session.on_segment(&segment(false, false, 0, &[1]));
            let complete = finish(&mut session, &mut gatt, 5);
            assert!(complete.result.is_err());
        }

        #[test]
        fn test_rolling_counter_wraparound() {
            let mut session = session();
            let mut gatt = MockWriter::new();
            start(&mut session, &mut gatt, 5);

            // 70 segments walk the counter through 0..63 and around.
            for i in 0..70u32 {
                let counter = (i % 64) as u8;
                session.on_segment(&segment(i == 0, i == 69, counter, &[i as u8]));
            }

            let complete = finish(&mut session, &mut gatt, 5);
            assert!(complete.result.is_ok());
            assert_eq!(complete.data.len(), 70);
        }

        #[test]
        fn test_output_capacity_exceeded() {
            let mut session = session();
            let mut gatt = MockWriter::new();
            session
                .get_ranging_data(&mut gatt, 5, Vec::with_capacity(4))
                .unwrap();
            session.on_cp_indication(&mut gatt, &response(ResponseCode::Success));

            session.on_segment(&segment(true, false, 0, &[1, 2, 3]));
            session.on_segment(&segment(false, true, 1, &[4, 5, 6]));

            let complete = finish(&mut session, &mut gatt, 5);
            assert!(complete.result.is_err());
        }

        #[test]
        fn test_segment_without_transfer_is_discarded() {
            let mut session = session();
            session.on_segment(&segment(true, true, 0, &[1]));
            assert!(!session.transfer_in_progress());
        }

        #[test]
        fn test_header_only_segment_accepted() {
            let mut session = session();
            let mut gatt = MockWriter::new();
            start(&mut session, &mut gatt, 5);

            session.on_segment(&segment(true, true, 0, &[]));
            let complete = finish(&mut session, &mut gatt, 5);
            assert!(complete.result.is_ok());
            assert!(complete.data.is_empty());
        }
    }

    mod overwritten {
        use super::*;

        #[test]
        fn test_overwritten_unrelated_counter_notifies_app() {
            let mut session = session();
            let mut gatt = MockWriter::new();
            start(&mut session, &mut gatt, 5);

            let outcome = session.on_ranging_data_overwritten(&wire::encode_status_counter(9));
            assert!(matches!(outcome, OverwrittenOutcome::Notify(9)));
            assert!(session.transfer_in_progress());
        }

        #[test]
        fn test_overwritten_during_transfer_completes() {
            let mut session = session();
            let mut gatt = MockWriter::new();
            start(&mut session, &mut gatt, 5);
            session.on_segment(&segment(true, false, 0, &[1]));

            let outcome = session.on_ranging_data_overwritten(&wire::encode_status_counter(5));
            let OverwrittenOutcome::Completed(complete) = outcome else {
                panic!("expected immediate completion");
            };
            assert!(complete.result.is_err());
            assert!(!session.transfer_in_progress());
        }

        #[test]
        fn test_overwritten_with_cp_pending_defers() {
            let mut session = session();
            let mut gatt = MockWriter::new();
            // GET_RD written, no response yet: a CP exchange is pending.
            session
                .get_ranging_data(&mut gatt, 5, Vec::with_capacity(64))
                .unwrap();

            let outcome = session.on_ranging_data_overwritten(&wire::encode_status_counter(5));
            assert!(matches!(outcome, OverwrittenOutcome::Deferred));
            assert!(session.transfer_in_progress());

            // The pending exchange delivers the (failed) completion: the
            // server no longer has the record.
            let complete = session
                .on_cp_indication(&mut gatt, &response(ResponseCode::NoRecordsFound))
                .expect("deferred completion");
            assert!(complete.result.is_err());
        }

        #[test]
        fn test_ready_notification_decodes() {
            let mut session = session();
            assert_eq!(
                session.on_ranging_data_ready(&wire::encode_status_counter(17)),
                Some(17)
            );
            assert_eq!(session.on_ranging_data_ready(&[0x01]), None);
        }
    }

    mod lifecycle {
        use super::*;

        #[test]
        fn test_disconnect_fails_pending_transfer() {
            let mut session = session();
            let mut gatt = MockWriter::new();
            start(&mut session, &mut gatt, 5);
            session.on_segment(&segment(true, false, 0, &[1]));

            let complete = session.on_disconnect().expect("pending transfer fails");
            assert!(complete.result.is_err());
            assert!(!session.transfer_in_progress());
        }

        #[test]
        fn test_disconnect_idle_is_quiet() {
            let mut session = session();
            assert!(session.on_disconnect().is_none());
        }

        #[test]
        fn test_features_read() {
            let mut session = session();
            let features = session
                .on_features_read(&RasFeatures::REALTIME_RD.to_bytes())
                .unwrap();
            assert!(features.realtime_rd());
            assert_eq!(session.remote_features(), Some(features));
        }
    }

    /// End-to-end: server segmentation through client reassembly.
    #[cfg(feature = "server")]
    mod roundtrip {
        use super::*;
        use crate::buffer::{PoolConfig, RdBufferPool};
        use crate::core::constants::CS_DONE_STATUS_COMPLETE;
        use crate::core::{Characteristic, CsStep, RasGatt, SubeventResult, Subscription};
        use crate::server::{RrspSession, ServerConfig};

        /// Server-side GATT mock that queues outbound frames.
        struct LoopGatt {
            mtu: u16,
            segments: Vec<Vec<u8>>,
            cp: Vec<Vec<u8>>,
        }

        impl RasGatt for LoopGatt {
            fn att_mtu(&self, _conn: ConnId) -> u16 {
                self.mtu
            }

            fn is_subscribed(
                &self,
                _conn: ConnId,
                chrc: Characteristic,
                sub: Subscription,
            ) -> bool {
                matches!(
                    (chrc, sub),
                    (Characteristic::OnDemandRangingData, Subscription::Notify)
                        | (Characteristic::ControlPoint, Subscription::Indicate)
                )
            }

            fn notify(
                &mut self,
                _conn: ConnId,
                chrc: Characteristic,
                data: &[u8],
            ) -> Result<(), GattError> {
                assert_eq!(chrc, Characteristic::OnDemandRangingData);
                self.segments.push(data.to_vec());
                Ok(())
            }

            fn indicate(
                &mut self,
                _conn: ConnId,
                chrc: Characteristic,
                data: &[u8],
            ) -> Result<(), GattError> {
                assert_eq!(chrc, Characteristic::ControlPoint);
                self.cp.push(data.to_vec());
                Ok(())
            }
        }

        fn transfer_roundtrip(mtu: u16, num_steps: usize, step_len: usize) {
            let conn = ConnId(1);
            let mut pool = RdBufferPool::new(PoolConfig {
                max_connections: 1,
                buffers_per_conn: 1,
            });
            pool.on_subevent_result(
                conn,
                &SubeventResult {
                    procedure_counter: 5,
                    config_id: 1,
                    start_acl_conn_event: 2,
                    frequency_compensation: 0,
                    procedure_done_status: CS_DONE_STATUS_COMPLETE,
                    subevent_done_status: CS_DONE_STATUS_COMPLETE,
                    procedure_abort_reason: 0,
                    subevent_abort_reason: 0,
                    reference_power_level: -40,
                    selected_tx_power: 0,
                    antenna_paths_mask: 1,
                    steps: (0..num_steps)
                        .map(|i| CsStep {
                            mode: 2,
                            channel: i as u8,
                            data: (0..step_len).map(|j| (i + j) as u8).collect(),
                        })
                        .collect(),
                },
            );

            let ticket = pool.claim(conn, 5).unwrap();
            let record = pool.pull_bytes(&ticket, usize::MAX);
            pool.restart(&ticket);
            pool.release(ticket).unwrap();

            let mut server = RrspSession::new(conn, ServerConfig::default());
            let mut server_gatt = LoopGatt {
                mtu,
                segments: Vec::new(),
                cp: Vec::new(),
            };

            let mut client = RreqSession::new(conn, HANDLES);
            let mut client_gatt = MockWriter::new();
            client
                .get_ranging_data(&mut client_gatt, 5, Vec::with_capacity(record.len()))
                .unwrap();

            // Relay the client's GET_RD to the server.
            let (_, get_rd) = client_gatt.written.last().unwrap().clone();
            server
                .on_control_point_write(&mut pool, &mut server_gatt, &get_rd)
                .unwrap();
            while server.is_streaming() {
                server.on_ranging_data_sent(&mut pool, &mut server_gatt);
            }

            // Relay everything back: success response, segments, complete.
            let mut complete = None;
            let cp_frames = server_gatt.cp.clone();
            assert!(client.on_cp_indication(&mut client_gatt, &cp_frames[0]).is_none());
            for frame in &server_gatt.segments {
                client.on_segment(frame);
            }
            for frame in &cp_frames[1..] {
                if let Some(done) = client.on_cp_indication(&mut client_gatt, frame) {
                    complete = Some(done);
                }
            }

            // The client's ACK lands on the server and frees the record.
            let (_, ack) = client_gatt.written.last().unwrap().clone();
            server
                .on_control_point_write(&mut pool, &mut server_gatt, &ack)
                .unwrap();
            if let Some(done) = client.on_cp_indication(&mut client_gatt, server_gatt.cp.last().unwrap())
            {
                complete = Some(done);
            }

            let complete = complete.expect("transfer completed");
            assert!(complete.result.is_ok(), "mtu={mtu} num_steps={num_steps}");
            assert_eq!(complete.data, record, "mtu={mtu} num_steps={num_steps}");
            assert!(!pool.ready_check(conn, 5));
        }

        #[test]
        fn test_roundtrip_across_mtus_and_sizes() {
            for mtu in [23u16, 185, 517] {
                for (num_steps, step_len) in [(1, 1), (1, 23), (8, 25), (20, 30), (80, 25)] {
                    transfer_roundtrip(mtu, num_steps, step_len);
                }
            }
        }

        #[test]
        fn test_roundtrip_exact_segment_multiple() {
            // Record length is 4+8+num_steps*(1+step_len); one 23-byte
            // step gives 36 bytes, exactly two 18-byte segments at MTU 23.
            transfer_roundtrip(23, 1, 23);
        }
    }
}
