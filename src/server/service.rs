//! Async work-queue service for the server role.
//!
//! One spawned task owns the buffer pool and every [`RrspSession`], so
//! all mutation of a connection's state is serialized without locks: the
//! two asynchronous entry points (controller subevents and GATT
//! writes/completions) are messages on one input channel, handled one at
//! a time. Long operations never loop inside a message - segment streams
//! advance one PDU per transport completion.
//!
//! Buffer pool lifecycle events fan out to the application through the
//! event channel returned by [`RrspService::spawn`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::session::RrspSession;
use super::{ServerConfig, ServerError};
use crate::buffer::{PoolConfig, RdBufferEvent, RdBufferPool};
use crate::core::{ConnId, RasGatt, SubeventResult};
use crate::wire::RasFeatures;

/// Cadence of the ACK-timeout / stalled-stream sweep.
const SWEEP_PERIOD: Duration = Duration::from_secs(1);

/// Builder for a [`RrspService`] configuration.
#[derive(Debug, Default)]
pub struct RrspServiceBuilder {
    config: ServerConfig,
}

impl RrspServiceBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the advertised feature bitmap.
    pub fn features(mut self, features: RasFeatures) -> Self {
        self.config.features = features;
        self
    }

    /// Set the maximum number of concurrent sessions.
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.config.max_sessions = max;
        self
    }

    /// Set the number of records retained per connection.
    pub fn buffers_per_conn(mut self, buffers: usize) -> Self {
        self.config.buffers_per_conn = buffers;
        self
    }

    /// Set or disable the post-stream ACK timeout.
    pub fn ack_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.ack_timeout = timeout;
        self
    }

    /// Keep or free records once the client acknowledges them.
    pub fn release_acked(mut self, release: bool) -> Self {
        self.config.release_acked = release;
        self
    }

    /// Build the server configuration.
    pub fn build(self) -> ServerConfig {
        self.config
    }
}

/// Event from the server service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RrspEvent {
    /// A complete ranging procedure was stored for a connection.
    NewRangingData {
        /// Owning connection.
        conn: ConnId,
        /// Ranging counter of the stored procedure.
        ranging_counter: u16,
    },
    /// A stored procedure was dropped to make room or after an ACK
    /// timeout.
    RangingDataOverwritten {
        /// Owning connection.
        conn: ConnId,
        /// Ranging counter of the dropped procedure.
        ranging_counter: u16,
    },
}

impl From<RdBufferEvent> for RrspEvent {
    fn from(event: RdBufferEvent) -> Self {
        match event {
            RdBufferEvent::NewRangingData {
                conn,
                ranging_counter,
            } => Self::NewRangingData {
                conn,
                ranging_counter,
            },
            RdBufferEvent::RangingDataOverwritten {
                conn,
                ranging_counter,
            } => Self::RangingDataOverwritten {
                conn,
                ranging_counter,
            },
        }
    }
}

/// Snapshot of one session, for GATT read handlers and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    /// Whether a segment stream is in flight.
    pub streaming: bool,
    /// Value of the Ranging Data Ready characteristic.
    pub ready_counter: u16,
    /// Value of the Ranging Data Overwritten characteristic.
    pub overwritten_counter: u16,
}

enum Input {
    Connected(ConnId, oneshot::Sender<Result<(), ServerError>>),
    Disconnected(ConnId),
    Subevent(ConnId, SubeventResult),
    ControlPointWrite(ConnId, Vec<u8>, oneshot::Sender<Result<(), ServerError>>),
    RangingDataSent(ConnId),
    Query(ConnId, oneshot::Sender<Option<SessionStatus>>),
}

/// Handle for feeding the service task.
///
/// Clone one per event source: the controller glue, the GATT write and
/// sent-callback glue, and the connection lifecycle callbacks.
#[derive(Debug, Clone)]
pub struct RrspHandle {
    tx: mpsc::Sender<Input>,
    features: RasFeatures,
}

impl RrspHandle {
    /// Allocate a session for a newly established connection.
    pub async fn connected(&self, conn: ConnId) -> Result<(), ServerError> {
        let (reply, response) = oneshot::channel();
        self.send(Input::Connected(conn, reply)).await?;
        response.await.map_err(|_| ServerError::Shutdown)?
    }

    /// Tear down everything the connection owned.
    pub async fn disconnected(&self, conn: ConnId) -> Result<(), ServerError> {
        self.send(Input::Disconnected(conn)).await
    }

    /// Deliver a CS subevent result from the local controller.
    pub async fn subevent_result(
        &self,
        conn: ConnId,
        result: SubeventResult,
    ) -> Result<(), ServerError> {
        self.send(Input::Subevent(conn, result)).await
    }

    /// Deliver a RAS-CP write from the peer.
    ///
    /// The result mirrors what the ATT write callback should answer:
    /// subscription and length rejections surface here, protocol errors
    /// are answered over the control point instead.
    pub async fn control_point_write(
        &self,
        conn: ConnId,
        data: Vec<u8>,
    ) -> Result<(), ServerError> {
        let (reply, response) = oneshot::channel();
        self.send(Input::ControlPointWrite(conn, data, reply)).await?;
        response.await.map_err(|_| ServerError::Shutdown)?
    }

    /// Report transport completion of an on-demand data PDU.
    pub async fn ranging_data_sent(&self, conn: ConnId) -> Result<(), ServerError> {
        self.send(Input::RangingDataSent(conn)).await
    }

    /// Snapshot a session (read handlers for the status characteristics).
    pub async fn session_status(&self, conn: ConnId) -> Result<Option<SessionStatus>, ServerError> {
        let (reply, response) = oneshot::channel();
        self.send(Input::Query(conn, reply)).await?;
        response.await.map_err(|_| ServerError::Shutdown)
    }

    /// Value of the RAS Features characteristic.
    pub fn features(&self) -> RasFeatures {
        self.features
    }

    async fn send(&self, input: Input) -> Result<(), ServerError> {
        self.tx.send(input).await.map_err(|_| ServerError::Shutdown)
    }
}

/// The server service task.
///
/// Created through [`RrspService::spawn`]; lives until every
/// [`RrspHandle`] is dropped.
pub struct RrspService<G: RasGatt> {
    config: ServerConfig,
    pool: RdBufferPool,
    sessions: HashMap<ConnId, RrspSession>,
    gatt: G,
    events: mpsc::Sender<RrspEvent>,
}

impl<G: RasGatt + Send + 'static> RrspService<G> {
    /// Spawn the service task.
    ///
    /// Returns the input handle and the lifecycle event stream.
    pub fn spawn(config: ServerConfig, gatt: G) -> (RrspHandle, mpsc::Receiver<RrspEvent>) {
        let (input_tx, input_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);

        let service = Self {
            config,
            pool: RdBufferPool::new(PoolConfig {
                max_connections: config.max_sessions,
                buffers_per_conn: config.buffers_per_conn,
            }),
            sessions: HashMap::new(),
            gatt,
            events: event_tx,
        };

        tokio::spawn(service.run(input_rx));

        (
            RrspHandle {
                tx: input_tx,
                features: config.features,
            },
            event_rx,
        )
    }

    async fn run(mut self, mut input: mpsc::Receiver<Input>) {
        let mut sweep = tokio::time::interval(SWEEP_PERIOD);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = input.recv() => match message {
                    Some(message) => self.handle(message).await,
                    None => break,
                },
                _ = sweep.tick() => self.sweep().await,
            }
        }

        debug!("rrsp service stopped");
    }

    async fn handle(&mut self, input: Input) {
        match input {
            Input::Connected(conn, reply) => {
                let _ = reply.send(self.allocate_session(conn));
            }
            Input::Disconnected(conn) => {
                // Disconnect always wins: claims, streams, and pending
                // status flags all go with the session.
                if let Some(mut session) = self.sessions.remove(&conn) {
                    session.on_disconnect(&mut self.pool);
                }
                self.pool.free_on_disconnect(conn);
                debug!(%conn, "session freed");
            }
            Input::Subevent(conn, result) => {
                let events = self.pool.on_subevent_result(conn, &result);
                for event in events {
                    self.dispatch(event).await;
                }
            }
            Input::ControlPointWrite(conn, data, reply) => {
                let result = match self.sessions.get_mut(&conn) {
                    Some(session) => {
                        session.on_control_point_write(&mut self.pool, &mut self.gatt, &data)
                    }
                    None => Err(ServerError::UnknownConnection),
                };
                let _ = reply.send(result);
            }
            Input::RangingDataSent(conn) => {
                if let Some(session) = self.sessions.get_mut(&conn) {
                    session.on_ranging_data_sent(&mut self.pool, &mut self.gatt);
                }
            }
            Input::Query(conn, reply) => {
                let status = self.sessions.get(&conn).map(|session| SessionStatus {
                    streaming: session.is_streaming(),
                    ready_counter: session.ready_counter(),
                    overwritten_counter: session.overwritten_counter(),
                });
                let _ = reply.send(status);
            }
        }
    }

    fn allocate_session(&mut self, conn: ConnId) -> Result<(), ServerError> {
        if self.sessions.contains_key(&conn) {
            return Err(ServerError::AlreadyAllocated);
        }
        if self.sessions.len() >= self.config.max_sessions {
            warn!(%conn, "no free session slot");
            return Err(ServerError::SessionsExhausted);
        }

        debug!(%conn, "session allocated");
        self.sessions.insert(conn, RrspSession::new(conn, self.config));
        Ok(())
    }

    async fn dispatch(&mut self, event: RdBufferEvent) {
        match event {
            RdBufferEvent::NewRangingData {
                conn,
                ranging_counter,
            } => {
                if let Some(session) = self.sessions.get_mut(&conn) {
                    session.ranging_data_ready(ranging_counter);
                    session.flush_status(&mut self.gatt);
                }
            }
            RdBufferEvent::RangingDataOverwritten {
                conn,
                ranging_counter,
            } => {
                if let Some(session) = self.sessions.get_mut(&conn) {
                    session.ranging_data_overwritten(ranging_counter);
                    session.flush_status(&mut self.gatt);
                }
            }
        }

        let _ = self.events.send(event.into()).await;
    }

    async fn sweep(&mut self) {
        let now = Instant::now();
        let mut dropped = Vec::new();

        for session in self.sessions.values_mut() {
            if session.ack_overdue(now) {
                if let Some(ranging_counter) = session.expire_ack(&mut self.pool) {
                    session.flush_status(&mut self.gatt);
                    dropped.push(RdBufferEvent::RangingDataOverwritten {
                        conn: session.conn(),
                        ranging_counter,
                    });
                }
            }

            session.pump(&mut self.pool, &mut self.gatt);
        }

        for event in dropped {
            let _ = self.events.send(event.into()).await;
        }
    }
}
