//! Request dispatcher: one decoded request in, one response plus zero or
//! more monitor callbacks out. No I/O happens here; the server loop owns
//! the socket and the fault injector.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::engine::{Engine, EngineError};
use crate::monitor::MonitorRegistry;
use crate::proto::{
    self, BookRequest, CallbackPayload, ChangeRequest, DaySchedule, OpCode, QueryReply,
    QueryRequest, RegisterMonitorRequest, Request, Response, ResponseCode,
};

/// A callback datagram the server loop still has to send.
#[derive(Debug, Clone)]
pub struct Callback {
    pub target: SocketAddr,
    pub payload: Bytes,
}

pub struct Processor {
    engine: Arc<Engine>,
    monitors: Arc<MonitorRegistry>,
}

fn response_code(err: &EngineError) -> ResponseCode {
    match err {
        EngineError::FacilityNotFound(_) | EngineError::BookingNotFound(_) => {
            ResponseCode::ErrNotFound
        }
        EngineError::Conflict(_) | EngineError::WeekFull => ResponseCode::ErrConflict,
        EngineError::Invalid(_) => ResponseCode::ErrInvalid,
    }
}

fn engine_err(request_id: u32, err: EngineError) -> Response {
    Response::error(request_id, response_code(&err), &err.to_string())
}

fn payload_err(request_id: u32, err: proto::WireError) -> Response {
    Response::error(request_id, ResponseCode::ErrInvalid, &err.to_string())
}

impl Processor {
    pub fn new(engine: Arc<Engine>, monitors: Arc<MonitorRegistry>) -> Self {
        Self { engine, monitors }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn monitors(&self) -> &Arc<MonitorRegistry> {
        &self.monitors
    }

    /// Dispatch one request. The source endpoint is the callback target
    /// for REGISTER_MONITOR.
    pub async fn process(&self, req: &Request, from: SocketAddr) -> (Response, Vec<Callback>) {
        match req.op {
            OpCode::Query => (self.handle_query(req).await, Vec::new()),
            OpCode::Book => self.handle_book(req).await,
            OpCode::Change => self.handle_change(req).await,
            OpCode::RegisterMonitor => (self.handle_register_monitor(req, from).await, Vec::new()),
            OpCode::OpA => (Response::ok(req.request_id, Bytes::new()), Vec::new()),
            OpCode::OpB => self.handle_op_b(req).await,
        }
    }

    async fn handle_query(&self, req: &Request) -> Response {
        let qr = match QueryRequest::decode(&req.payload) {
            Ok(qr) => qr,
            Err(e) => return payload_err(req.request_id, e),
        };
        match self.engine.query(&qr.name, &qr.days).await {
            Ok(schedule) => {
                let reply = QueryReply {
                    days: schedule
                        .into_iter()
                        .map(|(day, intervals)| DaySchedule {
                            day,
                            intervals: intervals
                                .into_iter()
                                .map(|(s, e)| (s as u16, e as u16))
                                .collect(),
                        })
                        .collect(),
                };
                Response::ok(req.request_id, reply.encode())
            }
            Err(e) => engine_err(req.request_id, e),
        }
    }

    async fn handle_book(&self, req: &Request) -> (Response, Vec<Callback>) {
        let br = match BookRequest::decode(&req.payload) {
            Ok(br) => br,
            Err(e) => return (payload_err(req.request_id, e), Vec::new()),
        };
        match self.engine.book(&br.name, br.start, br.end).await {
            Ok(id) => {
                let callbacks = self.callbacks_for(&br.name).await;
                (
                    Response::ok(req.request_id, proto::encode_confirmation_id(id)),
                    callbacks,
                )
            }
            Err(e) => (engine_err(req.request_id, e), Vec::new()),
        }
    }

    async fn handle_change(&self, req: &Request) -> (Response, Vec<Callback>) {
        let cr = match ChangeRequest::decode(&req.payload) {
            Ok(cr) => cr,
            Err(e) => return (payload_err(req.request_id, e), Vec::new()),
        };
        match self.engine.change(cr.confirmation_id, cr.offset_minutes).await {
            // the engine knows which facility owns the booking, so only
            // that facility's watchers are notified
            Ok(facility) => {
                let callbacks = self.callbacks_for(&facility).await;
                (Response::ok(req.request_id, Bytes::new()), callbacks)
            }
            Err(e) => (engine_err(req.request_id, e), Vec::new()),
        }
    }

    async fn handle_register_monitor(&self, req: &Request, from: SocketAddr) -> Response {
        let rm = match RegisterMonitorRequest::decode(&req.payload) {
            Ok(rm) => rm,
            Err(e) => return payload_err(req.request_id, e),
        };
        self.monitors
            .register(&rm.name, from, Duration::from_secs(rm.interval_seconds as u64));
        Response::ok(req.request_id, Bytes::new())
    }

    async fn handle_op_b(&self, req: &Request) -> (Response, Vec<Callback>) {
        let name = match proto::decode_optional_name(&req.payload) {
            Some(name) => name,
            None => match self.engine.list_facilities().await.into_iter().next() {
                Some(name) => name,
                None => {
                    return (
                        Response::error(
                            req.request_id,
                            ResponseCode::ErrNotFound,
                            "no facility available",
                        ),
                        Vec::new(),
                    );
                }
            },
        };
        match self.engine.book_first_free(&name).await {
            Ok(id) => {
                let callbacks = self.callbacks_for(&name).await;
                (
                    Response::ok(req.request_id, proto::encode_confirmation_id(id)),
                    callbacks,
                )
            }
            Err(e) => (engine_err(req.request_id, e), Vec::new()),
        }
    }

    /// Build one callback payload for a mutated facility and fan it out to
    /// a frozen snapshot of its current watchers. No watchers, no payload.
    async fn callbacks_for(&self, facility: &str) -> Vec<Callback> {
        let watchers = self.monitors.watchers_for(facility);
        if watchers.is_empty() {
            return Vec::new();
        }
        let segments = match self.engine.week_segments(facility).await {
            Ok(segments) => segments,
            Err(e) => {
                warn!("skipping callbacks for {facility}: {e}");
                return Vec::new();
            }
        };
        let payload = match (CallbackPayload { facility: facility.to_string(), segments }).encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("failed to encode callback for {facility}: {e}");
                return Vec::new();
            }
        };
        debug!(
            "callback for {facility}: {} watcher(s), {} bytes",
            watchers.len(),
            payload.len()
        );
        watchers
            .into_iter()
            .map(|target| Callback { target, payload: payload.clone() })
            .collect()
    }
}
