//! Client core: builds request frames, retransmits on timeout with a
//! stable request id, matches replies by id, and runs the blocking
//! monitor-callback wait.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::limits::MAX_DATAGRAM_LEN;
use crate::model::WallClock;
use crate::proto::{
    self, BookRequest, CallbackPayload, ChangeRequest, OpCode, QueryRequest,
    RegisterMonitorRequest, Request, Response, Semantic,
};

/// Outcome of one logical request after all retransmissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Reply(Response),
    /// No reply after every attempt. Under at-least-once semantics the
    /// operation may still have executed, possibly more than once.
    TimedOut { attempts: u32 },
}

pub struct Client {
    socket: UdpSocket,
    server: SocketAddr,
    semantic: Semantic,
    timeout: Duration,
    retries: u32,
}

/// Uniformly random positive 32-bit id. Zero is reserved for server
/// replies to undecodable frames.
fn next_request_id() -> u32 {
    rand::rng().random_range(1..=i32::MAX as u32)
}

impl Client {
    pub async fn connect(server: SocketAddr, bind_port: u16) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", bind_port)).await?;
        Ok(Self {
            socket,
            server,
            semantic: Semantic::Default,
            timeout: Duration::from_millis(2000),
            retries: 3,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_retries(&mut self, retries: u32) {
        self.retries = retries;
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn set_semantic(&mut self, semantic: Semantic) {
        self.semantic = semantic;
    }

    /// Send one logical request and wait for its reply. The same frame
    /// bytes, including the request id, are retransmitted on every
    /// timeout, which is what lets an at-most-once server deduplicate.
    pub async fn invoke(&self, op: OpCode, payload: Bytes) -> io::Result<Outcome> {
        let request_id = next_request_id();
        let frame = proto::encode_request(&Request {
            request_id,
            op,
            semantic: self.semantic,
            payload,
        });

        let attempts = self.retries + 1;
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        for attempt in 1..=attempts {
            self.socket.send_to(&frame, self.server).await?;

            if let Some(rsp) = self.await_reply(request_id, &mut buf).await? {
                return Ok(Outcome::Reply(rsp));
            }
            warn!("timeout waiting for reply (attempt {attempt}/{attempts}), retrying");
        }
        Ok(Outcome::TimedOut { attempts })
    }

    /// Wait up to `self.timeout` for a response frame matching
    /// `request_id`. Non-matching or undecodable datagrams are discarded
    /// and the wait resumes for the remaining window.
    async fn await_reply(&self, request_id: u32, buf: &mut [u8]) -> io::Result<Option<Response>> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match tokio::time::timeout(remaining, self.socket.recv_from(buf)).await {
                Err(_elapsed) => return Ok(None),
                Ok(Err(e)) => return Err(e),
                Ok(Ok((len, from))) => {
                    if from != self.server {
                        debug!("datagram from unexpected peer {from}, ignoring");
                        continue;
                    }
                    match proto::decode_response(&buf[..len]) {
                        Ok(rsp) if rsp.request_id == request_id => return Ok(Some(rsp)),
                        Ok(rsp) => {
                            debug!(
                                "response for different request id {} (expected {request_id}), ignoring",
                                rsp.request_id
                            );
                        }
                        Err(e) => debug!("undecodable datagram in reply window: {e}"),
                    }
                }
            }
        }
    }

    /// Receive monitor callbacks for `window` wall time, invoking the
    /// handler for each. Timeouts inside the window are ignored; datagrams
    /// that do not parse as callbacks are dropped.
    pub async fn monitor_wait<F>(&self, window: Duration, mut on_callback: F) -> io::Result<usize>
    where
        F: FnMut(CallbackPayload),
    {
        let deadline = Instant::now() + window;
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        let mut delivered = 0usize;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(delivered);
            }
            match tokio::time::timeout(remaining, self.socket.recv_from(&mut buf)).await {
                Err(_elapsed) => return Ok(delivered),
                Ok(Err(e)) => return Err(e),
                Ok(Ok((len, from))) => match CallbackPayload::decode(&buf[..len]) {
                    Ok(cb) => {
                        delivered += 1;
                        on_callback(cb);
                    }
                    Err(e) => debug!("non-callback datagram from {from} during monitor wait: {e}"),
                },
            }
        }
    }

    // ── Operation helpers ────────────────────────────────────────

    pub async fn query(&self, name: &str, days: Vec<u8>) -> io::Result<Outcome> {
        let payload = QueryRequest { name: name.to_string(), days }
            .encode()
            .map_err(wire_err)?;
        self.invoke(OpCode::Query, payload).await
    }

    pub async fn book(&self, name: &str, start: WallClock, end: WallClock) -> io::Result<Outcome> {
        let payload = BookRequest { name: name.to_string(), start, end }
            .encode()
            .map_err(wire_err)?;
        self.invoke(OpCode::Book, payload).await
    }

    pub async fn change(&self, confirmation_id: u32, offset_minutes: i32) -> io::Result<Outcome> {
        let payload = ChangeRequest { confirmation_id, offset_minutes }.encode();
        self.invoke(OpCode::Change, payload).await
    }

    pub async fn register_monitor(&self, name: &str, interval_seconds: u32) -> io::Result<Outcome> {
        let payload = RegisterMonitorRequest { name: name.to_string(), interval_seconds }
            .encode()
            .map_err(wire_err)?;
        self.invoke(OpCode::RegisterMonitor, payload).await
    }

    pub async fn op_a(&self, name: Option<&str>) -> io::Result<Outcome> {
        let payload = proto::encode_optional_name(name).map_err(wire_err)?;
        self.invoke(OpCode::OpA, payload).await
    }

    pub async fn op_b(&self, name: Option<&str>) -> io::Result<Outcome> {
        let payload = proto::encode_optional_name(name).map_err(wire_err)?;
        self.invoke(OpCode::OpB, payload).await
    }
}

fn wire_err(e: proto::WireError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, e)
}
