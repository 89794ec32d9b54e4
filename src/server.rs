//! Single-socket UDP server loop. Applies the invocation-semantic policy,
//! the duplicate-reply cache, and the fault injector around the request
//! processor. Each datagram is handled to completion before the next is
//! read, so effects from one endpoint apply in arrival order.

use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

use crate::limits::MAX_DATAGRAM_LEN;
use crate::observability as obs;
use crate::processor::Processor;
use crate::proto::{self, Response, ResponseCode};

/// Server-side invocation semantics, fixed at startup. The per-request
/// semantic flag from clients is advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    AtMostOnce,
    AtLeastOnce,
}

impl Policy {
    /// Anything other than AT_LEAST_ONCE selects the at-most-once default.
    pub fn from_flag(s: &str) -> Self {
        if s.eq_ignore_ascii_case("AT_LEAST_ONCE") {
            Policy::AtLeastOnce
        } else {
            Policy::AtMostOnce
        }
    }
}

impl std::fmt::Display for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Policy::AtMostOnce => f.write_str("AT_MOST_ONCE"),
            Policy::AtLeastOnce => f.write_str("AT_LEAST_ONCE"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub policy: Policy,
    pub loss_rate: f64,
    pub reply_loss_rate: f64,
    pub delay: Duration,
    pub cache_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9876,
            policy: Policy::AtMostOnce,
            loss_rate: 0.0,
            reply_loss_rate: 0.0,
            delay: Duration::ZERO,
            cache_ttl: Duration::from_secs(300),
        }
    }
}

// ── Fault injector ───────────────────────────────────────────────

/// Bernoulli drop of inbound and outbound datagrams plus a fixed delay
/// before each send. The drop decision comes first so we never sleep on a
/// datagram that is going to be discarded anyway.
pub struct FaultInjector {
    loss_rate: f64,
    reply_loss_rate: f64,
    delay: Duration,
}

fn clamp01(v: f64) -> f64 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}

impl FaultInjector {
    pub fn new(loss_rate: f64, reply_loss_rate: f64, delay: Duration) -> Self {
        Self {
            loss_rate: clamp01(loss_rate),
            reply_loss_rate: clamp01(reply_loss_rate),
            delay,
        }
    }

    pub fn drop_incoming(&self) -> bool {
        self.loss_rate > 0.0 && rand::random::<f64>() < self.loss_rate
    }

    pub fn drop_outgoing(&self) -> bool {
        self.reply_loss_rate > 0.0 && rand::random::<f64>() < self.reply_loss_rate
    }

    pub async fn delay_outgoing(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

// ── Duplicate-reply cache ────────────────────────────────────────

struct CachedReply {
    reply: Bytes,
    expires_at: Instant,
}

/// TTL map from `(endpoint, request_id)` to the exact reply bytes already
/// sent. The endpoint includes the source port, so a client rebinding to a
/// new port is a new principal.
pub struct DupCache {
    entries: DashMap<(SocketAddr, u32), CachedReply>,
    ttl: Duration,
}

impl DupCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: DashMap::new(), ttl }
    }

    pub fn get(&self, from: SocketAddr, request_id: u32) -> Option<Bytes> {
        let key = (from, request_id);
        // the read guard must drop before the expired entry can be removed
        let expired = match self.entries.get(&key) {
            Some(entry) if entry.expires_at > Instant::now() => return Some(entry.reply.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(&key);
        }
        None
    }

    pub fn put(&self, from: SocketAddr, request_id: u32, reply: Bytes) {
        self.entries.insert(
            (from, request_id),
            CachedReply { reply, expires_at: Instant::now() + self.ttl },
        );
    }

    pub fn sweep_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Server ───────────────────────────────────────────────────────

pub struct Server {
    socket: UdpSocket,
    policy: Policy,
    faults: FaultInjector,
    cache: DupCache,
    processor: Processor,
}

impl Server {
    pub async fn bind(config: &ServerConfig, processor: Processor) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", config.port)).await?;
        info!(
            "server listening on {} policy={}",
            socket.local_addr()?,
            config.policy
        );
        info!(
            "simulator: lossRate={:.3} replyLossRate={:.3} delay={:?} cacheTtl={:?}",
            clamp01(config.loss_rate),
            clamp01(config.reply_loss_rate),
            config.delay,
            config.cache_ttl
        );
        Ok(Self {
            socket,
            policy: config.policy,
            faults: FaultInjector::new(config.loss_rate, config.reply_loss_rate, config.delay),
            cache: DupCache::new(config.cache_ttl),
            processor,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive loop. Runs until the task is dropped; per-datagram failures
    /// are logged and the loop keeps serving.
    pub async fn run(self) -> io::Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        loop {
            let (len, from) = match self.socket.recv_from(&mut buf).await {
                Ok(x) => x,
                Err(e) => {
                    error!("socket receive error: {e}");
                    continue;
                }
            };
            metrics::counter!(obs::DATAGRAMS_RECEIVED_TOTAL).increment(1);

            if self.faults.drop_incoming() {
                info!("simulated drop of incoming datagram from {from}");
                metrics::counter!(obs::INBOUND_DROPPED_TOTAL).increment(1);
            } else {
                self.handle_datagram(&buf[..len], from).await;
            }

            self.cache.sweep_expired();
            self.processor.monitors().sweep_expired();
            metrics::gauge!(obs::DUP_CACHE_ENTRIES).set(self.cache.len() as f64);
        }
    }

    async fn handle_datagram(&self, raw: &[u8], from: SocketAddr) {
        let req = match proto::decode_request(raw) {
            Ok(req) => req,
            Err(e) => {
                warn!("undecodable request from {from}: {e}");
                metrics::counter!(obs::DECODE_FAILURES_TOTAL).increment(1);
                // the header may not even have a usable request id
                let rsp = Response::error(0, ResponseCode::ErrInvalid, &format!("bad request: {e}"));
                self.send_outbound(proto::encode_response(&rsp), from).await;
                return;
            }
        };

        if self.policy == Policy::AtMostOnce
            && let Some(cached) = self.cache.get(from, req.request_id)
        {
            info!(
                "duplicate request id={} from {from}, resending cached reply",
                req.request_id
            );
            metrics::counter!(obs::DUPLICATES_SERVED_TOTAL).increment(1);
            self.send_outbound(cached, from).await;
            return;
        }

        debug!(
            "processing request id={} op={} from {from} flag={:?}",
            req.request_id, req.op, req.semantic
        );
        let started = Instant::now();
        let (response, callbacks) = self.processor.process(&req, from).await;
        metrics::histogram!(obs::REQUEST_DURATION_SECONDS, "op" => req.op.label())
            .record(started.elapsed().as_secs_f64());
        metrics::counter!(
            obs::REQUESTS_TOTAL,
            "op" => req.op.label(),
            "code" => response.code.to_string()
        )
        .increment(1);

        let reply = proto::encode_response(&response);
        self.send_outbound(reply.clone(), from).await;

        if self.policy == Policy::AtMostOnce {
            self.cache.put(from, req.request_id, reply);
        }

        for callback in callbacks {
            self.send_outbound(callback.payload, callback.target).await;
            metrics::counter!(obs::CALLBACKS_SENT_TOTAL).increment(1);
        }
    }

    /// Drop decision first, then the synthetic delay, then the send.
    async fn send_outbound(&self, bytes: Bytes, to: SocketAddr) {
        if self.faults.drop_outgoing() {
            info!("simulated drop of outbound datagram to {to}");
            metrics::counter!(obs::OUTBOUND_DROPPED_TOTAL).increment(1);
            return;
        }
        self.faults.delay_outgoing().await;
        if let Err(e) = self.socket.send_to(&bytes, to).await {
            warn!("failed to send {} bytes to {to}: {e}", bytes.len());
        }
    }
}
