//! Time-bounded facility subscriptions for monitor callbacks.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::info;

#[derive(Debug, Clone, Copy)]
struct MonitorEntry {
    addr: SocketAddr,
    expires_at: Instant,
}

/// Registry of facility watchers. Entries expire after their registration
/// interval; expired entries are pruned lazily on access and by the
/// server-loop sweep. Multiple subscriptions from the same endpoint are
/// permitted.
#[derive(Default)]
pub struct MonitorRegistry {
    watchers: DashMap<String, Vec<MonitorEntry>>,
}

impl MonitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, facility: &str, addr: SocketAddr, interval: Duration) {
        let expires_at = Instant::now() + interval;
        self.watchers
            .entry(facility.to_string())
            .or_default()
            .push(MonitorEntry { addr, expires_at });
        info!("monitor registered: facility={facility} client={addr} interval={interval:?}");
    }

    /// Non-expired watcher endpoints for a facility. Expired entries are
    /// pruned in passing.
    pub fn watchers_for(&self, facility: &str) -> Vec<SocketAddr> {
        let now = Instant::now();
        match self.watchers.get_mut(facility) {
            Some(mut entries) => {
                entries.retain(|e| e.expires_at > now);
                entries.iter().map(|e| e.addr).collect()
            }
            None => Vec::new(),
        }
    }

    /// Facilities with at least one registration (expired or not; callers
    /// filter through `watchers_for`).
    pub fn monitored_facilities(&self) -> Vec<String> {
        self.watchers.iter().map(|e| e.key().clone()).collect()
    }

    /// Drop expired entries and empty facility slots.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        self.watchers.retain(|_, entries| {
            entries.retain(|e| e.expires_at > now);
            !entries.is_empty()
        });
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.iter().map(|e| e.value().len()).sum()
    }
}
