mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use error::EngineError;

use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::RwLock;

use store::Store;

/// In-memory booking engine. Reads take the shared lock, mutations the
/// exclusive one, so concurrent callers always see a consistent snapshot.
/// Confirmation ids come from a process-wide monotonic counter starting
/// at 1 and are never reused.
pub struct Engine {
    store: RwLock<Store>,
    next_id: AtomicU32,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            store: RwLock::new(Store::new()),
            next_id: AtomicU32::new(1),
        }
    }

    fn alloc_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}
