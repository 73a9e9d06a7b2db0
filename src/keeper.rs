//! Session registry for one connection.
//!
//! DESIGN
//! ======
//! Maps session ids to the input end of each call's channel pair. Callers
//! attach concurrently while the dispatch loop looks up and detaches; the
//! map sits behind a single mutex. Ids come from an atomic counter so
//! allocation never waits on the lock, and are never reused for the
//! lifetime of the keeper.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::channel::ResultSink;

#[derive(Debug)]
pub struct SessionKeeper {
    next_id: AtomicU64,
    sessions: Mutex<HashMap<u64, ResultSink>>,
}

impl SessionKeeper {
    #[must_use]
    pub fn new() -> Self {
        Self { next_id: AtomicU64::new(1), sessions: Mutex::new(HashMap::new()) }
    }

    /// Register `sink` under a fresh session id.
    pub fn attach(&self, sink: ResultSink) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, sink);
        id
    }

    /// Sink for `id`, or `None` once the session has been detached.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<ResultSink> {
        self.lock().get(&id).cloned()
    }

    /// Remove `id` and hand back its sink. Detaching twice is a no-op.
    pub fn detach(&self, id: u64) -> Option<ResultSink> {
        self.lock().remove(&id)
    }

    /// Remove every open session.
    pub fn drain(&self) -> Vec<(u64, ResultSink)> {
        self.lock().drain().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A poisoned lock only means another thread panicked mid-insert/remove;
    // the map itself is still consistent.
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, ResultSink>> {
        self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for SessionKeeper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "keeper_test.rs"]
mod tests;
