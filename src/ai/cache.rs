//! In-memory response cache with TTL, a capacity bound, and single-flight
//! slots so that at most one fetch per key is in progress.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use super::AiServiceError;
use crate::cancel::CancelToken;

/// How often a waiter re-checks its own cancel token.
const WAIT_POLL: Duration = Duration::from_millis(25);

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Callers that waited on another caller's fetch instead of fetching.
    pub coalesced: u64,
    /// Fetch attempts actually sent to the AI service.
    pub fetches: u64,
    pub entries: usize,
}

struct Entry {
    value: String,
    stored_at: Instant,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    in_flight: HashMap<String, Arc<Flight>>,
}

/// A fetch in progress. Completed exactly once.
pub struct Flight {
    result: Mutex<Option<Result<String, AiServiceError>>>,
    done: Condvar,
}

impl Flight {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn publish(&self, result: Result<String, AiServiceError>) {
        let mut slot = self.result.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(result);
        }
        self.done.notify_all();
    }

    /// Block until the leader publishes, or until `cancel` fires.
    pub fn wait(&self, cancel: &CancelToken) -> Result<String, AiServiceError> {
        let mut slot = self.result.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            if cancel.is_cancelled() {
                return Err(AiServiceError::Cancelled);
            }
            let (guard, _) = self
                .done
                .wait_timeout(slot, WAIT_POLL)
                .unwrap_or_else(PoisonError::into_inner);
            slot = guard;
        }
    }
}

/// Outcome of a cache lookup.
pub enum Lookup<'a> {
    Hit(String),
    /// The caller owns the fetch for this key and must complete the guard.
    Lead(FlightGuard<'a>),
    /// Another caller is fetching; wait on the flight.
    Wait(Arc<Flight>),
}

// ═══════════════════════════════════════════════════════════
// ResponseCache
// ═══════════════════════════════════════════════════════════

pub struct ResponseCache {
    ttl: Duration,
    capacity: usize,
    inner: Mutex<Inner>,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    fetches: AtomicU64,
}

impl ResponseCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            inner: Mutex::new(Inner::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fresh cached value for `key`, if any. Expired entries are dropped.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut inner = self.lock();
        self.fresh(&mut inner, key)
    }

    fn fresh(&self, inner: &mut Inner, key: &str) -> Option<String> {
        match inner.entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                inner.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Look up `key`, registering the caller as the fetch leader on a miss
    /// with no fetch in progress.
    pub fn lookup(&self, key: &str) -> Lookup<'_> {
        let mut inner = self.lock();
        if let Some(value) = self.fresh(&mut inner, key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Lookup::Hit(value);
        }
        if let Some(flight) = inner.in_flight.get(key) {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            return Lookup::Wait(Arc::clone(flight));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let flight = Arc::new(Flight::new());
        inner.in_flight.insert(key.to_string(), Arc::clone(&flight));
        Lookup::Lead(FlightGuard {
            cache: self,
            key: key.to_string(),
            flight,
            completed: false,
        })
    }

    pub fn insert(&self, key: &str, value: String) {
        let mut inner = self.lock();
        self.store(&mut inner, key, value);
    }

    fn store(&self, inner: &mut Inner, key: &str, value: String) {
        if self.capacity == 0 {
            return;
        }
        if !inner.entries.contains_key(key) && inner.entries.len() >= self.capacity {
            let ttl = self.ttl;
            inner.entries.retain(|_, e| e.stored_at.elapsed() < ttl);
        }
        if !inner.entries.contains_key(key) && inner.entries.len() >= self.capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.stored_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                inner.entries.remove(&oldest);
            }
        }
        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop a cached value. An in-progress fetch for the key is unaffected.
    pub fn invalidate(&self, key: &str) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub(crate) fn record_fetch(&self) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            entries: self.lock().entries.len(),
        }
    }

    fn finish(&self, key: &str, flight: &Arc<Flight>, result: Result<String, AiServiceError>) {
        {
            let mut inner = self.lock();
            if let Ok(value) = &result {
                self.store(&mut inner, key, value.clone());
            }
            if inner
                .in_flight
                .get(key)
                .is_some_and(|current| Arc::ptr_eq(current, flight))
            {
                inner.in_flight.remove(key);
            }
        }
        flight.publish(result);
    }
}

// ═══════════════════════════════════════════════════════════
// FlightGuard
// ═══════════════════════════════════════════════════════════

/// Leadership of one in-flight fetch.
///
/// `complete` stores a success and releases every waiter with the result.
/// Dropping the guard without completing (the fetch panicked) releases the
/// waiters with an error so none of them blocks forever.
pub struct FlightGuard<'a> {
    cache: &'a ResponseCache,
    key: String,
    flight: Arc<Flight>,
    completed: bool,
}

impl FlightGuard<'_> {
    pub fn complete(mut self, result: Result<String, AiServiceError>) {
        self.completed = true;
        self.cache.finish(&self.key, &self.flight, result);
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            tracing::warn!("AI fetch abandoned without a result, releasing waiters");
            self.cache.finish(
                &self.key,
                &self.flight,
                Err(AiServiceError::Unavailable("in-flight fetch abandoned".into())),
            );
        }
    }
}
