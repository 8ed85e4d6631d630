//! Single entry point for AI calls: cache first, then one leader fetch per
//! key with bounded retries, shared with every concurrent caller.

use std::time::Duration;

use super::cache::{CacheStats, Lookup, ResponseCache};
use super::retry::{run_with_retry, RetryPolicy};
use super::AiServiceError;
use crate::cancel::CancelToken;

pub struct CacheRetryController {
    cache: ResponseCache,
    policy: RetryPolicy,
}

impl CacheRetryController {
    pub fn new(cache: ResponseCache, policy: RetryPolicy) -> Self {
        Self { cache, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Return the cached response for `key`, or produce it with `fetch`.
    ///
    /// `fetch` receives the timeout for one attempt and is retried on
    /// transient failures. Only successes are cached. Concurrent callers
    /// with the same key share a single fetch; if the fetching caller is
    /// cancelled, one of the waiters takes over.
    pub fn get_or_fetch<F>(
        &self,
        key: &str,
        cancel: &CancelToken,
        fetch: F,
    ) -> Result<String, AiServiceError>
    where
        F: Fn(Duration) -> Result<String, AiServiceError>,
    {
        loop {
            if cancel.is_cancelled() {
                return Err(AiServiceError::Cancelled);
            }

            match self.cache.lookup(key) {
                Lookup::Hit(value) => {
                    tracing::debug!(cache_key = %short(key), "AI cache hit");
                    return Ok(value);
                }
                Lookup::Wait(flight) => {
                    tracing::debug!(cache_key = %short(key), "AI request already in flight, waiting");
                    match flight.wait(cancel) {
                        Err(AiServiceError::Cancelled) if !cancel.is_cancelled() => {
                            tracing::debug!(cache_key = %short(key), "AI fetch leader cancelled, taking over");
                            continue;
                        }
                        result => return result,
                    }
                }
                Lookup::Lead(guard) => {
                    tracing::debug!(cache_key = %short(key), "AI cache miss, fetching");
                    let result = run_with_retry(&self.policy, cancel, |_, timeout| {
                        self.cache.record_fetch();
                        fetch(timeout)
                    });
                    guard.complete(result.clone());
                    return result;
                }
            }
        }
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.cache.invalidate(key)
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

/// Key prefix for log lines.
fn short(key: &str) -> &str {
    key.get(..12).unwrap_or(key)
}
