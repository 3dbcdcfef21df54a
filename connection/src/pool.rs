// Copyright (c) 2024 Botho Foundation

//! Endpoint pool with round-robin selection and failure cooldown.
//!
//! An endpoint that failed recently is skipped until its cooldown elapses.
//! When every endpoint is cooling down, selection fails open and hands out
//! the next endpoint in sequence anyway, so callers always get something to
//! try.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// A single ledger endpoint and its failure record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub last_failure: Option<Instant>,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            last_failure: None,
        }
    }

    /// True if the endpoint never failed or its cooldown has elapsed.
    pub fn is_eligible(&self, now: Instant, cooldown: Duration) -> bool {
        match self.last_failure {
            None => true,
            Some(at) => now.saturating_duration_since(at) > cooldown,
        }
    }
}

#[derive(Debug)]
struct PoolState {
    endpoints: Vec<Endpoint>,
    /// Index of the most recently selected endpoint
    cursor: Option<usize>,
}

/// Ordered set of endpoints shared by the connection manager.
#[derive(Debug)]
pub struct EndpointPool {
    state: Mutex<PoolState>,
    cooldown: Duration,
}

impl EndpointPool {
    pub fn new<I, S>(urls: I, cooldown: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            state: Mutex::new(PoolState {
                endpoints: urls.into_iter().map(Endpoint::new).collect(),
                cursor: None,
            }),
            cooldown,
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Snapshot of every endpoint and its failure record.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.state.lock().endpoints.clone()
    }

    /// The most recently selected endpoint, if any.
    pub fn current(&self) -> Option<Endpoint> {
        let state = self.state.lock();
        state.cursor.and_then(|i| state.endpoints.get(i).cloned())
    }

    /// Pick the next eligible endpoint after the cursor.
    ///
    /// Returns `None` only when the pool is empty.
    pub fn select_next(&self) -> Option<Endpoint> {
        self.select_next_at(Instant::now())
    }

    pub fn select_next_at(&self, now: Instant) -> Option<Endpoint> {
        let mut state = self.state.lock();
        let len = state.endpoints.len();
        if len == 0 {
            return None;
        }

        let start = state.cursor.map(|c| (c + 1) % len).unwrap_or(0);
        let eligible = (0..len)
            .map(|offset| (start + offset) % len)
            .find(|&i| state.endpoints[i].is_eligible(now, self.cooldown));

        let index = match eligible {
            Some(i) => i,
            None => {
                // Every endpoint is cooling down. Forget any failure whose
                // cooldown has in fact elapsed and take the next in sequence.
                let cooldown = self.cooldown;
                for endpoint in state.endpoints.iter_mut() {
                    if let Some(at) = endpoint.last_failure {
                        if now.saturating_duration_since(at) >= cooldown {
                            endpoint.last_failure = None;
                        }
                    }
                }
                debug!("All ledger endpoints cooling down, failing open");
                start
            }
        };

        state.cursor = Some(index);
        Some(state.endpoints[index].clone())
    }

    /// Record a failure for `url` at the current instant.
    pub fn mark_failed(&self, url: &str) {
        self.mark_failed_at(url, Instant::now());
    }

    pub fn mark_failed_at(&self, url: &str, now: Instant) {
        let mut state = self.state.lock();
        if let Some(endpoint) = state.endpoints.iter_mut().find(|e| e.url == url) {
            endpoint.last_failure = Some(now);
            debug!("Marked ledger endpoint {} as failed", url);
        }
    }

    /// Forget the failure record of `url`.
    pub fn clear_failure(&self, url: &str) {
        let mut state = self.state.lock();
        if let Some(endpoint) = state.endpoints.iter_mut().find(|e| e.url == url) {
            endpoint.last_failure = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(300);

    fn pool() -> EndpointPool {
        EndpointPool::new(["wss://a", "wss://b", "wss://c"], COOLDOWN)
    }

    #[test]
    fn test_round_robin() {
        let pool = pool();
        let now = Instant::now();
        let picks: Vec<_> = (0..4)
            .map(|_| pool.select_next_at(now).unwrap().url)
            .collect();
        assert_eq!(picks, vec!["wss://a", "wss://b", "wss://c", "wss://a"]);
        assert_eq!(pool.current().unwrap().url, "wss://a");
    }

    #[test]
    fn test_skips_cooling_endpoint() {
        let pool = pool();
        let now = Instant::now();
        pool.mark_failed_at("wss://a", now);
        pool.mark_failed_at("wss://b", now);
        assert_eq!(pool.select_next_at(now).unwrap().url, "wss://c");
        assert_eq!(pool.select_next_at(now).unwrap().url, "wss://c");
    }

    #[test]
    fn test_cooldown_elapses() {
        let pool = pool();
        let now = Instant::now();
        pool.mark_failed_at("wss://a", now);
        let later = now + COOLDOWN + Duration::from_secs(1);
        assert_eq!(pool.select_next_at(later).unwrap().url, "wss://a");
    }

    #[test]
    fn test_fail_open_when_all_cooling() {
        let pool = pool();
        let now = Instant::now();
        pool.select_next_at(now);
        for url in ["wss://a", "wss://b", "wss://c"] {
            pool.mark_failed_at(url, now);
        }
        // Cursor is on a, so the next in sequence is b.
        assert_eq!(pool.select_next_at(now).unwrap().url, "wss://b");
        assert!(pool.endpoints().iter().all(|e| e.last_failure.is_some()));
    }

    #[test]
    fn test_fail_open_clears_expired_records() {
        let pool = pool();
        let t0 = Instant::now();
        pool.mark_failed_at("wss://a", t0);
        let t1 = t0 + COOLDOWN;
        pool.mark_failed_at("wss://b", t1);
        pool.mark_failed_at("wss://c", t1);

        // At t1, a has been cooling for exactly the cooldown: not eligible,
        // but its record is cleared by the fail-open sweep.
        let picked = pool.select_next_at(t1).unwrap();
        assert_eq!(picked.url, "wss://a");
        let endpoints = pool.endpoints();
        assert_eq!(endpoints[0].last_failure, None);
        assert!(endpoints[1].last_failure.is_some());
    }

    #[test]
    fn test_clear_failure() {
        let pool = pool();
        let now = Instant::now();
        pool.mark_failed_at("wss://a", now);
        pool.clear_failure("wss://a");
        assert_eq!(pool.select_next_at(now).unwrap().url, "wss://a");
    }

    #[test]
    fn test_empty_pool() {
        let pool = EndpointPool::new(Vec::<String>::new(), COOLDOWN);
        assert!(pool.is_empty());
        assert!(pool.select_next().is_none());
        assert!(pool.current().is_none());
    }

    #[test]
    fn test_unknown_url_ignored() {
        let pool = pool();
        pool.mark_failed("wss://unknown");
        assert!(pool.endpoints().iter().all(|e| e.last_failure.is_none()));
    }
}
