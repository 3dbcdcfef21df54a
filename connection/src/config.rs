// Copyright (c) 2024 Botho Foundation

//! Tunables for the connection manager and request executor.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection layer configuration.
///
/// Every field has a serde default so a partial `[ledger]` table is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Ledger WebSocket endpoints, tried in order
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,

    /// Upper bound on a single connect attempt
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Upper bound on a single request round trip
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Inactivity window after which the connection is dropped
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// How long a failed endpoint is skipped by selection
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Endpoints tried per `ensure_connected` call before giving up
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    /// Retries after the first failed request attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first request retry, doubled on each further retry
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound on any request retry delay
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
}

fn default_endpoints() -> Vec<String> {
    vec![
        "wss://xrplcluster.com".to_string(),
        "wss://s1.ripple.com".to_string(),
        "wss://s2.ripple.com".to_string(),
    ]
}

fn default_connect_timeout_secs() -> u64 {
    15
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_connect_attempts() -> u32 {
    2
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_cap_ms() -> u64 {
    5000
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            cooldown_secs: default_cooldown_secs(),
            connect_attempts: default_connect_attempts(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Delay before the retry that follows failed attempt `attempt`
    /// (zero-based): `min(base * 2^attempt, cap)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay = self.backoff_base_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.backoff_cap_ms))
    }
}
