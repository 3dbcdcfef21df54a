// Copyright (c) 2024 Botho Foundation

//! Retrying request execution on top of the connection manager.

use crate::{
    error::{Error, Result},
    ledger::LedgerRequest,
    manager::ConnectionManager,
};
use serde_json::Value;
use tracing::{debug, error, warn};

/// Runs ledger requests with failover and exponential backoff.
///
/// Each attempt goes through [`ConnectionManager::ensure_connected`]. When an
/// attempt fails on a live connection, its endpoint is marked failed and the
/// connection dropped so the next attempt lands on another endpoint. Ledger
/// errors are retried like any other failure, except the deterministic ones
/// (see [`Error::is_retryable`]), which end the request at once. Every
/// failure is reported as [`Error::RequestExhausted`].
#[derive(Clone)]
pub struct RequestExecutor {
    manager: ConnectionManager,
}

impl RequestExecutor {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub async fn execute(&self, request: &LedgerRequest) -> Result<Value> {
        let config = self.manager.config();
        let attempts = config.max_retries.saturating_add(1);
        let mut last = Error::NoEndpoints;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = config.backoff(attempt - 1);
                debug!(
                    "Retrying {} in {:?} (attempt {}/{})",
                    request.command(),
                    delay,
                    attempt + 1,
                    attempts
                );
                tokio::time::sleep(delay).await;
            }

            match self.attempt(request).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => {
                    debug!("{} failed with {}, not retrying", request.command(), e);
                    return Err(Error::RequestExhausted {
                        attempts: attempt + 1,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!(
                        "{} attempt {}/{} failed: {}",
                        request.command(),
                        attempt + 1,
                        attempts,
                        e
                    );
                    last = e;
                }
            }
        }

        error!(
            "{} failed after {} attempts: {}",
            request.command(),
            attempts,
            last
        );
        Err(Error::RequestExhausted {
            attempts,
            last: Box::new(last),
        })
    }

    async fn attempt(&self, request: &LedgerRequest) -> Result<Value> {
        let connection = self.manager.ensure_connected().await?;
        match connection.request(request).await {
            Ok(value) => Ok(value),
            Err(e) => {
                if e.is_retryable() && connection.is_connected() {
                    self.manager.report_failure(&connection, &e).await;
                }
                Err(e)
            }
        }
    }
}
