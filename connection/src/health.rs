// Copyright (c) 2024 Botho Foundation

//! Endpoint health sweep.
//!
//! Each endpoint is checked on its own short-lived link, independent of the
//! connection manager, so a sweep never disturbs the live connection or the
//! pool's failure records.

use crate::{
    error::{Error, Result},
    ledger::{LedgerRequest, ServerInfo},
    transport::LedgerTransport,
};
use futures::future::join_all;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Available,
    Unavailable,
}

/// Result of probing one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointHealth {
    pub url: String,
    pub status: HealthStatus,
    /// Connect plus `server_info` round trip
    pub latency: Option<Duration>,
    pub server_version: Option<String>,
    pub peers: Option<u32>,
    pub error: Option<String>,
}

impl EndpointHealth {
    pub fn is_available(&self) -> bool {
        self.status == HealthStatus::Available
    }
}

/// Check every endpoint concurrently, each bounded by `timeout`.
pub async fn check_endpoints(
    transport: &dyn LedgerTransport,
    urls: &[String],
    timeout: Duration,
) -> Vec<EndpointHealth> {
    join_all(urls.iter().map(|url| check_endpoint(transport, url, timeout))).await
}

async fn check_endpoint(
    transport: &dyn LedgerTransport,
    url: &str,
    timeout: Duration,
) -> EndpointHealth {
    let started = Instant::now();
    let outcome = match tokio::time::timeout(timeout, query_endpoint(transport, url)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(timeout)),
    };

    match outcome {
        Ok(info) => {
            let latency = started.elapsed();
            debug!("{} healthy ({:?}, {})", url, latency, info.build_version);
            EndpointHealth {
                url: url.to_string(),
                status: HealthStatus::Available,
                latency: Some(latency),
                server_version: Some(info.build_version),
                peers: info.peers,
                error: None,
            }
        }
        Err(e) => {
            debug!("{} unhealthy: {}", url, e);
            EndpointHealth {
                url: url.to_string(),
                status: HealthStatus::Unavailable,
                latency: None,
                server_version: None,
                peers: None,
                error: Some(e.to_string()),
            }
        }
    }
}

async fn query_endpoint(transport: &dyn LedgerTransport, url: &str) -> Result<ServerInfo> {
    let link = transport.connect(url).await?;
    let result = link.request(&LedgerRequest::ServerInfo).await;
    if let Err(e) = link.close().await {
        debug!("Closing health link to {} failed: {}", url, e);
    }
    ServerInfo::from_result(result?)
}
