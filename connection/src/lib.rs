// Copyright (c) 2024 Botho Foundation

//! Resilient connection to a ledger network.
//!
//! - [`EndpointPool`] tracks endpoints and their failure cooldowns.
//! - [`ConnectionManager`] keeps at most one live link, connecting
//!   single-flight with failover.
//! - [`RequestExecutor`] retries requests across endpoints with backoff.
//! - [`LedgerClient`] wraps the executor with typed queries.
//! - [`check_endpoints`] checks every endpoint independently.

mod config;
mod error;
mod executor;
mod health;
mod ledger;
mod manager;
mod pool;
mod transport;
mod ws;

pub use crate::{
    config::ConnectionConfig,
    error::{Error, Result},
    executor::RequestExecutor,
    health::{check_endpoints, EndpointHealth, HealthStatus},
    ledger::{
        parse_response, AccountRoot, LedgerClient, LedgerRequest, NfToken, ServerInfo, TrustLine,
    },
    manager::{Connection, ConnectionManager, ConnectionState},
    pool::{Endpoint, EndpointPool},
    transport::{LedgerLink, LedgerTransport, LinkStatus},
    ws::{WsLink, WsTransport},
};
