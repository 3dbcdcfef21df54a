// Copyright (c) 2024 Botho Foundation

//! Transport seam between the connection manager and the wire.
//!
//! A [`LedgerTransport`] opens links; a [`LedgerLink`] is one live, duplex
//! request/response channel to a single endpoint.

use crate::{error::Result, ledger::LedgerRequest};
use async_trait::async_trait;
use serde_json::Value;
use std::{fmt::Debug, sync::Arc};
use tokio::sync::watch;

/// Observable health of a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    Open,
    /// The remote closed the link cleanly
    Closed,
    /// The link broke with a transport error
    Failed(String),
}

impl LinkStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, LinkStatus::Open)
    }
}

/// Opens links to ledger endpoints.
#[async_trait]
pub trait LedgerTransport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Arc<dyn LedgerLink>>;
}

/// One live connection to one endpoint.
#[async_trait]
pub trait LedgerLink: Send + Sync + Debug {
    /// Issue a request and wait for its `result` payload.
    async fn request(&self, request: &LedgerRequest) -> Result<Value>;

    fn is_connected(&self) -> bool;

    /// Receiver that changes when the link closes or fails.
    fn status(&self) -> watch::Receiver<LinkStatus>;

    async fn close(&self) -> Result<()>;
}
