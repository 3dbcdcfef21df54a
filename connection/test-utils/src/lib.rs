// Copyright (c) 2024 Botho Foundation

//! Scriptable in-memory ledger transport for tests.
//!
//! Connects succeed unless the endpoint has been refused; requests answer
//! with the scripted result for their command (or `{}`), unless requests on
//! that endpoint have been set to fail. Every connect and request is logged
//! with the (possibly paused) tokio clock so tests can assert on timing.

use async_trait::async_trait;
use cult_connection::{Error, LedgerLink, LedgerRequest, LedgerTransport, LinkStatus, Result};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};
use tokio::{sync::watch, time::Instant};

/// A request observed by a [`MockLink`].
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub url: String,
    pub command: String,
    pub at: Instant,
}

#[derive(Default)]
struct Script {
    refused: HashSet<String>,
    connect_delay: Duration,
    connects: Vec<String>,
    request_failures: HashMap<String, Error>,
    responses: HashMap<String, Value>,
    url_responses: HashMap<(String, String), Value>,
    requests: Vec<RequestRecord>,
    links: Vec<Arc<MockLink>>,
}

/// Mock [`LedgerTransport`].
#[derive(Clone, Default)]
pub struct MockTransport {
    script: Arc<Mutex<Script>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every future connect to `url`.
    pub fn refuse(&self, url: &str) {
        self.script.lock().refused.insert(url.to_string());
    }

    pub fn accept(&self, url: &str) {
        self.script.lock().refused.remove(url);
    }

    /// Delay applied to every connect, refused or not.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.script.lock().connect_delay = delay;
    }

    /// Fail every request on links to `url` with `error`.
    pub fn fail_requests(&self, url: &str, error: Error) {
        self.script
            .lock()
            .request_failures
            .insert(url.to_string(), error);
    }

    pub fn heal_requests(&self, url: &str) {
        self.script.lock().request_failures.remove(url);
    }

    /// Result returned for `command` on any endpoint.
    pub fn set_response(&self, command: &str, result: Value) {
        self.script
            .lock()
            .responses
            .insert(command.to_string(), result);
    }

    /// Result returned for `command` on `url` only.
    pub fn set_response_for(&self, url: &str, command: &str, result: Value) {
        self.script
            .lock()
            .url_responses
            .insert((url.to_string(), command.to_string()), result);
    }

    /// URLs of every connect attempt, in order.
    pub fn connects(&self) -> Vec<String> {
        self.script.lock().connects.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.script.lock().connects.len()
    }

    pub fn requests(&self) -> Vec<RequestRecord> {
        self.script.lock().requests.clone()
    }

    /// Every link handed out so far.
    pub fn links(&self) -> Vec<Arc<MockLink>> {
        self.script.lock().links.clone()
    }

    pub fn last_link(&self) -> Option<Arc<MockLink>> {
        self.script.lock().links.last().cloned()
    }
}

#[async_trait]
impl LedgerTransport for MockTransport {
    async fn connect(&self, url: &str) -> Result<Arc<dyn LedgerLink>> {
        let (delay, refused) = {
            let mut script = self.script.lock();
            script.connects.push(url.to_string());
            (script.connect_delay, script.refused.contains(url))
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if refused {
            return Err(Error::EndpointUnavailable {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let (status, _) = watch::channel(LinkStatus::Open);
        let link = Arc::new(MockLink {
            url: url.to_string(),
            status,
            close_calls: Mutex::new(0),
            script: self.script.clone(),
        });
        self.script.lock().links.push(link.clone());
        Ok(link)
    }
}

/// Mock [`LedgerLink`] whose failure can be triggered by the test.
pub struct MockLink {
    url: String,
    status: watch::Sender<LinkStatus>,
    close_calls: Mutex<usize>,
    script: Arc<Mutex<Script>>,
}

impl std::fmt::Debug for MockLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLink")
            .field("url", &self.url)
            .field("status", &*self.status.borrow())
            .finish()
    }
}

impl MockLink {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn close_calls(&self) -> usize {
        *self.close_calls.lock()
    }

    /// Simulate a transport error on the link.
    pub fn fail(&self, reason: &str) {
        self.status.send_replace(LinkStatus::Failed(reason.to_string()));
    }

    /// Simulate the remote closing the link cleanly.
    pub fn remote_close(&self) {
        self.status.send_replace(LinkStatus::Closed);
    }
}

#[async_trait]
impl LedgerLink for MockLink {
    async fn request(&self, request: &LedgerRequest) -> Result<Value> {
        if !self.is_connected() {
            return Err(Error::Closed);
        }
        let command = request.command().to_string();
        let mut script = self.script.lock();
        script.requests.push(RequestRecord {
            url: self.url.clone(),
            command: command.clone(),
            at: Instant::now(),
        });
        if let Some(error) = script.request_failures.get(&self.url) {
            return Err(error.clone());
        }
        Ok(script
            .url_responses
            .get(&(self.url.clone(), command.clone()))
            .or_else(|| script.responses.get(&command))
            .cloned()
            .unwrap_or_else(|| json!({})))
    }

    fn is_connected(&self) -> bool {
        self.status.borrow().is_open()
    }

    fn status(&self) -> watch::Receiver<LinkStatus> {
        self.status.subscribe()
    }

    async fn close(&self) -> Result<()> {
        *self.close_calls.lock() += 1;
        if self.is_connected() {
            self.status.send_replace(LinkStatus::Closed);
        }
        Ok(())
    }
}
