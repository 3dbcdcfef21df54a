// Copyright (c) 2024 Botho Foundation

//! Connection manager: owns at most one live ledger connection.
//!
//! The manager hands out cheap [`Connection`] handles to a single shared
//! link. Connecting is single-flight: concurrent callers of
//! [`ConnectionManager::ensure_connected`] all await the same attempt. A
//! failed connect marks the endpoint in the pool and moves on to the next
//! one, up to `connect_attempts` endpoints per call.
//!
//! Once connected, two background tasks watch the connection:
//! - a link monitor, which discards the connection (and marks the endpoint
//!   failed on a transport error) when the link goes down;
//! - an idle timer, which disconnects after `idle_timeout` without use.
//!
//! # Example
//!
//! ```ignore
//! let manager = ConnectionManager::new(config, Arc::new(WsTransport::default()));
//! let connection = manager.ensure_connected().await?;
//! let info = connection.request(&LedgerRequest::ServerInfo).await?;
//! manager.disconnect().await;
//! ```

use crate::{
    config::ConnectionConfig,
    error::{Error, Result},
    ledger::LedgerRequest,
    pool::EndpointPool,
    transport::{LedgerLink, LedgerTransport, LinkStatus},
};
use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};
use tokio::{sync::watch, task::JoinHandle, time::Instant};
use tracing::{debug, error, info, warn};

type SharedConnect = Shared<BoxFuture<'static, Result<Connection>>>;

/// Lifecycle of the managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The last connection broke, or the last connect attempt gave up
    Failed,
}

/// Handle to the manager's live link.
#[derive(Clone)]
pub struct Connection {
    id: u64,
    endpoint: String,
    link: Arc<dyn LedgerLink>,
}

impl Connection {
    /// Identifier unique within the owning manager.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub async fn request(&self, request: &LedgerRequest) -> Result<Value> {
        self.link.request(request).await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("connected", &self.is_connected())
            .finish()
    }
}

struct Slot {
    state: ConnectionState,
    connection: Option<Connection>,
    in_flight: Option<SharedConnect>,
    /// Bumped whenever the connection is installed or torn down, so that
    /// late notifications from old monitors and timers are ignored.
    generation: u64,
    last_used: Instant,
    idle_timer: Option<JoinHandle<()>>,
    monitor: Option<JoinHandle<()>>,
}

impl Slot {
    fn abort_tasks(&mut self) {
        if let Some(task) = self.idle_timer.take() {
            task.abort();
        }
        if let Some(task) = self.monitor.take() {
            task.abort();
        }
    }
}

struct Inner {
    config: ConnectionConfig,
    pool: EndpointPool,
    transport: Arc<dyn LedgerTransport>,
    slot: Mutex<Slot>,
    next_id: AtomicU64,
}

/// Owns the single ledger connection and its endpoint pool.
///
/// Cloning yields another handle to the same manager.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, transport: Arc<dyn LedgerTransport>) -> Self {
        let pool = EndpointPool::new(config.endpoints.iter().cloned(), config.cooldown());
        Self {
            inner: Arc::new(Inner {
                config,
                pool,
                transport,
                slot: Mutex::new(Slot {
                    state: ConnectionState::Disconnected,
                    connection: None,
                    in_flight: None,
                    generation: 0,
                    last_used: Instant::now(),
                    idle_timer: None,
                    monitor: None,
                }),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn pool(&self) -> &EndpointPool {
        &self.inner.pool
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.slot.lock().state
    }

    /// URL of the endpoint the live connection points at.
    pub fn current_endpoint(&self) -> Option<String> {
        self.inner
            .slot
            .lock()
            .connection
            .as_ref()
            .map(|c| c.endpoint.clone())
    }

    /// Return the live connection, creating one if needed.
    pub async fn ensure_connected(&self) -> Result<Connection> {
        let pending = {
            let mut slot = self.inner.slot.lock();

            if let Some(connection) = slot.connection.clone() {
                if connection.is_connected() {
                    slot.last_used = Instant::now();
                    return Ok(connection);
                }
                // The link died and its monitor has not caught up yet.
                self.inner.discard_dead(&mut slot, &connection);
            }

            match &slot.in_flight {
                Some(pending) => pending.clone(),
                None => {
                    let inner = self.inner.clone();
                    let task = tokio::spawn(inner.connect_with_failover());
                    let pending = async move {
                        match task.await {
                            Ok(result) => result,
                            Err(e) => Err(Error::Transport(format!("connect task failed: {e}"))),
                        }
                    }
                    .boxed()
                    .shared();
                    slot.in_flight = Some(pending.clone());
                    slot.state = ConnectionState::Connecting;
                    pending
                }
            }
        };

        pending.await
    }

    /// Tear down the live connection.
    ///
    /// Cancels the idle timer and link monitor, closes the link on a best
    /// effort basis and always ends in `Disconnected`. A connect that is
    /// already in flight is left to complete.
    pub async fn disconnect(&self) {
        let connection = {
            let mut slot = self.inner.slot.lock();
            self.inner.teardown(&mut slot)
        };
        if let Some(connection) = connection {
            close_link(&connection).await;
        }
    }

    /// Mark `connection`'s endpoint failed and disconnect it, unless the
    /// manager has already moved on to another connection.
    pub(crate) async fn report_failure(&self, connection: &Connection, error: &Error) {
        warn!(
            "Request on {} failed, abandoning endpoint: {}",
            connection.endpoint, error
        );
        self.inner.pool.mark_failed(&connection.endpoint);

        let current = {
            let mut slot = self.inner.slot.lock();
            let still_current = slot
                .connection
                .as_ref()
                .is_some_and(|c| c.id == connection.id);
            if still_current {
                self.inner.teardown(&mut slot)
            } else {
                None
            }
        };
        if let Some(current) = current {
            close_link(&current).await;
        }
    }
}

impl Inner {
    async fn connect_with_failover(self: Arc<Self>) -> Result<Connection> {
        let attempts = self.config.connect_attempts.max(1);
        let mut last: Option<(String, Error)> = None;

        for attempt in 0..attempts {
            let Some(endpoint) = self.pool.select_next() else {
                break;
            };
            debug!(
                "Connecting to ledger endpoint {} (attempt {}/{})",
                endpoint.url,
                attempt + 1,
                attempts
            );

            match self.connect_once(&endpoint.url).await {
                Ok(link) => return Ok(self.install(endpoint.url, link)),
                Err(e) => {
                    warn!("Failed to connect to {}: {}", endpoint.url, e);
                    self.pool.mark_failed(&endpoint.url);
                    last = Some((endpoint.url, e));
                }
            }
        }

        {
            let mut slot = self.slot.lock();
            slot.in_flight = None;
            slot.state = ConnectionState::Failed;
        }

        let err = match last {
            None => Error::NoEndpoints,
            Some((_, e @ Error::EndpointUnavailable { .. })) => e,
            Some((url, e)) => Error::EndpointUnavailable {
                url,
                reason: e.to_string(),
            },
        };
        error!("Giving up on ledger connection: {}", err);
        Err(err)
    }

    async fn connect_once(&self, url: &str) -> Result<Arc<dyn LedgerLink>> {
        let timeout = self.config.connect_timeout();
        match tokio::time::timeout(timeout, self.transport.connect(url)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }

    fn install(self: &Arc<Self>, url: String, link: Arc<dyn LedgerLink>) -> Connection {
        let connection = Connection {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            endpoint: url,
            link,
        };
        self.pool.clear_failure(&connection.endpoint);

        let mut slot = self.slot.lock();
        slot.abort_tasks();
        slot.generation += 1;
        slot.connection = Some(connection.clone());
        slot.in_flight = None;
        slot.state = ConnectionState::Connected;
        slot.last_used = Instant::now();

        let generation = slot.generation;
        slot.monitor = Some(tokio::spawn(monitor_link(
            Arc::downgrade(self),
            generation,
            connection.link.status(),
        )));
        slot.idle_timer = Some(tokio::spawn(idle_timer(
            Arc::downgrade(self),
            generation,
            self.config.idle_timeout(),
        )));

        info!("Connected to ledger endpoint {}", connection.endpoint);
        connection
    }

    /// Remove the connection from the slot and stop its background tasks.
    fn teardown(&self, slot: &mut Slot) -> Option<Connection> {
        slot.abort_tasks();
        slot.generation += 1;
        slot.state = if slot.in_flight.is_some() {
            ConnectionState::Connecting
        } else {
            ConnectionState::Disconnected
        };
        slot.connection.take()
    }

    fn discard_dead(&self, slot: &mut Slot, connection: &Connection) {
        let status = connection.link.status().borrow().clone();
        if let LinkStatus::Failed(reason) = status {
            warn!("Ledger link to {} failed: {}", connection.endpoint, reason);
            self.pool.mark_failed(&connection.endpoint);
        }
        self.teardown(slot);
    }

    fn on_link_down(&self, generation: u64, status: LinkStatus) {
        let mut slot = self.slot.lock();
        if slot.generation != generation {
            return;
        }
        let Some(connection) = slot.connection.take() else {
            return;
        };

        // This runs on the monitor task itself, so detach rather than abort it.
        slot.monitor.take();
        if let Some(task) = slot.idle_timer.take() {
            task.abort();
        }
        slot.generation += 1;

        match status {
            LinkStatus::Failed(reason) => {
                warn!("Ledger link to {} failed: {}", connection.endpoint, reason);
                self.pool.mark_failed(&connection.endpoint);
                slot.state = ConnectionState::Failed;
            }
            _ => {
                info!("Ledger link to {} closed by remote", connection.endpoint);
                slot.state = ConnectionState::Disconnected;
            }
        }
        if slot.in_flight.is_some() {
            slot.state = ConnectionState::Connecting;
        }
    }

    /// Disconnect if the connection of `generation` has been idle long
    /// enough; otherwise report the instant at which it next could be.
    fn idle_check(&self, generation: u64, idle: std::time::Duration) -> IdleCheck {
        let mut slot = self.slot.lock();
        if slot.generation != generation {
            return IdleCheck::Stale;
        }
        let deadline = slot.last_used + idle;
        if Instant::now() < deadline {
            return IdleCheck::Wait(deadline);
        }

        // Runs on the timer task itself, so detach rather than abort it.
        slot.idle_timer.take();
        match self.teardown(&mut slot) {
            Some(connection) => IdleCheck::Expired(connection),
            None => IdleCheck::Stale,
        }
    }
}

enum IdleCheck {
    Stale,
    Wait(Instant),
    Expired(Connection),
}

async fn monitor_link(
    inner: Weak<Inner>,
    generation: u64,
    mut status: watch::Receiver<LinkStatus>,
) {
    let last = loop {
        let current = status.borrow_and_update().clone();
        if !current.is_open() {
            break current;
        }
        if status.changed().await.is_err() {
            break LinkStatus::Closed;
        }
    };
    if let Some(inner) = inner.upgrade() {
        inner.on_link_down(generation, last);
    }
}

async fn idle_timer(inner: Weak<Inner>, generation: u64, idle: std::time::Duration) {
    let mut deadline = Instant::now() + idle;
    loop {
        tokio::time::sleep_until(deadline).await;
        let Some(manager) = inner.upgrade() else {
            return;
        };
        match manager.idle_check(generation, idle) {
            IdleCheck::Stale => return,
            IdleCheck::Wait(next) => deadline = next,
            IdleCheck::Expired(connection) => {
                info!(
                    "Ledger connection to {} idle for {:?}, disconnecting",
                    connection.endpoint, idle
                );
                drop(manager);
                close_link(&connection).await;
                return;
            }
        }
    }
}

async fn close_link(connection: &Connection) {
    match connection.link.close().await {
        Ok(()) => debug!("Closed ledger link to {}", connection.endpoint),
        Err(e) => warn!(
            "Error closing ledger link to {} (ignored): {}",
            connection.endpoint, e
        ),
    }
}
