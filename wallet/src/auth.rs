//! Wallet authentication handshake
//!
//! A sign-in runs as follows:
//! 1. a sign request (payload) is created on the signing backend
//! 2. it is dispatched to the user (deep link or QR code)
//! 3. a background task polls its status until it is signed, rejected,
//!    expired, or polling gives up
//!
//! Only one handshake is active at a time. Starting again while one is
//! active returns a handle to the same request. Each request reaches a
//! terminal state exactly once; a signed request becomes a stored session.
//!
//! Progress is published on a broadcast channel ([`AuthSessionManager::subscribe`]);
//! the final result of one request is available from its [`AuthHandle`].

use crate::{
    config::AuthConfig,
    dispatch::{DispatchOutcome, Dispatcher},
    error::AuthError,
    session::SessionStore,
    signing::{PayloadStatus, SignInRequest, SigningBackend},
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::{
    sync::{broadcast, watch},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 64;

/// Lifecycle of the authentication handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuthState {
    Idle,
    Creating,
    AwaitingUser,
    Signed,
    Rejected,
    Expired,
    Error,
}

impl AuthState {
    pub fn is_active(self) -> bool {
        matches!(self, AuthState::Creating | AuthState::AwaitingUser)
    }
}

/// Status of a single sign request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SignRequestStatus {
    Created,
    Pending,
    Signed,
    Rejected,
    Expired,
    Error,
}

impl SignRequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SignRequestStatus::Signed
                | SignRequestStatus::Rejected
                | SignRequestStatus::Expired
                | SignRequestStatus::Error
        )
    }
}

/// A sign-in payload created on the signing backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: SignRequestStatus,
    pub resolved_address: Option<String>,
    pub qr_url: Option<String>,
    pub deep_link: String,
    /// Monotonic twin of `expires_at`
    deadline: Instant,
}

impl SignRequest {
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

/// Notifications published by the auth manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    StateChanged(AuthState),
    Dispatched {
        request_id: String,
        outcome: DispatchOutcome,
    },
    Connected {
        address: String,
    },
    SignedOut,
}

type Outcome = Option<Result<String, AuthError>>;

/// A started sign request and its eventual result.
#[derive(Debug, Clone)]
pub struct AuthHandle {
    request: SignRequest,
    outcome: watch::Receiver<Outcome>,
}

impl AuthHandle {
    /// The request as it was when the handle was issued.
    pub fn request(&self) -> &SignRequest {
        &self.request
    }

    /// Resolves once with the signing address or the terminal failure.
    pub async fn outcome(&self) -> Result<String, AuthError> {
        let mut rx = self.outcome.clone();
        // An error here only means the sender is gone; the value still counts.
        let _ = rx.wait_for(Option::is_some).await;
        let result = rx.borrow().clone();
        result.unwrap_or_else(|| Err(AuthError::Backend("authentication abandoned".to_string())))
    }
}

struct ActiveRequest {
    request: SignRequest,
    outcome: Arc<watch::Sender<Outcome>>,
    cancel: CancellationToken,
}

impl ActiveRequest {
    fn handle(&self) -> AuthHandle {
        AuthHandle {
            request: self.request.clone(),
            outcome: self.outcome.subscribe(),
        }
    }
}

struct Slot {
    state: AuthState,
    /// Cancels the payload creation in progress, if any
    creating: Option<CancellationToken>,
    active: Option<ActiveRequest>,
    last: Option<SignRequest>,
}

struct Shared {
    backend: Arc<dyn SigningBackend>,
    store: Arc<SessionStore>,
    config: AuthConfig,
    slot: Mutex<Slot>,
    events: broadcast::Sender<AuthEvent>,
}

/// Drives the sign-in handshake and owns its polling task.
///
/// Dropping the manager stops any polling in progress.
pub struct AuthSessionManager {
    shared: Arc<Shared>,
    dispatcher: Arc<dyn Dispatcher>,
    start_lock: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

impl AuthSessionManager {
    pub fn new(
        config: AuthConfig,
        backend: Arc<dyn SigningBackend>,
        dispatcher: Arc<dyn Dispatcher>,
        store: Arc<SessionStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                backend,
                store,
                config,
                slot: Mutex::new(Slot {
                    state: AuthState::Idle,
                    creating: None,
                    active: None,
                    last: None,
                }),
                events,
            }),
            dispatcher,
            start_lock: tokio::sync::Mutex::new(()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> AuthState {
        self.shared.slot.lock().state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.shared.events.subscribe()
    }

    /// The active request, or the most recent one to finish.
    pub fn current_request(&self) -> Option<SignRequest> {
        let slot = self.shared.slot.lock();
        slot.active
            .as_ref()
            .map(|a| a.request.clone())
            .or_else(|| slot.last.clone())
    }

    pub fn session_store(&self) -> &SessionStore {
        &self.shared.store
    }

    /// Begin a sign-in, or join the one already in progress.
    pub async fn start_authentication(&self) -> Result<AuthHandle, AuthError> {
        let guard = self.start_lock.lock().await;
        let existing = self.shared.slot.lock().active.as_ref().map(ActiveRequest::handle);
        if let Some(handle) = existing {
            debug!("Sign request {} already active", handle.request.id);
            return Ok(handle);
        }

        let cancel = self.shutdown.child_token();
        {
            let mut slot = self.shared.slot.lock();
            slot.state = AuthState::Creating;
            slot.creating = Some(cancel.clone());
        }
        self.shared.emit(AuthEvent::StateChanged(AuthState::Creating));
        let platform = self.dispatcher.platform();
        let config = &self.shared.config;
        let body = SignInRequest {
            expire_minutes: config.expire_minutes(),
            return_url: config.return_url.clone(),
            force_type: platform.force_type(),
        };

        let created = tokio::select! {
            _ = cancel.cancelled() => None,
            result = self.shared.backend.create_sign_request(&body) => Some(result),
        };
        let created = match created {
            Some(Ok(created)) => created,
            Some(Err(e)) if !cancel.is_cancelled() => {
                warn!("Failed to create sign request: {}", e);
                self.shared.slot.lock().creating = None;
                self.shared.set_state(AuthState::Error);
                return Err(AuthError::Backend(e.to_string()));
            }
            _ => {
                debug!("Sign request creation abandoned");
                return Err(AuthError::Rejected);
            }
        };

        let deep_link = match (platform.is_mobile(), created.next.app) {
            (true, Some(app)) => app,
            _ => created.next.always,
        };
        let expiry = config.payload_expiry();
        let created_at = Utc::now();
        let request = SignRequest {
            id: created.uuid,
            created_at,
            expires_at: created_at
                + chrono::Duration::from_std(expiry).unwrap_or_else(|_| chrono::Duration::zero()),
            status: SignRequestStatus::Created,
            resolved_address: None,
            qr_url: created.refs.qr_png,
            deep_link,
            deadline: Instant::now() + expiry,
        };
        self.shared.store.save_pending(&request.id);

        let (outcome, _) = watch::channel(None);
        let handle = {
            let mut slot = self.shared.slot.lock();
            if cancel.is_cancelled() {
                drop(slot);
                debug!("Sign request {} cancelled before it was dispatched", request.id);
                self.shared.store.clear_pending();
                return Err(AuthError::Rejected);
            }
            slot.creating = None;
            let active = ActiveRequest {
                request: request.clone(),
                outcome: Arc::new(outcome),
                cancel: cancel.clone(),
            };
            let handle = active.handle();
            slot.active = Some(active);
            slot.state = AuthState::AwaitingUser;
            handle
        };
        self.shared.emit(AuthEvent::StateChanged(AuthState::AwaitingUser));
        info!("Sign request {} awaiting user", request.id);

        tokio::spawn(poll_request(self.shared.clone(), request.clone(), cancel));
        drop(guard);

        let outcome = self.dispatcher.dispatch(&request).await;

        // Dispatched requests are pending on the user; the request may also
        // have finished already while the dispatcher was probing.
        let handle = {
            let mut slot = self.shared.slot.lock();
            match slot.active.as_mut() {
                Some(active) if active.request.id == request.id => {
                    active.request.status = SignRequestStatus::Pending;
                    active.handle()
                }
                _ => handle,
            }
        };
        self.shared.emit(AuthEvent::Dispatched {
            request_id: request.id,
            outcome,
        });

        Ok(handle)
    }

    /// Abandon the sign-in in progress, whether its payload is still being
    /// created or already awaiting the user. Returns whether there was one.
    pub fn cancel(&self) -> bool {
        let id = {
            let mut slot = self.shared.slot.lock();
            if let Some(creating) = slot.creating.take() {
                creating.cancel();
                slot.state = AuthState::Rejected;
                drop(slot);
                info!("Sign-in cancelled while creating the sign request");
                self.shared.emit(AuthEvent::StateChanged(AuthState::Rejected));
                return true;
            }
            match &slot.active {
                Some(active) => active.request.id.clone(),
                None => return false,
            }
        };
        info!("Sign request {} cancelled", id);
        self.shared.finish(&id, Err(AuthError::Rejected))
    }

    /// Recover the signed-in address after a restart.
    ///
    /// A stored, unexpired session wins. Otherwise a persisted pending
    /// request is checked once; if it was signed in the meantime, it is
    /// adopted as the session.
    pub async fn restore(&self) -> Option<String> {
        let store = &self.shared.store;
        if let Some(address) = store.load() {
            self.shared.adopt(&address);
            return Some(address);
        }

        let id = store.load_pending()?;
        let result = self.shared.backend.payload_status(&id).await;
        store.clear_pending();
        match result {
            Ok(status) if status.meta.signed => match status.account() {
                Some(address) => {
                    info!("Pending sign request {} was signed by {}", id, address);
                    store.save(address);
                    self.shared.adopt(address);
                    Some(address.to_string())
                }
                None => {
                    warn!("Pending sign request {} signed without an account", id);
                    None
                }
            },
            Ok(_) => {
                debug!("Pending sign request {} never completed", id);
                None
            }
            Err(e) => {
                warn!("Could not check pending sign request {}: {}", id, e);
                None
            }
        }
    }

    /// Forget the session and abandon any active request.
    pub fn sign_out(&self) {
        self.cancel();
        self.shared.store.clear();
        self.shared.store.clear_pending();
        self.shared.set_state(AuthState::Idle);
        self.shared.emit(AuthEvent::SignedOut);
        info!("Signed out");
    }
}

impl Drop for AuthSessionManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl Shared {
    fn emit(&self, event: AuthEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn set_state(&self, state: AuthState) {
        self.slot.lock().state = state;
        self.emit(AuthEvent::StateChanged(state));
    }

    fn adopt(&self, address: &str) {
        {
            let mut slot = self.slot.lock();
            if slot.state.is_active() {
                return;
            }
            slot.state = AuthState::Signed;
        }
        self.emit(AuthEvent::Connected {
            address: address.to_string(),
        });
    }

    /// Move request `id` to its terminal state. Only the first call for a
    /// given request has any effect.
    fn finish(&self, id: &str, outcome: Result<String, AuthError>) -> bool {
        let (state, sender) = {
            let mut slot = self.slot.lock();
            match &slot.active {
                Some(active) if active.request.id == id => {}
                _ => return false,
            }
            let Some(mut active) = slot.active.take() else {
                return false;
            };

            let (state, status) = match &outcome {
                Ok(_) => (AuthState::Signed, SignRequestStatus::Signed),
                Err(AuthError::Rejected) => (AuthState::Rejected, SignRequestStatus::Rejected),
                Err(AuthError::Expired) => (AuthState::Expired, SignRequestStatus::Expired),
                Err(_) => (AuthState::Error, SignRequestStatus::Error),
            };
            active.request.status = status;
            active.request.resolved_address = outcome.as_ref().ok().cloned();
            active.cancel.cancel();

            slot.state = state;
            slot.last = Some(active.request);
            (state, active.outcome)
        };

        match &outcome {
            Ok(address) => {
                info!("Sign request {} signed by {}", id, address);
                self.store.save(address);
                self.store.clear_pending();
            }
            Err(e) => {
                info!("Sign request {} ended: {}", id, e);
                self.store.clear_pending();
            }
        }

        self.emit(AuthEvent::StateChanged(state));
        if let Ok(address) = &outcome {
            self.emit(AuthEvent::Connected {
                address: address.clone(),
            });
        }
        sender.send_replace(Some(outcome));
        true
    }
}

/// Terminal verdict for a status report, or `None` while still pending.
fn classify(
    request: &SignRequest,
    status: &PayloadStatus,
    now: Instant,
) -> Option<Result<String, AuthError>> {
    if request.is_expired_at(now) {
        return Some(Err(AuthError::Expired));
    }
    if status.meta.cancelled {
        return Some(Err(AuthError::Rejected));
    }
    if status.meta.expired {
        return Some(Err(AuthError::Expired));
    }
    if status.meta.signed {
        return Some(match status.account() {
            Some(address) => Ok(address.to_string()),
            None => Err(AuthError::Backend(
                "payload signed without an account".to_string(),
            )),
        });
    }
    None
}

async fn poll_request(shared: Arc<Shared>, request: SignRequest, cancel: CancellationToken) {
    let interval = shared.config.poll_interval();
    let max_errors = shared.config.max_poll_errors;
    let max_rounds = shared.config.max_poll_rounds;
    let mut consecutive_errors = 0u32;
    let mut rounds = 0u32;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        if request.is_expired_at(Instant::now()) {
            shared.finish(&request.id, Err(AuthError::Expired));
            return;
        }

        rounds += 1;
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = shared.backend.payload_status(&request.id) => result,
        };

        let verdict = match result {
            Ok(status) => {
                consecutive_errors = 0;
                classify(&request, &status, Instant::now())
            }
            Err(e) => {
                consecutive_errors += 1;
                warn!(
                    "Status check {} for {} failed ({}/{}): {}",
                    rounds, request.id, consecutive_errors, max_errors, e
                );
                (consecutive_errors >= max_errors).then(|| {
                    error!("Giving up on sign request {}", request.id);
                    Err(AuthError::Transport(e.to_string()))
                })
            }
        };

        if let Some(outcome) = verdict {
            shared.finish(&request.id, outcome);
            return;
        }

        if rounds >= max_rounds {
            error!(
                "Sign request {} unresolved after {} status checks",
                request.id, rounds
            );
            shared.finish(
                &request.id,
                Err(AuthError::Transport(format!(
                    "no answer after {rounds} status checks"
                ))),
            );
            return;
        }
        debug!("Sign request {} still pending", request.id);
    }
}
