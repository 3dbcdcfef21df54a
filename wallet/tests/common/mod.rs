//! Shared test doubles for the wallet integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use cult_wallet::{
    config::AuthConfig,
    dispatch::LinkOpener,
    signing::{
        CreatedPayload, PayloadMeta, PayloadNext, PayloadRefs, PayloadResponse, PayloadStatus,
        SignInRequest,
    },
    session::{KeyValueStore, MemoryStore, Session, StoreError},
    AuthEvent, AuthSessionManager, Dispatcher, QrDispatcher, SessionStore, SigningBackend,
    SigningError,
};
use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tokio::{sync::broadcast, time::Instant};

pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

pub fn pending() -> Result<PayloadStatus, SigningError> {
    Ok(PayloadStatus::default())
}

pub fn signed(account: &str) -> Result<PayloadStatus, SigningError> {
    Ok(PayloadStatus {
        meta: PayloadMeta {
            signed: true,
            ..PayloadMeta::default()
        },
        response: Some(PayloadResponse {
            account: Some(account.to_string()),
            txid: Some("A1B2C3".to_string()),
            error: None,
        }),
    })
}

pub fn signed_without_account() -> Result<PayloadStatus, SigningError> {
    Ok(PayloadStatus {
        meta: PayloadMeta {
            signed: true,
            ..PayloadMeta::default()
        },
        response: None,
    })
}

pub fn cancelled() -> Result<PayloadStatus, SigningError> {
    Ok(PayloadStatus {
        meta: PayloadMeta {
            cancelled: true,
            ..PayloadMeta::default()
        },
        response: None,
    })
}

/// Decode a status body the way the HTTP backend does.
pub fn from_wire(body: serde_json::Value) -> Result<PayloadStatus, SigningError> {
    serde_json::from_value(body).map_err(|e| SigningError::Malformed(e.to_string()))
}

pub fn unreachable() -> Result<PayloadStatus, SigningError> {
    Err(SigningError::Http("connection refused".to_string()))
}

/// Scriptable signing backend.
///
/// Status checks pop scripted answers in order, then keep answering with
/// the fallback (pending unless changed).
pub struct MockSigningBackend {
    created: Mutex<Vec<SignInRequest>>,
    create_error: Mutex<Option<SigningError>>,
    create_delay: Mutex<Duration>,
    script: Mutex<VecDeque<Result<PayloadStatus, SigningError>>>,
    fallback: Mutex<Result<PayloadStatus, SigningError>>,
    status_delay: Mutex<Duration>,
    status_calls: Mutex<Vec<(String, Instant)>>,
}

impl MockSigningBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            created: Mutex::new(Vec::new()),
            create_error: Mutex::new(None),
            create_delay: Mutex::new(Duration::ZERO),
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(pending()),
            status_delay: Mutex::new(Duration::ZERO),
            status_calls: Mutex::new(Vec::new()),
        })
    }

    pub fn script(&self, answers: Vec<Result<PayloadStatus, SigningError>>) {
        self.script.lock().extend(answers);
    }

    pub fn set_fallback(&self, answer: Result<PayloadStatus, SigningError>) {
        *self.fallback.lock() = answer;
    }

    pub fn fail_create(&self, error: Option<SigningError>) {
        *self.create_error.lock() = error;
    }

    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock() = delay;
    }

    pub fn set_status_delay(&self, delay: Duration) {
        *self.status_delay.lock() = delay;
    }

    pub fn created(&self) -> Vec<SignInRequest> {
        self.created.lock().clone()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.lock().len()
    }
}

#[async_trait]
impl SigningBackend for MockSigningBackend {
    async fn create_sign_request(
        &self,
        request: &SignInRequest,
    ) -> Result<CreatedPayload, SigningError> {
        let delay = *self.create_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.create_error.lock().clone() {
            return Err(error);
        }

        let n = {
            let mut created = self.created.lock();
            created.push(request.clone());
            created.len()
        };
        let id = format!("payload-{n}");
        Ok(CreatedPayload {
            refs: PayloadRefs {
                qr_png: Some(format!("https://xumm.app/sign/{id}_q.png")),
            },
            next: PayloadNext {
                always: format!("https://xumm.app/sign/{id}"),
                app: Some(format!("xumm://xumm.app/sign/{id}")),
            },
            uuid: id,
        })
    }

    async fn payload_status(&self, id: &str) -> Result<PayloadStatus, SigningError> {
        self.status_calls
            .lock()
            .push((id.to_string(), Instant::now()));
        let delay = *self.status_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.script.lock().pop_front();
        scripted.unwrap_or_else(|| self.fallback.lock().clone())
    }
}

/// [`LinkOpener`] that records links and answers with a fixed verdict.
pub struct RecordingOpener {
    pub answer: bool,
    pub opened: Mutex<Vec<String>>,
}

impl RecordingOpener {
    pub fn new(answer: bool) -> Arc<Self> {
        Arc::new(Self {
            answer,
            opened: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl LinkOpener for RecordingOpener {
    async fn open(&self, url: &str, window: Duration) -> bool {
        self.opened.lock().push(url.to_string());
        if !self.answer {
            tokio::time::sleep(window).await;
        }
        self.answer
    }
}

/// Durable store that can be read but refuses every change, like a
/// session file on a read-only disk.
#[derive(Default)]
pub struct ReadOnlyStore {
    inner: MemoryStore,
}

impl ReadOnlyStore {
    /// Put a fresh session for `address` on the "disk".
    pub fn seed(&self, address: &str) {
        let session = Session {
            address: address.to_string(),
            issued_at: chrono::Utc::now(),
        };
        self.inner
            .set("session", &serde_json::to_string(&session).unwrap())
            .unwrap();
    }
}

impl KeyValueStore for ReadOnlyStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key)
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
        Err(std::io::Error::other("read-only file system").into())
    }

    fn remove(&self, _key: &str) -> Result<(), StoreError> {
        Err(std::io::Error::other("read-only file system").into())
    }
}

pub fn auth_config() -> AuthConfig {
    AuthConfig::default()
}

pub fn manager_with(
    config: AuthConfig,
    backend: Arc<MockSigningBackend>,
    dispatcher: Arc<dyn Dispatcher>,
) -> AuthSessionManager {
    AuthSessionManager::new(
        config,
        backend,
        dispatcher,
        Arc::new(SessionStore::in_memory(DAY)),
    )
}

pub fn desktop_manager(backend: Arc<MockSigningBackend>) -> AuthSessionManager {
    manager_with(auth_config(), backend, Arc::new(QrDispatcher))
}

/// Everything published so far.
pub fn drain(events: &mut broadcast::Receiver<AuthEvent>) -> Vec<AuthEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}
