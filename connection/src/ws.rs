// Copyright (c) 2024 Botho Foundation

//! WebSocket transport for the ledger's JSON RPC.
//!
//! Every request carries an incrementing `id`. A reader task routes each
//! response frame to the caller waiting on that `id`; a writer task owns the
//! sink half of the socket. When the socket fails or closes, every pending
//! request is failed and the link status flips away from `Open`.

use crate::{
    error::{Error, Result},
    ledger::{parse_response, LedgerRequest},
    transport::{LedgerLink, LedgerTransport, LinkStatus},
};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// Opens tokio-tungstenite links.
#[derive(Debug, Clone)]
pub struct WsTransport {
    request_timeout: Duration,
}

impl WsTransport {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl LedgerTransport for WsTransport {
    async fn connect(&self, url: &str) -> Result<Arc<dyn LedgerLink>> {
        let (socket, _response) = connect_async(url)
            .await
            .map_err(|e| Error::EndpointUnavailable {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        debug!("WebSocket open to {}", url);

        let (mut sink, mut stream) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (status_tx, _) = watch::channel(LinkStatus::Open);
        let status_tx = Arc::new(status_tx);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        let writer_status = status_tx.clone();
        let writer_url = url.to_string();
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    if !closing {
                        warn!("WebSocket write to {} failed: {}", writer_url, e);
                        set_status(&writer_status, LinkStatus::Failed(e.to_string()));
                    }
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let reader_status = status_tx.clone();
        let reader_pending = pending.clone();
        let reader_url = url.to_string();
        let reader = tokio::spawn(async move {
            let end = loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => route_frame(&reader_pending, &text),
                    Some(Ok(Message::Close(_))) | None => break LinkStatus::Closed,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket read from {} failed: {}", reader_url, e);
                        break LinkStatus::Failed(e.to_string());
                    }
                }
            };
            debug!("WebSocket to {} ended: {:?}", reader_url, end);
            set_status(&reader_status, end);
            fail_pending(&reader_pending);
        });

        Ok(Arc::new(WsLink {
            url: url.to_string(),
            next_id: AtomicU64::new(1),
            pending,
            outbound: outbound_tx,
            status: status_tx,
            request_timeout: self.request_timeout,
            tasks: Mutex::new(vec![writer, reader]),
        }))
    }
}

/// A live WebSocket link to one endpoint.
pub struct WsLink {
    url: String,
    next_id: AtomicU64,
    pending: Pending,
    outbound: mpsc::UnboundedSender<Message>,
    status: Arc<watch::Sender<LinkStatus>>,
    request_timeout: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for WsLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsLink")
            .field("url", &self.url)
            .field("status", &*self.status.borrow())
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

#[async_trait]
impl LedgerLink for WsLink {
    async fn request(&self, request: &LedgerRequest) -> Result<Value> {
        if !self.is_connected() {
            return Err(Error::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = request.to_frame(id)?;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        if self.outbound.send(Message::Text(frame.to_string())).is_err() {
            self.pending.lock().remove(&id);
            return Err(Error::Closed);
        }
        debug!("Sent {} (id {}) to {}", request.command(), id, self.url);

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(Error::Timeout(self.request_timeout))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.status.borrow().is_open()
    }

    fn status(&self) -> watch::Receiver<LinkStatus> {
        self.status.subscribe()
    }

    async fn close(&self) -> Result<()> {
        let was_open = self.is_connected();
        set_status(&self.status, LinkStatus::Closed);
        fail_pending(&self.pending);
        if was_open {
            self.outbound
                .send(Message::Close(None))
                .map_err(|_| Error::Closed)?;
        }
        Ok(())
    }
}

impl Drop for WsLink {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

/// Only the first transition away from `Open` sticks.
fn set_status(status: &watch::Sender<LinkStatus>, next: LinkStatus) {
    status.send_if_modified(|current| {
        if current.is_open() {
            *current = next;
            true
        } else {
            false
        }
    });
}

fn route_frame(pending: &Pending, text: &str) {
    let frame: Value = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Discarding undecodable ledger frame: {}", e);
            return;
        }
    };
    let Some(id) = frame.get("id").and_then(Value::as_u64) else {
        // Unsolicited stream messages carry no id.
        return;
    };
    if let Some(tx) = pending.lock().remove(&id) {
        let _ = tx.send(parse_response(frame));
    }
}

fn fail_pending(pending: &Pending) {
    for (_, tx) in pending.lock().drain() {
        let _ = tx.send(Err(Error::Closed));
    }
}
