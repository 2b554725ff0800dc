//! Caller-side proxy for an execution host.
//!
//! Each call gets the next id (starting at 1), is parked in a pending table
//! and settled by whichever reply carries its id. A pump task owns the reply
//! channel; once that channel closes every parked call fails as
//! [`RpcError::Disconnected`].

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::config::errors::CODE_CAPABILITY_NOT_READY;
use crate::protocol::{
    Action, CodePayload, ExportFormat, ExportPayload, InitOutcome, InitPayload, Message, Overlay,
    Reply, StructuredError, Symbol, UnifyPayload, ValidatePayload,
};
use crate::workspace::OverlayProvider;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RpcError {
    /// The host answered with `success: false`.
    #[error("{message}")]
    Remote {
        code: Option<String>,
        message: String,
    },

    #[error("host disconnected")]
    Disconnected,

    #[error("encode request: {0}")]
    Encode(String),

    #[error("decode result: {0}")]
    Decode(String),
}

impl RpcError {
    pub fn code(&self) -> Option<&str> {
        match self {
            RpcError::Remote { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn is_not_ready(&self) -> bool {
        self.code() == Some(CODE_CAPABILITY_NOT_READY)
    }

    /// Engine diagnostics carried by a remote error, parsed when they are
    /// JSON and wrapped as a bare message otherwise.
    pub fn structured(&self) -> Option<StructuredError> {
        match self {
            RpcError::Remote { message, .. } => Some(StructuredError::parse(message)),
            _ => None,
        }
    }
}

type Settle = oneshot::Sender<Result<Value, RpcError>>;

#[derive(Default)]
struct PendingTable {
    calls: HashMap<u64, Settle>,
    closed: bool,
}

struct Inner {
    next_id: AtomicU64,
    pending: Arc<Mutex<PendingTable>>,
    requests: mpsc::UnboundedSender<Value>,
}

#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

impl RpcClient {
    /// Attach to a host's request sender and reply receiver. Spawns the reply
    /// pump, so this must run inside a tokio runtime.
    pub fn new(
        requests: mpsc::UnboundedSender<Value>,
        replies: mpsc::UnboundedReceiver<Value>,
    ) -> Self {
        let pending = Arc::new(Mutex::new(PendingTable::default()));
        tokio::spawn(pump(replies, pending.clone()));
        Self {
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(1),
                pending,
                requests,
            }),
        }
    }

    /// Calls sent and not yet settled.
    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().calls.len()
    }

    pub async fn send(&self, action: Action) -> Result<Value, RpcError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let name = action.name();
        let frame = Message { id, action }
            .to_frame()
            .map_err(|e| RpcError::Encode(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        {
            let mut table = self.inner.pending.lock();
            if table.closed {
                return Err(RpcError::Disconnected);
            }
            table.calls.insert(id, tx);
        }
        if self.inner.requests.send(frame).is_err() {
            self.inner.pending.lock().calls.remove(&id);
            return Err(RpcError::Disconnected);
        }
        tracing::trace!(target: "cue_worker", id, action = name, "request sent");
        rx.await.map_err(|_| RpcError::Disconnected)?
    }

    async fn call<T: DeserializeOwned>(&self, action: Action) -> Result<T, RpcError> {
        let value = self.send(action).await?;
        serde_json::from_value(value).map_err(|e| RpcError::Decode(e.to_string()))
    }

    pub async fn init(&self, options: InitPayload) -> Result<InitOutcome, RpcError> {
        self.call(Action::Init(options)).await
    }

    pub async fn unify(
        &self,
        overlay: Overlay,
        entry_points: Vec<String>,
        tags: Vec<String>,
    ) -> Result<String, RpcError> {
        self.call(Action::Unify(UnifyPayload {
            overlay,
            entry_points,
            tags,
        }))
        .await
    }

    /// Unify whatever `provider` currently holds.
    pub async fn unify_overlay(
        &self,
        provider: &dyn OverlayProvider,
        tags: Vec<String>,
    ) -> Result<String, RpcError> {
        self.unify(provider.overlay(), provider.entry_points(), tags)
            .await
    }

    pub async fn validate(&self, schema: &str, data: &str) -> Result<bool, RpcError> {
        self.call(Action::Validate(ValidatePayload {
            schema: schema.to_string(),
            data: data.to_string(),
        }))
        .await
    }

    pub async fn format(&self, code: &str) -> Result<String, RpcError> {
        self.call(Action::Format(code_payload(code))).await
    }

    pub async fn parse(&self, code: &str) -> Result<String, RpcError> {
        self.call(Action::Parse(code_payload(code))).await
    }

    pub async fn get_symbols(&self, code: &str) -> Result<Vec<Symbol>, RpcError> {
        self.call(Action::GetSymbols(code_payload(code))).await
    }

    pub async fn export(&self, code: &str, format: ExportFormat) -> Result<String, RpcError> {
        self.call(Action::Export(ExportPayload {
            code: code.to_string(),
            format,
        }))
        .await
    }
}

fn code_payload(code: &str) -> CodePayload {
    CodePayload {
        code: code.to_string(),
    }
}

async fn pump(mut replies: mpsc::UnboundedReceiver<Value>, pending: Arc<Mutex<PendingTable>>) {
    while let Some(frame) = replies.recv().await {
        settle(&pending, frame);
    }
    let orphans: Vec<Settle> = {
        let mut table = pending.lock();
        table.closed = true;
        table.calls.drain().map(|(_, tx)| tx).collect()
    };
    if !orphans.is_empty() {
        tracing::debug!(target: "cue_worker", count = orphans.len(), "reply channel closed; failing pending calls");
    }
    for tx in orphans {
        let _ = tx.send(Err(RpcError::Disconnected));
    }
}

fn settle(pending: &Mutex<PendingTable>, frame: Value) {
    let reply: Reply = match serde_json::from_value(frame) {
        Ok(reply) => reply,
        Err(err) => {
            tracing::debug!(target: "cue_worker", error = %err, "ignoring undecodable reply");
            return;
        }
    };
    let Some(tx) = pending.lock().calls.remove(&reply.id) else {
        tracing::debug!(target: "cue_worker", id = reply.id, "ignoring reply for unknown request");
        return;
    };
    let outcome = if reply.success {
        Ok(reply.result.unwrap_or(Value::Null))
    } else {
        Err(RpcError::Remote {
            code: reply.code,
            message: reply.error.unwrap_or_default(),
        })
    };
    // The caller may have stopped waiting.
    let _ = tx.send(outcome);
}
