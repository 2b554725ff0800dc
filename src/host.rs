//! Execution host: owns the phase controller, answers one reply per message.
//!
//! Frames are decoded and gated as they arrive. The async remainder of each
//! handler joins a set of in-flight futures polled on the same task as the
//! inbox, so a slow `init` never holds up a cheap `parse` behind it.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::{
    future::{self, BoxFuture},
    stream::FuturesUnordered,
    FutureExt, StreamExt,
};
use serde_json::Value;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::compute::{Capability, EngineError, LoadError, ModuleLoader};
use crate::config::{
    errors::{CODE_CAPABILITY_NOT_READY, CODE_ENGINE_ERROR, CODE_LOAD_FAILED, CODE_PROTOCOL_INVALID},
    HostConfig,
};
use crate::phase::{CapabilityState, ModuleSources, PhaseController};
use crate::protocol::{Action, InitOutcome, Message, Reply};

#[derive(Debug, Clone, thiserror::Error)]
pub enum HostError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("{0}")]
    Capability(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("{0}")]
    Protocol(String),
}

impl HostError {
    pub fn code(&self) -> &'static str {
        match self {
            HostError::Load(_) => CODE_LOAD_FAILED,
            HostError::Capability(_) => CODE_CAPABILITY_NOT_READY,
            HostError::Engine(_) => CODE_ENGINE_ERROR,
            HostError::Protocol(_) => CODE_PROTOCOL_INVALID,
        }
    }
}

/// Lowest capability state at which `action` may run.
pub fn required_state(action: &Action) -> CapabilityState {
    match action {
        Action::Init(_) => CapabilityState::None,
        Action::Parse(_) | Action::Format(_) | Action::GetSymbols(_) => CapabilityState::Partial,
        Action::Unify(_) | Action::Validate(_) | Action::Export(_) => CapabilityState::Full,
    }
}

/// Channels of a running host.
pub struct HostHandle {
    /// Message frames towards the host. Dropping every sender stops the host
    /// once in-flight handlers have replied.
    pub requests: mpsc::UnboundedSender<Value>,
    /// Reply frames from the host.
    pub replies: mpsc::UnboundedReceiver<Value>,
    pub state: watch::Receiver<CapabilityState>,
    pub task: JoinHandle<()>,
}

pub struct Host {
    phase: PhaseController,
    inbox: mpsc::UnboundedReceiver<Value>,
    outbox: mpsc::UnboundedSender<Value>,
}

type Pending = BoxFuture<'static, Reply>;

impl Host {
    pub fn new(
        phase: PhaseController,
        inbox: mpsc::UnboundedReceiver<Value>,
        outbox: mpsc::UnboundedSender<Value>,
    ) -> Self {
        Self {
            phase,
            inbox,
            outbox,
        }
    }

    /// Run a host over `phase` on its own task.
    pub fn spawn(phase: PhaseController) -> HostHandle {
        let (requests, inbox) = mpsc::unbounded_channel();
        let (outbox, replies) = mpsc::unbounded_channel();
        let state = phase.subscribe();
        let task = tokio::spawn(Host::new(phase, inbox, outbox).run());
        HostHandle {
            requests,
            replies,
            state,
            task,
        }
    }

    pub fn spawn_with_config(config: &HostConfig) -> anyhow::Result<HostHandle> {
        tracing::info!(target: "cue_worker", config = %config.summary(), "starting host");
        let loader = ModuleLoader::from_config(config)?;
        Ok(Self::spawn(PhaseController::new(loader)))
    }

    pub async fn run(self) {
        let Host {
            phase,
            mut inbox,
            outbox,
        } = self;
        let mut in_flight: FuturesUnordered<Pending> = FuturesUnordered::new();
        let mut open = true;

        loop {
            tokio::select! {
                frame = inbox.recv(), if open => match frame {
                    Some(frame) => {
                        if let Some(pending) = accept(&phase, frame) {
                            in_flight.push(pending);
                        }
                    }
                    None => {
                        open = false;
                        tracing::debug!(target: "cue_worker", in_flight = in_flight.len(), "inbox closed; draining");
                    }
                },
                Some(reply) = in_flight.next(), if !in_flight.is_empty() => emit(&outbox, reply),
                else => break,
            }
        }
        tracing::debug!(target: "cue_worker", "host stopped");
    }
}

fn emit(outbox: &mpsc::UnboundedSender<Value>, reply: Reply) {
    let id = reply.id;
    match serde_json::to_value(&reply) {
        Ok(frame) => {
            if outbox.send(frame).is_err() {
                tracing::debug!(target: "cue_worker", id, "reply dropped; client gone");
            }
        }
        Err(err) => tracing::error!(target: "cue_worker", id, error = %err, "encode reply"),
    }
}

/// Decode and gate a frame. Returns the future producing its reply, or `None`
/// for frames that cannot be answered.
fn accept(phase: &PhaseController, frame: Value) -> Option<Pending> {
    let msg = match Message::from_frame(frame) {
        Ok(msg) => msg,
        Err(err) => {
            let Some(id) = err.id else {
                tracing::warn!(target: "cue_worker", error = %err.message, "dropping frame without id");
                return None;
            };
            tracing::debug!(target: "cue_worker", id, error = %err.message, "rejecting malformed frame");
            return Some(future::ready(Reply::protocol(id, err.message)).boxed());
        }
    };
    let id = msg.id;
    let action = msg.action.name();
    tracing::debug!(target: "cue_worker", id, action, "message received");

    let capability = match gate(phase, &msg.action) {
        Ok(capability) => capability,
        Err(err) => return Some(future::ready(Reply::err(id, err.code(), err.to_string())).boxed()),
    };

    let started = Instant::now();
    let work = AssertUnwindSafe(handle(phase.clone(), capability, msg.action))
        .catch_unwind()
        .map(move |outcome| {
            let reply = match outcome {
                Ok(Ok(result)) => Reply::ok(id, result),
                Ok(Err(err)) => Reply::err(id, err.code(), err.to_string()),
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(target: "cue_worker", id, action, error = %message, "handler panicked");
                    Reply::fault(id, format!("internal error: {message}"))
                }
            };
            tracing::debug!(
                target: "cue_worker",
                id,
                action,
                success = reply.success,
                duration_ms = started.elapsed().as_millis() as u64,
                "reply ready"
            );
            reply
        });
    Some(work.boxed())
}

/// Check the action against the state at receipt and pick the capability
/// that will serve it.
fn gate(
    phase: &PhaseController,
    action: &Action,
) -> Result<Option<Arc<dyn Capability>>, HostError> {
    let required = required_state(action);
    let state = phase.state();
    if state < required {
        return Err(HostError::Capability(match state {
            CapabilityState::None => {
                format!("{} rejected: worker is not initialized; send init first", action.name())
            }
            _ => format!("{} requires the Full Engine; it is still loading", action.name()),
        }));
    }
    let capability = match required {
        CapabilityState::None => None,
        CapabilityState::Partial => phase.active(),
        CapabilityState::Full => phase.engine(),
    };
    if required != CapabilityState::None && capability.is_none() {
        return Err(HostError::Capability(format!(
            "{}: no capability installed",
            action.name()
        )));
    }
    Ok(capability)
}

async fn handle(
    phase: PhaseController,
    capability: Option<Arc<dyn Capability>>,
    action: Action,
) -> Result<Value, HostError> {
    let name = action.name();
    let cap = || {
        capability
            .clone()
            .ok_or_else(|| HostError::Capability(format!("{name}: no capability installed")))
    };
    let result = match action {
        Action::Init(payload) => {
            let sources = ModuleSources::from_init(&payload);
            let state = phase.initialize(&payload.version, sources).await?;
            serde_json::to_value(InitOutcome::from(state))
                .map_err(|e| HostError::Protocol(e.to_string()))?
        }
        Action::Unify(p) => {
            Value::String(cap()?.unify(&p.overlay, &p.entry_points, &p.tags).await?)
        }
        Action::Validate(p) => Value::Bool(cap()?.validate(&p.schema, &p.data).await?),
        Action::Format(p) => Value::String(cap()?.format(&p.code).await?),
        Action::Parse(p) => Value::String(cap()?.parse(&p.code).await?),
        Action::GetSymbols(p) => {
            let raw = cap()?.get_symbols(&p.code).await?;
            serde_json::from_str(&raw)
                .map_err(|e| EngineError::new(format!("getSymbols returned invalid JSON: {e}")))?
        }
        Action::Export(p) => Value::String(cap()?.export(&p.code, p.format).await?),
    };
    Ok(result)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
