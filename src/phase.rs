//! Two-phase capability bring-up.
//!
//! `initialize` awaits the small reader build, then loads the full engine on a
//! detached task. The capability state only ever moves forward:
//! none → partial → full.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::compute::{Capability, LoadError, ModuleLoader, ModuleVariant};
use crate::config::paths::READER_SUFFIX;
use crate::protocol::InitPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityState {
    None,
    Partial,
    Full,
}

/// Where each variant comes from. `engine: None` means a reader-only session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSources {
    pub reader: String,
    pub engine: Option<String>,
}

impl ModuleSources {
    pub fn from_init(payload: &InitPayload) -> Self {
        if payload.is_reader {
            return Self {
                reader: payload.wasm_path.clone(),
                engine: None,
            };
        }
        let reader = payload
            .reader_path
            .clone()
            .unwrap_or_else(|| reader_location(&payload.wasm_path));
        Self {
            reader,
            engine: Some(payload.wasm_path.clone()),
        }
    }
}

/// `cue.wasm` → `cue.reader.wasm`; anything without a `.wasm` extension
/// just gets the suffix appended.
pub fn reader_location(engine: &str) -> String {
    match engine.strip_suffix(".wasm") {
        Some(stem) => format!("{stem}{READER_SUFFIX}.wasm"),
        None => format!("{engine}{READER_SUFFIX}"),
    }
}

struct Installed {
    version: String,
    capability: Arc<dyn Capability>,
}

#[derive(Default)]
struct Slots {
    reader: Option<Installed>,
    engine: Option<Installed>,
    /// Engine version of the latest init. Only that load may install.
    wanted_engine: Option<String>,
}

#[derive(Clone)]
pub struct PhaseController {
    loader: ModuleLoader,
    state: Arc<watch::Sender<CapabilityState>>,
    slots: Arc<RwLock<Slots>>,
}

impl PhaseController {
    pub fn new(loader: ModuleLoader) -> Self {
        let (state, _) = watch::channel(CapabilityState::None);
        Self {
            loader,
            state: Arc::new(state),
            slots: Arc::new(RwLock::new(Slots::default())),
        }
    }

    pub fn state(&self) -> CapabilityState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CapabilityState> {
        self.state.subscribe()
    }

    /// Capability serving ungated actions: the engine once loaded, else the reader.
    pub fn active(&self) -> Option<Arc<dyn Capability>> {
        let slots = self.slots.read();
        slots
            .engine
            .as_ref()
            .or(slots.reader.as_ref())
            .map(|installed| installed.capability.clone())
    }

    pub fn engine(&self) -> Option<Arc<dyn Capability>> {
        self.slots
            .read()
            .engine
            .as_ref()
            .map(|installed| installed.capability.clone())
    }

    fn advance(&self, next: CapabilityState) {
        self.state.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        });
    }

    /// Load the reader, then start the engine in the background. Returns the
    /// state reached once the reader is in place.
    pub async fn initialize(
        &self,
        version: &str,
        sources: ModuleSources,
    ) -> Result<CapabilityState, LoadError> {
        let reader = self
            .loader
            .load(&ModuleVariant::reader(version), &sources.reader)
            .await?;
        self.slots.write().reader = Some(Installed {
            version: version.to_string(),
            capability: reader,
        });
        self.advance(CapabilityState::Partial);
        tracing::info!(target: "cue_worker", version, state = ?self.state(), "reader ready");

        if let Some(location) = sources.engine {
            let installed = {
                let mut slots = self.slots.write();
                slots.wanted_engine = Some(version.to_string());
                slots
                    .engine
                    .as_ref()
                    .is_some_and(|engine| engine.version == version)
            };
            if installed {
                tracing::debug!(target: "cue_worker", version, "engine already installed");
            } else {
                self.spawn_engine(version.to_string(), location);
            }
        }
        Ok(self.state())
    }

    fn spawn_engine(&self, version: String, location: String) {
        let this = self.clone();
        tokio::spawn(async move {
            match this
                .loader
                .load(&ModuleVariant::engine(&version), &location)
                .await
            {
                Ok(capability) => {
                    {
                        let mut slots = this.slots.write();
                        if slots.wanted_engine.as_deref() != Some(version.as_str()) {
                            tracing::debug!(
                                target: "cue_worker",
                                version = %version,
                                wanted = ?slots.wanted_engine,
                                "dropping superseded engine"
                            );
                            return;
                        }
                        slots.engine = Some(Installed {
                            version: version.clone(),
                            capability,
                        });
                    }
                    this.advance(CapabilityState::Full);
                    tracing::info!(target: "cue_worker", version = %version, "full engine ready");
                }
                Err(err) => tracing::warn!(
                    target: "cue_worker",
                    version = %version,
                    error = %err,
                    "background engine load failed; staying on reader"
                ),
            }
        });
    }
}
