use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::Notify;

use crate::compute::{
    Capability, EngineError, LoadError, ModuleFetcher, ModuleRuntime, ModuleVariant, VariantKind,
};
use crate::protocol::{ExportFormat, Overlay};

/// Serves canned bodies per location and counts every fetch.
#[derive(Default)]
pub struct FakeFetcher {
    bodies: HashMap<String, Bytes>,
    gates: HashMap<String, Arc<Notify>>,
    counts: Mutex<HashMap<String, usize>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, location: &str, body: &'static [u8]) -> Self {
        self.bodies
            .insert(location.to_string(), Bytes::from_static(body));
        self
    }

    /// Hold fetches of `location` until the returned gate is notified.
    pub fn gated(mut self, location: &str) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gates.insert(location.to_string(), gate.clone());
        (self, gate)
    }

    pub fn count(&self, location: &str) -> usize {
        self.counts.lock().get(location).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ModuleFetcher for FakeFetcher {
    async fn fetch(&self, location: &str) -> Result<Bytes, LoadError> {
        *self.counts.lock().entry(location.to_string()).or_insert(0) += 1;
        tokio::task::yield_now().await;
        if let Some(gate) = self.gates.get(location) {
            gate.notified().await;
        }
        self.bodies
            .get(location)
            .cloned()
            .ok_or_else(|| LoadError::Fetch {
                location: location.to_string(),
                message: "not found".into(),
            })
    }
}

/// "Compiles" bodies `b"reader"` / `b"engine"` into fake capabilities.
pub struct FakeRuntime;

#[async_trait]
impl ModuleRuntime for FakeRuntime {
    async fn instantiate(
        &self,
        variant: &ModuleVariant,
        bytes: Bytes,
    ) -> Result<Arc<dyn Capability>, LoadError> {
        tokio::task::yield_now().await;
        let key = variant.cache_key().to_string();
        if bytes.starts_with(b"bad") {
            return Err(LoadError::Compile {
                key,
                message: "magic header not detected".into(),
            });
        }
        match &bytes[..] {
            b"reader" => Ok(Arc::new(FakeCapability::new(VariantKind::Reader))),
            b"engine" => Ok(Arc::new(FakeCapability::new(VariantKind::Engine))),
            _ => Err(LoadError::Instantiate {
                key,
                message: "entry point did not register a capability".into(),
            }),
        }
    }
}

/// Understands `key: value` lines only.
pub struct FakeCapability {
    kind: VariantKind,
}

impl FakeCapability {
    pub fn new(kind: VariantKind) -> Self {
        Self { kind }
    }

    fn require_engine(&self, what: &str) -> Result<(), EngineError> {
        match self.kind {
            VariantKind::Engine => Ok(()),
            VariantKind::Reader => Err(EngineError::new(format!(
                r#"{{"message":"{what} requires the Full Engine"}}"#
            ))),
        }
    }

    fn fields(code: &str) -> Result<Vec<(usize, String, String)>, EngineError> {
        let mut out = Vec::new();
        for (idx, line) in code.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("package ") {
                continue;
            }
            let Some((name, value)) = line.split_once(':') else {
                return Err(EngineError::new(format!(
                    r#"{{"message":"expected label","line":{},"column":1}}"#,
                    idx + 1
                )));
            };
            out.push((idx + 1, name.trim().to_string(), value.trim().to_string()));
        }
        Ok(out)
    }

    fn merge(target: &mut Map<String, Value>, code: &str) -> Result<(), EngineError> {
        for (_, name, raw) in Self::fields(code)? {
            let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
            if let Some(existing) = target.get(&name) {
                if *existing != value {
                    return Err(EngineError::new(format!(
                        r#"{{"message":"{name}: conflicting values"}}"#
                    )));
                }
            }
            target.insert(name, value);
        }
        Ok(())
    }
}

#[async_trait]
impl Capability for FakeCapability {
    async fn unify(
        &self,
        overlay: &Overlay,
        entry_points: &[String],
        _tags: &[String],
    ) -> Result<String, EngineError> {
        self.require_engine("Evaluation (Unify)")?;
        let mut merged = Map::new();
        for (path, code) in overlay {
            if entry_points.is_empty() || entry_points.contains(path) {
                Self::merge(&mut merged, code)?;
            }
        }
        Ok(Value::Object(merged).to_string())
    }

    async fn validate(&self, schema: &str, data: &str) -> Result<bool, EngineError> {
        self.require_engine("Validation")?;
        let mut merged = Map::new();
        Self::merge(&mut merged, schema)?;
        Self::merge(&mut merged, data)?;
        Ok(true)
    }

    async fn format(&self, code: &str) -> Result<String, EngineError> {
        if code.contains("@panic") {
            panic!("guest exploded");
        }
        let mut out = String::new();
        for (_, name, value) in Self::fields(code)? {
            out.push_str(&format!("{name}: {value}\n"));
        }
        Ok(out)
    }

    async fn parse(&self, code: &str) -> Result<String, EngineError> {
        self.format(code).await
    }

    async fn get_symbols(&self, code: &str) -> Result<String, EngineError> {
        let symbols: Vec<Value> = Self::fields(code)?
            .into_iter()
            .map(|(line, name, _)| {
                serde_json::json!({"name": name, "type": "field", "line": line, "column": 1})
            })
            .collect();
        Ok(Value::Array(symbols).to_string())
    }

    async fn export(&self, code: &str, format: ExportFormat) -> Result<String, EngineError> {
        match format {
            ExportFormat::Cue => self.format(code).await,
            ExportFormat::Json | ExportFormat::Yaml => {
                self.require_engine("Evaluation exports")?;
                let mut merged = Map::new();
                Self::merge(&mut merged, code)?;
                Ok(Value::Object(merged).to_string())
            }
        }
    }
}
