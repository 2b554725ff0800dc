//! Wasmtime-backed module runtime.
//!
//! Modules are core Wasm (no WASI, no component model). The only imports are
//! the `cue_host` functions below; the module's entry point must call
//! `cue_host.register` before it returns, otherwise the load fails.
//!
//! Calling convention for every action export `(ptr, len) -> i64`:
//! arguments are a JSON array the host writes into memory obtained from
//! `cue_alloc`, and the return value packs `(out_ptr << 32) | out_len` of a
//! JSON document `{"ok": value}` or `{"err": "message"}`.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use wasmtime::{
    Caller, Config, Engine, Instance, Linker, Memory, Module, Store, StoreLimits,
    StoreLimitsBuilder, TypedFunc,
};

use super::{
    capability::{Capability, EngineError},
    loader::LoadError,
    runtime::ModuleRuntime,
    variant::ModuleVariant,
};
use crate::config::limits::MAX_GUEST_LOG_BYTES;
use crate::protocol::{ExportFormat, Overlay};

const HOST_MODULE: &str = "cue_host";
const ENTRY_POINTS: [&str; 2] = ["_initialize", "_start"];

/// Per-store host data.
struct HostState {
    limits: StoreLimits,
    registered: bool,
    key: String,
}

pub struct WasmtimeRuntime {
    engine: Engine,
    call_fuel: u64,
    memory_limit_bytes: usize,
}

impl WasmtimeRuntime {
    pub fn new(call_fuel: u64, memory_limit_bytes: usize) -> anyhow::Result<Self> {
        let mut cfg = Config::new();
        cfg.consume_fuel(true).wasm_memory64(false);
        let engine = Engine::new(&cfg).context("build wasmtime engine")?;
        Ok(Self {
            engine,
            call_fuel,
            memory_limit_bytes,
        })
    }

    fn linker(engine: &Engine) -> anyhow::Result<Linker<HostState>> {
        let mut linker = Linker::<HostState>::new(engine);
        linker.func_wrap(HOST_MODULE, "register", |mut caller: Caller<'_, HostState>| {
            caller.data_mut().registered = true;
        })?;
        linker.func_wrap(
            HOST_MODULE,
            "log",
            |mut caller: Caller<'_, HostState>, level: i32, ptr: i32, len: i32| {
                let Some(memory) = caller.get_export("memory").and_then(|e| e.into_memory())
                else {
                    return;
                };
                let start = ptr as u32 as usize;
                let len = (len as u32 as usize).min(MAX_GUEST_LOG_BYTES);
                let data = memory.data(&caller);
                let Some(raw) = start.checked_add(len).and_then(|end| data.get(start..end)) else {
                    return;
                };
                let msg = String::from_utf8_lossy(raw);
                let key = caller.data().key.as_str();
                match level {
                    0 => tracing::trace!(target: "cue_worker", key, guest = %msg),
                    1 => tracing::debug!(target: "cue_worker", key, guest = %msg),
                    3 => tracing::warn!(target: "cue_worker", key, guest = %msg),
                    4 => tracing::error!(target: "cue_worker", key, guest = %msg),
                    _ => tracing::info!(target: "cue_worker", key, guest = %msg),
                }
            },
        )?;
        Ok(linker)
    }

    fn instantiate_blocking(
        engine: &Engine,
        module: &Module,
        key: &str,
        call_fuel: u64,
        memory_limit_bytes: usize,
    ) -> Result<Guest, String> {
        let limits = StoreLimitsBuilder::new()
            .memory_size(memory_limit_bytes)
            .build();
        let mut store = Store::new(
            engine,
            HostState {
                limits,
                registered: false,
                key: key.to_string(),
            },
        );
        store.limiter(|state| &mut state.limits);
        store
            .set_fuel(call_fuel)
            .map_err(|e| format!("set fuel: {e:#}"))?;

        let linker = Self::linker(engine).map_err(|e| format!("link host imports: {e:#}"))?;
        let instance = linker
            .instantiate(&mut store, module)
            .map_err(|e| format!("{e:#}"))?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| "module does not export memory".to_string())?;
        let alloc = instance
            .get_typed_func::<i32, i32>(&mut store, "cue_alloc")
            .map_err(|e| format!("cue_alloc: {e:#}"))?;

        let entry = ENTRY_POINTS
            .iter()
            .find_map(|name| instance.get_typed_func::<(), ()>(&mut store, name).ok())
            .ok_or_else(|| "module exports no _initialize or _start".to_string())?;
        entry
            .call(&mut store, ())
            .map_err(|e| format!("entry point trapped: {e:#}"))?;

        if !store.data().registered {
            return Err("entry point did not register a capability".into());
        }
        Ok(Guest {
            store,
            instance,
            memory,
            alloc,
        })
    }
}

#[async_trait]
impl ModuleRuntime for WasmtimeRuntime {
    async fn instantiate(
        &self,
        variant: &ModuleVariant,
        bytes: Bytes,
    ) -> Result<Arc<dyn Capability>, LoadError> {
        let key = variant.cache_key().to_string();

        let engine = self.engine.clone();
        let module = tokio::task::spawn_blocking(move || Module::new(&engine, &bytes[..]))
            .await
            .map_err(|e| LoadError::Compile {
                key: key.clone(),
                message: format!("compile task failed: {e}"),
            })?
            .map_err(|e| LoadError::Compile {
                key: key.clone(),
                message: format!("{e:#}"),
            })?;

        let engine = self.engine.clone();
        let (fuel, mem) = (self.call_fuel, self.memory_limit_bytes);
        let task_key = key.clone();
        let guest = tokio::task::spawn_blocking(move || {
            Self::instantiate_blocking(&engine, &module, &task_key, fuel, mem)
        })
        .await
        .map_err(|e| format!("instantiate task failed: {e}"))
        .and_then(|res| res)
        .map_err(|message| LoadError::Instantiate {
            key: key.clone(),
            message,
        })?;

        tracing::debug!(target: "cue_worker", key = %key, "capability registered");
        Ok(Arc::new(WasmCapability {
            guest: Arc::new(Mutex::new(guest)),
            call_fuel: self.call_fuel,
        }))
    }
}

struct Guest {
    store: Store<HostState>,
    instance: Instance,
    memory: Memory,
    alloc: TypedFunc<i32, i32>,
}

impl Guest {
    fn call(&mut self, export: &str, args: &Value, fuel: u64) -> Result<Value, EngineError> {
        let fault = |what: &str, e: &dyn std::fmt::Display| {
            EngineError::new(format!("{export}: {what}: {e:#}"))
        };
        let func = self
            .instance
            .get_typed_func::<(i32, i32), i64>(&mut self.store, export)
            .map_err(|_| EngineError::new(format!("module does not export {export}")))?;
        self.store
            .set_fuel(fuel)
            .map_err(|e| fault("set fuel", &e))?;

        let input = serde_json::to_vec(args).map_err(|e| fault("encode arguments", &e))?;
        let len = i32::try_from(input.len())
            .map_err(|_| EngineError::new(format!("{export}: arguments too large")))?;
        let ptr = self
            .alloc
            .call(&mut self.store, len)
            .map_err(|e| fault("cue_alloc", &e))?;
        self.memory
            .write(&mut self.store, ptr as u32 as usize, &input)
            .map_err(|e| fault("write arguments", &e))?;

        let packed = func
            .call(&mut self.store, (ptr, len))
            .map_err(|e| fault("trapped", &e))? as u64;
        let out_ptr = (packed >> 32) as usize;
        let out_len = (packed & 0xffff_ffff) as usize;
        let raw = self
            .memory
            .data(&self.store)
            .get(out_ptr..out_ptr.saturating_add(out_len))
            .ok_or_else(|| EngineError::new(format!("{export}: result out of bounds")))?;

        let doc: Value = serde_json::from_slice(raw).map_err(|e| fault("decode result", &e))?;
        match doc {
            Value::Object(mut obj) => {
                if let Some(err) = obj.remove("err") {
                    return Err(EngineError::new(text(err)));
                }
                obj.remove("ok")
                    .ok_or_else(|| EngineError::new(format!("{export}: result has neither ok nor err")))
            }
            _ => Err(EngineError::new(format!("{export}: result is not an object"))),
        }
    }
}

/// Strings pass through untouched; other JSON values are re-encoded.
fn text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Capability backed by one live guest instance. Calls are serialized.
pub struct WasmCapability {
    guest: Arc<Mutex<Guest>>,
    call_fuel: u64,
}

impl WasmCapability {
    async fn call(&self, export: &'static str, args: Value) -> Result<Value, EngineError> {
        let guest = self.guest.clone();
        let fuel = self.call_fuel;
        blocking(export, move || guest.lock().call(export, &args, fuel)).await
    }
}

/// Run a guest call on the blocking pool. A panic there is resumed on the
/// calling task so the host reports it as a fault, not an engine error.
async fn blocking<F>(export: &str, call: F) -> Result<Value, EngineError>
where
    F: FnOnce() -> Result<Value, EngineError> + Send + 'static,
{
    match tokio::task::spawn_blocking(call).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(EngineError::new(format!("{export}: call task failed: {e}"))),
    }
}

#[async_trait]
impl Capability for WasmCapability {
    async fn unify(
        &self,
        overlay: &Overlay,
        entry_points: &[String],
        tags: &[String],
    ) -> Result<String, EngineError> {
        self.call("cue_unify", json!([overlay, entry_points, tags]))
            .await
            .map(text)
    }

    async fn validate(&self, schema: &str, data: &str) -> Result<bool, EngineError> {
        match self.call("cue_validate", json!([schema, data])).await? {
            Value::Bool(ok) => Ok(ok),
            other => Err(EngineError::new(format!("cue_validate returned {other}"))),
        }
    }

    async fn format(&self, code: &str) -> Result<String, EngineError> {
        self.call("cue_format", json!([code])).await.map(text)
    }

    async fn parse(&self, code: &str) -> Result<String, EngineError> {
        self.call("cue_parse", json!([code])).await.map(text)
    }

    async fn get_symbols(&self, code: &str) -> Result<String, EngineError> {
        self.call("cue_get_symbols", json!([code])).await.map(text)
    }

    async fn export(&self, code: &str, format: ExportFormat) -> Result<String, EngineError> {
        self.call("cue_export", json!([code, format])).await.map(text)
    }
}
