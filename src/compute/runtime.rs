//! Compiles module bytes and runs them until they register a capability.
//!
//! Selects the implementation from the `wasm_compute` feature:
//! - when enabled, [`default_runtime`] hands out the Wasmtime runtime;
//! - when disabled, every instantiate fails with a deterministic load error
//!   so the host and client can still be wired and exercised.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::{capability::Capability, loader::LoadError, variant::ModuleVariant};
use crate::config::HostConfig;

#[async_trait]
pub trait ModuleRuntime: Send + Sync {
    /// Compile `bytes`, instantiate them with the host import surface and run
    /// the entry point. Resolves to the capability the entry point registered.
    async fn instantiate(
        &self,
        variant: &ModuleVariant,
        bytes: Bytes,
    ) -> Result<Arc<dyn Capability>, LoadError>;
}

#[cfg(not(feature = "wasm_compute"))]
mod no_runtime {
    use super::*;

    /// Placeholder used when no Wasm runtime is compiled in.
    pub struct NoRuntime;

    #[async_trait]
    impl ModuleRuntime for NoRuntime {
        async fn instantiate(
            &self,
            variant: &ModuleVariant,
            _bytes: Bytes,
        ) -> Result<Arc<dyn Capability>, LoadError> {
            Err(LoadError::Compile {
                key: variant.cache_key().to_string(),
                message: "Wasm runtime not enabled (feature wasm_compute)".into(),
            })
        }
    }
}

/// Public shim that selects the correct implementation.
pub fn default_runtime(config: &HostConfig) -> anyhow::Result<Arc<dyn ModuleRuntime>> {
    #[cfg(feature = "wasm_compute")]
    {
        let runtime = super::wasm::WasmtimeRuntime::new(config.call_fuel, config.memory_limit_bytes)?;
        Ok(Arc::new(runtime))
    }
    #[cfg(not(feature = "wasm_compute"))]
    {
        let _ = config;
        Ok(Arc::new(no_runtime::NoRuntime))
    }
}
