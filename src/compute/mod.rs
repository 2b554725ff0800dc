//! Compute module plumbing: variants, the module cache, fetching, the Wasm
//! runtime, and the loader tying them together.

pub mod capability;
pub mod fetch;
pub mod loader;
pub mod module_cache;
pub mod runtime;
pub mod variant;

#[cfg(feature = "wasm_compute")]
pub mod wasm;

pub use capability::{Capability, EngineError};
pub use fetch::{HttpFetcher, ModuleFetcher};
pub use loader::{LoadError, ModuleLoader};
pub use module_cache::{MemoryModuleCache, ModuleCache, SqliteModuleCache};
pub use runtime::ModuleRuntime;
pub use variant::{CacheKey, ModuleVariant, VariantKind};
