//! Phased, cached loader and RPC host for the CUE Wasm engine.
//!
//! A [`host::Host`] serves parse/format/symbol requests from the small reader
//! build as soon as it is loaded, while the full engine loads in the
//! background. Module bytes are cached on disk per version, so later sessions
//! skip the download. [`rpc::RpcClient`] is the caller side.

pub mod compute;
pub mod config;
pub mod core;
pub mod host;
pub mod phase;
pub mod protocol;
pub mod rpc;
pub mod workspace;

#[cfg(test)]
mod test_support;

pub use compute::{
    Capability, EngineError, HttpFetcher, LoadError, MemoryModuleCache, ModuleCache,
    ModuleFetcher, ModuleLoader, ModuleRuntime, ModuleVariant, SqliteModuleCache,
};
pub use config::HostConfig;
pub use host::{Host, HostError, HostHandle};
pub use phase::{CapabilityState, ModuleSources, PhaseController};
pub use protocol::{
    Action, ExportFormat, InitOutcome, InitPayload, Message, Overlay, Reply, StructuredError,
    Symbol,
};
pub use rpc::{RpcClient, RpcError};
pub use workspace::{OverlayProvider, SyntaxReport, Workspace, WorkspaceError};
