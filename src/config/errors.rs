//! Error code constants carried in the `code` field of failed replies

/// A load (fetch, compile, instantiate) failed.
pub const CODE_LOAD_FAILED: &str = "Load.Failed";
/// The action needs a capability state the host has not reached.
pub const CODE_CAPABILITY_NOT_READY: &str = "Capability.NotReady";
/// The compute module itself reported an error.
pub const CODE_ENGINE_ERROR: &str = "Engine.Error";
/// Unknown action or malformed frame.
pub const CODE_PROTOCOL_INVALID: &str = "Protocol.Invalid";
/// A handler panicked.
pub const CODE_RUNTIME_FAULT: &str = "Runtime.Fault";
