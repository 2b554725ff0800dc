//! Resource limits for fetched modules and guest execution

/// Largest module body accepted from the network.
pub const DEFAULT_MAX_MODULE_MB: usize = 128;

/// Fuel granted to a single capability call.
pub const DEFAULT_CALL_FUEL: u64 = 10_000_000_000;

/// Guest linear memory ceiling.
pub const DEFAULT_MEMORY_LIMIT_MB: usize = 1024;

/// Guest log lines longer than this are truncated before they reach tracing.
pub const MAX_GUEST_LOG_BYTES: usize = 10 * 1024; // 10 KiB
