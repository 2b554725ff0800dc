//! Path and naming configuration

/// Directory name under the platform data dir.
pub const DATA_DIR_NAME: &str = "cue-worker";

/// SQLite file holding cached module bytes.
pub const MODULE_CACHE_DB: &str = "modules.db";

/// Marker inserted before `.wasm` to derive the reader location from the engine's.
pub const READER_SUFFIX: &str = ".reader";
