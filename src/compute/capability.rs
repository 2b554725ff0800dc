//! The capability object a loaded compute module registers.
//!
//! The host treats it as a black box: every operation either yields a string
//! (or boolean) result or fails with the engine's own error text.

use async_trait::async_trait;

use crate::protocol::{ExportFormat, Overlay, StructuredError};

/// Error text produced by the compute module, forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct EngineError(pub String);

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    /// Interpret the text as a `{message, line, column, file}` document when it is one.
    pub fn structured(&self) -> StructuredError {
        StructuredError::parse(&self.0)
    }
}

#[async_trait]
pub trait Capability: Send + Sync {
    async fn unify(
        &self,
        overlay: &Overlay,
        entry_points: &[String],
        tags: &[String],
    ) -> Result<String, EngineError>;

    async fn validate(&self, schema: &str, data: &str) -> Result<bool, EngineError>;

    async fn format(&self, code: &str) -> Result<String, EngineError>;

    async fn parse(&self, code: &str) -> Result<String, EngineError>;

    /// JSON-encoded list of symbols.
    async fn get_symbols(&self, code: &str) -> Result<String, EngineError>;

    async fn export(&self, code: &str, format: ExportFormat) -> Result<String, EngineError>;
}
