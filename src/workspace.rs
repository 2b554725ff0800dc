//! In-memory file set feeding `unify`.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::protocol::{Overlay, StructuredError};
use crate::rpc::{RpcClient, RpcError};

const MODULE_FILE: &str = "/cue.mod/module.cue";
const DEFAULT_LANGUAGE_VERSION: &str = "v0.12.0";

/// Source of the overlay and entry points handed to `unify`.
pub trait OverlayProvider: Send + Sync {
    fn overlay(&self) -> Overlay;
    fn entry_points(&self) -> Vec<String>;
}

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("invalid path: path must be a non-empty string")]
    EmptyPath,

    #[error("file not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyntaxReport {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StructuredError>,
}

#[derive(Debug, Clone, Default)]
pub struct Workspace {
    files: BTreeMap<String, String>,
    /// Insertion order, no duplicates.
    entry_points: Vec<String>,
    module_name: Option<String>,
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(
        &mut self,
        path: &str,
        content: impl Into<String>,
        entry_point: bool,
    ) -> Result<(), WorkspaceError> {
        if path.trim().is_empty() {
            return Err(WorkspaceError::EmptyPath);
        }
        let path = normalize(path);
        if entry_point && !self.entry_points.contains(&path) {
            self.entry_points.push(path.clone());
        }
        self.files.insert(path, content.into());
        Ok(())
    }

    /// Returns whether a file was removed.
    pub fn remove_file(&mut self, path: &str) -> bool {
        let path = normalize(path);
        self.entry_points.retain(|p| *p != path);
        self.files.remove(&path).is_some()
    }

    pub fn file(&self, path: &str) -> Option<&str> {
        self.files.get(&normalize(path)).map(String::as_str)
    }

    /// Writes `cue.mod/module.cue` for `name`.
    pub fn set_module(&mut self, name: &str, language_version: Option<&str>) {
        let version = language_version.unwrap_or(DEFAULT_LANGUAGE_VERSION);
        self.module_name = Some(name.to_string());
        self.files.insert(
            MODULE_FILE.to_string(),
            format!("module: \"{name}\"\nlanguage: version: \"{version}\""),
        );
    }

    pub fn module_name(&self) -> Option<&str> {
        self.module_name.as_deref()
    }

    pub fn clear(&mut self) {
        self.files.clear();
        self.entry_points.clear();
        self.module_name = None;
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Parse one file through `client`. Engine rejections come back as an
    /// invalid report; transport failures are errors.
    pub async fn validate_syntax(
        &self,
        path: &str,
        client: &RpcClient,
    ) -> Result<SyntaxReport, WorkspaceError> {
        let content = self
            .file(path)
            .ok_or_else(|| WorkspaceError::NotFound(path.to_string()))?;
        match client.parse(content).await {
            Ok(_) => Ok(SyntaxReport {
                valid: true,
                error: None,
            }),
            Err(err @ RpcError::Remote { .. }) if !err.is_not_ready() => Ok(SyntaxReport {
                valid: false,
                error: err.structured(),
            }),
            Err(err) => Err(err.into()),
        }
    }
}

impl OverlayProvider for Workspace {
    fn overlay(&self) -> Overlay {
        self.files.clone()
    }

    fn entry_points(&self) -> Vec<String> {
        self.entry_points.clone()
    }
}
