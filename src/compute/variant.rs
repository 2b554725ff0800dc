use std::fmt;

use serde::{Deserialize, Serialize};

/// Which build of the compute module is meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantKind {
    /// Small build: parse, format, symbols.
    Reader,
    /// Full build: everything, including evaluation.
    Engine,
}

impl VariantKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariantKind::Reader => "reader",
            VariantKind::Engine => "engine",
        }
    }
}

impl fmt::Display for VariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleVariant {
    pub kind: VariantKind,
    pub version: String,
}

impl ModuleVariant {
    pub fn reader(version: impl Into<String>) -> Self {
        Self {
            kind: VariantKind::Reader,
            version: version.into(),
        }
    }

    pub fn engine(version: impl Into<String>) -> Self {
        Self {
            kind: VariantKind::Engine,
            version: version.into(),
        }
    }

    /// Deterministic cache key: `{version}_{kind}`.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey(format!("{}_{}", self.version, self.kind))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
