use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Interpreter limits and switches. Every field has a default, so a config
/// file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    pub max_call_depth: usize,
    /// Consecutive repeat signals tolerated at one address.
    pub max_repeats: u32,
    /// Record enter/exit/alloc events per frame.
    pub trace_scopes: bool,
    /// Per call-site capability cache.
    pub dispatch_cache: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 512,
            max_repeats: 64,
            trace_scopes: false,
            dispatch_cache: true,
        }
    }
}

impl VmConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).context("invalid VM configuration")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("in {}", path.display()))
    }
}
