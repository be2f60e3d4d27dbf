//! Warden Configuration
//!
//! Startup configuration: interpreter and gate limits, collection threshold,
//! bootstrap scripts and the capability declarations fed to the registry.
//! Configuration specifies constraints only; enforcement lives in the engine.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::capability::TrustTier;
use crate::error::{WardenError, WardenResult};

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub gate: GateLimits,
    pub gc: GcConfig,
    pub interpreter: InterpreterLimits,
    pub bootstrap: BootstrapScripts,

    /// Base directory for relative script and data paths
    pub script_root: Option<PathBuf>,

    /// Capability declarations consumed by `CapabilityRegistry::bootstrap`
    pub capabilities: Vec<CapabilityDecl>,

    /// Free-form string options exposed to scripts by the host `options` capability
    pub options: BTreeMap<String, String>,
}

/// Untrusted Data Gate ceilings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GateLimits {
    /// Maximum array/object nesting depth
    pub max_depth: usize,

    /// Maximum payload size in bytes
    pub max_payload_bytes: usize,
}

impl Default for GateLimits {
    fn default() -> Self {
        GateLimits {
            max_depth: 128,
            max_payload_bytes: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Allocations since the last collection before `collect_if_needed` acts
    pub allocation_threshold: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        GcConfig { allocation_threshold: 4096 }
    }
}

/// Interpreter resource limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InterpreterLimits {
    /// Maximum call depth (recursion limit)
    pub max_call_depth: usize,

    /// Maximum number of live heap objects
    pub max_heap_objects: usize,

    /// Maximum syntactic nesting accepted by the script parser
    pub max_nesting: usize,

    /// Maximum evaluator recursion (statements, expressions and calls combined).
    /// The default fits a 2 MiB thread stack in unoptimized builds.
    pub max_eval_depth: usize,
}

impl Default for InterpreterLimits {
    fn default() -> Self {
        InterpreterLimits {
            max_call_depth: 256,
            max_heap_objects: 1_000_000,
            max_nesting: 256,
            max_eval_depth: 256,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BootstrapScripts {
    /// Runs in the global scope at startup, and in sandboxes that ask for it
    pub extensions: Option<PathBuf>,

    /// Runs once in the global scope after `extensions`
    pub autoexec: Option<PathBuf>,
}

/// One `(tag, min_trust)` pair from the startup configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CapabilityDecl {
    pub tag: String,
    pub min_trust: TrustTier,
}

impl CapabilityDecl {
    pub fn new(tag: impl Into<String>, min_trust: TrustTier) -> Self {
        CapabilityDecl { tag: tag.into(), min_trust }
    }
}

impl WardenConfig {
    /// Create a new configuration with default limits
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> WardenResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            WardenError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> WardenResult<Self> {
        let config: WardenConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> WardenResult<()> {
        if self.gate.max_depth == 0 {
            return Err(WardenError::Config("gate.max_depth must be at least 1".into()));
        }
        if self.gate.max_payload_bytes == 0 {
            return Err(WardenError::Config(
                "gate.max_payload_bytes must be at least 1".into(),
            ));
        }
        let limits = &self.interpreter;
        if limits.max_call_depth == 0 || limits.max_nesting == 0 || limits.max_eval_depth == 0 {
            return Err(WardenError::Config(
                "interpreter limits must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Resolve a script/data path against `script_root`.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.script_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}
