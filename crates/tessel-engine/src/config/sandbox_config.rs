use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// How guest modules are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SandboxMode {
    /// No execution budget
    Trusted,
    /// Fuel and size limits on every dispatch
    #[default]
    Isolated,
}

/// Capability policy applied when a module is linked into a domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PermissionTier {
    /// Every host function
    Full,
    /// Everything except network access
    #[default]
    Standard,
    /// Only pure computation and script-local functions
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub mode: SandboxMode,
    pub tier: PermissionTier,
    pub scripts_per_domain: usize,
    pub max_domains: usize,
    /// Instructions per dispatch in isolated mode
    pub fuel: u64,
    pub max_call_depth: usize,
    pub max_stack: usize,
    pub max_string_len: usize,
    pub max_list_len: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            mode: SandboxMode::default(),
            tier: PermissionTier::default(),
            scripts_per_domain: 1,
            max_domains: 10_000,
            fuel: 1_000_000,
            max_call_depth: 128,
            max_stack: 4096,
            max_string_len: 65_536,
            max_list_len: 4096,
        }
    }
}
