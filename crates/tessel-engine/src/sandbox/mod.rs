//! Execution contexts for compiled modules
//!
//! A [`Sandbox`] decides how guest code is bounded once it runs; the
//! [`SandboxManager`] groups loaded modules into capacity-limited domains and
//! tears sealed domains down once every module in them has been released.

mod manager;

use std::sync::Arc;

use tracing::debug;

pub use manager::{Domain, SandboxManager, ScriptHandle};

use crate::api::{Capability, HostApi};
use crate::config::{PermissionTier, SandboxConfig, SandboxMode};
use crate::error::LoadError;
use crate::vm::{CompiledModule, ExecLimits};

impl PermissionTier {
    pub fn allows(self, capability: Capability) -> bool {
        match self {
            PermissionTier::Full => true,
            PermissionTier::Standard => capability != Capability::Network,
            PermissionTier::None => capability == Capability::Core,
        }
    }
}

/// A module whose imports are bound to host API functions
#[derive(Debug, Clone)]
pub struct LinkedModule {
    pub module: Arc<CompiledModule>,
    /// Host API index for each module import
    pub imports: Vec<usize>,
}

pub trait Sandbox: Send + Sync {
    fn mode(&self) -> SandboxMode;

    /// Bounds applied to every dispatch
    fn limits(&self) -> ExecLimits;

    /// Bind a module's imports, refusing those the tier does not grant
    fn link(
        &self,
        module: Arc<CompiledModule>,
        api: &HostApi,
        tier: PermissionTier,
    ) -> Result<LinkedModule, LoadError> {
        let mut imports = Vec::with_capacity(module.imports.len());
        for name in &module.imports {
            let index = api
                .index_of(name)
                .ok_or_else(|| LoadError::UnknownImport(name.clone()))?;
            let capability = api.get(index).map(|f| f.capability).unwrap_or(Capability::Core);
            if !tier.allows(capability) {
                debug!(
                    target: "sandbox",
                    "Refusing import {} ({}) under tier {}",
                    name,
                    capability,
                    tier
                );
                return Err(LoadError::PermissionDenied(name.clone()));
            }
            imports.push(index);
        }
        Ok(LinkedModule { module, imports })
    }
}

/// Runs guest code without an execution budget
#[derive(Debug, Default)]
pub struct TrustedSandbox;

impl Sandbox for TrustedSandbox {
    fn mode(&self) -> SandboxMode {
        SandboxMode::Trusted
    }

    fn limits(&self) -> ExecLimits {
        ExecLimits::unlimited()
    }
}

/// Runs guest code under fuel, depth and size caps
#[derive(Debug)]
pub struct IsolatedSandbox {
    limits: ExecLimits,
}

impl IsolatedSandbox {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            limits: ExecLimits {
                fuel: Some(config.fuel),
                max_call_depth: config.max_call_depth,
                max_stack: config.max_stack,
                max_string_len: config.max_string_len,
                max_list_len: config.max_list_len,
            },
        }
    }
}

impl Sandbox for IsolatedSandbox {
    fn mode(&self) -> SandboxMode {
        SandboxMode::Isolated
    }

    fn limits(&self) -> ExecLimits {
        self.limits
    }
}

pub fn sandbox_for(config: &SandboxConfig) -> Box<dyn Sandbox> {
    match config.mode {
        SandboxMode::Trusted => Box::new(TrustedSandbox),
        SandboxMode::Isolated => Box::new(IsolatedSandbox::new(config)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::compile;

    const EMAILER: &str = r#"
default
{
    touch_start(integer n)
    {
        llEmail("a@b.c", "hi", "body");
        llSay(0, "sent");
    }
}
"#;

    #[test]
    fn test_tiers() {
        assert!(PermissionTier::Full.allows(Capability::Network));
        assert!(!PermissionTier::Standard.allows(Capability::Network));
        assert!(PermissionTier::Standard.allows(Capability::Inventory));
        assert!(!PermissionTier::None.allows(Capability::World));
        assert!(PermissionTier::None.allows(Capability::Core));
    }

    #[test]
    fn test_link_refuses_denied_imports() {
        let api = HostApi::standard();
        let module = compile(EMAILER);
        let err = TrustedSandbox
            .link(Arc::clone(&module), &api, PermissionTier::Standard)
            .unwrap_err();
        assert_eq!(err, LoadError::PermissionDenied("llEmail".into()));

        let linked = TrustedSandbox.link(module, &api, PermissionTier::Full).unwrap();
        assert_eq!(linked.imports.len(), 2);
        assert_eq!(linked.imports[0], api.index_of("llEmail").unwrap());
    }

    #[test]
    fn test_isolated_limits_come_from_config() {
        let config = SandboxConfig {
            fuel: 10,
            ..SandboxConfig::default()
        };
        let sandbox = sandbox_for(&config);
        assert_eq!(sandbox.mode(), SandboxMode::Isolated);
        assert_eq!(sandbox.limits().fuel, Some(10));
        assert_eq!(TrustedSandbox.limits().fuel, None);
    }
}
