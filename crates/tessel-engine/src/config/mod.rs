pub mod engine_config;
pub mod paths;
pub mod sandbox_config;
pub mod scripting_config;
pub mod tessel_config;

pub use engine_config::EngineConfig;
pub use paths::ProjectPaths;
pub use sandbox_config::{PermissionTier, SandboxConfig, SandboxMode};
pub use scripting_config::ScriptingConfig;
pub use tessel_config::{ConfigLoadError, TesselConfig};
