/// Runtime for tessel guest scripts
///
/// Scripts are compiled by `tessel-codegen`, loaded into sandbox domains and
/// driven by a pool of worker threads. Each script receives its events one
/// at a time, in order, and may suspend at delay-bearing host calls without
/// holding a worker. Hosts embed the engine through [`Engine`], supplying a
/// [`WorldHost`] for side effects and receiving [`tessel_events`]
/// notifications back.
pub mod api;
pub mod builder;
pub mod cache;
pub mod config;
pub mod error;
mod executor;
pub mod instance;
pub mod lifecycle;
mod loader;
pub mod persistence;
pub mod registry;
pub mod sandbox;
pub mod scheduler;
pub mod vm;
pub mod world;

#[cfg(test)]
mod testing;

pub use api::{Capability, HostApi};
pub use builder::{BuildError, EngineBuilder};
pub use cache::{CompiledScript, ModuleCache};
pub use config::{
    ConfigLoadError, EngineConfig, PermissionTier, SandboxConfig, SandboxMode, ScriptingConfig,
    TesselConfig,
};
pub use error::{EngineError, EngineResult, LoadError, ScriptFault};
pub use instance::Phase;
pub use lifecycle::{Engine, EngineStats, ScriptScope, ScriptScore, StartParams};
pub use persistence::{NoPersistence, StatePersistence, StateSnapshot, TomlStateStore};
pub use scheduler::{PostOutcome, Priority};
pub use vm::{Quat, Value, Vector3};
pub use world::{
    ChatLine, ChatVolume, DetectParams, MemoryObject, MemoryWorld, ObjectRef, ScriptEvents,
    ScriptSource, SourceProvider, WorldHost,
};
