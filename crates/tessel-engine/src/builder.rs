//! Builder for [`Engine`]
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use tessel_engine::{Engine, MemoryWorld, TesselConfig};
//! let world = Arc::new(MemoryWorld::new());
//! let engine = Engine::builder()
//!     .with_config(&TesselConfig::default())
//!     .with_memory_world(world)
//!     .build()
//!     .unwrap();
//! ```

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Weak};
use std::time::Instant;

use tessel_codegen::EventKind;
use tessel_events::NotificationBus;
use tracing::{info, trace};

use crate::api::HostApi;
use crate::cache::ModuleCache;
use crate::config::{EngineConfig, SandboxConfig, TesselConfig};
use crate::executor::Executor;
use crate::lifecycle::{Engine, EngineShared};
use crate::loader::Loader;
use crate::persistence::{NoPersistence, StatePersistence, TomlStateStore};
use crate::registry::ScriptRegistry;
use crate::sandbox::{Sandbox, SandboxManager};
use crate::scheduler::{
    CommandPass, CommandPlugin, LoadQueue, Priority, Scheduler, SchedulerConfig, TimerPlugin,
};
use crate::world::{MemoryWorld, SourceProvider, WorldHost};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("No world host configured - use .with_world() or .with_memory_world()")]
    MissingWorld,
}

pub struct EngineBuilder {
    engine: EngineConfig,
    sandbox_config: SandboxConfig,
    sandbox: Option<Box<dyn Sandbox>>,
    api: Option<Arc<HostApi>>,
    cache_dir: Option<PathBuf>,
    world: Option<Arc<dyn WorldHost>>,
    sources: Option<Arc<dyn SourceProvider>>,
    store: Option<Arc<dyn StatePersistence>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            engine: EngineConfig::default(),
            sandbox_config: SandboxConfig::default(),
            sandbox: None,
            api: None,
            cache_dir: None,
            world: None,
            sources: None,
            store: None,
        }
    }

    /// Take engine, sandbox and storage settings from a loaded config file
    ///
    /// Snapshots go to a TOML store under the configured state directory.
    pub fn with_config(mut self, config: &TesselConfig) -> Self {
        self.engine = config.engine.clone();
        self.sandbox_config = config.sandbox.clone();
        self.cache_dir = config.scripting.cache_dir.clone();
        self.store = Some(Arc::new(TomlStateStore::new(config.scripting.state_dir())));
        self
    }

    pub fn with_engine_config(mut self, config: EngineConfig) -> Self {
        self.engine = config;
        self
    }

    pub fn with_sandbox_config(mut self, config: SandboxConfig) -> Self {
        self.sandbox_config = config;
        self
    }

    /// Use a custom sandbox instead of the one the sandbox config selects
    pub fn with_sandbox(mut self, sandbox: Box<dyn Sandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn with_api(mut self, api: Arc<HostApi>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_world(mut self, world: Arc<dyn WorldHost>) -> Self {
        self.world = Some(world);
        self
    }

    /// Where `restart_all` fetches script sources from
    pub fn with_sources(mut self, sources: Arc<dyn SourceProvider>) -> Self {
        self.sources = Some(sources);
        self
    }

    /// Use an in-memory world as both world host and source provider
    pub fn with_memory_world(mut self, world: Arc<MemoryWorld>) -> Self {
        self.world = Some(Arc::clone(&world) as Arc<dyn WorldHost>);
        self.sources = Some(world as Arc<dyn SourceProvider>);
        self
    }

    pub fn with_persistence(mut self, store: Arc<dyn StatePersistence>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Result<Engine, BuildError> {
        let world = self.world.ok_or(BuildError::MissingWorld)?;
        let config = self.engine;
        let api = self.api.unwrap_or_else(|| Arc::new(HostApi::standard()));
        let sandbox = match self.sandbox {
            Some(sandbox) => SandboxManager::with_sandbox(self.sandbox_config, sandbox),
            None => SandboxManager::new(self.sandbox_config),
        };

        let bus = NotificationBus::new(config.notification_capacity);
        let notifier = bus.create_sender();
        let timers = Arc::new(TimerPlugin::new());
        let commands = CommandPass::new(config.command_pass_interval());
        commands.add_plugin(Arc::clone(&timers) as Arc<dyn CommandPlugin>);

        let shared = Arc::new(EngineShared {
            registry: ScriptRegistry::new(),
            sandbox,
            cache: ModuleCache::new(api, self.cache_dir),
            world,
            sources: self.sources,
            store: self
                .store
                .unwrap_or_else(|| Arc::new(NoPersistence) as Arc<dyn StatePersistence>),
            bus,
            notifier,
            timers: Arc::clone(&timers),
            commands: Arc::clone(&commands),
            loads: LoadQueue::new(),
            enabled: AtomicBool::new(true),
            started_at: Instant::now(),
            config,
        });
        let scheduler = Scheduler::new(
            Executor::new(Arc::clone(&shared)),
            SchedulerConfig::from(&shared.config),
        );

        let weak: Weak<Scheduler<Executor>> = Arc::downgrade(&scheduler);
        let sink_shared = Arc::downgrade(&shared);
        timers.set_sink(Box::new(move |item| {
            let (Some(scheduler), Some(shared)) = (weak.upgrade(), sink_shared.upgrade()) else {
                return;
            };
            let Some(instance) = shared.registry.get(item) else {
                shared.timers.cancel(item);
                return;
            };
            if let Err(fault) =
                scheduler.post(&instance, EventKind::Timer, Vec::new(), Vec::new(), Priority::Normal)
            {
                trace!(target: "scheduler", "Timer of {} dropped: {}", item, fault);
            }
        }));

        shared
            .loads
            .start(Loader::new(Arc::clone(&shared), Arc::clone(&scheduler)));
        commands.start();

        info!(
            target: "scripting",
            "Scripting engine ready ({} sandbox, up to {} workers)",
            shared.sandbox.mode(),
            shared.config.max_threads
        );
        Ok(Engine::from_parts(shared, scheduler))
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }
}
