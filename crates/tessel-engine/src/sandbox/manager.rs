use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{sandbox_for, LinkedModule, Sandbox};
use crate::api::HostApi;
use crate::config::{PermissionTier, SandboxConfig, SandboxMode};
use crate::error::LoadError;
use crate::vm::{CompiledModule, ExecLimits};

/// An execution context holding up to `capacity` loaded modules
#[derive(Debug)]
pub struct Domain {
    id: u64,
    capacity: usize,
    tier: PermissionTier,
    loaded: AtomicUsize,
    pending_unload: AtomicUsize,
    sealed: AtomicBool,
}

impl Domain {
    fn new(id: u64, capacity: usize, tier: PermissionTier) -> Self {
        Self {
            id,
            capacity: capacity.max(1),
            tier,
            loaded: AtomicUsize::new(0),
            pending_unload: AtomicUsize::new(0),
            sealed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn tier(&self) -> PermissionTier {
        self.tier
    }

    pub fn loaded(&self) -> usize {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn pending_unload(&self) -> usize {
        self.pending_unload.load(Ordering::Acquire)
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    fn has_room(&self) -> bool {
        self.loaded() < self.capacity
    }

    /// Claim one slot; fails once the domain is at capacity
    fn try_claim(&self) -> bool {
        self.loaded
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .is_ok()
    }

    fn is_drained(&self) -> bool {
        self.pending_unload() >= self.loaded()
    }
}

/// A module loaded into a domain, ready to run
#[derive(Debug, Clone)]
pub struct ScriptHandle {
    pub domain: Arc<Domain>,
    pub linked: LinkedModule,
    pub limits: ExecLimits,
}

impl ScriptHandle {
    pub fn module(&self) -> &Arc<CompiledModule> {
        &self.linked.module
    }
}

#[derive(Debug, Default)]
struct DomainTable {
    current: Option<Arc<Domain>>,
    sealed: Vec<Arc<Domain>>,
    next_id: u64,
}

impl DomainTable {
    fn live(&self) -> usize {
        self.sealed.len() + usize::from(self.current.is_some())
    }

    /// Live domains still holding modules; drained ones await the sweeper
    fn occupied(&self) -> usize {
        self.sealed.iter().filter(|d| !d.is_drained()).count()
            + usize::from(self.current.is_some())
    }
}

struct Sweeper {
    wake: mpsc::UnboundedSender<()>,
    thread: JoinHandle<()>,
}

/// Allocates domains, loads modules into them and sweeps drained ones
pub struct SandboxManager {
    config: SandboxConfig,
    sandbox: Box<dyn Sandbox>,
    table: Mutex<DomainTable>,
    torn_down: AtomicU64,
    sweeper: Mutex<Option<Sweeper>>,
}

impl SandboxManager {
    pub fn new(config: SandboxConfig) -> Arc<Self> {
        let sandbox = sandbox_for(&config);
        Self::with_sandbox(config, sandbox)
    }

    pub fn with_sandbox(config: SandboxConfig, sandbox: Box<dyn Sandbox>) -> Arc<Self> {
        info!(
            target: "sandbox",
            "Sandbox manager: mode={}, tier={}, {} script(s) per domain",
            sandbox.mode(),
            config.tier,
            config.scripts_per_domain
        );
        let manager = Arc::new(Self {
            config,
            sandbox,
            table: Mutex::new(DomainTable::default()),
            torn_down: AtomicU64::new(0),
            sweeper: Mutex::new(None),
        });
        manager.start_sweeper();
        manager
    }

    fn start_sweeper(self: &Arc<Self>) {
        let (wake, mut rx) = mpsc::unbounded_channel::<()>();
        let weak: Weak<Self> = Arc::downgrade(self);
        let spawned = std::thread::Builder::new()
            .name("tessel-sandbox-sweep".into())
            .spawn(move || {
                while rx.blocking_recv().is_some() {
                    // Coalesce bursts of releases into one sweep
                    while rx.try_recv().is_ok() {}
                    let Some(manager) = weak.upgrade() else {
                        break;
                    };
                    manager.sweep_now();
                }
                debug!(target: "sandbox", "Sweeper stopped");
            });
        match spawned {
            Ok(thread) => *self.sweeper_slot() = Some(Sweeper { wake, thread }),
            Err(e) => warn!(target: "sandbox", "Failed to start sweeper thread: {}", e),
        }
    }

    fn lock_table(&self) -> MutexGuard<'_, DomainTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sweeper_slot(&self) -> MutexGuard<'_, Option<Sweeper>> {
        self.sweeper.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn mode(&self) -> SandboxMode {
        self.sandbox.mode()
    }

    /// The current domain if it has room, otherwise a fresh one
    pub fn acquire_domain(&self) -> Result<Arc<Domain>, LoadError> {
        let mut sealed_drained = false;
        let result = self.acquire_locked(&mut sealed_drained);
        if sealed_drained {
            self.wake_sweeper();
        }
        result
    }

    fn acquire_locked(&self, sealed_drained: &mut bool) -> Result<Arc<Domain>, LoadError> {
        let mut table = self.lock_table();
        if let Some(current) = &table.current {
            if current.has_room() {
                return Ok(Arc::clone(current));
            }
        }

        if let Some(full) = table.current.take() {
            full.sealed.store(true, Ordering::Release);
            debug!(target: "sandbox", "Sealed domain {}", full.id);
            // Its modules were released while it was current, so no release will wake the sweeper
            *sealed_drained = full.is_drained();
            table.sealed.push(full);
        }

        if table.occupied() >= self.config.max_domains {
            warn!(
                target: "sandbox",
                "Domain limit of {} reached",
                self.config.max_domains
            );
            return Err(LoadError::SandboxUnavailable);
        }

        table.next_id += 1;
        let domain = Arc::new(Domain::new(
            table.next_id,
            self.config.scripts_per_domain,
            self.config.tier,
        ));
        debug!(target: "sandbox", "Created domain {}", domain.id);
        table.current = Some(Arc::clone(&domain));
        Ok(domain)
    }

    /// Instantiate a module inside `domain`
    pub fn load_module(
        &self,
        domain: &Arc<Domain>,
        module: Arc<CompiledModule>,
        api: &HostApi,
    ) -> Result<ScriptHandle, LoadError> {
        if !domain.try_claim() {
            return Err(LoadError::DomainFull);
        }
        match self.sandbox.link(module, api, domain.tier) {
            Ok(linked) => Ok(ScriptHandle {
                domain: Arc::clone(domain),
                linked,
                limits: self.sandbox.limits(),
            }),
            Err(e) => {
                domain.loaded.fetch_sub(1, Ordering::AcqRel);
                Err(e)
            }
        }
    }

    /// Acquire a domain and load into it, retrying when another loader won the last slot
    pub fn load(&self, module: Arc<CompiledModule>, api: &HostApi) -> Result<ScriptHandle, LoadError> {
        loop {
            let domain = self.acquire_domain()?;
            match self.load_module(&domain, Arc::clone(&module), api) {
                Err(LoadError::DomainFull) => continue,
                other => return other,
            }
        }
    }

    /// Credit the handle's domain with one unload and schedule a sweep
    pub fn release(&self, handle: &ScriptHandle) {
        handle.domain.pending_unload.fetch_add(1, Ordering::AcqRel);
        self.wake_sweeper();
    }

    fn wake_sweeper(&self) {
        if let Some(sweeper) = self.sweeper_slot().as_ref() {
            let _ = sweeper.wake.send(());
        }
    }

    /// Tear down every sealed domain whose modules were all released
    pub fn sweep_now(&self) -> usize {
        let mut table = self.lock_table();
        let before = table.sealed.len();
        table.sealed.retain(|domain| {
            let drained = domain.is_drained();
            if drained {
                debug!(
                    target: "sandbox",
                    "Tearing down domain {} ({} loaded, {} released)",
                    domain.id,
                    domain.loaded(),
                    domain.pending_unload()
                );
            }
            !drained
        });
        let removed = before - table.sealed.len();
        self.torn_down.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn domain_count(&self) -> usize {
        self.lock_table().live()
    }

    pub fn torn_down(&self) -> u64 {
        self.torn_down.load(Ordering::Relaxed)
    }

    /// Every live domain, current first
    pub fn domains(&self) -> Vec<Arc<Domain>> {
        let table = self.lock_table();
        table
            .current
            .iter()
            .chain(table.sealed.iter())
            .cloned()
            .collect()
    }

    pub fn shutdown(&self) {
        let sweeper = self.sweeper_slot().take();
        if let Some(Sweeper { wake, thread }) = sweeper {
            drop(wake);
            if thread.join().is_err() {
                warn!(target: "sandbox", "Sweeper thread panicked");
            }
        }
        self.sweep_now();
    }
}

impl Drop for SandboxManager {
    fn drop(&mut self) {
        // The sweeper only holds a weak reference, so closing its channel ends it
        if let Some(Sweeper { wake, .. }) = self.sweeper_slot().take() {
            drop(wake);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::testing::compile;

    const SCRIPT: &str = "default { state_entry() { llSay(0, \"hi\"); } }";

    fn manager(per_domain: usize, max_domains: usize) -> Arc<SandboxManager> {
        SandboxManager::new(SandboxConfig {
            scripts_per_domain: per_domain,
            max_domains,
            ..SandboxConfig::default()
        })
    }

    #[test]
    fn test_domains_fill_to_capacity() {
        let mgr = manager(2, 10);
        let api = HostApi::standard();
        let module = compile(SCRIPT);

        let a = mgr.load(Arc::clone(&module), &api).unwrap();
        let b = mgr.load(Arc::clone(&module), &api).unwrap();
        let c = mgr.load(Arc::clone(&module), &api).unwrap();

        assert_eq!(a.domain.id(), b.domain.id());
        assert_ne!(a.domain.id(), c.domain.id());
        assert!(a.domain.is_sealed());
        for domain in mgr.domains() {
            assert!(domain.loaded() <= domain.capacity());
        }
    }

    #[test]
    fn test_domain_limit_is_sandbox_unavailable() {
        let mgr = manager(1, 2);
        let api = HostApi::standard();
        let module = compile(SCRIPT);

        mgr.load(Arc::clone(&module), &api).unwrap();
        mgr.load(Arc::clone(&module), &api).unwrap();
        assert_eq!(
            mgr.load(module, &api).unwrap_err(),
            LoadError::SandboxUnavailable
        );
    }

    #[test]
    fn test_current_domain_is_never_torn_down() {
        let mgr = manager(2, 10);
        let api = HostApi::standard();
        let handle = mgr.load(compile(SCRIPT), &api).unwrap();

        mgr.release(&handle);
        assert_eq!(mgr.sweep_now(), 0);
        assert_eq!(mgr.domain_count(), 1);
    }

    #[test]
    fn test_sealed_domain_torn_down_after_all_released() {
        let mgr = manager(1, 10);
        let api = HostApi::standard();
        let module = compile(SCRIPT);

        let first = mgr.load(Arc::clone(&module), &api).unwrap();
        let _second = mgr.load(module, &api).unwrap();
        assert!(first.domain.is_sealed());
        assert_eq!(mgr.domain_count(), 2);

        mgr.release(&first);
        // The background sweeper runs shortly after the release
        let deadline = Instant::now() + Duration::from_secs(2);
        while mgr.domain_count() != 1 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(mgr.domain_count(), 1);
        assert_eq!(mgr.torn_down(), 1);
    }

    #[test]
    fn test_domain_drained_while_current_is_swept_once_sealed() {
        let mgr = manager(1, 2);
        let api = HostApi::standard();
        let module = compile(SCRIPT);

        let first = mgr.load(Arc::clone(&module), &api).unwrap();
        mgr.release(&first);
        // Seals the drained first domain
        let _second = mgr.load(Arc::clone(&module), &api).unwrap();
        assert!(first.domain.is_sealed());

        let deadline = Instant::now() + Duration::from_secs(2);
        while mgr.domain_count() != 1 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(mgr.domain_count(), 1);
        assert_eq!(mgr.torn_down(), 1);
        assert!(mgr.load(module, &api).is_ok());
    }

    #[test]
    fn test_failed_link_returns_the_slot() {
        let mgr = SandboxManager::new(SandboxConfig {
            tier: PermissionTier::None,
            ..SandboxConfig::default()
        });
        let api = HostApi::standard();
        let err = mgr.load(compile(SCRIPT), &api).unwrap_err();
        assert_eq!(err, LoadError::PermissionDenied("llSay".into()));
        assert!(mgr.domains().iter().all(|d| d.loaded() == 0));
    }
}
