use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Auxiliary work polled once per command pass
pub trait CommandPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Do whatever is due at `now`; true while the plugin still has work pending
    fn poll(&self, now: Instant) -> bool;
}

#[derive(Default)]
struct Signal {
    kicked: bool,
}

/// Single thread that polls plugins every interval while any has work,
/// then parks until kicked
pub struct CommandPass {
    interval: Duration,
    plugins: Mutex<Vec<Arc<dyn CommandPlugin>>>,
    signal: Mutex<Signal>,
    wake: Condvar,
    stopped: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CommandPass {
    pub fn new(interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            interval: interval.max(Duration::from_millis(1)),
            plugins: Mutex::new(Vec::new()),
            signal: Mutex::new(Signal::default()),
            wake: Condvar::new(),
            stopped: AtomicBool::new(false),
            thread: Mutex::new(None),
        })
    }

    pub fn add_plugin(&self, plugin: Arc<dyn CommandPlugin>) {
        debug!(target: "scheduler", "Command pass plugin: {}", plugin.name());
        self.plugins
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(plugin);
        self.kick();
    }

    fn signal(&self) -> MutexGuard<'_, Signal> {
        self.signal.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn start(self: &Arc<Self>) {
        let mut slot = self.thread.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return;
        }
        let pass = Arc::clone(self);
        match std::thread::Builder::new()
            .name("tessel-command-pass".into())
            .spawn(move || pass.run())
        {
            Ok(handle) => *slot = Some(handle),
            Err(e) => warn!(target: "scheduler", "Failed to start command pass: {}", e),
        }
    }

    /// Schedule a pass even if the last one found no work
    pub fn kick(&self) {
        self.signal().kicked = true;
        self.wake.notify_one();
    }

    /// Poll every plugin once; true if any still has work
    pub fn run_pass(&self, now: Instant) -> bool {
        let plugins: Vec<Arc<dyn CommandPlugin>> = self
            .plugins
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        plugins
            .iter()
            .fold(false, |busy, plugin| plugin.poll(now) || busy)
    }

    fn run(&self) {
        while !self.stopped.load(Ordering::Acquire) {
            let busy = self.run_pass(Instant::now());
            let mut signal = self.signal();
            if busy {
                if !signal.kicked {
                    signal = self
                        .wake
                        .wait_timeout(signal, self.interval)
                        .unwrap_or_else(|e| e.into_inner())
                        .0;
                }
            } else {
                while !signal.kicked && !self.stopped.load(Ordering::Acquire) {
                    signal = self.wake.wait(signal).unwrap_or_else(|e| e.into_inner());
                }
            }
            signal.kicked = false;
        }
        debug!(target: "scheduler", "Command pass stopped");
    }

    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::Release);
        {
            let _signal = self.signal();
            self.wake.notify_all();
        }
        let handle = self.thread.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(target: "scheduler", "Command pass thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Countdown {
        remaining: AtomicUsize,
        polls: AtomicUsize,
    }

    impl CommandPlugin for Countdown {
        fn name(&self) -> &str {
            "countdown"
        }

        fn poll(&self, _now: Instant) -> bool {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let left = self.remaining.load(Ordering::SeqCst);
            if left > 0 {
                self.remaining.store(left - 1, Ordering::SeqCst);
            }
            left > 1
        }
    }

    #[test]
    fn test_pass_stops_requeueing_once_idle() {
        let pass = CommandPass::new(Duration::from_millis(5));
        let plugin = Arc::new(Countdown {
            remaining: AtomicUsize::new(3),
            polls: AtomicUsize::new(0),
        });
        pass.add_plugin(Arc::clone(&plugin) as Arc<dyn CommandPlugin>);
        pass.start();

        std::thread::sleep(Duration::from_millis(100));
        let settled = plugin.polls.load(Ordering::SeqCst);
        assert_eq!(settled, 3);

        plugin.remaining.store(1, Ordering::SeqCst);
        pass.kick();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(plugin.polls.load(Ordering::SeqCst), settled + 1);

        pass.shutdown();
    }
}
