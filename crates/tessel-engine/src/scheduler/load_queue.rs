use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::instance::ScriptInstance;
use crate::lifecycle::StartParams;

/// A structural change applied before ordinary events resume
#[derive(Debug)]
pub enum LoadRequest {
    /// Initialise or restore a registered instance and queue its entry events
    Start {
        instance: Arc<ScriptInstance>,
        params: StartParams,
    },
    /// Tear an instance down and report its removal
    Stop { instance: Arc<ScriptInstance> },
    /// Replace an instance with a recompiled one under the same item
    Reupload {
        old: Arc<ScriptInstance>,
        new: Arc<ScriptInstance>,
        params: StartParams,
    },
}

impl LoadRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            LoadRequest::Start { .. } => "start",
            LoadRequest::Stop { .. } => "stop",
            LoadRequest::Reupload { .. } => "reupload",
        }
    }
}

pub trait LoadHandler: Send + 'static {
    fn apply(&mut self, request: LoadRequest);

    /// The queue drained for the first time
    fn startup_complete(&mut self) {}
}

/// FIFO of load requests drained by one dedicated thread
pub struct LoadQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<LoadRequest>>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<LoadRequest>>>,
    pending: Arc<AtomicUsize>,
    startup_signalled: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl LoadQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sender: Mutex::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
            pending: Arc::new(AtomicUsize::new(0)),
            startup_signalled: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        }
    }

    fn thread_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.thread.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start draining with `handler`; requests submitted earlier are kept
    pub fn start<H: LoadHandler>(&self, mut handler: H) {
        let Some(mut rx) = self.receiver.lock().unwrap_or_else(|e| e.into_inner()).take() else {
            warn!(target: "scheduler", "Load queue already started");
            return;
        };
        let pending = Arc::clone(&self.pending);
        let startup_signalled = Arc::clone(&self.startup_signalled);
        let spawned = std::thread::Builder::new()
            .name("tessel-load-queue".into())
            .spawn(move || {
                while let Some(first) = rx.blocking_recv() {
                    let mut batch = vec![first];
                    while let Ok(next) = rx.try_recv() {
                        batch.push(next);
                    }
                    trace!(target: "scheduler", "Applying {} load request(s)", batch.len());
                    for request in batch {
                        debug!(target: "scheduler", "Load request: {}", request.kind());
                        handler.apply(request);
                        pending.fetch_sub(1, Ordering::AcqRel);
                    }
                    if pending.load(Ordering::Acquire) == 0
                        && !startup_signalled.swap(true, Ordering::AcqRel)
                    {
                        handler.startup_complete();
                    }
                }
                debug!(target: "scheduler", "Load queue closed");
            });
        match spawned {
            Ok(handle) => *self.thread_slot() = Some(handle),
            Err(e) => warn!(target: "scheduler", "Failed to start load queue: {}", e),
        }
    }

    /// Queue a request; false once the queue has shut down
    pub fn submit(&self, request: LoadRequest) -> bool {
        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        let Some(sender) = sender.as_ref() else {
            return false;
        };
        self.pending.fetch_add(1, Ordering::AcqRel);
        if sender.send(request).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// Requests submitted but not yet applied
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn startup_signalled(&self) -> bool {
        self.startup_signalled.load(Ordering::Acquire)
    }

    /// Apply what is already queued, then stop the thread
    pub fn shutdown(&self) {
        self.sender.lock().unwrap_or_else(|e| e.into_inner()).take();
        let handle = self.thread_slot().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(target: "scheduler", "Load queue thread panicked");
            }
        }
    }
}

impl Default for LoadQueue {
    fn default() -> Self {
        Self::new()
    }
}
