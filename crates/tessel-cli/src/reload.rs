use tokio::sync::watch;
use tracing::info;

/// Restart-all request raised by SIGUSR2
#[derive(Debug, Clone, Copy)]
pub struct ReloadSignal;

/// Spawn a SIGUSR2 handler and return a receiver that sees each request
#[cfg(unix)]
pub fn setup_reload_signal() -> watch::Receiver<Option<ReloadSignal>> {
    let (reload_tx, reload_rx) = watch::channel(None);

    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigusr2 = match signal(SignalKind::user_defined2()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(target: "scripting", "Failed to register SIGUSR2 handler: {}", e);
                return;
            }
        };

        while sigusr2.recv().await.is_some() {
            if reload_tx.is_closed() {
                break;
            }
            info!(target: "scripting", "Received SIGUSR2 - restarting all scripts");
            if reload_tx.send(Some(ReloadSignal)).is_err() {
                break;
            }
        }
    });

    reload_rx
}

/// Non-Unix platforms have no SIGUSR2; the receiver never fires
#[cfg(not(unix))]
pub fn setup_reload_signal() -> watch::Receiver<Option<ReloadSignal>> {
    let (reload_tx, reload_rx) = watch::channel(None);
    tracing::warn!(target: "scripting", "SIGUSR2 reload not supported on this platform");
    std::mem::forget(reload_tx);
    reload_rx
}
