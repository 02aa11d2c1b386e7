use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::notifications::{EngineNotification, NotificationEnvelope};

/// Publishing half handed to engine components
#[derive(Debug, Clone)]
pub struct NotificationSender {
    sender: broadcast::Sender<NotificationEnvelope>,
    sequence: Arc<AtomicU64>,
}

impl NotificationSender {
    pub fn publish(&self, notification: EngineNotification) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        // No subscribers is not an error
        let _ = self
            .sender
            .send(NotificationEnvelope::new(notification, sequence));
    }
}

/// Central bus distributing engine notifications to any number of subscribers
#[derive(Debug, Clone)]
pub struct NotificationBus {
    sender: broadcast::Sender<NotificationEnvelope>,
    sequence: Arc<AtomicU64>,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn create_sender(&self) -> NotificationSender {
        NotificationSender {
            sender: self.sender.clone(),
            sequence: Arc::clone(&self.sequence),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEnvelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Something that reacts to engine notifications
pub trait NotificationConsumer: Send + 'static {
    fn handle(&mut self, envelope: NotificationEnvelope);
}

/// Consumer that writes every notification to the log
pub struct LoggingConsumer;

impl NotificationConsumer for LoggingConsumer {
    fn handle(&mut self, envelope: NotificationEnvelope) {
        match &envelope.notification {
            EngineNotification::ScriptError {
                item,
                line,
                column,
                message,
                ..
            } => {
                warn!(target: "scripting", "Script {} error at ({}, {}): {}", item, line, column, message);
            }
            EngineNotification::OwnerMessage { item, text, .. } => {
                info!(target: "scripting", "[{}] {}", item, text);
            }
            other => {
                debug!(target: "scripting", "Notification #{}: {:?}", envelope.sequence, other);
            }
        }
    }
}

/// Drive a consumer from its own subscription until the bus closes
pub fn spawn_consumer(
    bus: &NotificationBus,
    mut consumer: Box<dyn NotificationConsumer>,
) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => consumer.handle(envelope),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    error!(target: "scripting", "Notification consumer lagged, {} notifications were skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!(target: "scripting", "Notification bus closed");
                    break;
                }
            }
        }
    })
}
