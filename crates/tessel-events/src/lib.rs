/// Identifiers and notifications for the tessel scripting engine
///
/// This crate holds the types the engine exposes to the world it is embedded
/// in, so hosts can consume notifications without depending on the engine.
pub mod bus;
pub mod ids;
pub mod notifications;

pub use bus::{
    spawn_consumer, LoggingConsumer, NotificationBus, NotificationConsumer, NotificationSender,
};
pub use ids::{AgentId, ItemId, ObjectId};
pub use notifications::{EngineNotification, NotificationEnvelope, ScriptErrorKind};
