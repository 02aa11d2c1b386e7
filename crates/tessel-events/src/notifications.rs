use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::ids::{AgentId, ItemId, ObjectId};

/// What kind of runtime fault a `ScriptError` reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum ScriptErrorKind {
    Runtime,
    Compile,
    Load,
}

/// Notifications the engine publishes to the world it runs in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineNotification {
    /// A script finished starting and its entry event is queued
    ScriptStarted {
        object: ObjectId,
        item: ItemId,
        name: String,
    },
    /// A script was torn down; fired once per stop
    ScriptRemoved { object: ObjectId, item: ItemId },
    /// The last script on an object was torn down
    ObjectRemoved { object: ObjectId },
    /// The initial batch of load requests was applied
    StartupComplete { scripts: usize },
    /// A fault to surface to the script's owner
    ScriptError {
        object: ObjectId,
        item: ItemId,
        owner: AgentId,
        kind: ScriptErrorKind,
        line: u32,
        column: u32,
        message: String,
    },
    /// Text a script sent to its owner
    OwnerMessage {
        object: ObjectId,
        item: ItemId,
        owner: AgentId,
        text: String,
    },
}

impl EngineNotification {
    pub fn item(&self) -> Option<ItemId> {
        match self {
            EngineNotification::ScriptStarted { item, .. }
            | EngineNotification::ScriptRemoved { item, .. }
            | EngineNotification::ScriptError { item, .. }
            | EngineNotification::OwnerMessage { item, .. } => Some(*item),
            EngineNotification::ObjectRemoved { .. }
            | EngineNotification::StartupComplete { .. } => None,
        }
    }
}

/// A notification with its publication metadata
#[derive(Debug, Clone)]
pub struct NotificationEnvelope {
    pub notification: EngineNotification,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

impl NotificationEnvelope {
    pub fn new(notification: EngineNotification, sequence: u64) -> Self {
        Self {
            notification,
            sequence,
            timestamp: Utc::now(),
        }
    }
}
