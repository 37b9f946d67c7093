//! Activity and notification fan-out
//!
//! Two broadcast channels: `activity` carries the analytics stream (one event
//! per accepted command, resolved incident, or completed deployment), and
//! `notifications` carries user-facing toasts. Publishing never fails; with no
//! subscribers the event is simply dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::trace;

/// Activity kinds
pub mod activity {
    pub const TERMINAL_COMMAND: &str = "terminal_command";
    pub const CHAOS_RESOLVED: &str = "chaos_resolved";
    pub const DEPLOYMENT_COMPLETED: &str = "deployment_completed";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabActivity {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Map<String, Value>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
}

impl Notification {
    pub fn new(level: NotificationLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    activity: broadcast::Sender<LabActivity>,
    notifications: broadcast::Sender<Notification>,
}

impl EventBus {
    pub fn new(buffer: usize) -> Self {
        let buffer = buffer.max(1);
        let (activity, _) = broadcast::channel(buffer);
        let (notifications, _) = broadcast::channel(buffer);
        Self {
            activity,
            notifications,
        }
    }

    pub fn subscribe_activity(&self) -> broadcast::Receiver<LabActivity> {
        self.activity.subscribe()
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Publish an activity event. Non-object `data` is wrapped under `value`.
    pub fn publish(&self, kind: &str, data: Value) {
        let data = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        let event = LabActivity {
            kind: kind.to_string(),
            data,
            at: Utc::now(),
        };
        if self.activity.send(event).is_err() {
            trace!(kind, "No activity subscribers");
        }
    }

    pub fn notify(&self, notification: Notification) {
        if self.notifications.send(notification).is_err() {
            trace!("No notification subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
