//! Events delivered to a worker by its host, and what the worker returns.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::request::Request;
use crate::worker::{ActivateOutcome, FetchOutcome, InstallOutcome};

/// Sync tag the worker acknowledges.
pub const BACKGROUND_SYNC_TAG: &str = "background-sync";

/// Icon and badge shown with push notifications.
pub const NOTIFICATION_ICON: &str = "data:image/svg+xml,<svg xmlns=\"http://www.w3.org/2000/svg\" viewBox=\"0 0 100 100\"><text y=\".9em\" font-size=\"90\">🐆</text></svg>";

/// Vibration pattern of push notifications, in milliseconds.
pub const VIBRATE_PATTERN: [u32; 3] = [200, 100, 200];

/// Everything a host can deliver to a worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
    Message(WorkerMessage),
    Sync { tag: String },
    Push { payload: Option<Bytes> },
    NotificationClick(Notification),
}

/// Result of dispatching a [`WorkerEvent`].
#[derive(Debug, Clone)]
pub enum EventOutcome {
    Installed(InstallOutcome),
    Activated(ActivateOutcome),
    Fetched(FetchOutcome),
    Message(MessageOutcome),
    /// Whether the sync tag was recognized.
    Synced(bool),
    /// Notification to show, if the push carried a payload.
    Push(Option<Notification>),
    /// URL of the window to open.
    OpenWindow(String),
}

/// Body of a control message, keyed by its `type` field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageData {
    /// Leave the waiting phase immediately.
    SkipWaiting,
    /// Record a security event reported by the page.
    LogSecurityEvent {
        #[serde(default)]
        payload: serde_json::Value,
    },
    #[serde(other)]
    Unknown,
}

/// A control message posted by a page.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerMessage {
    /// Origin of the sending page.
    pub origin: String,
    pub data: MessageData,
}

impl WorkerMessage {
    #[must_use]
    pub fn new(origin: impl Into<String>, data: MessageData) -> Self {
        Self {
            origin: origin.into(),
            data,
        }
    }

    /// Parses a JSON message body such as `{"type":"SKIP_WAITING"}`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if the body is not an object with a `type` field.
    pub fn parse(origin: impl Into<String>, json: &str) -> Result<Self> {
        Ok(Self::new(origin, serde_json::from_str(json)?))
    }
}

/// What a worker did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOutcome {
    /// The worker will leave the waiting phase.
    SkipWaiting,
    /// The payload was logged.
    Logged,
    /// Unrecognized type, or no worker to receive it.
    Ignored,
    /// The sender's origin is not the worker's origin.
    Rejected,
}

/// Payload of a push event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushPayload {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(rename = "primaryKey", default)]
    pub primary_key: Option<serde_json::Value>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Data attached to a notification and handed back on click.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationData {
    pub date_of_arrival: DateTime<Utc>,
    pub primary_key: Option<serde_json::Value>,
    pub url: Option<String>,
}

/// A notification the host should display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
}

impl Notification {
    /// Builds the notification for a push payload.
    #[must_use]
    pub fn from_push(payload: PushPayload) -> Self {
        Self {
            title: payload.title,
            body: payload.body,
            icon: NOTIFICATION_ICON.to_string(),
            badge: NOTIFICATION_ICON.to_string(),
            vibrate: VIBRATE_PATTERN.to_vec(),
            data: NotificationData {
                date_of_arrival: Utc::now(),
                primary_key: payload.primary_key,
                url: payload.url,
            },
        }
    }

    /// URL to open when the notification is clicked.
    #[must_use]
    pub fn target_url(&self) -> &str {
        self.data.url.as_deref().unwrap_or("/")
    }
}
