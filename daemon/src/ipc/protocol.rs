//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::config::ListenerConfig;
use crate::events::ListenerEvent;
use crate::state::State;

/// Requests from UI to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current listener status
    GetStatus,

    /// Close the microphone until resumed
    Pause,

    /// Reopen the microphone
    Resume,

    /// Shut the daemon down
    Stop,

    /// Swap the listener configuration; `None` re-reads the config file
    ReloadConfig {
        #[serde(default)]
        config: Option<ListenerConfig>,
    },

    /// Start the daemon at login
    AddToStartup,

    /// Stop starting the daemon at login
    RemoveFromStartup,

    /// Ping to check connectivity
    Ping,

    /// Subscribe to status and event notifications
    Subscribe,
}

/// Responses from daemon to UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current listener status
    Status(ListenerStatus),

    /// Result of a pause or resume request
    PausedChanged { paused: bool, changed: bool },

    /// The daemon is shutting down
    Stopping,

    /// The configuration now in effect
    ConfigReloaded { config: ListenerConfig },

    /// Login autostart state after an add/remove request
    StartupChanged { enabled: bool },

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

/// Push notification from daemon to UI (for subscribed clients)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Pause flag changed
    StatusChanged { paused: bool },

    /// Listener event occurred
    Event { event: ListenerEvent },
}

impl From<ListenerEvent> for Notification {
    fn from(event: ListenerEvent) -> Self {
        match event {
            ListenerEvent::StatusChanged { paused } => Notification::StatusChanged { paused },
            event => Notification::Event { event },
        }
    }
}

/// Full listener status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerStatus {
    /// Daemon version
    pub version: String,

    /// Whether the microphone is released
    pub paused: bool,

    /// Whether the capture device is currently open
    pub capturing: bool,

    /// Detector state
    pub state: State,

    pub wake_phrase: String,

    pub trigger_phrase: String,

    pub activations: u64,

    pub device_errors: u64,

    pub overruns: u64,

    /// Stale chunks dropped when capture reopened
    pub discarded: u64,

    /// Whether the daemon starts at login
    pub autostart: bool,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = Request::ReloadConfig { config: None };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("reload_config"));
    }

    #[test]
    fn test_reload_request_without_config() {
        let req: Request = serde_json::from_str(r#"{"type":"reload_config"}"#).unwrap();
        assert!(matches!(req, Request::ReloadConfig { config: None }));
    }

    #[test]
    fn test_reload_request_with_partial_config() {
        let req: Request = serde_json::from_str(
            r#"{"type":"reload_config","config":{"trigger_phrase":"launch"}}"#,
        )
        .unwrap();
        match req {
            Request::ReloadConfig { config: Some(config) } => {
                assert_eq!(config.trigger_phrase, "launch");
                assert_eq!(config.wake_phrase, "wake up");
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_notification_wraps_events() {
        let json = serde_json::to_string(&Notification::from(ListenerEvent::WakeDetected)).unwrap();
        assert_eq!(json, r#"{"type":"event","event":{"type":"wake_detected"}}"#);

        let json = serde_json::to_string(&Notification::from(ListenerEvent::StatusChanged {
            paused: true,
        }))
        .unwrap();
        assert_eq!(json, r#"{"type":"status_changed","paused":true}"#);
    }

    #[test]
    fn test_response_serialization() {
        let resp = Response::PausedChanged {
            paused: true,
            changed: false,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("paused_changed"));
    }
}
