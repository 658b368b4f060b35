//! Events module for listener diagnostics and transitions
//!
//! Every state transition and pipeline diagnostic is published as a
//! `ListenerEvent` on a broadcast channel for IPC subscribers.

use serde::{Deserialize, Serialize};

/// Events emitted by the listener pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ListenerEvent {
    /// The decoder finalized an utterance
    UtteranceHeard {
        text: String,
    },

    /// Wake phrase heard, activation window opened
    WakeDetected,

    /// Trigger phrase heard inside the window; the action fires
    Activated {
        /// Milliseconds between the wake phrase and the trigger phrase
        elapsed_ms: u64,
    },

    /// Activation window closed without a trigger phrase
    ActivationExpired {
        /// Milliseconds the window was open
        waited_ms: u64,
    },

    /// Pause flag changed
    StatusChanged {
        paused: bool,
    },

    /// Capture device opened
    CaptureStarted,

    /// Capture device released
    CaptureStopped,

    /// Capture device failed; the supervisor will retry
    DeviceError {
        message: String,
        /// Consecutive failures including this one
        attempt: u32,
    },

    /// Chunks dropped because the ingestion queue was full
    Overrun {
        dropped: u64,
        total: u64,
    },

    /// A new listener configuration took effect
    ConfigReloaded,
}

impl std::fmt::Display for ListenerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerEvent::UtteranceHeard { text } => write!(f, "UTTERANCE_HEARD ({:?})", text),
            ListenerEvent::WakeDetected => write!(f, "WAKE_DETECTED"),
            ListenerEvent::Activated { elapsed_ms } => {
                write!(f, "ACTIVATED ({}ms)", elapsed_ms)
            }
            ListenerEvent::ActivationExpired { waited_ms } => {
                write!(f, "ACTIVATION_EXPIRED ({}ms)", waited_ms)
            }
            ListenerEvent::StatusChanged { paused } => {
                write!(f, "STATUS_CHANGED (paused={})", paused)
            }
            ListenerEvent::CaptureStarted => write!(f, "CAPTURE_STARTED"),
            ListenerEvent::CaptureStopped => write!(f, "CAPTURE_STOPPED"),
            ListenerEvent::DeviceError { message, attempt } => {
                write!(f, "DEVICE_ERROR (attempt {}: {})", attempt, message)
            }
            ListenerEvent::Overrun { dropped, total } => {
                write!(f, "OVERRUN ({} dropped, {} total)", dropped, total)
            }
            ListenerEvent::ConfigReloaded => write!(f, "CONFIG_RELOADED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = ListenerEvent::Activated { elapsed_ms: 1500 };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("activated"));
        assert!(json.contains("1500"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"status_changed","paused":true}"#;
        let event: ListenerEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event, ListenerEvent::StatusChanged { paused: true });
    }

    #[test]
    fn test_event_display() {
        let event = ListenerEvent::DeviceError {
            message: "no input device available".into(),
            attempt: 3,
        };
        assert_eq!(
            event.to_string(),
            "DEVICE_ERROR (attempt 3: no input device available)"
        );
    }
}
