//! Configuration loading and management
//!
//! Two layers: the daemon `Config` (paths, device) resolved from the
//! environment at startup, and the `ListenerConfig` (phrases, timeout, apps)
//! read from a JSON file and hot-swappable at runtime through `ConfigStore`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

pub const DEFAULT_WAKE_PHRASE: &str = "wake up";
pub const DEFAULT_TRIGGER_PHRASE: &str = "open";
pub const DEFAULT_ACTIVATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// JSON file holding the listener configuration
    pub config_file: PathBuf,

    /// Directory of the speech model
    pub model_dir: PathBuf,

    /// Input device name; `None` selects the system default
    pub input_device: Option<String>,

    /// Desktop entry that starts the daemon at login
    pub autostart_file: PathBuf,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let data_dir = match env_path("SPOKEN_SHORTCUTS_DATA_DIR") {
            Some(dir) => dir,
            None => home_dir()?
                .join(".local")
                .join("share")
                .join("spoken-shortcuts"),
        };

        let socket_path =
            env_path("SPOKEN_SHORTCUTS_SOCKET").unwrap_or_else(|| data_dir.join("daemon.sock"));
        let config_file =
            env_path("SPOKEN_SHORTCUTS_CONFIG").unwrap_or_else(|| data_dir.join("config.json"));
        let model_dir =
            env_path("SPOKEN_SHORTCUTS_MODEL").unwrap_or_else(|| data_dir.join("model"));
        let input_device = std::env::var("SPOKEN_SHORTCUTS_INPUT_DEVICE")
            .ok()
            .filter(|name| !name.trim().is_empty());
        let autostart_file = match env_path("SPOKEN_SHORTCUTS_AUTOSTART") {
            Some(file) => file,
            None => {
                let config_home = match env_path("XDG_CONFIG_HOME") {
                    Some(dir) => dir,
                    None => home_dir()?.join(".config"),
                };
                config_home.join("autostart").join("spoken-shortcuts.desktop")
            }
        };

        Ok(Self {
            socket_path,
            data_dir,
            config_file,
            model_dir,
            input_device,
            autostart_file,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

fn home_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home))
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// Phrases, timeout and launch list used by the listener
///
/// Phrases are stored trimmed and lower-cased.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Phrase that opens the activation window
    pub wake_phrase: String,

    /// Phrase that fires the activation while the window is open
    pub trigger_phrase: String,

    /// How long the window stays open after the wake phrase
    #[serde(rename = "activation_timeout_secs", with = "duration_secs")]
    pub activation_timeout: Duration,

    /// Applications launched on activation
    pub apps: Vec<String>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            wake_phrase: DEFAULT_WAKE_PHRASE.to_string(),
            trigger_phrase: DEFAULT_TRIGGER_PHRASE.to_string(),
            activation_timeout: DEFAULT_ACTIVATION_TIMEOUT,
            apps: Vec::new(),
        }
    }
}

impl ListenerConfig {
    /// Read the config file, falling back to defaults for anything unusable
    pub fn load_or_default(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let config = Self::parse(&text);
                info!(?path, "listener configuration loaded");
                config
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(?path, "listener configuration not found, using defaults");
                Self::default()
            }
            Err(e) => {
                warn!(?path, error = %e, "failed to read listener configuration, using defaults");
                Self::default()
            }
        }
    }

    /// Parse JSON text; malformed input yields the defaults
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Self::from_value(&value),
            Err(e) => {
                warn!(error = %e, "listener configuration is not valid JSON, using defaults");
                Self::default()
            }
        }
    }

    /// Build from a JSON value field by field
    ///
    /// A missing or invalid field takes its default without affecting the
    /// others.
    pub fn from_value(value: &Value) -> Self {
        let Some(fields) = value.as_object() else {
            warn!("listener configuration is not a JSON object, using defaults");
            return Self::default();
        };

        let defaults = Self::default();

        let activation_timeout = match fields.get("activation_timeout_secs") {
            None => defaults.activation_timeout,
            Some(raw) => match raw.as_f64().and_then(secs_to_duration) {
                Some(timeout) => timeout,
                None => {
                    warn!(value = %raw, "invalid activation_timeout_secs, using default");
                    defaults.activation_timeout
                }
            },
        };

        let apps = match fields.get("apps") {
            None => defaults.apps,
            Some(raw) => match serde_json::from_value::<Vec<String>>(raw.clone()) {
                Ok(apps) => apps,
                Err(e) => {
                    warn!(error = %e, "invalid apps list, launching nothing");
                    Vec::new()
                }
            },
        };

        Self {
            wake_phrase: phrase_field(fields, "wake_phrase", DEFAULT_WAKE_PHRASE),
            trigger_phrase: phrase_field(fields, "trigger_phrase", DEFAULT_TRIGGER_PHRASE),
            activation_timeout,
            apps,
        }
    }

    /// Apply the phrase rules to a config that came in through serde
    pub fn normalized(mut self) -> Self {
        self.wake_phrase = normalize_phrase(&self.wake_phrase)
            .unwrap_or_else(|| DEFAULT_WAKE_PHRASE.to_string());
        self.trigger_phrase = normalize_phrase(&self.trigger_phrase)
            .unwrap_or_else(|| DEFAULT_TRIGGER_PHRASE.to_string());
        self
    }

    /// Whether the recognizer vocabulary differs from `other`
    pub fn phrases_differ(&self, other: &Self) -> bool {
        self.wake_phrase != other.wake_phrase || self.trigger_phrase != other.trigger_phrase
    }
}

fn phrase_field(fields: &Map<String, Value>, key: &str, default: &str) -> String {
    match fields.get(key) {
        None => default.to_string(),
        Some(raw) => match raw.as_str().and_then(normalize_phrase) {
            Some(phrase) => phrase,
            None => {
                warn!(field = key, value = %raw, "invalid phrase, using default");
                default.to_string()
            }
        },
    }
}

fn normalize_phrase(phrase: &str) -> Option<String> {
    let phrase = phrase.split_whitespace().collect::<Vec<_>>().join(" ");
    if phrase.is_empty() {
        None
    } else {
        Some(phrase.to_lowercase())
    }
}

fn secs_to_duration(secs: f64) -> Option<Duration> {
    (secs.is_finite() && secs > 0.0).then(|| Duration::from_secs_f64(secs))
}

/// Serde adapter storing a `Duration` as fractional seconds
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        super::secs_to_duration(secs).ok_or_else(|| {
            serde::de::Error::custom(format!("activation timeout must be positive, got {secs}"))
        })
    }
}

/// Atomically replaceable listener configuration
///
/// Readers get an immutable snapshot; a reload swaps the whole value.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    current: Arc<RwLock<Arc<ListenerConfig>>>,
}

impl ConfigStore {
    pub fn new(config: ListenerConfig) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// The configuration in effect right now
    pub fn snapshot(&self) -> Arc<ListenerConfig> {
        Arc::clone(&self.current.read())
    }

    /// Swap in a new configuration, returning the previous one
    pub fn replace(&self, config: ListenerConfig) -> Arc<ListenerConfig> {
        std::mem::replace(&mut *self.current.write(), Arc::new(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_load() {
        let config = Config::load().unwrap();
        assert!(config.config_file.file_name().is_some());
        assert!(config.socket_path.parent().is_some());
        assert!(config.autostart_file.file_name().is_some());
    }

    #[test]
    fn test_defaults() {
        let config = ListenerConfig::default();
        assert_eq!(config.wake_phrase, "wake up");
        assert_eq!(config.trigger_phrase, "open");
        assert_eq!(config.activation_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_parse_full_config() {
        let config = ListenerConfig::parse(
            r#"{"wake_phrase": "  Hey   Computer ", "trigger_phrase": "LAUNCH",
                "activation_timeout_secs": 2.5, "apps": ["firefox", "/usr/bin/code"]}"#,
        );
        assert_eq!(config.wake_phrase, "hey computer");
        assert_eq!(config.trigger_phrase, "launch");
        assert_eq!(config.activation_timeout, Duration::from_millis(2500));
        assert_eq!(config.apps, vec!["firefox", "/usr/bin/code"]);
    }

    #[test]
    fn test_malformed_json_uses_defaults() {
        assert_eq!(ListenerConfig::parse("{not json"), ListenerConfig::default());
        assert_eq!(ListenerConfig::parse("[1, 2]"), ListenerConfig::default());
    }

    #[test]
    fn test_bad_fields_fall_back_individually() {
        let config = ListenerConfig::parse(
            r#"{"wake_phrase": 42, "trigger_phrase": "go", "activation_timeout_secs": -1,
                "apps": "calc"}"#,
        );
        assert_eq!(config.wake_phrase, DEFAULT_WAKE_PHRASE);
        assert_eq!(config.trigger_phrase, "go");
        assert_eq!(config.activation_timeout, DEFAULT_ACTIVATION_TIMEOUT);
        assert!(config.apps.is_empty());
    }

    #[test]
    fn test_empty_phrase_uses_default() {
        let config = ListenerConfig::parse(r#"{"wake_phrase": "   "}"#);
        assert_eq!(config.wake_phrase, DEFAULT_WAKE_PHRASE);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ListenerConfig::load_or_default(&dir.path().join("absent.json"));
        assert_eq!(config, ListenerConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"trigger_phrase": "start"}"#).unwrap();

        let config = ListenerConfig::load_or_default(&path);
        assert_eq!(config.wake_phrase, DEFAULT_WAKE_PHRASE);
        assert_eq!(config.trigger_phrase, "start");
    }

    #[test]
    fn test_serde_round_trip_uses_seconds() {
        let json = serde_json::to_string(&ListenerConfig::default()).unwrap();
        assert!(json.contains("\"activation_timeout_secs\":5.0"));

        let config: ListenerConfig =
            serde_json::from_str(r#"{"wake_phrase": "Hello There"}"#).unwrap();
        assert_eq!(config.normalized().wake_phrase, "hello there");
    }

    #[test]
    fn test_store_swaps_whole_snapshot() {
        let store = ConfigStore::new(ListenerConfig::default());
        let before = store.snapshot();

        let previous = store.replace(ListenerConfig {
            wake_phrase: "computer".into(),
            ..ListenerConfig::default()
        });

        assert!(Arc::ptr_eq(&before, &previous));
        assert_eq!(before.wake_phrase, DEFAULT_WAKE_PHRASE);
        assert_eq!(store.snapshot().wake_phrase, "computer");
        assert!(store.snapshot().phrases_differ(&before));
    }
}
