//! Activation dispatch: launching the configured applications
//!
//! Each app entry is started without waiting for it. An existing path is
//! executed directly, a bare name is looked up on `PATH`, and anything else
//! is handed to the platform shell.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;

use tracing::{debug, info, warn};

use crate::config::ConfigStore;

/// Receiver of activation signals
pub trait ActionDispatcher {
    /// Called once per completed wake -> trigger sequence
    fn dispatch(&self);
}

impl<F: Fn()> ActionDispatcher for F {
    fn dispatch(&self) {
        self()
    }
}

/// How an app entry is started
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchTarget {
    /// Entry is an existing file
    Path(PathBuf),
    /// Entry resolved on `PATH`
    Resolved(PathBuf),
    /// Entry passed to the shell as a command line
    Shell(String),
}

#[derive(Debug, thiserror::Error)]
#[error("failed to launch '{app}': {source}")]
pub struct LaunchError {
    app: String,
    #[source]
    source: io::Error,
}

/// Outcome of one activation
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LaunchReport {
    pub launched: usize,
    pub failed: usize,
}

/// Launches every app in the current configuration
pub struct AppLauncher {
    config: ConfigStore,
}

impl AppLauncher {
    pub fn new(config: ConfigStore) -> Self {
        Self { config }
    }

    /// Start all configured apps; one failure does not stop the rest
    pub fn launch_all(&self) -> LaunchReport {
        let config = self.config.snapshot();
        info!(count = config.apps.len(), "launching apps");

        let mut report = LaunchReport::default();
        for app in config.apps.iter().map(|a| a.trim()).filter(|a| !a.is_empty()) {
            match launch(app) {
                Ok(target) => {
                    info!(app, ?target, "launched");
                    report.launched += 1;
                }
                Err(e) => {
                    warn!(error = %e, "launch failed");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

impl ActionDispatcher for AppLauncher {
    fn dispatch(&self) {
        let report = self.launch_all();
        debug!(?report, "activation dispatched");
    }
}

/// Decide how an app entry should be started
pub fn resolve(app: &str) -> LaunchTarget {
    let path = Path::new(app);
    if path.is_file() {
        return LaunchTarget::Path(path.to_path_buf());
    }

    match which::which(app) {
        Ok(resolved) => LaunchTarget::Resolved(resolved),
        Err(_) => LaunchTarget::Shell(app.to_string()),
    }
}

fn launch(app: &str) -> Result<LaunchTarget, LaunchError> {
    let target = resolve(app);

    let mut command = match &target {
        LaunchTarget::Path(path) | LaunchTarget::Resolved(path) => Command::new(path),
        LaunchTarget::Shell(line) => shell_command(line),
    };

    let child = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| LaunchError {
            app: app.to_string(),
            source,
        })?;

    reap(app, child);
    Ok(target)
}

#[cfg(windows)]
fn shell_command(line: &str) -> Command {
    let mut command = Command::new("cmd");
    command.args(["/C", line]);
    command
}

#[cfg(not(windows))]
fn shell_command(line: &str) -> Command {
    let mut command = Command::new("sh");
    command.args(["-c", line]);
    command
}

/// Wait for the child off-thread so it never lingers as a zombie
fn reap(app: &str, mut child: Child) {
    let name = app.to_string();
    let spawned = thread::Builder::new()
        .name("launch-reaper".to_string())
        .spawn(move || match child.wait() {
            Ok(status) => debug!(app = %name, %status, "launched app exited"),
            Err(e) => debug!(app = %name, error = %e, "failed to wait for launched app"),
        });

    if let Err(e) = spawned {
        debug!(app, error = %e, "failed to spawn reaper thread");
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::config::ListenerConfig;

    #[test]
    fn test_closure_is_a_dispatcher() {
        let calls = Cell::new(0);
        let dispatcher = || calls.set(calls.get() + 1);
        dispatcher.dispatch();
        dispatcher.dispatch();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_resolve_existing_path() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(
            resolve(file.path().to_str().unwrap()),
            LaunchTarget::Path(file.path().to_path_buf())
        );
    }

    #[test]
    fn test_resolve_unknown_falls_back_to_shell() {
        let app = "definitely-not-an-installed-binary-9f2c";
        assert_eq!(resolve(app), LaunchTarget::Shell(app.to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_on_path() {
        assert!(matches!(resolve("sh"), LaunchTarget::Resolved(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_launch_all_counts_results() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let store = ConfigStore::new(ListenerConfig {
            apps: vec![
                "true".into(),
                "  ".into(),
                // Exists but is not executable
                file.path().to_string_lossy().into_owned(),
            ],
            ..ListenerConfig::default()
        });

        let report = AppLauncher::new(store).launch_all();
        assert_eq!(report, LaunchReport { launched: 1, failed: 1 });
    }
}
