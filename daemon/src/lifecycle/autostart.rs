//! Login autostart through an XDG desktop entry
//!
//! Enabling writes `~/.config/autostart/spoken-shortcuts.desktop` pointing at
//! the running executable; disabling removes it. Removing an entry that is
//! not there is not an error.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

/// Characters that force an `Exec` argument into double quotes
const RESERVED: &[char] = &[
    ' ', '\t', '\n', '"', '\'', '\\', '>', '<', '~', '|', '&', ';', '$', '*', '?', '#', '(',
    ')', '`',
];

/// Owns the autostart entry for one executable
#[derive(Debug, Clone)]
pub struct Autostart {
    entry_path: PathBuf,
    exec: PathBuf,
}

impl Autostart {
    pub fn new(entry_path: PathBuf, exec: PathBuf) -> Self {
        Self { entry_path, exec }
    }

    /// Entry that starts the currently running binary
    pub fn for_current_exe(entry_path: PathBuf) -> Result<Self> {
        let exec = std::env::current_exe().context("failed to locate daemon executable")?;
        Ok(Self::new(entry_path, exec))
    }

    pub fn entry_path(&self) -> &Path {
        &self.entry_path
    }

    pub fn is_enabled(&self) -> bool {
        self.entry_path.is_file()
    }

    /// Write (or overwrite) the desktop entry
    pub fn enable(&self) -> Result<()> {
        if let Some(parent) = self.entry_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create autostart directory")?;
        }
        std::fs::write(&self.entry_path, self.desktop_entry())
            .with_context(|| format!("failed to write {}", self.entry_path.display()))?;

        info!(entry = ?self.entry_path, exec = ?self.exec, "added to startup");
        Ok(())
    }

    /// Remove the desktop entry
    pub fn disable(&self) -> Result<()> {
        match std::fs::remove_file(&self.entry_path) {
            Ok(()) => {
                info!(entry = ?self.entry_path, "removed from startup");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(entry = ?self.entry_path, "not in startup");
                Ok(())
            }
            Err(e) => Err(e)
                .with_context(|| format!("failed to remove {}", self.entry_path.display())),
        }
    }

    fn desktop_entry(&self) -> String {
        format!(
            "[Desktop Entry]\n\
             Type=Application\n\
             Name=Spoken Shortcuts\n\
             Comment=Launch apps with a spoken wake phrase\n\
             Exec={}\n\
             Terminal=false\n\
             X-GNOME-Autostart-enabled=true\n",
            exec_value(&self.exec)
        )
    }
}

/// Render a path as a desktop entry `Exec` value
///
/// Quoted arguments escape `"`, `` ` ``, `$` and `\`; the string value then
/// escapes every backslash again, and `%` is doubled so it is not read as a
/// field code.
fn exec_value(path: &Path) -> String {
    let raw = path.to_string_lossy();

    let arg = if raw.contains(RESERVED) {
        let mut quoted = String::with_capacity(raw.len() + 2);
        quoted.push('"');
        for c in raw.chars() {
            if matches!(c, '"' | '`' | '$' | '\\') {
                quoted.push('\\');
            }
            quoted.push(c);
        }
        quoted.push('"');
        quoted
    } else {
        raw.into_owned()
    };

    arg.replace('\\', "\\\\").replace('%', "%%")
}
