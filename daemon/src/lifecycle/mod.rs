//! Process lifecycle: signal-driven shutdown and config reload, login autostart

mod autostart;
mod signals;

pub use autostart::Autostart;
pub use signals::{LifecycleSignal, SignalListener};
