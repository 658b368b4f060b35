//! IPC module for daemon-UI communication

mod protocol;
mod server;

pub use protocol::{ListenerStatus, Notification, Request, Response};
pub use server::Server;
