//! Inter-Process Communication with the daemon
//!
//! Unix Domain Socket IPC between `pd` subcommands, host bridges and the
//! running coordinator. Commands, host notifications and subscriptions all
//! travel over the same socket.

use std::path::PathBuf;

pub mod client;
pub mod listener;
pub mod messages;

pub use client::{DaemonClient, Subscription};
pub use listener::{cleanup_socket, create_listener_at, read_message, send_response};
pub use messages::{DaemonMessage, DaemonResponse};

/// Maximum size of one message line
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Get the socket path for daemon IPC
pub fn get_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("pindaemon")
        .join("daemon.sock")
}
