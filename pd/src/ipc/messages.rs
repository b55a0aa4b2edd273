//! IPC message types for daemon communication
//!
//! Simple JSON-over-newline protocol. Each message is a single line of JSON followed by `\n`.
//! Every request gets exactly one response line, except `Subscribe`, which keeps the
//! connection open and streams `Registry` and `Activate` lines until the client hangs up.

use pinstore::{ResourceId, Versioned};
use serde::{Deserialize, Serialize};

use crate::host::LiveResource;
use crate::reconciler::SweepReport;
use crate::router::{Command, CommandError};

/// Messages from CLI / host bridge to daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum DaemonMessage {
    /// Run a registry command
    Command { command: Command },

    /// Host bridge: a resource appeared
    ResourceOpened { resource: LiveResource },

    /// Host bridge: a resource is gone
    ResourceClosed { resource_id: ResourceId },

    /// Host bridge: a resource navigated or was renamed
    ResourceChanged {
        resource_id: ResourceId,
        locator: String,
        title: String,
    },

    /// Host bridge: complete listing of live resources
    ResourcesSynced { resources: Vec<LiveResource> },

    /// Run an orphan sweep now
    Sweep,

    /// Stream registry snapshots and activation requests
    Subscribe,

    /// Ping to check if daemon is alive
    Ping,

    /// Request daemon to stop gracefully
    Shutdown,
}

/// Responses from daemon to CLI / host bridge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum DaemonResponse {
    /// Acknowledgment
    Ok,

    /// Registry after a command settled, or a streamed snapshot
    Registry { snapshot: Versioned },

    /// The command was refused with a signal
    Rejected { error: CommandError },

    /// Sweep finished
    Swept { report: SweepReport },

    /// Streamed request for the host to bring a resource forward
    Activate { resource_id: ResourceId },

    /// Pong response to ping
    Pong { version: String },

    /// Error response
    Error { message: String },
}

impl From<Result<Versioned, CommandError>> for DaemonResponse {
    fn from(result: Result<Versioned, CommandError>) -> Self {
        match result {
            Ok(snapshot) => DaemonResponse::Registry { snapshot },
            Err(error) => DaemonResponse::Rejected { error },
        }
    }
}
