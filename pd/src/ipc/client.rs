//! IPC client for communicating with the daemon
//!
//! Used by `pd` subcommands and host bridges to reach the running
//! coordinator via Unix Domain Socket.

use std::path::PathBuf;
use std::time::Duration;

use eyre::{Context, Result};
use pinstore::{ResourceId, Versioned};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::OwnedReadHalf;
use tracing::debug;

use super::messages::{DaemonMessage, DaemonResponse};
use super::{MAX_MESSAGE_SIZE, get_socket_path};
use crate::host::LiveResource;
use crate::reconciler::SweepReport;
use crate::router::{Command, CommandError};

/// Default timeout for IPC operations
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for communicating with the daemon via IPC
#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl Default for DaemonClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonClient {
    /// Create a new client with the default socket path
    pub fn new() -> Self {
        Self::with_socket_path(get_socket_path())
    }

    /// Create a client with a custom socket path
    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set a custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check if the daemon socket exists
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Run a registry command.
    ///
    /// The outer error is transport trouble; the inner one is the signal the
    /// router answered with.
    pub async fn execute(&self, command: Command) -> Result<std::result::Result<Versioned, CommandError>> {
        debug!(command = command.name(), "DaemonClient: executing command");
        match self.send_message(DaemonMessage::Command { command }).await? {
            DaemonResponse::Registry { snapshot } => Ok(Ok(snapshot)),
            DaemonResponse::Rejected { error } => Ok(Err(error)),
            other => Err(unexpected(other)),
        }
    }

    pub async fn resource_opened(&self, resource: LiveResource) -> Result<()> {
        self.expect_ok(DaemonMessage::ResourceOpened { resource }).await
    }

    pub async fn resource_closed(&self, resource_id: ResourceId) -> Result<()> {
        self.expect_ok(DaemonMessage::ResourceClosed { resource_id }).await
    }

    pub async fn resource_changed(&self, resource_id: ResourceId, locator: String, title: String) -> Result<()> {
        self.expect_ok(DaemonMessage::ResourceChanged {
            resource_id,
            locator,
            title,
        })
        .await
    }

    pub async fn resources_synced(&self, resources: Vec<LiveResource>) -> Result<()> {
        self.expect_ok(DaemonMessage::ResourcesSynced { resources }).await
    }

    /// Ask for an orphan sweep and wait for its report
    pub async fn sweep(&self) -> Result<SweepReport> {
        debug!("DaemonClient: requesting sweep");
        match self.send_message(DaemonMessage::Sweep).await? {
            DaemonResponse::Swept { report } => Ok(report),
            other => Err(unexpected(other)),
        }
    }

    /// Open a snapshot stream
    pub async fn subscribe(&self) -> Result<Subscription> {
        debug!("DaemonClient: subscribing");
        let mut stream = self.connect().await?;
        self.write_message(&mut stream, &DaemonMessage::Subscribe).await?;
        let (read, _write) = stream.into_split();
        Ok(Subscription {
            reader: BufReader::new(read),
        })
    }

    /// Check if daemon is alive and get its version
    pub async fn ping(&self) -> Result<String> {
        debug!("DaemonClient: pinging daemon");
        match self.send_message(DaemonMessage::Ping).await? {
            DaemonResponse::Pong { version } => Ok(version),
            other => Err(unexpected(other)),
        }
    }

    /// Request daemon to shutdown gracefully
    pub async fn shutdown(&self) -> Result<()> {
        debug!("DaemonClient: requesting daemon shutdown");
        self.expect_ok(DaemonMessage::Shutdown).await
    }

    async fn expect_ok(&self, msg: DaemonMessage) -> Result<()> {
        match self.send_message(msg).await? {
            DaemonResponse::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn connect(&self) -> Result<UnixStream> {
        tokio::time::timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .context("Connection timeout")?
            .context("Failed to connect to daemon socket")
    }

    /// Send a message to the daemon and wait for response
    async fn send_message(&self, msg: DaemonMessage) -> Result<DaemonResponse> {
        debug!(?self.socket_path, ?msg, "DaemonClient: sending message");
        let mut stream = self.connect().await?;
        self.write_message(&mut stream, &msg).await?;

        let mut reader = BufReader::new(&mut stream).take(MAX_MESSAGE_SIZE as u64 + 1);
        let mut response_line = String::new();
        tokio::time::timeout(self.timeout, async {
            let bytes_read = reader
                .read_line(&mut response_line)
                .await
                .context("Failed to read response")?;

            if bytes_read > MAX_MESSAGE_SIZE {
                return Err(eyre::eyre!("Response too large: {} bytes", bytes_read));
            }

            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Read timeout")??;

        let response: DaemonResponse =
            serde_json::from_str(response_line.trim()).context("Failed to parse daemon response")?;

        debug!(?response, "DaemonClient: received response");
        Ok(response)
    }

    async fn write_message(&self, stream: &mut UnixStream, msg: &DaemonMessage) -> Result<()> {
        let msg_json = serde_json::to_string(msg).context("Failed to serialize message")?;

        if msg_json.len() > MAX_MESSAGE_SIZE {
            return Err(eyre::eyre!("Message too large: {} bytes", msg_json.len()));
        }

        tokio::time::timeout(self.timeout, async {
            stream
                .write_all(msg_json.as_bytes())
                .await
                .context("Failed to write message")?;
            stream.write_all(b"\n").await.context("Failed to write newline")?;
            stream.flush().await.context("Failed to flush stream")?;
            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Write timeout")?
    }
}

fn unexpected(response: DaemonResponse) -> eyre::Report {
    match response {
        DaemonResponse::Error { message } => eyre::eyre!("Daemon error: {}", message),
        other => eyre::eyre!("Unexpected response: {:?}", other),
    }
}

/// Open `Subscribe` connection
pub struct Subscription {
    reader: BufReader<OwnedReadHalf>,
}

impl Subscription {
    /// Next streamed line, or `None` once the daemon closes the stream
    pub async fn next(&mut self) -> Result<Option<DaemonResponse>> {
        let mut line = String::new();
        let bytes_read = (&mut self.reader)
            .take(MAX_MESSAGE_SIZE as u64 + 1)
            .read_line(&mut line)
            .await
            .context("Failed to read from subscription")?;
        if bytes_read == 0 {
            return Ok(None);
        }
        if bytes_read > MAX_MESSAGE_SIZE {
            return Err(eyre::eyre!("Response too large: {} bytes", bytes_read));
        }
        let response = serde_json::from_str(line.trim()).context("Failed to parse streamed response")?;
        Ok(Some(response))
    }
}
