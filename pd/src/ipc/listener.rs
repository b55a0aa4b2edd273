//! Coordinator side of the socket: binding, teardown and line framing

use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

use super::MAX_MESSAGE_SIZE;
use super::messages::{DaemonMessage, DaemonResponse};

/// Bind the coordinator socket at `socket_path`.
///
/// A leftover socket file from a crashed run is replaced. A socket that
/// still answers belongs to a running coordinator and is left alone.
pub fn create_listener_at(socket_path: &Path) -> Result<(UnixListener, PathBuf)> {
    debug!(?socket_path, "create_listener_at: called");

    if let Some(dir) = socket_path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("Cannot create {}", dir.display()))?;
    }

    if socket_path.exists() {
        if std::os::unix::net::UnixStream::connect(socket_path).is_ok() {
            return Err(eyre::eyre!(
                "Another coordinator is already listening on {}",
                socket_path.display()
            ));
        }
        debug!(?socket_path, "create_listener_at: replacing leftover socket file");
        std::fs::remove_file(socket_path)
            .with_context(|| format!("Cannot remove leftover socket {}", socket_path.display()))?;
    }

    let listener =
        UnixListener::bind(socket_path).with_context(|| format!("Cannot listen on {}", socket_path.display()))?;
    Ok((listener, socket_path.to_path_buf()))
}

/// Remove the socket file once the coordinator has stopped
pub fn cleanup_socket(socket_path: &Path) {
    match std::fs::remove_file(socket_path) {
        Ok(()) => debug!(?socket_path, "cleanup_socket: removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(?socket_path, error = %e, "Socket file left behind"),
    }
}

/// Read the request line that opens every connection.
///
/// At most `MAX_MESSAGE_SIZE` bytes are buffered; a longer line is refused.
pub async fn read_message(stream: &mut UnixStream) -> Result<DaemonMessage> {
    let mut reader = BufReader::new(stream).take(MAX_MESSAGE_SIZE as u64 + 1);
    let mut line = String::new();

    let n = reader.read_line(&mut line).await.context("Cannot read request")?;
    if n > MAX_MESSAGE_SIZE {
        return Err(eyre::eyre!("Request exceeds {} bytes", MAX_MESSAGE_SIZE));
    }
    if n == 0 {
        return Err(eyre::eyre!("Connection closed before a request arrived"));
    }

    let msg = serde_json::from_str::<DaemonMessage>(line.trim_end()).context("Malformed request")?;
    debug!(?msg, "read_message: parsed");
    Ok(msg)
}

/// Write one response as a single JSON line
pub async fn send_response(stream: &mut UnixStream, response: DaemonResponse) -> Result<()> {
    let mut line = serde_json::to_vec(&response).context("Cannot encode response")?;
    line.push(b'\n');
    stream.write_all(&line).await.context("Connection closed while answering")?;
    stream.flush().await.context("Connection closed while answering")?;
    debug!(?response, "send_response: sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_listener_creates_parent_dir() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("subdir").join("daemon.sock");

        let (_, path) = create_listener_at(&socket_path).unwrap();
        assert_eq!(path, socket_path);
        assert!(socket_path.exists());
    }

    #[tokio::test]
    async fn test_create_listener_replaces_leftover_file() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("daemon.sock");
        std::fs::write(&socket_path, "leftover").unwrap();

        assert!(create_listener_at(&socket_path).is_ok());
    }

    #[tokio::test]
    async fn test_create_listener_refuses_live_socket() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("daemon.sock");
        let (_running, _) = create_listener_at(&socket_path).unwrap();

        let err = create_listener_at(&socket_path).unwrap_err();
        assert!(err.to_string().contains("already listening"));
        assert!(socket_path.exists());
    }

    #[test]
    fn test_cleanup_socket_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("daemon.sock");
        std::fs::write(&socket_path, "x").unwrap();

        cleanup_socket(&socket_path);
        assert!(!socket_path.exists());
        cleanup_socket(&socket_path);
    }

    #[tokio::test]
    async fn test_end_to_end_ping_pong() {
        use super::super::client::DaemonClient;

        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("test.sock");
        let (listener, _) = create_listener_at(&socket_path).unwrap();

        let mock_daemon = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let msg = read_message(&mut stream).await.unwrap();
            assert!(matches!(msg, DaemonMessage::Ping));
            send_response(
                &mut stream,
                DaemonResponse::Pong {
                    version: "test-version".to_string(),
                },
            )
            .await
            .unwrap();
        });

        let client = DaemonClient::with_socket_path(socket_path);
        let version = client.ping().await.unwrap();
        assert_eq!(version, "test-version");

        mock_daemon.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_message_rejected() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("big.sock");
        let (listener, _) = create_listener_at(&socket_path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_message(&mut stream).await
        });

        let mut client = UnixStream::connect(&socket_path).await.unwrap();
        let payload = vec![b'x'; MAX_MESSAGE_SIZE + 10];
        // The server stops reading at the cap, so the write may fail midway
        let _ = client.write_all(&payload).await;

        let result = server.await.unwrap();
        assert!(result.is_err());
    }
}
