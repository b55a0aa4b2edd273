//! Coordinator server
//!
//! Owns the command router, the reconciler task, the broadcaster task and
//! the host resource table, and serves them over the IPC socket. Each
//! connection runs on its own task so long-lived `Subscribe` streams never
//! block commands.

use std::sync::Arc;

use eyre::Result;
use pinstore::RegistryStore;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::host::{ResourceEvent, ResourceTable};
use crate::ipc::{DaemonMessage, DaemonResponse, read_message, send_response};
use crate::reconciler::{Reconciler, ReconcilerHandle};
use crate::router::CommandRouter;
use crate::sync::Broadcaster;

/// Version reported by `Ping`
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// State shared by every connection
struct Shared {
    router: CommandRouter,
    table: Arc<ResourceTable>,
    reconciler: ReconcilerHandle,
    broadcaster: Arc<Broadcaster>,
    shutdown_tx: mpsc::Sender<()>,
}

/// Running coordinator
pub struct Server {
    shared: Arc<Shared>,
    reconciler_task: JoinHandle<()>,
    broadcaster_task: JoinHandle<()>,
    broadcaster_shutdown: mpsc::Sender<()>,
}

impl Server {
    /// Start the background tasks over `store`.
    ///
    /// `shutdown_tx` is signalled when a client sends `Shutdown`.
    pub fn start(config: &Config, store: Arc<dyn RegistryStore>, shutdown_tx: mpsc::Sender<()>) -> Self {
        debug!("Server::start: called");
        let table = Arc::new(ResourceTable::new());
        let router = CommandRouter::new(store.clone(), table.clone(), &config.router);

        let reconciler = Reconciler::new(store.clone(), table.clone(), router.policy(), config.reconciler.clone());
        let (reconciler, reconciler_task) = reconciler.spawn();

        let broadcaster = Arc::new(Broadcaster::new(store, &config.sync));
        let (broadcaster_shutdown, broadcaster_rx) = mpsc::channel(1);
        let broadcaster_task = tokio::spawn(broadcaster.clone().run(broadcaster_rx));

        info!("Coordinator started");
        Self {
            shared: Arc::new(Shared {
                router,
                table,
                reconciler,
                broadcaster,
                shutdown_tx,
            }),
            reconciler_task,
            broadcaster_task,
            broadcaster_shutdown,
        }
    }

    pub fn table(&self) -> Arc<ResourceTable> {
        self.shared.table.clone()
    }

    pub fn broadcaster(&self) -> Arc<Broadcaster> {
        self.shared.broadcaster.clone()
    }

    /// Accept connections until shutdown, then stop the background tasks
    pub async fn run(self, listener: UnixListener, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        info!("Accepting IPC connections");
        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            debug!("run: IPC connection accepted");
                            let shared = self.shared.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(shared, stream).await {
                                    debug!(error = %e, "run: IPC connection ended with error");
                                }
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "run: IPC accept error");
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.stop().await;
        Ok(())
    }

    async fn stop(self) {
        debug!("Server::stop: called");
        self.shared.reconciler.shutdown().await;
        let _ = self.broadcaster_shutdown.send(()).await;
        let _ = self.reconciler_task.await;
        let _ = self.broadcaster_task.await;
        info!("Coordinator stopped");
    }
}

async fn handle_connection(shared: Arc<Shared>, mut stream: UnixStream) -> Result<()> {
    let msg = read_message(&mut stream).await?;

    let response = match msg {
        DaemonMessage::Command { command } => {
            debug!(command = command.name(), "handle_connection: Command");
            let result = shared.router.execute(command).await;
            if let Err(e) = &result {
                info!(signal = e.signal(), "{}", e);
            }
            DaemonResponse::from(result)
        }
        DaemonMessage::ResourceOpened { resource } => {
            shared.table.open(resource);
            DaemonResponse::Ok
        }
        DaemonMessage::ResourceClosed { resource_id } => {
            shared.table.close(&resource_id);
            submit(&shared, ResourceEvent::Closed { resource_id }).await
        }
        DaemonMessage::ResourceChanged {
            resource_id,
            locator,
            title,
        } => {
            shared.table.change(&resource_id, &locator, &title);
            submit(
                &shared,
                ResourceEvent::Changed {
                    resource_id,
                    locator,
                    title,
                },
            )
            .await
        }
        DaemonMessage::ResourcesSynced { resources } => {
            info!(count = resources.len(), "Host reported live resources");
            shared.table.replace_all(resources);
            match shared.reconciler.request_sweep().await {
                Ok(()) => DaemonResponse::Ok,
                Err(e) => DaemonResponse::Error { message: e.to_string() },
            }
        }
        DaemonMessage::Sweep => match shared.reconciler.sweep().await {
            Ok(report) => DaemonResponse::Swept { report },
            Err(e) => DaemonResponse::Error { message: e.to_string() },
        },
        DaemonMessage::Subscribe => {
            debug!("handle_connection: Subscribe");
            return stream_updates(&shared, &mut stream).await;
        }
        DaemonMessage::Ping => DaemonResponse::Pong {
            version: VERSION.to_string(),
        },
        DaemonMessage::Shutdown => {
            debug!("handle_connection: Shutdown");
            let _ = shared.shutdown_tx.try_send(());
            DaemonResponse::Ok
        }
    };

    send_response(&mut stream, response).await
}

async fn submit(shared: &Shared, event: ResourceEvent) -> DaemonResponse {
    match shared.reconciler.submit(event).await {
        Ok(()) => DaemonResponse::Ok,
        Err(e) => DaemonResponse::Error { message: e.to_string() },
    }
}

/// Serve a `Subscribe` connection until the client goes away
async fn stream_updates(shared: &Shared, stream: &mut UnixStream) -> Result<()> {
    let mut snapshots = shared.broadcaster.subscribe();
    let mut activations = shared.table.subscribe_activations();

    let initial = match shared.broadcaster.latest() {
        Some(snapshot) => snapshot,
        None => match shared.router.query().await {
            Ok(snapshot) => snapshot,
            Err(error) => return send_response(stream, DaemonResponse::Rejected { error }).await,
        },
    };
    send_response(stream, DaemonResponse::Registry { snapshot: initial }).await?;

    loop {
        let response = tokio::select! {
            snapshot = snapshots.recv() => match snapshot {
                Ok(snapshot) => DaemonResponse::Registry { snapshot },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(n, "stream_updates: lagged, sending latest");
                    match shared.broadcaster.latest() {
                        Some(snapshot) => DaemonResponse::Registry { snapshot },
                        None => continue,
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
            resource_id = activations.recv() => match resource_id {
                Ok(resource_id) => DaemonResponse::Activate { resource_id },
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
        };
        send_response(stream, response).await?;
    }
}
