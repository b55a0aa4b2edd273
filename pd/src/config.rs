//! PinDaemon configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main PinDaemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Registry storage
    pub storage: StorageConfig,

    /// Command routing and optimistic retry
    pub router: RouterConfig,

    /// Lifecycle reconciliation
    pub reconciler: ReconcilerConfig,

    /// Change broadcasting
    pub sync: SyncConfig,

    /// IPC socket
    pub ipc: IpcConfig,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .pindaemon.yml
        let local_config = PathBuf::from(".pindaemon.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/pindaemon/pindaemon.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("pindaemon").join("pindaemon.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is initialized
    ///
    /// Errors are swallowed: the full load reports them once logging is up.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates = match config_path {
            Some(path) => vec![path.clone()],
            None => {
                let mut paths = vec![PathBuf::from(".pindaemon.yml")];
                if let Some(config_dir) = dirs::config_dir() {
                    paths.push(config_dir.join("pindaemon").join("pindaemon.yml"));
                }
                paths
            }
        };

        candidates
            .iter()
            .find(|p| p.exists())
            .and_then(|p| fs::read_to_string(p).ok())
            .and_then(|content| serde_yaml::from_str::<Config>(&content).ok())
            .and_then(|config| config.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the shared registry record
    #[serde(rename = "registry-path")]
    pub registry_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            registry_path: pinstore::config::default_store_path(),
        }
    }
}

/// Command router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Read/compare-and-swap attempts before giving up with a conflict
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Upper bound on any single store call in milliseconds
    #[serde(rename = "store-timeout-ms")]
    pub store_timeout_ms: u64,

    /// Refuse to pin a second resource with an already pinned locator
    #[serde(rename = "reject-duplicate-locators")]
    pub reject_duplicate_locators: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            store_timeout_ms: 2_000,
            reject_duplicate_locators: false,
        }
    }
}

impl RouterConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// Lifecycle reconciler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Delay before the first periodic sweep
    #[serde(rename = "sweep-initial-delay-secs")]
    pub sweep_initial_delay_secs: u64,

    /// Interval between periodic sweeps
    #[serde(rename = "sweep-interval-secs")]
    pub sweep_interval_secs: u64,

    /// Capacity of the event queue
    #[serde(rename = "queue-capacity")]
    pub queue_capacity: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            sweep_initial_delay_secs: 60,
            sweep_interval_secs: 600,
            queue_capacity: 256,
        }
    }
}

impl ReconcilerConfig {
    pub fn sweep_initial_delay(&self) -> Duration {
        Duration::from_secs(self.sweep_initial_delay_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        // tokio intervals panic on a zero period
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Sync broadcaster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How often to re-read the store for commits made by other processes
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,

    /// Capacity of the snapshot channel
    #[serde(rename = "channel-capacity")]
    pub channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            channel_capacity: 64,
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// IPC configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Unix socket path
    #[serde(rename = "socket-path")]
    pub socket_path: PathBuf,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_path: crate::ipc::get_socket_path(),
        }
    }
}
