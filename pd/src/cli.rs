//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// PinDaemon - shared ten-slot pin registry coordinator
#[derive(Parser)]
#[command(
    name = "pd",
    about = "Coordinator for a shared ten-slot pin registry",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the coordinator in the foreground
    Serve,

    /// Pin a resource to the lowest free slot
    Add {
        /// Resource id issued by the host
        resource_id: String,

        /// Resource locator (URL)
        locator: String,

        /// Display title
        #[arg(short, long, default_value = "")]
        title: String,

        /// Icon reference
        #[arg(short, long)]
        icon: Option<String>,
    },

    /// Unpin a resource
    Remove {
        /// Resource id
        resource_id: String,
    },

    /// Activate the resource pinned at a slot
    Switch {
        /// Slot digit (1-9, 0 is the tenth slot)
        #[arg(value_parser = clap::value_parser!(u8).range(0..=9))]
        slot: u8,
    },

    /// Show the registry in slot order
    List {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Unpin everything
    Flush,

    /// Unpin entries whose resource is gone
    Sweep {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the registry every time it changes
    Watch,

    /// Host bridge: report an opened resource
    Opened {
        resource_id: String,
        locator: String,
        #[arg(short, long, default_value = "")]
        title: String,
        #[arg(short, long)]
        icon: Option<String>,
    },

    /// Host bridge: report a closed resource
    Closed { resource_id: String },

    /// Host bridge: report a navigation or rename
    Changed {
        resource_id: String,
        locator: String,
        #[arg(short, long, default_value = "")]
        title: String,
    },

    /// Host bridge: report every live resource (JSON array on stdin)
    Synced,

    /// Check if the coordinator is running
    Ping,

    /// Stop the coordinator
    Stop,

    /// Show coordinator logs
    Logs {
        /// Follow log output (like tail -f)
        #[arg(short, long)]
        follow: bool,

        /// Number of lines to show
        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,
    },
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pindaemon")
        .join("logs")
        .join("pindaemon.log")
}

/// Generate the after_help text with coordinator status
pub fn generate_after_help(socket_path: &std::path::Path) -> String {
    let running = socket_path.exists();
    let icon = if running { "\u{2705}" } else { "\u{274C}" };
    let status = if running { "running" } else { "stopped" };

    format!(
        "Coordinator:\n  {} {} ({})\n\nLogs are written to: {}\n",
        icon,
        status,
        socket_path.display(),
        get_log_path().display()
    )
}

/// Output format for list/sweep
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_no_command() {
        let cli = Cli::parse_from(["pd"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_parse_add() {
        let cli = Cli::parse_from(["pd", "add", "42", "https://example.com", "--title", "Example"]);
        if let Some(Command::Add {
            resource_id,
            locator,
            title,
            icon,
        }) = cli.command
        {
            assert_eq!(resource_id, "42");
            assert_eq!(locator, "https://example.com");
            assert_eq!(title, "Example");
            assert!(icon.is_none());
        } else {
            panic!("Expected Add command");
        }
    }

    #[test]
    fn test_cli_parse_switch_range() {
        let cli = Cli::parse_from(["pd", "switch", "0"]);
        assert!(matches!(cli.command, Some(Command::Switch { slot: 0 })));

        assert!(Cli::try_parse_from(["pd", "switch", "10"]).is_err());
    }

    #[test]
    fn test_cli_parse_list_json() {
        let cli = Cli::parse_from(["pd", "list", "--format", "json"]);
        assert!(matches!(
            cli.command,
            Some(Command::List {
                format: OutputFormat::Json
            })
        ));
    }

    #[test]
    fn test_output_format_from_str() {
        assert!(matches!("text".parse::<OutputFormat>(), Ok(OutputFormat::Text)));
        assert!(matches!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json)));
        assert!("table".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_cli_with_config() {
        let cli = Cli::parse_from(["pd", "-c", "/path/to/config.yml", "ping"]);
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/config.yml")));
    }

    #[test]
    fn test_after_help_mentions_log_path() {
        let help = generate_after_help(std::path::Path::new("/nonexistent/pd.sock"));
        assert!(help.contains("stopped"));
        assert!(help.contains("pindaemon.log"));
    }
}
