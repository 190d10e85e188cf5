use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "session-janitor")]
#[command(about = "Session storage manager with disk-pressure eviction", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to SessionJanitor.toml if present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show disk usage and pressure level
    Status,
    /// List sessions registered in this process
    List,
    /// Show lifecycle information for one session
    Info { session_id: String },
    /// Discover sessions on disk and show them in eviction order
    Discover,
    /// Reclaim space; bounded unless --force or usage is critical
    Cleanup {
        /// Process every reclaimable session regardless of pressure
        #[arg(long)]
        force: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Archive a session without deleting it
    Archive { session_id: String },
    /// Run the monitoring loop. Per-session cleanup timers only cover
    /// sessions registered by this process; other sessions are reclaimed
    /// through pressure-driven cleanup.
    Watch {
        /// Stop after this many ticks
        #[arg(long)]
        ticks: Option<u64>,
        /// Override monitor_interval_seconds
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Print configuration values
    PrintConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_print_config_and_watch() {
        let cli = Cli::try_parse_from(["session-janitor", "print-config"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::PrintConfig)));

        let cli = Cli::try_parse_from(["session-janitor", "watch", "--ticks", "2", "--interval", "5"])
            .unwrap();
        match cli.command {
            Some(Commands::Watch { ticks, interval }) => {
                assert_eq!(ticks, Some(2));
                assert_eq!(interval, Some(5));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
