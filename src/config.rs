use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Rebuild activity sessions from raw stage-event logs
#[derive(Debug, Parser)]
#[command(name = "activity-sessions", version, about)]
pub struct Cli {
    /// Directory holding raw batches (stands in for the storage bucket)
    #[arg(long, global = true, default_value = "data")]
    pub data_dir: PathBuf,

    /// SQLite database with the session tables and processing log
    #[arg(long, global = true, default_value = "warehouse.db")]
    pub warehouse: PathBuf,

    /// Bucket name accepted by storage notifications
    #[arg(long, global = true, default_value = "activity_logs")]
    pub bucket: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP API
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: SocketAddr,
    },
    /// Ingest every raw batch not yet in the processing log
    Ingest,
    /// Write a synthetic raw batch into the data directory
    Generate {
        #[arg(long, default_value_t = 100)]
        users: usize,
        #[arg(long, default_value = "2023-01-01")]
        start: String,
        #[arg(long, default_value = "2023-01-31")]
        end: String,
        /// Defaults to the current unix time
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Print the sessions of one activity type in a batch file as JSON
    Extract {
        path: PathBuf,
        #[arg(long, short)]
        activity: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["activity-sessions", "ingest"]);
        assert_eq!(cli.data_dir, PathBuf::from("data"));
        assert_eq!(cli.warehouse, PathBuf::from("warehouse.db"));
        assert!(matches!(cli.command, Command::Ingest));
    }

    #[test]
    fn test_extract_args() {
        let cli = Cli::parse_from(["activity-sessions", "extract", "logs.tsv", "-a", "Quiz", "--data-dir", "/tmp/x"]);
        assert_eq!(cli.data_dir, PathBuf::from("/tmp/x"));
        match cli.command {
            Command::Extract { path, activity } => {
                assert_eq!(path, PathBuf::from("logs.tsv"));
                assert_eq!(activity, "Quiz");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
