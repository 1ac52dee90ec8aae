use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tidyfs_core::ConflictPolicy;

#[derive(Debug, Parser)]
#[command(name = "tidyfs")]
#[command(about = "Find overlapping directories and merge or archive them", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Extract terms from each path and store them in the index
    Scan {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Show the ranked list of overlapping path pairs
    Insights {
        /// Recompute from the index before printing
        #[arg(long)]
        refresh: bool,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Move everything from SOURCE into DESTINATION, then remove SOURCE
    Merge {
        destination: PathBuf,
        source: PathBuf,
        /// What to do with names already present in DESTINATION
        #[arg(long, value_parser = parse_conflict_policy)]
        on_conflict: Option<ConflictPolicy>,
    },
    /// Zip TARGET into the archive directory, then remove it
    Archive { target: PathBuf },
    /// List a directory
    Ls { path: Option<PathBuf> },
    /// Show the stored term vector of an indexed path
    Terms {
        path: PathBuf,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Interactive browser: cd, ls, scan and recent paths
    Browse { path: Option<PathBuf> },
    /// Print configuration values
    PrintConfig,
    /// Truncate all database tables and the insight cache
    TruncateDb,
}

fn parse_conflict_policy(raw: &str) -> Result<ConflictPolicy, String> {
    raw.parse()
}
