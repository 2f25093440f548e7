use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "jaunt")]
#[command(about = "Travel journal from the command line: visits, trips, and sync")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Device identifier used in version stamps (default: JAUNT_DEVICE_ID or "cli")
    #[arg(long, global = true, value_name = "NAME")]
    pub device: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ingest location samples from a JSON file
    Ingest {
        /// Path to a JSON array of samples
        file: PathBuf,
    },
    /// List recent place visits
    Visits {
        /// How many days back to look
        #[arg(long, default_value = "7")]
        days: i64,
        /// Number of visits to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recent trips
    Trips {
        /// How many days back to look
        #[arg(long, default_value = "30")]
        days: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run trip detection over recent visits and segments
    Detect {
        /// How many days back to detect over
        #[arg(long, default_value = "7")]
        days: i64,
    },
    /// Summarize a period
    Summary {
        /// Period granularity
        #[arg(value_enum)]
        granularity: Granularity,
        /// Anchor date (YYYY-MM-DD, default today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Label a visit
    Label {
        /// Visit ID
        id: String,
        /// Label text (empty clears)
        label: Vec<String>,
    },
    /// Toggle a visit's favorite flag
    Favorite {
        /// Visit ID
        id: String,
        /// Clear instead of set
        #[arg(long)]
        off: bool,
    },
    /// Run one sync cycle against the remote service
    Sync {
        /// Sync service base URL (default: JAUNT_SYNC_URL)
        #[arg(long, value_name = "URL")]
        endpoint: Option<String>,
    },
    /// List unresolved sync conflicts
    Conflicts {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve the oldest pending conflict
    Resolve {
        /// Conflict ID
        id: String,
        /// Resolution operation
        #[arg(value_enum)]
        op: ResolveOp,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Granularity {
    Day,
    Week,
    Month,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ResolveOp {
    KeepLocal,
    KeepRemote,
    Merge,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
