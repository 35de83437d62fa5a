use clap::{Parser, Subcommand};
use nodegate_consistency::WriteKind;

#[derive(Parser)]
#[command(
    name = "nodegate",
    about = "Nodegate: admission control and read-after-write consistency for graph tool dispatch",
    version
)]
pub struct Cli {
    /// Debug-level logs on stderr
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Errors only
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Disable ANSI colors in log output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the resolved gate configuration (file, then NODEGATE_* overrides)
    Config {
        /// Path to a TOML config file
        #[arg(long)]
        config: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Drive a synthetic read/write workload through the dispatcher
    Soak {
        /// Path to a TOML config file
        #[arg(long)]
        config: Option<String>,

        /// Total operations to dispatch
        #[arg(long, default_value_t = 200, value_parser = clap::value_parser!(u64).range(1..))]
        operations: u64,

        /// Concurrent workers
        #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(u64).range(1..))]
        concurrency: u64,

        /// Distinct entity keys touched by the workload
        #[arg(long, default_value_t = 16, value_parser = clap::value_parser!(u64).range(1..))]
        entities: u64,

        /// Every Nth operation is a write; the rest are reads
        #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u64).range(1..))]
        write_every: u64,

        /// Kind recorded for every write: create, update or delete
        #[arg(long, default_value = "update", value_parser = parse_write_kind)]
        write_kind: WriteKind,

        /// Simulated backend latency per call
        #[arg(long, default_value_t = 5)]
        backend_latency_ms: u64,

        /// Delay before a write becomes visible to reads
        #[arg(long, default_value_t = 200)]
        replica_lag_ms: u64,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_write_kind(value: &str) -> Result<WriteKind, String> {
    WriteKind::parse(value)
        .ok_or_else(|| format!("unknown write kind `{value}` (expected create, update or delete)"))
}
