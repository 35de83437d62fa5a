//! Nodegate CLI: the `nodegate` command.

mod cli;
mod commands;
mod graph;
mod support;
mod tracing_setup;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_setup::Verbosity;

fn main() {
    let cli = Cli::parse();
    tracing_setup::init_subscriber(Verbosity::from_flags(cli.verbose, cli.quiet), cli.no_color);

    match cli.command {
        Commands::Config { config, json } => commands::config::run(config, json),

        Commands::Soak {
            config,
            operations,
            concurrency,
            entities,
            write_every,
            write_kind,
            backend_latency_ms,
            replica_lag_ms,
            json,
        } => commands::soak::run(commands::soak::Args {
            config,
            operations,
            concurrency,
            entities,
            write_every,
            write_kind,
            backend_latency_ms,
            replica_lag_ms,
            json,
        }),
    }
}
