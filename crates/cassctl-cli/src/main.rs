//! cassctl - command line tools for Cassandra clusters on Kubernetes.
//!
//! This is the entry point for the `cassctl` binary.

mod estimate;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// cassctl - command line tools for Cassandra clusters on Kubernetes.
#[derive(Parser, Debug)]
#[command(name = "cassctl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging.
    #[arg(long, global = true, default_value = "false")]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check whether additional Cassandra pods would fit in the cluster.
    Estimate(estimate::EstimateArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let result = match cli.command {
        Command::Estimate(args) => estimate::run(args).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr; `--debug` wins over `RUST_LOG`.
fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("cassctl=debug,cassctl_scheduler=debug,warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
