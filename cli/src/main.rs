use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use tracing_subscriber::EnvFilter;

mod builtin;
mod run_cmd;

use run_cmd::RunArgs;

#[derive(Debug, Parser)]
#[command(name = "loader-runner")]
#[command(about = "Run a chain of loaders over a single resource")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the loader chain over a resource
    Run(RunArgs),

    /// List built-in loaders
    List,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "loader_runner=debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // A subscriber may already be installed when embedded.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Run(args) => run_cmd::run(args).await,
        Command::List => {
            run_cmd::list();
            Ok(ExitCode::SUCCESS)
        }
    }
}
