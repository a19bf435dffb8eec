//! rfstream CLI - render, inspect, and stream AWG command programs.

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rfstream")]
#[command(author, version, about = "Command-driven AWG waveform streaming", long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a command script offline to a WAV file
    Render(commands::render::RenderArgs),

    /// Encode a command script into a binary command log
    Encode(commands::encode::EncodeArgs),

    /// Print the records of a binary command log
    Dump(commands::dump::DumpArgs),

    /// Stream a command script through the live two-thread engine
    Run(commands::run::RunArgs),

    /// Show fixed-point units and the record layout
    Info,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .init();
    tracing_log::LogTracer::init().ok();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Render(args) => commands::render::run(args),
        Commands::Encode(args) => commands::encode::run(args),
        Commands::Dump(args) => commands::dump::run(args),
        Commands::Run(args) => commands::run::run(args),
        Commands::Info => commands::info::run(),
    }
}
