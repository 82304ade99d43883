//! fixstream CLI - Command-line interface
//!
//! Captures raw positioning streams through a supervised engine and shows
//! the effective configuration.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use fixstream::logging::{default_log_dir, default_log_file, init_logging};

use commands::capture::CaptureArgs;
use commands::config::ConfigArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "fixstream")]
#[command(version, about = "Supervised capture of positioning device streams", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a device stream to a file, reconnecting on transport failures
    Capture(CaptureArgs),
    /// Show the effective configuration
    Config(ConfigArgs),
}

fn main() {
    let cli = Cli::parse();

    // Keep the guard alive so buffered log lines are flushed on exit
    let _logging = match init_logging(&default_log_dir(), default_log_file()) {
        Ok(guard) => guard,
        Err(e) => CliError::LoggingInit(e.to_string()).exit(),
    };

    let result = match cli.command {
        Commands::Capture(args) => commands::capture::run(args),
        Commands::Config(args) => commands::config::run(args),
    };

    if let Err(e) = result {
        e.exit();
    }
}
