//! `fixstream config` - show the effective configuration.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use clap::Args;
use fixstream::config::{config_file_path, ReconnectLimit};
use fixstream::EngineConfig;

use crate::error::CliError;

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Config file to read (defaults to ~/.fixstream/config.ini)
    #[arg(long)]
    pub path: Option<PathBuf>,
}

/// Load a config file, or the default one.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, CliError> {
    let config = match path {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load()?,
    };
    Ok(config)
}

pub fn run(args: ConfigArgs) -> Result<(), CliError> {
    let path = args.path.unwrap_or_else(config_file_path);
    let config = load_config(Some(&path))?;

    if path.exists() {
        println!("# Configuration file: {}", path.display());
    } else {
        println!(
            "# Configuration file: {} (not found, using defaults)",
            path.display()
        );
    }
    println!();
    print!("{}", render(&config));
    Ok(())
}

/// Render a configuration in the same INI layout the loader reads.
fn render(config: &EngineConfig) -> String {
    let max_attempts = match config.max_reconnection_attempts() {
        ReconnectLimit::Unlimited => -1,
        ReconnectLimit::Attempts(n) => i64::from(n),
    };

    let mut out = String::new();
    // Writing to a String cannot fail
    let _ = writeln!(out, "[engine]");
    let _ = writeln!(
        out,
        "command_timeout_secs = {}",
        config.command_timeout().as_secs()
    );
    let _ = writeln!(
        out,
        "read_timeout_secs = {}",
        config.read_timeout().as_secs()
    );
    let _ = writeln!(
        out,
        "notification_capacity = {}",
        config.notification_capacity()
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "[reconnect]");
    let _ = writeln!(out, "enabled = {}", config.allow_automatic_reconnection());
    let _ = writeln!(out, "max_attempts = {}", max_attempts);
    let _ = writeln!(
        out,
        "delay_ms = {}",
        config.reconnect_delay().as_millis()
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "[precision]");
    let _ = writeln!(out, "filter_enabled = {}", config.filter_enabled());
    let _ = writeln!(out, "fix_required = {}", config.fix_required());
    let _ = writeln!(out, "max_hdop = {}", config.max_horizontal_dop());
    let _ = writeln!(out, "max_vdop = {}", config.max_vertical_dop());
    let _ = writeln!(
        out,
        "device_precision_m = {}",
        config.device_precision().as_meters()
    );
    out
}
