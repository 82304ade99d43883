//! CLI subcommands.
//!
//! Each subcommand lives in its own module with an args struct and a `run`
//! function returning `Result<(), CliError>`.

pub mod capture;
pub mod config;
