// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parley - omnichannel conversation and message delivery engine.
//!
//! This is the binary entry point.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod serve;
mod shutdown;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use parley_config::ParleyConfig;

/// Parley - omnichannel conversation and message delivery engine.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the XDG hierarchy.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP gateway and background workers.
    Serve,
    /// Create or upgrade the database schema, then exit.
    Migrate,
    /// Inspect configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Validate configuration and print a summary.
    Check,
}

fn load(path: Option<&std::path::Path>) -> Result<ParleyConfig, ExitCode> {
    let result = match path {
        Some(path) => parley_config::load_and_validate_path(path),
        None => parley_config::load_and_validate(),
    };
    result.map_err(|errors| {
        parley_config::render_errors(&errors);
        ExitCode::FAILURE
    })
}

fn print_summary(config: &ParleyConfig) {
    println!("server: {}:{}", config.server.host, config.server.port);
    println!(
        "auth: {}",
        if config.server.bearer_token.is_some() {
            "bearer token set"
        } else {
            "no bearer token (API rejects every request)"
        }
    );
    println!("storage: {}", config.storage.database_path);
    println!("metrics: {}", if config.metrics.enabled { "enabled" } else { "disabled" });
    println!("channels: {}", config.channels.len());
    for channel in &config.channels {
        println!("  - {} ({})", channel.id, channel.kind);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(code) => return code,
    };

    match cli.command {
        Some(Commands::Serve) => {
            serve::init_tracing(&config.server.log_level);
            match serve::run_serve(config).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("error: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        Some(Commands::Migrate) => {
            serve::init_tracing(&config.server.log_level);
            match serve::open_database(&config).await {
                Ok(db) => {
                    if let Err(e) = db.close().await {
                        eprintln!("error: {e}");
                        return ExitCode::FAILURE;
                    }
                    println!("database ready: {}", config.storage.database_path);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        Some(Commands::Config {
            action: ConfigAction::Check,
        }) => {
            println!("configuration is valid");
            print_summary(&config);
            ExitCode::SUCCESS
        }
        None => {
            println!("parley: use --help for available commands");
            ExitCode::SUCCESS
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_config_check_with_path() {
        let cli = Cli::try_parse_from(["parley", "--config", "/tmp/p.toml", "config", "check"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/tmp/p.toml")));
        assert!(matches!(
            cli.command,
            Some(Commands::Config {
                action: ConfigAction::Check
            })
        ));
    }

    #[test]
    fn default_config_is_valid() {
        let config = parley_config::load_and_validate_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert!(config.channels.is_empty());
    }
}
