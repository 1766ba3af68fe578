//! cacheguard CLI entry point

use cacheguard::cli::{Cli, Commands};
use cacheguard::config::schema::GeneralConfig;
use cacheguard::config::ConfigManager;
use cacheguard::error::CacheResult;
use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> CacheResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };

    match cli.command {
        // Runs before any load so `config init --force` can replace a broken file
        Commands::Config(args) => {
            init_logging(cli.verbose, &GeneralConfig::default());
            cacheguard::cli::commands::config(args, &config_manager).await
        }
        Commands::Simulate(args) => {
            let config = config_manager.load().await?;
            init_logging(cli.verbose, &config.general);
            cacheguard::cli::commands::simulate(args, &config).await
        }
    }
}

fn init_logging(verbose: u8, general: &GeneralConfig) {
    // 0 = warn, 1 = info, 2+ = debug; the config file can raise the floor to info
    let verbose = match verbose {
        0 if general.verbose => 1,
        v => v,
    };
    let filter = match verbose {
        0 => EnvFilter::new("cacheguard=warn"),
        1 => EnvFilter::new("cacheguard=info"),
        _ => EnvFilter::new("cacheguard=debug"),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if general.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.without_time().init();
    }
}
