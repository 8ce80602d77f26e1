//! # Heat Reconciler Configuration Validator
//!
//! Loads the layered reconciler configuration the same way the controller
//! does, validates it, and prints the stage evaluation order it implies.
//!
//! ```text
//! config-validator [--file PATH] [--json] [-v...]
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

use heat_reconciler::config::{ConfigManager, LoggingConfig};
use heat_reconciler::logging::init_structured_logging;
use heat_reconciler::orchestration::StageSequencer;

#[derive(Parser, Debug)]
#[command(name = "config-validator")]
#[command(about = "Validate Heat reconciler configuration")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file (default: config/heat-reconciler.{toml,yaml} if present)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Print the validated configuration and stage order as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn main() {
    let cli = Cli::parse();
    init_structured_logging(&LoggingConfig {
        level: Some(log_level(cli.verbose).to_string()),
        json: false,
    });
    let result = validate(&cli);

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
        }
        Err(e) => {
            error!(error = %e, "Configuration validation failed");
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn validate(cli: &Cli) -> Result<()> {
    let manager = match &cli.file {
        Some(path) => ConfigManager::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ConfigManager::load().context("loading default configuration")?,
    };
    let config = manager.config();

    let sequencer = StageSequencer::heat(config.sequencing.mode)
        .context("building the stage graph")?;

    if cli.json {
        let report = serde_json::json!({
            "environment": manager.environment(),
            "source": manager.source_file().map(|p| p.display().to_string()),
            "stageOrder": sequencer.order().iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            "config": manager.debug_config(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("🔧 Heat reconciler configuration");
    println!("Environment: {}", manager.environment());
    match manager.source_file() {
        Some(path) => println!("Source: {}", path.display()),
        None => println!("Source: defaults + environment"),
    }
    println!();
    println!("✅ Configuration valid");
    println!(
        "   - Sequencing: {:?}, max concurrent reconciles: {}",
        config.sequencing.mode, config.controller.max_concurrent_reconciles
    );
    println!(
        "   - Backoff: {}ms base, x{} per attempt, {}s ceiling",
        config.backoff.base_delay_ms, config.backoff.multiplier, config.backoff.max_delay_seconds
    );
    match config.requeue.resync_ready_seconds {
        Some(seconds) => println!("   - Resync of ready instances every {seconds}s"),
        None => println!("   - Ready instances wait for watch events"),
    }
    println!();
    println!("📋 Stage order:");
    for (position, stage) in sequencer.order().iter().enumerate() {
        let deps = sequencer.graph().dependencies(*stage);
        if deps.is_empty() {
            println!("  {:>2}. {stage}", position + 1);
        } else {
            let deps: Vec<_> = deps.iter().map(|d| d.as_str()).collect();
            println!("  {:>2}. {stage} (after {})", position + 1, deps.join(", "));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parses_flags() {
        let cli = Cli::try_parse_from([
            "config-validator",
            "-f",
            "config/heat-reconciler.toml",
            "--json",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.file, Some(PathBuf::from("config/heat-reconciler.toml")));
        assert!(cli.json);
        assert_eq!(log_level(cli.verbose), "debug");

        let cli = Cli::try_parse_from(["config-validator"]).unwrap();
        assert!(cli.file.is_none());
        assert_eq!(log_level(cli.verbose), "warn");
    }

    #[test]
    fn test_cli_rejects_unknown_flag() {
        assert!(Cli::try_parse_from(["config-validator", "--bogus"]).is_err());
    }
}
