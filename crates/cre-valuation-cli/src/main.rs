mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use commands::runs::{RunArgs, RunsArgs};
use commands::sensitivity::SensitivityArgs;
use commands::underwriting::{AmortizeArgs, AnalyzeArgs};
use cre_valuation_core::config::{build_config, ConfigOverrides};

/// Commercial real estate valuation
#[derive(Parser)]
#[command(
    name = "creval",
    version,
    about = "Commercial real estate valuation runs",
    long_about = "Projects a levered pro forma for an income property, amortizes the \
                  acquisition loan, prices the exit and solves IRR, DSCR, equity multiple \
                  and related metrics with decimal precision. Supports one-factor \
                  sensitivity sweeps and a persisted history of valuation runs."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,

    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Directory holding persisted valuation runs
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    /// Worker threads for sensitivity sweeps
    #[arg(long, global = true)]
    threads: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pro forma, exit and returns pipeline on one deal
    Analyze(AnalyzeArgs),
    /// Build a level-payment amortization schedule
    Amortize(AmortizeArgs),
    /// Sweep one assumption across a grid and report IRR / DSCR at each point
    Sensitivity(SensitivityArgs),
    /// Create and persist a valuation run for a deal
    Run(RunArgs),
    /// List a deal's valuation runs, newest first, or show one run
    Runs(RunsArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

/// Filter for the resolved log level. `RUST_LOG` is not consulted: the level
/// comes from `--log-level`, `CREVAL_LOG_LEVEL` or the config file, in that
/// order.
fn log_filter(log_level: &str) -> EnvFilter {
    EnvFilter::new(log_level)
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(log_filter(log_level))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    let cli = Cli::parse();

    let overrides = ConfigOverrides {
        config_file: cli.config.clone(),
        store_dir: cli.store_dir.clone(),
        log_level: cli.log_level.clone(),
        sweep_threads: cli.threads,
    };
    let config = match build_config(&overrides) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    };

    init_tracing(config.log_level.as_filter_str());
    tracing::debug!(
        store_dir = %config.store_dir.display(),
        log_level = %config.log_level,
        sweep_threads = ?config.sweep_threads,
        "Configuration loaded"
    );
    if let Err(e) = config.install_thread_pool() {
        tracing::warn!(error = %e, "Using default sweep thread pool");
    }

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Analyze(args) => commands::underwriting::run_analyze(args, &config),
        Commands::Amortize(args) => commands::underwriting::run_amortize(args),
        Commands::Sensitivity(args) => commands::sensitivity::run_sensitivity(args, &config),
        Commands::Run(args) => commands::runs::run_valuation(args, &config),
        Commands::Runs(args) => commands::runs::run_list(args, &config),
        Commands::Version => {
            println!("creval {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn test_log_filter_ignores_rust_log() {
        std::env::set_var("RUST_LOG", "trace");
        assert_eq!(log_filter("warn").max_level_hint(), Some(LevelFilter::WARN));
        assert_eq!(log_filter("debug").max_level_hint(), Some(LevelFilter::DEBUG));
    }
}
