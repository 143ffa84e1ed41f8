//! Engine configuration
//!
//! Loaded from a TOML file, `CREVAL_*` environment variables and command-line
//! overrides. Priority (highest to lowest): CLI, environment, file, defaults.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ValuationError;
use crate::time_value::IrrSolver;
use crate::ValuationResult;

pub const ENV_STORE_DIR: &str = "CREVAL_STORE_DIR";
pub const ENV_LOG_LEVEL: &str = "CREVAL_LOG_LEVEL";
pub const ENV_SWEEP_THREADS: &str = "CREVAL_SWEEP_THREADS";
pub const ENV_IRR_MAX_ITERATIONS: &str = "CREVAL_IRR_MAX_ITERATIONS";
pub const ENV_IRR_TOLERANCE: &str = "CREVAL_IRR_TOLERANCE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[default]
    Warn,
    Error,
}

impl LogLevel {
    /// Directive for `tracing_subscriber::EnvFilter`
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ValuationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(ValuationError::Config(format!(
                "Invalid log level: {s}. Must be one of: trace, debug, info, warn, error"
            ))),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_filter_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Directory for the JSON-file run store
    pub store_dir: PathBuf,
    pub log_level: LogLevel,
    /// Worker threads for sensitivity sweeps; `None` uses one per core
    pub sweep_threads: Option<usize>,
    pub solver: IrrSolver,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from(".creval/runs"),
            log_level: LogLevel::Warn,
            sweep_threads: None,
            solver: IrrSolver::default(),
        }
    }
}

/// Command-line overrides. `None` leaves the lower-priority value in place.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_file: Option<PathBuf>,
    pub store_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub sweep_threads: Option<usize>,
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> ValuationResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ValuationError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let config: EngineConfig = toml::from_str(&content)
            .map_err(|e| ValuationError::Config(format!("Failed to parse TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CREVAL_*` variables from the process environment.
    pub fn apply_env(&mut self) -> ValuationResult<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> ValuationResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_STORE_DIR) {
            self.store_dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log_level = level.parse()?;
        }
        if let Some(threads) = lookup(ENV_SWEEP_THREADS) {
            self.sweep_threads = Some(parse_env(ENV_SWEEP_THREADS, &threads)?);
        }
        if let Some(iterations) = lookup(ENV_IRR_MAX_ITERATIONS) {
            self.solver.max_iterations = parse_env(ENV_IRR_MAX_ITERATIONS, &iterations)?;
        }
        if let Some(tolerance) = lookup(ENV_IRR_TOLERANCE) {
            self.solver.tolerance = parse_env::<Decimal>(ENV_IRR_TOLERANCE, &tolerance)?;
        }
        Ok(())
    }

    /// Merge with CLI arguments (CLI takes precedence)
    pub fn merge_with_cli(&mut self, cli: &ConfigOverrides) -> ValuationResult<()> {
        if let Some(dir) = &cli.store_dir {
            self.store_dir = dir.clone();
        }
        if let Some(level) = &cli.log_level {
            self.log_level = level.parse()?;
        }
        if let Some(threads) = cli.sweep_threads {
            self.sweep_threads = Some(threads);
        }
        Ok(())
    }

    pub fn validate(&self) -> ValuationResult<()> {
        let s = &self.solver;
        if s.lower_bound <= -Decimal::ONE {
            return Err(ValuationError::Config(
                "solver.lower_bound must be greater than -1".into(),
            ));
        }
        if s.lower_bound >= s.upper_bound {
            return Err(ValuationError::Config(
                "solver.lower_bound must be below solver.upper_bound".into(),
            ));
        }
        if s.initial_guess < s.lower_bound || s.initial_guess > s.upper_bound {
            return Err(ValuationError::Config(
                "solver.initial_guess must lie within the solver bounds".into(),
            ));
        }
        if s.tolerance <= Decimal::ZERO {
            return Err(ValuationError::Config("solver.tolerance must be positive".into()));
        }
        if s.max_iterations == 0 {
            return Err(ValuationError::Config(
                "solver.max_iterations must be at least 1".into(),
            ));
        }
        if self.sweep_threads == Some(0) {
            return Err(ValuationError::Config("sweep_threads must be at least 1".into()));
        }
        Ok(())
    }

    /// Size the global rayon pool used by sensitivity sweeps. Only the first
    /// call in a process takes effect.
    #[cfg(feature = "parallel")]
    pub fn install_thread_pool(&self) -> ValuationResult<()> {
        let Some(threads) = self.sweep_threads else {
            return Ok(());
        };
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .map_err(|e| ValuationError::Config(format!("Failed to size sweep pool: {e}")))
    }

    #[cfg(not(feature = "parallel"))]
    pub fn install_thread_pool(&self) -> ValuationResult<()> {
        Ok(())
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> ValuationResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ValuationError::Config(format!("{key} has invalid value '{value}'")))
}

/// Build configuration from all sources
///
/// Priority (highest to lowest):
/// 1. CLI arguments
/// 2. Environment variables
/// 3. Config file
/// 4. Default values
pub fn build_config(cli: &ConfigOverrides) -> ValuationResult<EngineConfig> {
    let mut config = match &cli.config_file {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    config.apply_env()?;
    config.merge_with_cli(cli)?;
    config.validate()?;
    Ok(config)
}
