use clap::Args;
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

use cre_valuation_core::config::EngineConfig;
use cre_valuation_core::scenarios::sensitivity::{self, SensitivityInput, SensitivityVariable};
use cre_valuation_core::types::{DealId, SweepRange};
use cre_valuation_core::underwriting::pipeline::AnalysisInput;

use crate::commands::runs::{load_baselines, open_service};
use crate::input;

/// Arguments for a one-factor sensitivity sweep
#[derive(Args)]
pub struct SensitivityArgs {
    /// Factor and grid as name:min:max:step
    /// (e.g. "exit_cap_rate:0.05:0.07:0.005")
    #[arg(long)]
    pub factor: String,

    /// Path to JSON input with `assumptions` and `baseline`
    #[arg(long, conflicts_with = "run")]
    pub input: Option<String>,

    /// Sweep around a persisted, completed run
    #[arg(long, requires = "deal")]
    pub run: Option<String>,

    /// Deal the run belongs to
    #[arg(long)]
    pub deal: Option<DealId>,

    /// Path to the deal's year-1 baseline JSON (with --run)
    #[arg(long, conflicts_with = "t12")]
    pub baseline: Option<String>,

    /// Path to the deal's normalized T-12 months (with --run)
    #[arg(long)]
    pub t12: Option<String>,
}

fn parse_factor(factor: &str) -> Result<(SensitivityVariable, SweepRange), Box<dyn std::error::Error>> {
    let parts: Vec<&str> = factor.split(':').collect();
    if parts.len() != 4 {
        return Err(format!("Factor must be name:min:max:step, got '{factor}'").into());
    }
    let variable: SensitivityVariable = parts[0].parse()?;
    let bound = |s: &str| -> Result<Decimal, Box<dyn std::error::Error>> {
        s.trim()
            .parse::<Decimal>()
            .map_err(|e| format!("Invalid number '{s}' in factor '{factor}': {e}").into())
    };
    let range = SweepRange {
        min: bound(parts[1])?,
        max: bound(parts[2])?,
        step: bound(parts[3])?,
    };
    Ok((variable, range))
}

pub fn run_sensitivity(
    args: SensitivityArgs,
    config: &EngineConfig,
) -> Result<Value, Box<dyn std::error::Error>> {
    let (variable, range) = parse_factor(&args.factor)?;

    if let Some(run_id) = args.run {
        let deal = args.deal.ok_or("--deal required with --run")?;
        let baselines = load_baselines(deal, args.baseline.as_deref(), args.t12.as_deref())?;
        let service = open_service(config, baselines)?;
        let factor =
            service.compute_sensitivity(deal, Uuid::parse_str(&run_id)?, variable, &range)?;
        return Ok(serde_json::to_value(factor)?);
    }

    let base: AnalysisInput = input::read_input(args.input.as_deref(), "sensitivity")?;
    let sweep = SensitivityInput {
        assumptions: base.assumptions,
        baseline: base.baseline,
        variable,
        range,
    };
    let result = sensitivity::run_sensitivity(&sweep, &config.solver)?;
    Ok(serde_json::to_value(result)?)
}
