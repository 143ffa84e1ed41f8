use clap::Args;
use serde_json::{json, Value};
use uuid::Uuid;

use cre_valuation_core::baseline::{DealBaseline, InMemoryBaselines, T12Month};
use cre_valuation_core::config::EngineConfig;
use cre_valuation_core::runs::model::{ValuationRequest, ValuationRun};
use cre_valuation_core::runs::orchestrator::ValuationService;
use cre_valuation_core::runs::store::JsonFileRunStore;
use cre_valuation_core::types::DealId;
use cre_valuation_core::ValuationError;

use crate::input;

/// Arguments for creating a valuation run
#[derive(Args)]
pub struct RunArgs {
    /// Deal the run belongs to
    #[arg(long)]
    pub deal: DealId,

    /// Path to JSON request with `name` and `assumptions`
    #[arg(long)]
    pub input: Option<String>,

    /// Path to the deal's year-1 baseline JSON
    #[arg(long, conflicts_with = "t12")]
    pub baseline: Option<String>,

    /// Path to a JSON array of normalized T-12 months, annualized into the baseline
    #[arg(long)]
    pub t12: Option<String>,
}

/// Arguments for listing or showing runs
#[derive(Args)]
pub struct RunsArgs {
    /// List runs for this deal, newest first
    #[arg(long, required_unless_present = "id")]
    pub deal: Option<DealId>,

    /// Show a single run by id
    #[arg(long)]
    pub id: Option<String>,
}

/// Baseline source holding the one deal named on the command line.
pub(crate) fn load_baselines(
    deal: DealId,
    baseline: Option<&str>,
    t12: Option<&str>,
) -> Result<InMemoryBaselines, Box<dyn std::error::Error>> {
    let snapshot = match (baseline, t12) {
        (Some(path), _) => input::file::read_json::<DealBaseline>(path)?,
        (None, Some(path)) => {
            let months: Vec<T12Month> = input::file::read_json(path)?;
            DealBaseline::from_t12(&months)?
        }
        (None, None) => return Err("--baseline <file.json> or --t12 <file.json> required".into()),
    };
    let baselines = InMemoryBaselines::new();
    baselines.insert(deal, snapshot)?;
    Ok(baselines)
}

pub(crate) fn open_service(
    config: &EngineConfig,
    baselines: InMemoryBaselines,
) -> Result<ValuationService<InMemoryBaselines, JsonFileRunStore>, Box<dyn std::error::Error>> {
    let store = JsonFileRunStore::open(&config.store_dir)?;
    Ok(ValuationService::with_solver(
        baselines,
        store,
        config.solver.clone(),
    ))
}

pub fn run_valuation(
    args: RunArgs,
    config: &EngineConfig,
) -> Result<Value, Box<dyn std::error::Error>> {
    let request: ValuationRequest = input::read_input(args.input.as_deref(), "run")?;
    let baselines = load_baselines(args.deal, args.baseline.as_deref(), args.t12.as_deref())?;
    let service = open_service(config, baselines)?;

    let run = match service.run(args.deal, request) {
        Ok(run) => run,
        Err(ValuationError::Persistence { reason, run }) => {
            tracing::warn!(run_id = %run.id, %reason, "Run computed but not saved; retrying once");
            service.retry_persist(*run)?
        }
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::to_value(run)?)
}

fn summary(run: &ValuationRun) -> Value {
    let kpi = |f: fn(&cre_valuation_core::underwriting::returns::KpiResult) -> Value| {
        run.results.as_ref().map(f).unwrap_or(Value::Null)
    };
    json!({
        "id": run.id,
        "name": run.name,
        "status": run.status,
        "irr": kpi(|k| json!(k.irr)),
        "equity_multiple": kpi(|k| json!(k.equity_multiple)),
        "dscr_minimum": kpi(|k| json!(k.dscr_minimum)),
        "warnings": run.warnings.len(),
        "error": run.error,
        "created_at": run.created_at,
    })
}

pub fn run_list(args: RunsArgs, config: &EngineConfig) -> Result<Value, Box<dyn std::error::Error>> {
    let service = open_service(config, InMemoryBaselines::new())?;

    if let Some(id) = args.id {
        let run = service.get_run(Uuid::parse_str(&id)?)?;
        return Ok(serde_json::to_value(run)?);
    }

    let deal = args.deal.ok_or("--deal or --id required")?;
    let runs = service.list_runs(deal)?;
    Ok(Value::Array(runs.iter().map(summary).collect()))
}
