use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::assumptions::AssumptionSet;
use crate::baseline::DealBaseline;
use crate::time_value::IrrSolver;
use crate::types::{with_metadata, ComputationOutput, Money};
use crate::underwriting::amortization::{build_schedule, DebtSchedule, LoanTerms};
use crate::underwriting::exit::{value_exit, ExitResult};
use crate::underwriting::projection::{total_noi, CashFlowPeriod, CashFlowProjector};
use crate::underwriting::returns::{solve_returns, KpiResult};
use crate::warnings::Warning;
use crate::ValuationResult;

/// Inputs for a single stateless analysis: assumptions plus the deal's
/// normalized baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisInput {
    pub assumptions: AssumptionSet,
    pub baseline: DealBaseline,
}

/// Everything the pipeline produces for one assumption set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationAnalysis {
    pub pro_forma: Vec<CashFlowPeriod>,
    pub total_noi: Money,
    pub debt_schedule: DebtSchedule,
    pub exit: ExitResult,
    pub levered_cash_flows: Vec<Money>,
    pub unlevered_cash_flows: Vec<Money>,
    pub kpis: KpiResult,
    pub warnings: Vec<Warning>,
}

/// Run projection, amortization, exit and returns for already-validated
/// inputs. Pure: no I/O and no shared state, so it is safe to call from
/// many threads at once.
pub fn run_pipeline(
    assumptions: &AssumptionSet,
    baseline: &DealBaseline,
    solver: &IrrSolver,
) -> ValuationResult<ValuationAnalysis> {
    let projector = CashFlowProjector::new(assumptions, baseline);
    let pro_forma = projector.project()?;
    let forward = projector.forward_period()?;

    let schedule = build_schedule(&LoanTerms::from(assumptions), assumptions.hold_period_years)?;
    let exit = value_exit(assumptions, &forward, &schedule)?;
    let returns = solve_returns(assumptions, &pro_forma, &schedule, &exit, solver)?;
    let total_noi = total_noi(&pro_forma)?;

    Ok(ValuationAnalysis {
        total_noi,
        pro_forma,
        debt_schedule: schedule,
        exit,
        levered_cash_flows: returns.levered_cash_flows,
        unlevered_cash_flows: returns.unlevered_cash_flows,
        kpis: returns.kpis,
        warnings: returns.warnings,
    })
}

/// Validate and analyze one deal, wrapped in the standard output envelope.
pub fn analyze(
    input: &AnalysisInput,
    solver: &IrrSolver,
) -> ValuationResult<ComputationOutput<ValuationAnalysis>> {
    let start = Instant::now();

    input.assumptions.validate()?;
    input.baseline.validate()?;

    let analysis = run_pipeline(&input.assumptions, &input.baseline, solver)?;
    let warnings = analysis.warnings.iter().map(|w| w.to_string()).collect();

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Levered Real Estate Pro Forma (Direct-Cap Exit, IRR / DSCR / Equity Multiple)",
        input,
        warnings,
        elapsed,
        analysis,
    ))
}
