use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::assumptions::AssumptionSet;
use crate::baseline::DealBaseline;
use crate::error::ValuationError;
use crate::time_value::IrrSolver;
use crate::types::{with_metadata, ComputationOutput, Multiple, Rate, SweepRange};
use crate::underwriting::pipeline::run_pipeline;
use crate::warnings::{Warning, WarningCode};
use crate::ValuationResult;

/// Upper bound on grid size for a single sweep.
pub const MAX_GRID_POINTS: usize = 10_000;

/// Numeric fields of [`AssumptionSet`] that can be swept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityVariable {
    PurchasePrice,
    LoanAmount,
    InterestRate,
    AmortizationTermYears,
    HoldPeriodYears,
    ExitCapRate,
    VacancyRate,
    ExpenseRatio,
    RentGrowthRate,
    SellingCostRate,
    ExpenseGrowthRate,
    DiscountRate,
    ClosingCosts,
    CapitalReserves,
}

impl SensitivityVariable {
    pub const ALL: [SensitivityVariable; 14] = [
        SensitivityVariable::PurchasePrice,
        SensitivityVariable::LoanAmount,
        SensitivityVariable::InterestRate,
        SensitivityVariable::AmortizationTermYears,
        SensitivityVariable::HoldPeriodYears,
        SensitivityVariable::ExitCapRate,
        SensitivityVariable::VacancyRate,
        SensitivityVariable::ExpenseRatio,
        SensitivityVariable::RentGrowthRate,
        SensitivityVariable::SellingCostRate,
        SensitivityVariable::ExpenseGrowthRate,
        SensitivityVariable::DiscountRate,
        SensitivityVariable::ClosingCosts,
        SensitivityVariable::CapitalReserves,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensitivityVariable::PurchasePrice => "purchase_price",
            SensitivityVariable::LoanAmount => "loan_amount",
            SensitivityVariable::InterestRate => "interest_rate",
            SensitivityVariable::AmortizationTermYears => "amortization_term_years",
            SensitivityVariable::HoldPeriodYears => "hold_period_years",
            SensitivityVariable::ExitCapRate => "exit_cap_rate",
            SensitivityVariable::VacancyRate => "vacancy_rate",
            SensitivityVariable::ExpenseRatio => "expense_ratio",
            SensitivityVariable::RentGrowthRate => "rent_growth_rate",
            SensitivityVariable::SellingCostRate => "selling_cost_rate",
            SensitivityVariable::ExpenseGrowthRate => "expense_growth_rate",
            SensitivityVariable::DiscountRate => "discount_rate",
            SensitivityVariable::ClosingCosts => "closing_costs",
            SensitivityVariable::CapitalReserves => "capital_reserves",
        }
    }

    /// Whether the field is a whole number of years.
    pub fn is_whole_years(&self) -> bool {
        matches!(
            self,
            SensitivityVariable::AmortizationTermYears | SensitivityVariable::HoldPeriodYears
        )
    }

    /// Current value of the field; unset optional rates read as zero.
    pub fn base_value(&self, a: &AssumptionSet) -> Decimal {
        match self {
            SensitivityVariable::PurchasePrice => a.purchase_price,
            SensitivityVariable::LoanAmount => a.loan_amount,
            SensitivityVariable::InterestRate => a.interest_rate,
            SensitivityVariable::AmortizationTermYears => Decimal::from(a.amortization_term_years),
            SensitivityVariable::HoldPeriodYears => Decimal::from(a.hold_period_years),
            SensitivityVariable::ExitCapRate => a.exit_cap_rate,
            SensitivityVariable::VacancyRate => a.vacancy_rate,
            SensitivityVariable::ExpenseRatio => a.expense_ratio,
            SensitivityVariable::RentGrowthRate => a.rent_growth(),
            SensitivityVariable::SellingCostRate => a.selling_costs(),
            SensitivityVariable::ExpenseGrowthRate => {
                a.expense_growth_rate.unwrap_or(Decimal::ZERO)
            }
            SensitivityVariable::DiscountRate => a.discount_rate,
            SensitivityVariable::ClosingCosts => a.closing_costs,
            SensitivityVariable::CapitalReserves => a.capital_reserves,
        }
    }

    /// A copy of `a` with this field set to `value`. The original is not
    /// touched.
    pub fn apply(&self, a: &AssumptionSet, value: Decimal) -> ValuationResult<AssumptionSet> {
        let mut next = a.clone();
        match self {
            SensitivityVariable::PurchasePrice => next.purchase_price = value,
            SensitivityVariable::LoanAmount => next.loan_amount = value,
            SensitivityVariable::InterestRate => next.interest_rate = value,
            SensitivityVariable::AmortizationTermYears => {
                next.amortization_term_years = self.whole_years(value)?
            }
            SensitivityVariable::HoldPeriodYears => {
                next.hold_period_years = self.whole_years(value)?
            }
            SensitivityVariable::ExitCapRate => next.exit_cap_rate = value,
            SensitivityVariable::VacancyRate => next.vacancy_rate = value,
            SensitivityVariable::ExpenseRatio => next.expense_ratio = value,
            SensitivityVariable::RentGrowthRate => next.rent_growth_rate = Some(value),
            SensitivityVariable::SellingCostRate => next.selling_cost_rate = Some(value),
            SensitivityVariable::ExpenseGrowthRate => next.expense_growth_rate = Some(value),
            SensitivityVariable::DiscountRate => next.discount_rate = value,
            SensitivityVariable::ClosingCosts => next.closing_costs = value,
            SensitivityVariable::CapitalReserves => next.capital_reserves = value,
        }
        Ok(next)
    }

    fn whole_years(&self, value: Decimal) -> ValuationResult<u32> {
        if !value.fract().is_zero() {
            return Err(ValuationError::validation(
                self.as_str(),
                format!("{value} is not a whole number of years"),
            ));
        }
        value.to_u32().ok_or_else(|| {
            ValuationError::validation(self.as_str(), format!("{value} is not a valid year count"))
        })
    }
}

impl fmt::Display for SensitivityVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensitivityVariable {
    type Err = ValuationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SensitivityVariable::ALL
            .iter()
            .copied()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = SensitivityVariable::ALL.iter().map(|v| v.as_str()).collect();
                ValuationError::validation(
                    "variable",
                    format!("unknown sensitivity variable '{s}'; expected one of {}", names.join(", ")),
                )
            })
    }
}

/// Result of sweeping one factor. `values`, `impact_on_irr` and
/// `impact_on_dscr` are index-aligned; a `None` entry marks a grid point
/// whose IRR did not converge or whose inputs were rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityFactor {
    pub variable: SensitivityVariable,
    pub base_value: Decimal,
    pub range: SweepRange,
    pub values: Vec<Decimal>,
    pub impact_on_irr: Vec<Option<Rate>>,
    pub impact_on_dscr: Vec<Option<Multiple>>,
    pub warnings: Vec<Warning>,
}

/// Grid `min + i·step` for `i = 0..=floor((max − min) / step)`.
///
/// Each value is computed from `min` directly rather than by repeated
/// addition, so the grid is identical on every call.
pub fn grid_values(range: &SweepRange) -> ValuationResult<Vec<Decimal>> {
    if range.step <= Decimal::ZERO {
        return Err(ValuationError::validation("range.step", "Step must be positive"));
    }
    if range.min > range.max {
        return Err(ValuationError::validation("range.min", "Min must be <= max"));
    }
    let too_many = || {
        ValuationError::validation(
            "range",
            format!("Sweep would exceed {MAX_GRID_POINTS} grid points"),
        )
    };
    let intervals = range
        .max
        .checked_sub(range.min)
        .and_then(|span| span.checked_div(range.step))
        .ok_or_else(too_many)?
        .floor();
    let count = intervals
        .to_usize()
        .and_then(|n| n.checked_add(1))
        .filter(|n| *n <= MAX_GRID_POINTS)
        .ok_or_else(too_many)?;

    (0..count)
        .map(|i| {
            range
                .step
                .checked_mul(Decimal::from(i as u64))
                .and_then(|offset| range.min.checked_add(offset))
                .ok_or_else(too_many)
        })
        .collect()
}

/// Outcome of one grid point; `None` from [`evaluate_point`] means the sweep
/// was cancelled before the point ran.
type PointOutcome = ValuationResult<(Option<Rate>, Multiple)>;

fn evaluate_point(
    assumptions: &AssumptionSet,
    baseline: &DealBaseline,
    variable: SensitivityVariable,
    value: Decimal,
    solver: &IrrSolver,
    cancel: &AtomicBool,
) -> Option<PointOutcome> {
    if cancel.load(Ordering::Relaxed) {
        return None;
    }
    let result = variable.apply(assumptions, value).and_then(|perturbed| {
        perturbed.validate()?;
        run_pipeline(&perturbed, baseline, solver)
    });
    Some(result.map(|analysis| (analysis.kpis.irr, analysis.kpis.dscr_minimum)))
}

/// Sweep one factor across its grid, re-running the full pipeline at every
/// point.
pub fn compute_sensitivity(
    assumptions: &AssumptionSet,
    baseline: &DealBaseline,
    variable: SensitivityVariable,
    range: &SweepRange,
    solver: &IrrSolver,
) -> ValuationResult<SensitivityFactor> {
    compute_sensitivity_cancellable(
        assumptions,
        baseline,
        variable,
        range,
        solver,
        &AtomicBool::new(false),
    )
}

/// As [`compute_sensitivity`], checking `cancel` before each grid point.
/// Returns [`ValuationError::Cancelled`] if the flag was raised before the
/// sweep finished.
pub fn compute_sensitivity_cancellable(
    assumptions: &AssumptionSet,
    baseline: &DealBaseline,
    variable: SensitivityVariable,
    range: &SweepRange,
    solver: &IrrSolver,
    cancel: &AtomicBool,
) -> ValuationResult<SensitivityFactor> {
    let values = grid_values(range)?;
    if variable.is_whole_years() {
        if let Some(bad) = values.iter().find(|v| !v.fract().is_zero()) {
            return Err(ValuationError::validation(
                variable.as_str(),
                format!("grid value {bad} is not a whole number of years"),
            ));
        }
    }

    tracing::debug!(variable = %variable, points = values.len(), "Running sensitivity sweep");

    let evaluate =
        |value: &Decimal| evaluate_point(assumptions, baseline, variable, *value, solver, cancel);

    #[cfg(feature = "parallel")]
    let outcomes: Vec<Option<PointOutcome>> = values.par_iter().map(evaluate).collect();
    #[cfg(not(feature = "parallel"))]
    let outcomes: Vec<Option<PointOutcome>> = values.iter().map(evaluate).collect();

    let total = outcomes.len();
    let completed = outcomes.iter().filter(|o| o.is_some()).count();
    if completed < total {
        tracing::info!(variable = %variable, completed, total, "Sensitivity sweep cancelled");
        return Err(ValuationError::Cancelled { completed, total });
    }

    let mut impact_on_irr = Vec::with_capacity(total);
    let mut impact_on_dscr = Vec::with_capacity(total);
    let mut warnings = Vec::new();

    for (value, outcome) in values.iter().zip(outcomes.into_iter().flatten()) {
        match outcome {
            Ok((irr, dscr_minimum)) => {
                if irr.is_none() {
                    warnings.push(Warning::new(
                        WarningCode::NonConvergentIrr,
                        format!("{variable} = {value}: levered IRR did not converge"),
                    ));
                }
                impact_on_irr.push(irr);
                impact_on_dscr.push(Some(dscr_minimum));
            }
            Err(e) => {
                tracing::debug!(variable = %variable, value = %value, error = %e, "Grid point failed");
                warnings.push(Warning::new(
                    WarningCode::GridPointFailed,
                    format!("{variable} = {value}: {e}"),
                ));
                impact_on_irr.push(None);
                impact_on_dscr.push(None);
            }
        }
    }

    Ok(SensitivityFactor {
        variable,
        base_value: variable.base_value(assumptions),
        range: range.clone(),
        values,
        impact_on_irr,
        impact_on_dscr,
        warnings,
    })
}

/// Input for a stateless one-factor sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensitivityInput {
    pub assumptions: AssumptionSet,
    pub baseline: DealBaseline,
    pub variable: SensitivityVariable,
    pub range: SweepRange,
}

/// Validate the base case, then sweep, wrapped in the standard envelope.
pub fn run_sensitivity(
    input: &SensitivityInput,
    solver: &IrrSolver,
) -> ValuationResult<ComputationOutput<SensitivityFactor>> {
    let start = Instant::now();

    input.assumptions.validate()?;
    input.baseline.validate()?;

    let factor = compute_sensitivity(
        &input.assumptions,
        &input.baseline,
        input.variable,
        &input.range,
        solver,
    )?;
    let warnings = factor.warnings.iter().map(|w| w.to_string()).collect();

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "One-Factor Sensitivity (Full Pipeline Re-run per Grid Point)",
        &serde_json::json!({
            "variable": input.variable,
            "range": input.range,
        }),
        warnings,
        elapsed,
        factor,
    ))
}
