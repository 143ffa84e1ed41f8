use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::assumptions::AssumptionSet;
use crate::error::ValuationError;
use crate::time_value::{
    npv, safe_add, safe_div, safe_sub, safe_sum, IrrSolution, IrrSolver,
};
use crate::types::{Money, Multiple, Rate, Years};
use crate::underwriting::amortization::DebtSchedule;
use crate::underwriting::exit::ExitResult;
use crate::underwriting::projection::CashFlowPeriod;
use crate::warnings::{Warning, WarningCode};
use crate::ValuationResult;

const DSCR_COVENANT: Decimal = dec!(1.20);
const HIGH_LTV: Decimal = dec!(0.80);

/// Return metrics for one valuation. Rates are fractions, currency in base
/// units. Field names are part of the export schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiResult {
    /// Levered IRR on equity; null only when the solver found no root
    pub irr: Option<Rate>,
    pub unlevered_irr: Option<Rate>,
    /// NPV of levered cash flows at the assumption set's discount rate
    pub npv: Money,
    pub equity_multiple: Multiple,
    /// NOI / debt service for every hold year, index-aligned with the pro
    /// forma. Years with no debt service (all-cash deals, or after the loan
    /// is retired) report 0, meaning "not applicable" rather than zero
    /// coverage; `dscr_minimum` skips them.
    pub dscr: Vec<Multiple>,
    pub dscr_minimum: Multiple,
    /// Going-in cap rate: NOI year 1 / purchase price
    pub cap_rate: Rate,
    pub ltv: Rate,
    pub cash_on_cash: Rate,
    pub debt_yield: Rate,
    pub break_even_occupancy: Rate,
    /// Years until cumulative levered cash flow turns non-negative
    pub payback_period: Option<Years>,
    /// Year-1 effective gross income
    pub egi: Money,
    /// Year-1 net operating income
    pub noi: Money,
}

/// Output of the returns solver: KPIs plus the cash-flow vectors behind them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnsOutput {
    pub kpis: KpiResult,
    /// t = 0..=hold, equity perspective
    pub levered_cash_flows: Vec<Money>,
    /// t = 0..=hold, all-cash perspective
    pub unlevered_cash_flows: Vec<Money>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub irr_solution: Option<IrrSolution>,
    pub warnings: Vec<Warning>,
}

/// Operating cash flow to equity for each hold year, before sale proceeds.
fn operating_cash_flows(
    assumptions: &AssumptionSet,
    periods: &[CashFlowPeriod],
    schedule: &DebtSchedule,
) -> ValuationResult<Vec<Money>> {
    periods
        .iter()
        .map(|p| {
            let after_debt = safe_sub(
                p.net_operating_income,
                schedule.debt_service(p.period),
                "cash flow after debt service",
            )?;
            safe_sub(after_debt, assumptions.capital_reserves, "cash flow after reserves")
        })
        .collect()
}

/// Add the sale proceeds to the final year of a cash-flow vector.
fn add_terminal(flows: &mut [Money], proceeds: Money) -> ValuationResult<()> {
    if let Some(last) = flows.last_mut() {
        *last = safe_add(*last, proceeds, "final-year cash flow with sale proceeds")?;
    }
    Ok(())
}

/// CF_0 = -equity; CF_t = NOI_t - DS_t - reserves; CF_n adds net sale proceeds.
pub fn levered_cash_flows(
    assumptions: &AssumptionSet,
    periods: &[CashFlowPeriod],
    schedule: &DebtSchedule,
    exit: &ExitResult,
) -> ValuationResult<Vec<Money>> {
    let mut flows = Vec::with_capacity(periods.len() + 1);
    flows.push(-assumptions.equity_outlay()?);
    flows.extend(operating_cash_flows(assumptions, periods, schedule)?);
    add_terminal(&mut flows, exit.net_sale_proceeds)?;
    Ok(flows)
}

/// CF_0 = -(price + closing costs); CF_t = NOI_t - reserves; CF_n adds
/// gross sale value less selling costs.
pub fn unlevered_cash_flows(
    assumptions: &AssumptionSet,
    periods: &[CashFlowPeriod],
    exit: &ExitResult,
) -> ValuationResult<Vec<Money>> {
    let mut flows = Vec::with_capacity(periods.len() + 1);
    flows.push(-assumptions.acquisition_cost()?);
    for p in periods {
        flows.push(safe_sub(
            p.net_operating_income,
            assumptions.capital_reserves,
            "unlevered cash flow after reserves",
        )?);
    }
    add_terminal(&mut flows, exit.unlevered_proceeds())?;
    Ok(flows)
}

/// First time cumulative cash flow reaches zero, interpolating linearly
/// within the year it happens. `None` when equity is never recovered.
pub fn payback_period(cash_flows: &[Money]) -> ValuationResult<Option<Years>> {
    let Some(first) = cash_flows.first() else {
        return Ok(None);
    };
    let mut cumulative = *first;
    if cumulative >= Decimal::ZERO {
        return Ok(Some(Decimal::ZERO));
    }
    for (t, cf) in cash_flows.iter().enumerate().skip(1) {
        let before = cumulative;
        cumulative = safe_add(cumulative, *cf, "cumulative cash flow")?;
        if cumulative >= Decimal::ZERO {
            // before < 0 <= before + cf, so cf > 0 and the fraction is in (0, 1]
            let fraction = safe_div(-before, *cf, "payback interpolation")?;
            return Ok(Some(Decimal::from(t as u64 - 1) + fraction));
        }
    }
    Ok(None)
}

/// Combine the pro forma, debt schedule and exit into levered and unlevered
/// cash flows and solve every KPI.
///
/// A non-convergent IRR is not an error: the IRR is reported as `None` and
/// a `NON_CONVERGENT_IRR` warning is attached. Zero equity is fatal.
pub fn solve_returns(
    assumptions: &AssumptionSet,
    periods: &[CashFlowPeriod],
    schedule: &DebtSchedule,
    exit: &ExitResult,
    solver: &IrrSolver,
) -> ValuationResult<ReturnsOutput> {
    let year_one = periods
        .first()
        .ok_or_else(|| ValuationError::validation("hold_period_years", "Projection is empty"))?;
    let mut warnings: Vec<Warning> = Vec::new();

    let equity = assumptions.equity_outlay()?;
    if equity <= Decimal::ZERO {
        return Err(ValuationError::DivisionByZero {
            context: "equity outlay (purchase price less loan plus closing costs)".into(),
        });
    }

    let operating = operating_cash_flows(assumptions, periods, schedule)?;
    let levered = levered_cash_flows(assumptions, periods, schedule, exit)?;
    let unlevered = unlevered_cash_flows(assumptions, periods, exit)?;

    // --- IRR ---
    let irr_solution = solver.solve(&levered);
    if irr_solution.is_none() {
        warnings.push(Warning::new(
            WarningCode::NonConvergentIrr,
            "Levered IRR did not converge within the solver range; reported as null",
        ));
    }
    let unlevered_solution = solver.solve(&unlevered);
    if unlevered_solution.is_none() {
        warnings.push(Warning::new(
            WarningCode::NonConvergentIrr,
            "Unlevered IRR did not converge within the solver range; reported as null",
        ));
    }

    let npv = npv(assumptions.discount_rate, &levered)?;

    // --- Coverage ---
    let mut dscr = Vec::with_capacity(periods.len());
    let mut dscr_minimum: Option<Decimal> = None;
    for p in periods {
        let debt_service = schedule.debt_service(p.period);
        if debt_service.is_zero() {
            dscr.push(Decimal::ZERO);
            continue;
        }
        let coverage = safe_div(p.net_operating_income, debt_service, "DSCR (NOI / debt service)")?;
        dscr_minimum = Some(dscr_minimum.map_or(coverage, |m| m.min(coverage)));
        dscr.push(coverage);
    }
    let dscr_minimum = match dscr_minimum {
        Some(m) => m,
        None => {
            warnings.push(Warning::new(
                WarningCode::NoDebtService,
                "No debt service during the hold period; DSCR reported as 0",
            ));
            Decimal::ZERO
        }
    };

    // --- Equity returns ---
    let positive_operating = safe_sum(
        operating.iter().filter(|cf| **cf > Decimal::ZERO),
        "positive operating cash flow",
    )?;
    let distributions = safe_add(
        positive_operating,
        exit.net_sale_proceeds,
        "equity distributions",
    )?;
    let equity_multiple = safe_div(distributions, equity, "equity multiple")?;
    let cash_on_cash = safe_div(operating[0], equity, "cash-on-cash (year-1 cash flow / equity)")?;

    // --- Going-in metrics ---
    let noi_one = year_one.net_operating_income;
    let cap_rate = safe_div(noi_one, assumptions.purchase_price, "cap rate (NOI / purchase price)")?;
    let ltv = safe_div(
        assumptions.loan_amount,
        assumptions.purchase_price,
        "LTV (loan / purchase price)",
    )?;
    let debt_yield = if assumptions.loan_amount.is_zero() {
        Decimal::ZERO
    } else {
        safe_div(noi_one, assumptions.loan_amount, "debt yield (NOI / loan)")?
    };
    let break_even_occupancy = safe_div(
        safe_add(
            year_one.operating_expenses,
            schedule.debt_service(1),
            "break-even occupancy (expenses plus debt service)",
        )?,
        year_one.gross_potential_rent,
        "break-even occupancy (gross potential rent)",
    )?;

    if dscr_minimum > Decimal::ZERO && dscr_minimum < DSCR_COVENANT {
        warnings.push(Warning::new(
            WarningCode::LowDscr,
            format!("Minimum DSCR of {dscr_minimum:.2}x is below the 1.20x lender covenant"),
        ));
    }
    if ltv > HIGH_LTV {
        warnings.push(Warning::new(
            WarningCode::HighLeverage,
            format!("LTV of {:.1}% exceeds 80%", ltv * dec!(100)),
        ));
    }

    let kpis = KpiResult {
        irr: irr_solution.as_ref().map(|s| s.rate),
        unlevered_irr: unlevered_solution.as_ref().map(|s| s.rate),
        npv,
        equity_multiple,
        dscr,
        dscr_minimum,
        cap_rate,
        ltv,
        cash_on_cash,
        debt_yield,
        break_even_occupancy,
        payback_period: payback_period(&levered)?,
        egi: year_one.effective_gross_income,
        noi: noi_one,
    };

    Ok(ReturnsOutput {
        kpis,
        levered_cash_flows: levered,
        unlevered_cash_flows: unlevered,
        irr_solution,
        warnings,
    })
}
