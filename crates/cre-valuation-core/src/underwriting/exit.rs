use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::assumptions::AssumptionSet;
use crate::error::ValuationError;
use crate::time_value::{safe_div, safe_sub};
use crate::types::Money;
use crate::underwriting::amortization::DebtSchedule;
use crate::underwriting::projection::CashFlowPeriod;
use crate::ValuationResult;

/// Sale of the property at the end of the hold period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitResult {
    /// Forward-year NOI capitalised at exit
    pub terminal_noi: Money,
    pub gross_sale_value: Money,
    pub selling_costs: Money,
    pub loan_payoff_balance: Money,
    pub net_sale_proceeds: Money,
}

impl ExitResult {
    /// Sale proceeds to an unlevered owner, before any loan payoff.
    pub fn unlevered_proceeds(&self) -> Money {
        self.gross_sale_value - self.selling_costs
    }
}

/// Price the exit: forward NOI over the exit cap rate, less selling costs
/// and the loan balance outstanding at the end of the hold.
pub fn value_exit(
    assumptions: &AssumptionSet,
    forward: &CashFlowPeriod,
    schedule: &DebtSchedule,
) -> ValuationResult<ExitResult> {
    let cap_rate = assumptions.exit_cap_rate;
    if cap_rate <= Decimal::ZERO {
        return Err(ValuationError::DegenerateCapRate { cap_rate });
    }

    let terminal_noi = forward.net_operating_income;
    let gross_sale_value = safe_div(terminal_noi, cap_rate, "gross sale value (NOI / exit cap)")?;
    let selling_costs = gross_sale_value * assumptions.selling_costs();
    let loan_payoff_balance =
        schedule.balance_after(assumptions.hold_period_years, assumptions.loan_amount);
    let net_sale_proceeds = safe_sub(
        gross_sale_value - selling_costs,
        loan_payoff_balance,
        "net sale proceeds",
    )?;

    Ok(ExitResult {
        terminal_noi,
        gross_sale_value,
        selling_costs,
        loan_payoff_balance,
        net_sale_proceeds,
    })
}
