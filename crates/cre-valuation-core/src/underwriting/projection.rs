use serde::{Deserialize, Serialize};

use crate::assumptions::AssumptionSet;
use crate::baseline::DealBaseline;
use crate::error::ValuationError;
use crate::time_value::{compound, safe_add, safe_mul, safe_sub, safe_sum};
use crate::types::{Money, Rate};
use crate::ValuationResult;

/// One year of the unlevered operating pro forma.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashFlowPeriod {
    pub period: u32,
    pub gross_potential_rent: Money,
    pub vacancy_loss: Money,
    pub other_income: Money,
    pub effective_gross_income: Money,
    pub operating_expenses: Money,
    pub net_operating_income: Money,
}

/// How operating expenses are derived each year.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseBasis {
    /// Share of that year's effective gross income
    Ratio(Rate),
    /// Fixed year-1 amount compounding at `rate`
    Growth { year_one: Money, rate: Rate },
}

impl ExpenseBasis {
    /// Growth applies only when both the growth rate and a year-1 expense
    /// amount are available; the expense ratio is used otherwise.
    pub fn select(assumptions: &AssumptionSet, baseline: &DealBaseline) -> Self {
        match (assumptions.expense_growth_rate, baseline.operating_expenses) {
            (Some(rate), Some(year_one)) => ExpenseBasis::Growth { year_one, rate },
            _ => ExpenseBasis::Ratio(assumptions.expense_ratio),
        }
    }
}

/// Projects the operating pro forma from a baseline snapshot and a set of
/// growth assumptions. Borrows both; projection never mutates its inputs.
#[derive(Debug, Clone)]
pub struct CashFlowProjector<'a> {
    baseline: &'a DealBaseline,
    vacancy_rate: Rate,
    rent_growth: Rate,
    expenses: ExpenseBasis,
    hold_period_years: u32,
}

impl<'a> CashFlowProjector<'a> {
    pub fn new(assumptions: &AssumptionSet, baseline: &'a DealBaseline) -> Self {
        CashFlowProjector {
            baseline,
            vacancy_rate: assumptions.vacancy_rate,
            rent_growth: assumptions.rent_growth(),
            expenses: ExpenseBasis::select(assumptions, baseline),
            hold_period_years: assumptions.hold_period_years,
        }
    }

    pub fn expense_basis(&self) -> ExpenseBasis {
        self.expenses
    }

    /// Pro forma line items for year `t` (1-based).
    pub fn period(&self, t: u32) -> ValuationResult<CashFlowPeriod> {
        if t == 0 {
            return Err(ValuationError::validation("period", "Periods start at 1"));
        }
        let gross_potential_rent = safe_mul(
            self.baseline.gross_potential_rent,
            compound(self.rent_growth, t - 1)?,
            "gross potential rent",
        )?;
        let vacancy_loss = gross_potential_rent * self.vacancy_rate;
        let other_income = self.baseline.other_income;
        let effective_gross_income = safe_add(
            gross_potential_rent - vacancy_loss,
            other_income,
            "effective gross income",
        )?;

        let operating_expenses = match self.expenses {
            ExpenseBasis::Ratio(ratio) => effective_gross_income * ratio,
            ExpenseBasis::Growth { year_one, rate } => {
                safe_mul(year_one, compound(rate, t - 1)?, "operating expenses")?
            }
        };
        let net_operating_income = safe_sub(
            effective_gross_income,
            operating_expenses,
            "net operating income",
        )?;

        Ok(CashFlowPeriod {
            period: t,
            gross_potential_rent,
            vacancy_loss,
            other_income,
            effective_gross_income,
            operating_expenses,
            net_operating_income,
        })
    }

    /// Years 1..=hold_period_years, in order.
    pub fn project(&self) -> ValuationResult<Vec<CashFlowPeriod>> {
        (1..=self.hold_period_years).map(|t| self.period(t)).collect()
    }

    /// The year after the hold period, used for exit pricing.
    pub fn forward_period(&self) -> ValuationResult<CashFlowPeriod> {
        self.period(self.hold_period_years + 1)
    }
}

/// Sum of NOI over a projection.
pub fn total_noi(periods: &[CashFlowPeriod]) -> ValuationResult<Money> {
    safe_sum(periods.iter().map(|p| &p.net_operating_income), "total NOI")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assumptions::{PaymentFrequency, DEFAULT_DISCOUNT_RATE};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn assumptions() -> AssumptionSet {
        AssumptionSet {
            purchase_price: dec!(1000000),
            loan_amount: dec!(800000),
            interest_rate: dec!(0.05),
            amortization_term_years: 30,
            hold_period_years: 5,
            exit_cap_rate: dec!(0.05),
            vacancy_rate: dec!(0.05),
            expense_ratio: dec!(0.35),
            rent_growth_rate: Some(dec!(0.03)),
            selling_cost_rate: None,
            expense_growth_rate: None,
            discount_rate: DEFAULT_DISCOUNT_RATE,
            closing_costs: Decimal::ZERO,
            capital_reserves: Decimal::ZERO,
            payment_frequency: PaymentFrequency::Annual,
        }
    }

    fn baseline() -> DealBaseline {
        DealBaseline {
            gross_potential_rent: dec!(100000),
            other_income: dec!(2000),
            operating_expenses: Some(dec!(30000)),
        }
    }

    #[test]
    fn test_year_one_line_items() {
        let a = assumptions();
        let b = baseline();
        let p = CashFlowProjector::new(&a, &b).period(1).unwrap();
        assert_eq!(p.gross_potential_rent, dec!(100000));
        assert_eq!(p.vacancy_loss, dec!(5000));
        assert_eq!(p.effective_gross_income, dec!(97000));
        assert_eq!(p.operating_expenses, dec!(33950));
        assert_eq!(p.net_operating_income, dec!(63050));
    }

    #[test]
    fn test_rent_grows_from_year_two() {
        let a = assumptions();
        let b = baseline();
        let periods = CashFlowProjector::new(&a, &b).project().unwrap();
        assert_eq!(periods.len(), 5);
        assert_eq!(periods[1].gross_potential_rent, dec!(103000));
        assert_eq!(periods[2].gross_potential_rent, dec!(106090));
    }

    #[test]
    fn test_noi_identity_every_period() {
        let a = assumptions();
        let b = baseline();
        for p in CashFlowProjector::new(&a, &b).project().unwrap() {
            let diff = p.effective_gross_income - p.operating_expenses - p.net_operating_income;
            assert!(diff.abs() < dec!(0.000001));
        }
    }

    #[test]
    fn test_expense_growth_curve_when_supplied() {
        let mut a = assumptions();
        a.expense_growth_rate = Some(dec!(0.02));
        let b = baseline();
        let projector = CashFlowProjector::new(&a, &b);
        assert!(matches!(projector.expense_basis(), ExpenseBasis::Growth { .. }));
        assert_eq!(projector.period(1).unwrap().operating_expenses, dec!(30000));
        assert_eq!(projector.period(2).unwrap().operating_expenses, dec!(30600));
    }

    #[test]
    fn test_expense_growth_without_baseline_amount_uses_ratio() {
        let mut a = assumptions();
        a.expense_growth_rate = Some(dec!(0.02));
        let b = DealBaseline {
            operating_expenses: None,
            ..baseline()
        };
        let projector = CashFlowProjector::new(&a, &b);
        assert_eq!(projector.expense_basis(), ExpenseBasis::Ratio(dec!(0.35)));
    }

    #[test]
    fn test_forward_period_is_hold_plus_one() {
        let a = assumptions();
        let b = baseline();
        let forward = CashFlowProjector::new(&a, &b).forward_period().unwrap();
        assert_eq!(forward.period, 6);
    }
}
