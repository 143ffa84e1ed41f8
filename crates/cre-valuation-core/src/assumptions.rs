use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::ValuationError;
use crate::time_value::safe_add;
use crate::types::{Money, Rate};
use crate::ValuationResult;

/// Longest hold or amortization term accepted, in years.
pub const MAX_TERM_YEARS: u32 = 100;

/// Discount rate used for NPV when the request does not supply one.
pub const DEFAULT_DISCOUNT_RATE: Rate = dec!(0.10);

/// How often the loan pays. Debt schedule entries are always annual; with
/// monthly payments each entry aggregates twelve monthly instalments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentFrequency {
    #[default]
    Annual,
    Monthly,
}

impl PaymentFrequency {
    pub fn periods_per_year(&self) -> u32 {
        match self {
            PaymentFrequency::Annual => 1,
            PaymentFrequency::Monthly => 12,
        }
    }
}

/// Acquisition, financing and operating assumptions for one valuation run.
///
/// Unknown keys are rejected so that a misspelled field cannot silently fall
/// back to its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssumptionSet {
    /// Acquisition price
    pub purchase_price: Money,
    /// Senior loan principal at closing
    pub loan_amount: Money,
    /// Annual loan interest rate
    pub interest_rate: Rate,
    /// Amortization period of the loan in years
    pub amortization_term_years: u32,
    /// Investment holding period in years
    pub hold_period_years: u32,
    /// Cap rate applied to forward NOI at sale
    pub exit_cap_rate: Rate,
    /// Vacancy and collection loss as a share of gross potential rent
    pub vacancy_rate: Rate,
    /// Operating expenses as a share of effective gross income
    pub expense_ratio: Rate,
    /// Annual growth of gross potential rent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rent_growth_rate: Option<Rate>,
    /// Transaction costs at exit as a share of gross sale value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selling_cost_rate: Option<Rate>,
    /// Annual growth of a fixed year-1 expense amount. Only used when the
    /// deal baseline supplies operating expenses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expense_growth_rate: Option<Rate>,
    /// Discount rate for the NPV KPI
    #[serde(default = "default_discount_rate")]
    pub discount_rate: Rate,
    /// Acquisition closing costs, funded with equity at t=0
    #[serde(default)]
    pub closing_costs: Money,
    /// Annual capital reserve, deducted from cash flow below NOI
    #[serde(default)]
    pub capital_reserves: Money,
    #[serde(default)]
    pub payment_frequency: PaymentFrequency,
}

fn default_discount_rate() -> Rate {
    DEFAULT_DISCOUNT_RATE
}

impl AssumptionSet {
    /// Check every range constraint, returning the first violation.
    pub fn validate(&self) -> ValuationResult<()> {
        if self.purchase_price <= Decimal::ZERO {
            return Err(ValuationError::validation(
                "purchase_price",
                "Purchase price must be positive",
            ));
        }
        if self.loan_amount < Decimal::ZERO || self.loan_amount > self.purchase_price {
            return Err(ValuationError::validation(
                "loan_amount",
                "Loan amount must be between 0 and the purchase price",
            ));
        }
        check_unit_interval("interest_rate", self.interest_rate)?;
        if self.amortization_term_years == 0 || self.amortization_term_years > MAX_TERM_YEARS {
            return Err(ValuationError::validation(
                "amortization_term_years",
                format!("Amortization term must be between 1 and {MAX_TERM_YEARS} years"),
            ));
        }
        if self.hold_period_years == 0 || self.hold_period_years > MAX_TERM_YEARS {
            return Err(ValuationError::validation(
                "hold_period_years",
                format!("Hold period must be between 1 and {MAX_TERM_YEARS} years"),
            ));
        }
        if self.exit_cap_rate <= Decimal::ZERO || self.exit_cap_rate > Decimal::ONE {
            return Err(ValuationError::validation(
                "exit_cap_rate",
                "Exit cap rate must be in (0, 1]",
            ));
        }
        check_unit_interval("vacancy_rate", self.vacancy_rate)?;
        check_unit_interval("expense_ratio", self.expense_ratio)?;
        if let Some(rate) = self.selling_cost_rate {
            check_unit_interval("selling_cost_rate", rate)?;
        }
        if let Some(rate) = self.rent_growth_rate {
            check_growth("rent_growth_rate", rate)?;
        }
        if let Some(rate) = self.expense_growth_rate {
            check_growth("expense_growth_rate", rate)?;
        }
        check_unit_interval("discount_rate", self.discount_rate)?;
        if self.closing_costs < Decimal::ZERO {
            return Err(ValuationError::validation(
                "closing_costs",
                "Closing costs cannot be negative",
            ));
        }
        if self.capital_reserves < Decimal::ZERO {
            return Err(ValuationError::validation(
                "capital_reserves",
                "Capital reserves cannot be negative",
            ));
        }
        Ok(())
    }

    pub fn rent_growth(&self) -> Rate {
        self.rent_growth_rate.unwrap_or(Decimal::ZERO)
    }

    pub fn selling_costs(&self) -> Rate {
        self.selling_cost_rate.unwrap_or(Decimal::ZERO)
    }

    /// Cash the buyer funds at closing: price less debt plus closing costs.
    pub fn equity_outlay(&self) -> ValuationResult<Money> {
        safe_add(
            self.purchase_price - self.loan_amount,
            self.closing_costs,
            "equity outlay",
        )
    }

    /// Purchase price plus closing costs, the all-cash buyer's outlay.
    pub fn acquisition_cost(&self) -> ValuationResult<Money> {
        safe_add(self.purchase_price, self.closing_costs, "acquisition cost")
    }

    pub fn loan_to_value(&self) -> Rate {
        self.loan_amount / self.purchase_price
    }
}

fn check_unit_interval(field: &str, value: Rate) -> ValuationResult<()> {
    if value < Decimal::ZERO || value > Decimal::ONE {
        return Err(ValuationError::validation(
            field,
            format!("{value} is outside [0, 1]"),
        ));
    }
    Ok(())
}

/// Growth rates may be negative (declining rents) but not at or below -100%.
fn check_growth(field: &str, value: Rate) -> ValuationResult<()> {
    if value <= dec!(-1) || value > Decimal::ONE {
        return Err(ValuationError::validation(
            field,
            format!("{value} is outside (-1, 1]"),
        ));
    }
    Ok(())
}
