use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::assumptions::{AssumptionSet, PaymentFrequency, MAX_TERM_YEARS};
use crate::error::ValuationError;
use crate::time_value::{compound, safe_add, safe_div};
use crate::types::{with_metadata, ComputationOutput, Money, Rate};
use crate::ValuationResult;

/// Loan terms needed to amortize the acquisition debt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanTerms {
    pub loan_amount: Money,
    /// Annual nominal rate
    pub interest_rate: Rate,
    pub amortization_term_years: u32,
    #[serde(default)]
    pub payment_frequency: PaymentFrequency,
}

impl From<&AssumptionSet> for LoanTerms {
    fn from(a: &AssumptionSet) -> Self {
        LoanTerms {
            loan_amount: a.loan_amount,
            interest_rate: a.interest_rate,
            amortization_term_years: a.amortization_term_years,
            payment_frequency: a.payment_frequency,
        }
    }
}

/// One year of the debt schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebtScheduleEntry {
    pub period: u32,
    pub beginning_balance: Money,
    pub interest_payment: Money,
    pub principal_payment: Money,
    pub ending_balance: Money,
    /// Interest plus principal paid during the year
    pub annual_debt_service: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebtSchedule {
    /// Level payment per payment period (annual or monthly)
    pub periodic_payment: Money,
    pub entries: Vec<DebtScheduleEntry>,
    pub total_interest_paid: Money,
    pub total_principal_paid: Money,
}

impl DebtSchedule {
    /// Outstanding balance after `period` years. Past the end of the
    /// schedule the last ending balance carries forward; before period 1 it
    /// is the original principal.
    pub fn balance_after(&self, period: u32, loan_amount: Money) -> Money {
        if period == 0 {
            return loan_amount;
        }
        self.entries
            .get(period as usize - 1)
            .or_else(|| self.entries.last())
            .map(|e| e.ending_balance)
            .unwrap_or(loan_amount)
    }

    /// Debt service paid in `period`, zero once the loan is retired.
    pub fn debt_service(&self, period: u32) -> Money {
        if period == 0 {
            return Decimal::ZERO;
        }
        self.entries
            .get(period as usize - 1)
            .map(|e| e.annual_debt_service)
            .unwrap_or(Decimal::ZERO)
    }
}

/// Level annuity payment `P·r / (1 − (1+r)^−n)`; straight-line `P/n` when
/// the periodic rate is zero.
pub fn level_payment(principal: Money, periodic_rate: Rate, periods: u32) -> ValuationResult<Money> {
    if periods == 0 {
        return Err(ValuationError::InvalidLoanTerms(
            "number of payment periods must be positive".into(),
        ));
    }
    if periodic_rate.is_zero() {
        return Ok(principal / Decimal::from(periods));
    }

    let growth = match compound(periodic_rate, periods) {
        Ok(g) => g,
        // (1+r)^-n is below Decimal precision: the payment is pure interest
        Err(ValuationError::Overflow { .. }) => return Ok(principal * periodic_rate),
        Err(e) => return Err(e),
    };
    let denominator = Decimal::ONE - Decimal::ONE / growth;
    safe_div(
        principal * periodic_rate,
        denominator,
        "annuity payment denominator",
    )
}

/// Build an annual debt schedule covering `min(amortization_term_years,
/// through_year)` years.
///
/// The final instalment of the full term retires whatever balance remains,
/// so the principal paid over the whole term equals the loan amount.
pub fn build_schedule(terms: &LoanTerms, through_year: u32) -> ValuationResult<DebtSchedule> {
    if terms.interest_rate < Decimal::ZERO {
        return Err(ValuationError::InvalidLoanTerms(format!(
            "interest rate {} is negative",
            terms.interest_rate
        )));
    }
    if terms.interest_rate > Decimal::ONE {
        return Err(ValuationError::InvalidLoanTerms(format!(
            "interest rate {} exceeds 100%",
            terms.interest_rate
        )));
    }
    if terms.amortization_term_years == 0 {
        return Err(ValuationError::InvalidLoanTerms(
            "amortization term must be at least one year".into(),
        ));
    }
    if terms.amortization_term_years > MAX_TERM_YEARS {
        return Err(ValuationError::InvalidLoanTerms(format!(
            "amortization term exceeds {MAX_TERM_YEARS} years"
        )));
    }
    if terms.loan_amount < Decimal::ZERO {
        return Err(ValuationError::InvalidLoanTerms(format!(
            "loan amount {} is negative",
            terms.loan_amount
        )));
    }

    let per_year = terms.payment_frequency.periods_per_year();
    let periodic_rate = terms.interest_rate / Decimal::from(per_year);
    let total_payments = terms.amortization_term_years * per_year;
    let periodic_payment = level_payment(terms.loan_amount, periodic_rate, total_payments)?;

    let years = terms.amortization_term_years.min(through_year);
    let mut entries = Vec::with_capacity(years as usize);
    let mut balance = terms.loan_amount;
    let mut total_interest_paid = Decimal::ZERO;
    let mut total_principal_paid = Decimal::ZERO;
    let mut payment_number = 0u32;

    for year in 1..=years {
        let beginning_balance = balance;
        let mut interest_payment = Decimal::ZERO;
        let mut principal_payment = Decimal::ZERO;

        for _ in 0..per_year {
            payment_number += 1;
            let interest = balance * periodic_rate;
            let mut principal = periodic_payment - interest;
            if payment_number == total_payments || principal > balance {
                principal = balance;
            }
            balance -= principal;
            interest_payment = safe_add(interest_payment, interest, "annual interest")?;
            principal_payment = safe_add(principal_payment, principal, "annual principal")?;
        }

        total_interest_paid = safe_add(total_interest_paid, interest_payment, "total interest")?;
        total_principal_paid += principal_payment;
        let annual_debt_service =
            safe_add(interest_payment, principal_payment, "annual debt service")?;

        entries.push(DebtScheduleEntry {
            period: year,
            beginning_balance,
            interest_payment,
            principal_payment,
            ending_balance: balance,
            annual_debt_service,
        });
    }

    Ok(DebtSchedule {
        periodic_payment,
        entries,
        total_interest_paid,
        total_principal_paid,
    })
}

/// Full-term amortization schedule wrapped in the standard output envelope.
pub fn amortize(terms: &LoanTerms) -> ValuationResult<ComputationOutput<DebtSchedule>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let schedule = build_schedule(terms, terms.amortization_term_years)?;

    if terms.loan_amount.is_zero() {
        warnings.push("Loan amount is zero; schedule contains no debt service".into());
    }

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Level-Payment Loan Amortization",
        terms,
        warnings,
        elapsed,
        schedule,
    ))
}
