use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::ValuationError;
use crate::types::{Money, Rate};
use crate::ValuationResult;

/// Absolute NPV tolerance at which a rate is accepted as the IRR.
pub const NPV_TOLERANCE: Decimal = dec!(0.000001);
pub const MAX_IRR_ITERATIONS: u32 = 100;
pub const IRR_INITIAL_GUESS: Rate = dec!(0.10);
pub const IRR_LOWER_BOUND: Rate = dec!(-0.99);
pub const IRR_UPPER_BOUND: Rate = dec!(10.0);

/// Interior points probed when looking for a sign change between the bounds.
const BRACKET_PROBES: [Decimal; 11] = [
    dec!(-0.5),
    dec!(-0.25),
    dec!(0),
    dec!(0.05),
    dec!(0.10),
    dec!(0.20),
    dec!(0.35),
    dec!(0.5),
    dec!(1),
    dec!(2),
    dec!(5),
];

/// Net Present Value of a series of cash flows, CF_0 undiscounted.
pub fn npv(rate: Rate, cash_flows: &[Money]) -> ValuationResult<Money> {
    if rate <= dec!(-1) {
        return Err(ValuationError::validation(
            "rate",
            "Discount rate must be greater than -100%",
        ));
    }

    let one_plus_r = safe_add(Decimal::ONE, rate, "NPV discount base")?;
    let mut result = Decimal::ZERO;
    let mut discount = Decimal::ONE;

    for (t, cf) in cash_flows.iter().enumerate() {
        if t > 0 {
            discount = discount
                .checked_div(one_plus_r)
                .ok_or_else(|| overflow(format!("NPV discount factor at period {t}")))?;
        }
        let pv = cf
            .checked_mul(discount)
            .ok_or_else(|| overflow(format!("NPV present value at period {t}")))?;
        result = result
            .checked_add(pv)
            .ok_or_else(|| overflow("NPV accumulation".to_string()))?;
    }

    Ok(result)
}

/// `(1 + rate)^periods` by repeated multiplication.
pub fn compound(rate: Rate, periods: u32) -> ValuationResult<Decimal> {
    let one_plus_r = safe_add(Decimal::ONE, rate, "compounding base")?;
    let mut factor = Decimal::ONE;
    for _ in 0..periods {
        factor = factor
            .checked_mul(one_plus_r)
            .ok_or_else(|| overflow(format!("compounding {rate} over {periods} periods")))?;
    }
    Ok(factor)
}

fn overflow(context: String) -> ValuationError {
    ValuationError::Overflow { context }
}

// ---------------------------------------------------------------------------
// Checked arithmetic
// ---------------------------------------------------------------------------

pub fn safe_add(a: Decimal, b: Decimal, ctx: &str) -> ValuationResult<Decimal> {
    a.checked_add(b).ok_or_else(|| overflow(ctx.to_string()))
}

pub fn safe_sub(a: Decimal, b: Decimal, ctx: &str) -> ValuationResult<Decimal> {
    a.checked_sub(b).ok_or_else(|| overflow(ctx.to_string()))
}

pub fn safe_mul(a: Decimal, b: Decimal, ctx: &str) -> ValuationResult<Decimal> {
    a.checked_mul(b).ok_or_else(|| overflow(ctx.to_string()))
}

/// `num / den`; a zero denominator is `DivisionByZero`, a quotient outside
/// the `Decimal` range is `Overflow`.
pub fn safe_div(num: Decimal, den: Decimal, ctx: &str) -> ValuationResult<Decimal> {
    if den.is_zero() {
        return Err(ValuationError::DivisionByZero {
            context: ctx.to_string(),
        });
    }
    num.checked_div(den).ok_or_else(|| overflow(ctx.to_string()))
}

/// Checked sum of a series.
pub fn safe_sum<'a>(
    values: impl IntoIterator<Item = &'a Decimal>,
    ctx: &str,
) -> ValuationResult<Decimal> {
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, v| safe_add(acc, *v, ctx))
}

/// Which phase of the solver produced the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverMethod {
    NewtonRaphson,
    Bisection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrrSolution {
    pub rate: Rate,
    pub method: SolverMethod,
    pub iterations: u32,
    /// NPV of the cash flows at `rate`
    pub residual_npv: Money,
}

/// IRR root finder: Newton-Raphson from an initial guess, falling back to
/// bisection over `[lower_bound, upper_bound]` when Newton leaves the
/// bounds, hits a flat derivative, overflows or runs out of iterations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IrrSolver {
    pub initial_guess: Rate,
    pub lower_bound: Rate,
    pub upper_bound: Rate,
    pub tolerance: Decimal,
    pub max_iterations: u32,
}

impl Default for IrrSolver {
    fn default() -> Self {
        Self {
            initial_guess: IRR_INITIAL_GUESS,
            lower_bound: IRR_LOWER_BOUND,
            upper_bound: IRR_UPPER_BOUND,
            tolerance: NPV_TOLERANCE,
            max_iterations: MAX_IRR_ITERATIONS,
        }
    }
}

impl IrrSolver {
    /// Solve for the rate r with sum CF_t / (1+r)^t = 0.
    ///
    /// Returns `None` when no root is found inside the bounds. That includes
    /// series with no sign change, which have no IRR at all.
    pub fn solve(&self, cash_flows: &[Money]) -> Option<IrrSolution> {
        if cash_flows.len() < 2 {
            return None;
        }
        let has_positive = cash_flows.iter().any(|cf| *cf > Decimal::ZERO);
        let has_negative = cash_flows.iter().any(|cf| *cf < Decimal::ZERO);
        if !(has_positive && has_negative) {
            return None;
        }

        if let Some(solution) = self.newton(cash_flows) {
            return Some(solution);
        }

        tracing::debug!(
            periods = cash_flows.len(),
            "Newton-Raphson IRR did not converge, falling back to bisection"
        );
        self.bisection(cash_flows)
    }

    fn newton(&self, cash_flows: &[Money]) -> Option<IrrSolution> {
        let mut rate = self.initial_guess;

        for i in 0..self.max_iterations {
            let (value, derivative) = npv_and_derivative(cash_flows, rate)?;

            if value.abs() < self.tolerance {
                return Some(IrrSolution {
                    rate,
                    method: SolverMethod::NewtonRaphson,
                    iterations: i + 1,
                    residual_npv: value,
                });
            }

            if derivative.is_zero() {
                return None;
            }

            let next = rate.checked_sub(value.checked_div(derivative)?)?;
            if next <= self.lower_bound || next > self.upper_bound {
                return None;
            }
            rate = next;
        }

        None
    }

    fn bisection(&self, cash_flows: &[Money]) -> Option<IrrSolution> {
        let (mut lo, mut hi) = self.find_bracket(cash_flows)?;
        let mut f_lo = sign_npv(cash_flows, lo)?;
        for (edge, value) in [(lo, f_lo), (hi, sign_npv(cash_flows, hi)?)] {
            if value.is_zero() {
                return Some(IrrSolution {
                    rate: edge,
                    method: SolverMethod::Bisection,
                    iterations: 0,
                    residual_npv: Decimal::ZERO,
                });
            }
        }

        for i in 0..self.max_iterations {
            let mid = lo.checked_add(hi)? / dec!(2);

            if let Ok(value) = npv(mid, cash_flows) {
                if value.abs() < self.tolerance {
                    return Some(IrrSolution {
                        rate: mid,
                        method: SolverMethod::Bisection,
                        iterations: i + 1,
                        residual_npv: value,
                    });
                }
            }

            let f_mid = sign_npv(cash_flows, mid)?;
            if f_mid.is_zero() {
                return Some(IrrSolution {
                    rate: mid,
                    method: SolverMethod::Bisection,
                    iterations: i + 1,
                    residual_npv: Decimal::ZERO,
                });
            }

            if f_mid.is_sign_negative() == f_lo.is_sign_negative() {
                lo = mid;
                f_lo = f_mid;
            } else {
                hi = mid;
            }
        }

        None
    }

    /// First adjacent pair of probe points, scanning upward from the lower
    /// bound, whose NPVs differ in sign.
    fn find_bracket(&self, cash_flows: &[Money]) -> Option<(Rate, Rate)> {
        let mut points = Vec::with_capacity(BRACKET_PROBES.len() + 2);
        points.push(self.lower_bound);
        points.extend(
            BRACKET_PROBES
                .iter()
                .copied()
                .filter(|p| *p > self.lower_bound && *p < self.upper_bound),
        );
        points.push(self.upper_bound);

        let mut prev: Option<(Rate, Decimal)> = None;
        for rate in points {
            let Some(value) = sign_npv(cash_flows, rate) else {
                continue;
            };
            if let Some((prev_rate, prev_value)) = prev {
                if value.is_zero()
                    || prev_value.is_zero()
                    || value.is_sign_negative() != prev_value.is_sign_negative()
                {
                    return Some((prev_rate, rate));
                }
            }
            prev = Some((rate, value));
        }
        None
    }
}

/// NPV(r) and d(NPV)/dr, or `None` on overflow.
fn npv_and_derivative(cash_flows: &[Money], rate: Rate) -> Option<(Decimal, Decimal)> {
    let one_plus_r = Decimal::ONE.checked_add(rate)?;
    if one_plus_r <= Decimal::ZERO {
        return None;
    }
    let mut value = Decimal::ZERO;
    let mut derivative = Decimal::ZERO;
    let mut discount = Decimal::ONE;

    for (t, cf) in cash_flows.iter().enumerate() {
        let pv = cf.checked_mul(discount)?;
        value = value.checked_add(pv)?;
        if t > 0 {
            // d/dr of CF_t / (1+r)^t = -t * CF_t / (1+r)^(t+1)
            let term = Decimal::from(t as i64).checked_mul(pv)?.checked_div(one_plus_r)?;
            derivative = derivative.checked_sub(term)?;
        }
        discount = discount.checked_div(one_plus_r)?;
    }

    Some((value, derivative))
}

/// A value with the same sign as NPV(r), computed without overflow across
/// the whole solver range. For r < 0 the discount factors exceed one, so the
/// series is evaluated in future-value form, sum CF_t (1+r)^(n-t), which
/// differs from NPV by the positive factor (1+r)^n.
fn sign_npv(cash_flows: &[Money], rate: Rate) -> Option<Decimal> {
    if rate >= Decimal::ZERO {
        return npv(rate, cash_flows).ok();
    }
    let one_plus_r = Decimal::ONE.checked_add(rate)?;
    if one_plus_r <= Decimal::ZERO {
        return None;
    }
    let mut value = Decimal::ZERO;
    let mut growth = Decimal::ONE;
    for cf in cash_flows.iter().rev() {
        value = value.checked_add(cf.checked_mul(growth)?)?;
        growth *= one_plus_r;
    }
    Some(value)
}
