use std::collections::HashMap;
use std::sync::RwLock;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::ValuationError;
use crate::time_value::{safe_mul, safe_sum};
use crate::types::{DealId, Money};
use crate::ValuationResult;

/// Year-1 revenue and expense baseline for a deal, as produced by the
/// intake/normalization step. Treated as an immutable snapshot for the
/// duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DealBaseline {
    /// Year-1 gross potential rent
    pub gross_potential_rent: Money,
    /// Year-1 other income (parking, laundry, fees)
    #[serde(default)]
    pub other_income: Money,
    /// Year-1 operating expenses, grown by `expense_growth_rate` when that
    /// assumption is supplied. Ignored otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operating_expenses: Option<Money>,
}

impl DealBaseline {
    pub fn validate(&self) -> ValuationResult<()> {
        if self.gross_potential_rent <= Decimal::ZERO {
            return Err(ValuationError::validation(
                "gross_potential_rent",
                "Gross potential rent must be positive",
            ));
        }
        if self.other_income < Decimal::ZERO {
            return Err(ValuationError::validation(
                "other_income",
                "Other income cannot be negative",
            ));
        }
        if let Some(opex) = self.operating_expenses {
            if opex < Decimal::ZERO {
                return Err(ValuationError::validation(
                    "operating_expenses",
                    "Operating expenses cannot be negative",
                ));
            }
        }
        Ok(())
    }

    /// Annualize normalized trailing-twelve-month rows: the monthly average
    /// of each line item times twelve. Partial years are scaled up the same
    /// way.
    pub fn from_t12(months: &[T12Month]) -> ValuationResult<Self> {
        if months.is_empty() {
            return Err(ValuationError::validation(
                "t12",
                "No T-12 data found for deal",
            ));
        }
        let count = Decimal::from(months.len() as u64);
        let annualize = |line: fn(&T12Month) -> &Money, ctx: &str| -> ValuationResult<Money> {
            let total = safe_sum(months.iter().map(line), ctx)?;
            safe_mul(total / count, dec!(12), ctx)
        };

        Ok(DealBaseline {
            gross_potential_rent: annualize(|m| &m.gross_rent, "T-12 gross rent")?,
            other_income: annualize(|m| &m.other_income, "T-12 other income")?,
            operating_expenses: Some(annualize(
                |m| &m.operating_expenses,
                "T-12 operating expenses",
            )?),
        })
    }
}

/// One normalized month of trailing operating history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct T12Month {
    pub year: i32,
    pub month: u32,
    pub gross_rent: Money,
    #[serde(default)]
    pub other_income: Money,
    #[serde(default)]
    pub operating_expenses: Money,
}

/// Read access to each deal's normalized baseline.
pub trait BaselineSource: Send + Sync {
    fn baseline(&self, deal_id: DealId) -> ValuationResult<DealBaseline>;
}

/// Baselines held in memory, keyed by deal.
#[derive(Debug, Default)]
pub struct InMemoryBaselines {
    baselines: RwLock<HashMap<DealId, DealBaseline>>,
}

impl InMemoryBaselines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the baseline for a deal. Runs already in flight keep the
    /// snapshot they fetched.
    pub fn insert(&self, deal_id: DealId, baseline: DealBaseline) -> ValuationResult<()> {
        let mut guard = self
            .baselines
            .write()
            .map_err(|_| ValuationError::Storage("baseline lock poisoned".into()))?;
        guard.insert(deal_id, baseline);
        Ok(())
    }
}

impl BaselineSource for InMemoryBaselines {
    fn baseline(&self, deal_id: DealId) -> ValuationResult<DealBaseline> {
        let guard = self
            .baselines
            .read()
            .map_err(|_| ValuationError::Storage("baseline lock poisoned".into()))?;
        guard
            .get(&deal_id)
            .cloned()
            .ok_or_else(|| ValuationError::NotFound {
                entity: "deal baseline".into(),
                id: deal_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn month(m: u32, rent: Decimal, opex: Decimal) -> T12Month {
        T12Month {
            year: 2024,
            month: m,
            gross_rent: rent,
            other_income: dec!(100),
            operating_expenses: opex,
        }
    }

    #[test]
    fn test_from_t12_annualizes_full_year() {
        let months: Vec<T12Month> = (1..=12).map(|m| month(m, dec!(8000), dec!(3000))).collect();
        let baseline = DealBaseline::from_t12(&months).unwrap();
        assert_eq!(baseline.gross_potential_rent, dec!(96000));
        assert_eq!(baseline.other_income, dec!(1200));
        assert_eq!(baseline.operating_expenses, Some(dec!(36000)));
    }

    #[test]
    fn test_from_t12_scales_partial_year() {
        let months: Vec<T12Month> = (1..=6).map(|m| month(m, dec!(5000), dec!(2000))).collect();
        let baseline = DealBaseline::from_t12(&months).unwrap();
        assert_eq!(baseline.gross_potential_rent, dec!(60000));
    }

    #[test]
    fn test_from_t12_out_of_range_is_an_error() {
        let months = vec![month(1, Decimal::MAX, dec!(0))];
        assert!(matches!(
            DealBaseline::from_t12(&months),
            Err(ValuationError::Overflow { .. })
        ));
        let months: Vec<T12Month> = (1..=2).map(|m| month(m, Decimal::MAX, dec!(0))).collect();
        assert!(DealBaseline::from_t12(&months).is_err());
    }

    #[test]
    fn test_from_t12_empty_is_validation_error() {
        let err = DealBaseline::from_t12(&[]).unwrap_err();
        assert_eq!(err.field(), Some("t12"));
    }

    #[test]
    fn test_in_memory_lookup() {
        let store = InMemoryBaselines::new();
        let baseline = DealBaseline {
            gross_potential_rent: dec!(100000),
            other_income: Decimal::ZERO,
            operating_expenses: None,
        };
        store.insert(7, baseline.clone()).unwrap();
        assert_eq!(store.baseline(7).unwrap(), baseline);
        assert!(matches!(
            store.baseline(8),
            Err(ValuationError::NotFound { .. })
        ));
    }

    #[test]
    fn test_non_positive_rent_rejected() {
        let baseline = DealBaseline {
            gross_potential_rent: Decimal::ZERO,
            other_income: Decimal::ZERO,
            operating_expenses: None,
        };
        assert_eq!(
            baseline.validate().unwrap_err().field(),
            Some("gross_potential_rent")
        );
    }
}
