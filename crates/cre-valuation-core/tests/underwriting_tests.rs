use cre_valuation_core::assumptions::{AssumptionSet, PaymentFrequency, DEFAULT_DISCOUNT_RATE};
use cre_valuation_core::baseline::{DealBaseline, T12Month};
use cre_valuation_core::scenarios::sensitivity::{compute_sensitivity, SensitivityVariable};
use cre_valuation_core::time_value::{npv, IrrSolver};
use cre_valuation_core::underwriting::amortization::{amortize, LoanTerms};
use cre_valuation_core::underwriting::pipeline::{analyze, run_pipeline, AnalysisInput};
use cre_valuation_core::warnings::WarningCode;
use cre_valuation_core::{SweepRange, ValuationError};
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// ===========================================================================
// Helpers
// ===========================================================================

/// 1,000,000 purchase, 80% LTV at 5% over 30 years, 5-year hold, 5% exit cap.
fn worked_example() -> AssumptionSet {
    AssumptionSet {
        purchase_price: dec!(1000000),
        loan_amount: dec!(800000),
        interest_rate: dec!(0.05),
        amortization_term_years: 30,
        hold_period_years: 5,
        exit_cap_rate: dec!(0.05),
        vacancy_rate: dec!(0.05),
        expense_ratio: dec!(0.35),
        rent_growth_rate: Some(Decimal::ZERO),
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
        other_income: Decimal::ZERO,
        operating_expenses: None,
    }
}

fn growing_deal() -> AssumptionSet {
    AssumptionSet {
        rent_growth_rate: Some(dec!(0.03)),
        selling_cost_rate: Some(dec!(0.02)),
        hold_period_years: 7,
        exit_cap_rate: dec!(0.055),
        closing_costs: dec!(15000),
        capital_reserves: dec!(2500),
        ..worked_example()
    }
}

fn assert_close(actual: Decimal, expected: Decimal, tolerance: Decimal, label: &str) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "{label}: expected {expected} +/- {tolerance}, got {actual}"
    );
}

// ===========================================================================
// Worked example
// ===========================================================================

#[test]
fn test_worked_example_going_in_metrics() {
    let analysis = run_pipeline(&worked_example(), &baseline(), &IrrSolver::default()).unwrap();
    let kpis = &analysis.kpis;

    assert_eq!(kpis.noi, dec!(61750));
    assert_eq!(kpis.egi, dec!(95000));
    assert_eq!(kpis.cap_rate, dec!(0.06175));
    assert_eq!(kpis.ltv, dec!(0.8));
    assert_eq!(analysis.pro_forma.len(), 5);

    // annual compounding
    let ds = analysis.debt_schedule.entries[0].annual_debt_service;
    assert_close(ds, dec!(52041.15), dec!(0.01), "annual debt service");
    assert_close(kpis.dscr[0], dec!(1.1866), dec!(0.0001), "DSCR year 1");
    assert_close(kpis.debt_yield, dec!(0.0771875), dec!(0.0000001), "debt yield");
}

#[test]
fn test_worked_example_monthly_compounding() {
    let a = AssumptionSet {
        payment_frequency: PaymentFrequency::Monthly,
        ..worked_example()
    };
    let analysis = run_pipeline(&a, &baseline(), &IrrSolver::default()).unwrap();

    let ds = analysis.debt_schedule.entries[0].annual_debt_service;
    assert_close(ds, dec!(51534.88), dec!(0.05), "monthly debt service");
    assert_close(analysis.kpis.dscr_minimum, dec!(1.198), dec!(0.001), "DSCR");
    // Below the 1.20x covenant
    assert!(analysis
        .warnings
        .iter()
        .any(|w| w.code == WarningCode::LowDscr));
}

#[test]
fn test_worked_example_returns() {
    let analysis = run_pipeline(&worked_example(), &baseline(), &IrrSolver::default()).unwrap();
    let kpis = &analysis.kpis;

    let irr = kpis.irr.expect("levered IRR should converge");
    assert_close(irr, dec!(0.23698), dec!(0.0001), "levered IRR");
    let unlevered = kpis.unlevered_irr.expect("unlevered IRR should converge");
    assert_close(unlevered, dec!(0.10023), dec!(0.0001), "unlevered IRR");

    assert_close(kpis.equity_multiple, dec!(2.7504), dec!(0.0001), "equity multiple");
    assert_close(kpis.cash_on_cash, dec!(0.048544), dec!(0.000001), "cash on cash");
    assert_close(
        analysis.exit.loan_payoff_balance,
        dec!(733465.06),
        dec!(0.05),
        "payoff",
    );
    assert_eq!(analysis.exit.gross_sale_value, dec!(1235000));
}

// ===========================================================================
// Invariants
// ===========================================================================

#[test]
fn test_noi_identity_every_period() {
    let a = growing_deal();
    let b = DealBaseline {
        other_income: dec!(4800),
        operating_expenses: Some(dec!(31000)),
        ..baseline()
    };
    for assumptions in [
        a.clone(),
        AssumptionSet {
            expense_growth_rate: Some(dec!(0.025)),
            ..a
        },
    ] {
        let analysis = run_pipeline(&assumptions, &b, &IrrSolver::default()).unwrap();
        for p in &analysis.pro_forma {
            let diff = p.net_operating_income - (p.effective_gross_income - p.operating_expenses);
            assert!(diff.abs() <= dec!(0.000001), "period {}: {diff}", p.period);
        }
    }
}

#[test]
fn test_principal_sums_to_loan_over_full_term() {
    for frequency in [PaymentFrequency::Annual, PaymentFrequency::Monthly] {
        for rate in [dec!(0), dec!(0.045), dec!(0.0725)] {
            let terms = LoanTerms {
                loan_amount: dec!(650000),
                interest_rate: rate,
                amortization_term_years: 25,
                payment_frequency: frequency,
            };
            let schedule = amortize(&terms).unwrap().result;
            assert_eq!(schedule.entries.len(), 25);
            assert_close(
                schedule.total_principal_paid,
                dec!(650000),
                dec!(0.01),
                "principal sum",
            );
            for pair in schedule.entries.windows(2) {
                assert_eq!(pair[1].beginning_balance, pair[0].ending_balance);
                assert!(pair[1].ending_balance <= pair[0].ending_balance);
            }
        }
    }
}

#[test]
fn test_npv_at_irr_is_zero() {
    let analysis = run_pipeline(&growing_deal(), &baseline(), &IrrSolver::default()).unwrap();
    let irr = analysis.kpis.irr.unwrap();
    let residual = npv(irr, &analysis.levered_cash_flows).unwrap();
    assert!(residual.abs() <= dec!(0.01), "NPV at IRR = {residual}");

    let unlevered = analysis.kpis.unlevered_irr.unwrap();
    let residual = npv(unlevered, &analysis.unlevered_cash_flows).unwrap();
    assert!(residual.abs() <= dec!(0.01), "unlevered NPV at IRR = {residual}");
}

#[test]
fn test_all_cash_deal_levered_equals_unlevered() {
    let a = AssumptionSet {
        loan_amount: Decimal::ZERO,
        ..growing_deal()
    };
    let analysis = run_pipeline(&a, &baseline(), &IrrSolver::default()).unwrap();

    assert_eq!(analysis.levered_cash_flows, analysis.unlevered_cash_flows);
    assert_eq!(analysis.kpis.irr, analysis.kpis.unlevered_irr);
    assert!(analysis.kpis.irr.is_some());
    assert_eq!(analysis.kpis.dscr_minimum, Decimal::ZERO);
    assert_eq!(analysis.kpis.debt_yield, Decimal::ZERO);
    assert!(analysis
        .warnings
        .iter()
        .any(|w| w.code == WarningCode::NoDebtService));
}

#[test]
fn test_hold_beyond_term_repays_loan() {
    let a = AssumptionSet {
        amortization_term_years: 5,
        hold_period_years: 8,
        ..worked_example()
    };
    let analysis = run_pipeline(&a, &baseline(), &IrrSolver::default()).unwrap();
    assert_eq!(analysis.exit.loan_payoff_balance, Decimal::ZERO);
    assert_eq!(analysis.kpis.dscr.len(), 8);
    // Years after payoff carry no debt service and are left out of the minimum
    assert!(analysis.kpis.dscr[5..].iter().all(|d| d.is_zero()));
    let serviced_min = analysis.kpis.dscr[..5].iter().copied().min().unwrap();
    assert_eq!(analysis.kpis.dscr_minimum, serviced_min);
    assert!(analysis.kpis.dscr_minimum > Decimal::ZERO);
}

// ===========================================================================
// Failure modes
// ===========================================================================

#[test]
fn test_total_loss_reports_null_irr() {
    // Rent collapses, the exit does not cover the loan
    let a = AssumptionSet {
        vacancy_rate: dec!(0.95),
        ..worked_example()
    };
    let analysis = run_pipeline(&a, &baseline(), &IrrSolver::default()).unwrap();
    assert!(analysis.kpis.irr.is_none());
    assert!(analysis.kpis.payback_period.is_none());
    assert!(analysis
        .warnings
        .iter()
        .any(|w| w.code == WarningCode::NonConvergentIrr));
}

#[test]
fn test_zero_equity_is_fatal() {
    let a = AssumptionSet {
        loan_amount: dec!(1000000),
        ..worked_example()
    };
    let err = run_pipeline(&a, &baseline(), &IrrSolver::default()).unwrap_err();
    assert!(matches!(err, ValuationError::DivisionByZero { .. }));
}

// ===========================================================================
// Extreme inputs that pass validation
// ===========================================================================

#[test]
fn test_max_hold_and_term_completes() {
    let a = AssumptionSet {
        amortization_term_years: 100,
        hold_period_years: 100,
        ..worked_example()
    };
    assert!(a.validate().is_ok());
    let analysis = run_pipeline(&a, &baseline(), &IrrSolver::default()).unwrap();
    assert_eq!(analysis.pro_forma.len(), 100);
    assert_eq!(analysis.debt_schedule.entries.len(), 100);
    assert_eq!(analysis.exit.loan_payoff_balance, Decimal::ZERO);
    assert_eq!(analysis.levered_cash_flows.len(), 101);
    assert!(analysis.kpis.irr.is_some());
}

#[test]
fn test_doubling_rent_over_max_hold_overflows() {
    // 100,000 doubling every year passes Decimal::MAX around year 80
    let a = AssumptionSet {
        rent_growth_rate: Some(Decimal::ONE),
        hold_period_years: 100,
        ..worked_example()
    };
    assert!(a.validate().is_ok());
    let err = run_pipeline(&a, &baseline(), &IrrSolver::default()).unwrap_err();
    assert!(matches!(err, ValuationError::Overflow { .. }), "got {err:?}");
}

#[test]
fn test_doubling_rent_over_shorter_hold_completes() {
    let a = AssumptionSet {
        rent_growth_rate: Some(Decimal::ONE),
        hold_period_years: 40,
        ..worked_example()
    };
    let analysis = run_pipeline(&a, &baseline(), &IrrSolver::default()).unwrap();
    for p in &analysis.pro_forma {
        assert_eq!(
            p.net_operating_income,
            p.effective_gross_income - p.operating_expenses
        );
    }
}

#[test]
fn test_vanishing_exit_cap_overflows() {
    let a = AssumptionSet {
        exit_cap_rate: dec!(0.0000000000000000000000001),
        ..worked_example()
    };
    assert!(a.validate().is_ok());
    let err = run_pipeline(&a, &baseline(), &IrrSolver::default()).unwrap_err();
    assert!(matches!(err, ValuationError::Overflow { .. }), "got {err:?}");
}

#[test]
fn test_expense_growth_at_bound_over_max_hold_overflows() {
    let a = AssumptionSet {
        expense_growth_rate: Some(Decimal::ONE),
        hold_period_years: 100,
        ..worked_example()
    };
    let b = DealBaseline {
        operating_expenses: Some(dec!(30000)),
        ..baseline()
    };
    let err = run_pipeline(&a, &b, &IrrSolver::default()).unwrap_err();
    assert!(matches!(err, ValuationError::Overflow { .. }), "got {err:?}");
}

#[test]
fn test_sensitivity_marks_overflowing_points_failed() {
    let base = AssumptionSet {
        hold_period_years: 100,
        ..worked_example()
    };
    let factor = compute_sensitivity(
        &base,
        &baseline(),
        SensitivityVariable::RentGrowthRate,
        &SweepRange {
            min: dec!(0),
            max: dec!(1),
            step: dec!(0.5),
        },
        &IrrSolver::default(),
    )
    .unwrap();
    assert_eq!(factor.values.len(), 3);
    assert!(factor.impact_on_dscr[0].is_some());
    assert!(factor.impact_on_dscr[1].is_some());
    assert_eq!(factor.impact_on_irr[2], None);
    assert_eq!(factor.impact_on_dscr[2], None);
    assert!(factor
        .warnings
        .iter()
        .any(|w| w.code == WarningCode::GridPointFailed && w.message.contains("overflow")));
}

#[test]
fn test_analyze_rejects_invalid_input_with_field() {
    let input = AnalysisInput {
        assumptions: AssumptionSet {
            exit_cap_rate: Decimal::ZERO,
            ..worked_example()
        },
        baseline: baseline(),
    };
    let err = analyze(&input, &IrrSolver::default()).unwrap_err();
    assert_eq!(err.field(), Some("exit_cap_rate"));
}

#[test]
fn test_analyze_envelope() {
    let input = AnalysisInput {
        assumptions: worked_example(),
        baseline: baseline(),
    };
    let output = analyze(&input, &IrrSolver::default()).unwrap();
    assert!(output.methodology.contains("Pro Forma"));
    assert_eq!(output.result.kpis.noi, dec!(61750));
    assert_eq!(
        output.assumptions["assumptions"]["hold_period_years"],
        serde_json::json!(5)
    );
}

#[test]
fn test_analysis_input_from_json_with_numbers() {
    let json = r#"{
        "assumptions": {
            "purchase_price": 1000000,
            "loan_amount": 800000,
            "interest_rate": 0.05,
            "amortization_term_years": 30,
            "hold_period_years": 5,
            "exit_cap_rate": 0.05,
            "vacancy_rate": 0.05,
            "expense_ratio": 0.35
        },
        "baseline": { "gross_potential_rent": 100000 }
    }"#;
    let input: AnalysisInput = serde_json::from_str(json).unwrap();
    assert_eq!(input.assumptions.discount_rate, DEFAULT_DISCOUNT_RATE);
    assert_eq!(input.assumptions.payment_frequency, PaymentFrequency::Annual);

    let with_typo = json.replace("\"vacancy_rate\"", "\"vacancy\"");
    assert!(serde_json::from_str::<AnalysisInput>(&with_typo).is_err());
}

// ===========================================================================
// Baseline from trailing twelve months
// ===========================================================================

#[test]
fn test_t12_baseline_feeds_pipeline() {
    let months: Vec<T12Month> = (1..=12)
        .map(|m| T12Month {
            year: 2025,
            month: m,
            gross_rent: dec!(8000) + Decimal::from(m) * dec!(50),
            other_income: dec!(400),
            operating_expenses: dec!(2600),
        })
        .collect();
    let b = DealBaseline::from_t12(&months).unwrap();
    // 12 * 8000 + 50 * (1 + ... + 12)
    assert_eq!(b.gross_potential_rent, dec!(99900));
    assert_eq!(b.other_income, dec!(4800));
    assert_eq!(b.operating_expenses, Some(dec!(31200)));

    let a = AssumptionSet {
        expense_growth_rate: Some(dec!(0.02)),
        ..worked_example()
    };
    let analysis = run_pipeline(&a, &b, &IrrSolver::default()).unwrap();
    assert_eq!(analysis.pro_forma[0].operating_expenses, dec!(31200));
    assert_eq!(analysis.pro_forma[1].operating_expenses, dec!(31824));
}

// ===========================================================================
// Sensitivity
// ===========================================================================

#[test]
fn test_sensitivity_grid_alignment_and_idempotence() {
    let a = worked_example();
    let range = SweepRange {
        min: dec!(0.035),
        max: dec!(0.065),
        step: dec!(0.0075),
    };
    let first = compute_sensitivity(
        &a,
        &baseline(),
        SensitivityVariable::InterestRate,
        &range,
        &IrrSolver::default(),
    )
    .unwrap();
    let second = compute_sensitivity(
        &a,
        &baseline(),
        SensitivityVariable::InterestRate,
        &range,
        &IrrSolver::default(),
    )
    .unwrap();

    // floor(0.03 / 0.0075) + 1
    assert_eq!(first.values.len(), 5);
    assert_eq!(first.impact_on_irr.len(), 5);
    assert_eq!(first.impact_on_dscr.len(), 5);
    assert_eq!(first, second);
    assert_eq!(a, worked_example());

    // Base point matches a direct run
    let base_idx = first
        .values
        .iter()
        .position(|v| *v == dec!(0.05))
        .unwrap();
    let direct = run_pipeline(&a, &baseline(), &IrrSolver::default()).unwrap();
    assert_close(
        first.impact_on_irr[base_idx].unwrap(),
        direct.kpis.irr.unwrap(),
        dec!(0.0000001),
        "base point IRR",
    );
    assert_close(
        first.impact_on_dscr[base_idx].unwrap(),
        direct.kpis.dscr_minimum,
        dec!(0.0000001),
        "base point DSCR",
    );

    // Higher rates, lower coverage
    let dscr: Vec<Decimal> = first.impact_on_dscr.iter().map(|d| d.unwrap()).collect();
    for pair in dscr.windows(2) {
        assert!(pair[1] < pair[0]);
    }
}

#[test]
fn test_sensitivity_over_hold_period() {
    let factor = compute_sensitivity(
        &growing_deal(),
        &baseline(),
        SensitivityVariable::HoldPeriodYears,
        &SweepRange {
            min: dec!(3),
            max: dec!(10),
            step: dec!(1),
        },
        &IrrSolver::default(),
    )
    .unwrap();
    assert_eq!(factor.base_value, dec!(7));
    assert_eq!(factor.values.len(), 8);
    assert!(factor.impact_on_irr.iter().all(|irr| irr.is_some()));
    assert!(factor.warnings.is_empty());
}
