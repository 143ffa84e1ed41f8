use std::sync::atomic::AtomicBool;
use uuid::Uuid;

use crate::baseline::BaselineSource;
use crate::error::ValuationError;
use crate::runs::model::{PendingRun, RunStatus, ValuationRequest, ValuationRun};
use crate::runs::store::RunStore;
use crate::scenarios::sensitivity::{
    compute_sensitivity_cancellable, SensitivityFactor, SensitivityVariable,
};
use crate::time_value::IrrSolver;
use crate::types::{DealId, SweepRange};
use crate::underwriting::pipeline::run_pipeline;
use crate::ValuationResult;

/// Validates requests, drives the pipeline and records each run.
///
/// Validation failures return `Err` before any record exists. Once a run is
/// started, computation errors are recorded on the run as `failed` and the
/// run is returned as `Ok`. A store failure after computation returns
/// [`ValuationError::Persistence`] carrying the finished run, which can be
/// handed to [`ValuationService::retry_persist`].
pub struct ValuationService<B: BaselineSource, S: RunStore> {
    baselines: B,
    store: S,
    solver: IrrSolver,
}

impl<B: BaselineSource, S: RunStore> ValuationService<B, S> {
    pub fn new(baselines: B, store: S) -> Self {
        Self::with_solver(baselines, store, IrrSolver::default())
    }

    pub fn with_solver(baselines: B, store: S, solver: IrrSolver) -> Self {
        ValuationService {
            baselines,
            store,
            solver,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn run(&self, deal_id: DealId, request: ValuationRequest) -> ValuationResult<ValuationRun> {
        request.validate()?;
        let baseline = self.baselines.baseline(deal_id)?;
        baseline.validate()?;

        let running = PendingRun::new(deal_id, request).start();
        let run_id = running.id();
        tracing::info!(%run_id, deal_id, "Valuation run started");
        self.store.save(running.record())?;

        let run = match run_pipeline(running.assumptions(), &baseline, &self.solver) {
            Ok(analysis) => {
                for warning in &analysis.warnings {
                    tracing::warn!(%run_id, code = %warning.code, "{}", warning.message);
                }
                running.complete(analysis.kpis, analysis.warnings)
            }
            Err(e) => {
                tracing::warn!(%run_id, error = %e, "Valuation run failed");
                running.fail(&e)
            }
        };

        let run = self.persist(run)?;
        tracing::info!(%run_id, deal_id, status = %run.status, "Valuation run finished");
        Ok(run)
    }

    /// Re-save a run returned inside a `Persistence` error.
    pub fn retry_persist(&self, run: ValuationRun) -> ValuationResult<ValuationRun> {
        if !run.status.is_terminal() {
            return Err(ValuationError::validation(
                "status",
                format!("only finished runs can be re-persisted, run is {}", run.status),
            ));
        }
        tracing::info!(run_id = %run.id, "Retrying run persistence");
        self.persist(run)
    }

    fn persist(&self, run: ValuationRun) -> ValuationResult<ValuationRun> {
        match self.store.save(&run) {
            Ok(()) => Ok(run),
            Err(e) => {
                tracing::error!(run_id = %run.id, error = %e, "Failed to persist run");
                Err(ValuationError::Persistence {
                    reason: e.to_string(),
                    run: Box::new(run),
                })
            }
        }
    }

    /// Runs for a deal, newest first.
    pub fn list_runs(&self, deal_id: DealId) -> ValuationResult<Vec<ValuationRun>> {
        self.store.list(deal_id)
    }

    pub fn get_run(&self, run_id: Uuid) -> ValuationResult<ValuationRun> {
        self.store
            .get(run_id)?
            .ok_or_else(|| ValuationError::NotFound {
                entity: "run".into(),
                id: run_id.to_string(),
            })
    }

    /// Sweep one factor around a completed run's assumption snapshot.
    pub fn compute_sensitivity(
        &self,
        deal_id: DealId,
        run_id: Uuid,
        variable: SensitivityVariable,
        range: &SweepRange,
    ) -> ValuationResult<SensitivityFactor> {
        self.compute_sensitivity_cancellable(
            deal_id,
            run_id,
            variable,
            range,
            &AtomicBool::new(false),
        )
    }

    pub fn compute_sensitivity_cancellable(
        &self,
        deal_id: DealId,
        run_id: Uuid,
        variable: SensitivityVariable,
        range: &SweepRange,
        cancel: &AtomicBool,
    ) -> ValuationResult<SensitivityFactor> {
        let run = self.get_run(run_id)?;
        if run.deal_id != deal_id {
            return Err(ValuationError::NotFound {
                entity: "run".into(),
                id: format!("{run_id} for deal {deal_id}"),
            });
        }
        if run.status != RunStatus::Completed {
            return Err(ValuationError::RunNotCompleted {
                run_id: run_id.to_string(),
                status: run.status.to_string(),
            });
        }

        let baseline = self.baselines.baseline(deal_id)?;
        tracing::info!(%run_id, deal_id, %variable, "Computing sensitivity");
        compute_sensitivity_cancellable(
            &run.assumptions,
            &baseline,
            variable,
            range,
            &self.solver,
            cancel,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assumptions::{AssumptionSet, PaymentFrequency, DEFAULT_DISCOUNT_RATE};
    use crate::baseline::{DealBaseline, InMemoryBaselines};
    use crate::error::ErrorKind;
    use crate::runs::store::InMemoryRunStore;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    /// Store whose writes fail once the `running` record has been saved.
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryRunStore,
        fail_terminal: AtomicBool,
    }

    impl RunStore for FlakyStore {
        fn save(&self, run: &ValuationRun) -> ValuationResult<()> {
            if run.status.is_terminal()
                && self.fail_terminal.load(std::sync::atomic::Ordering::SeqCst)
            {
                return Err(ValuationError::Storage("disk full".into()));
            }
            self.inner.save(run)
        }

        fn get(&self, run_id: Uuid) -> ValuationResult<Option<ValuationRun>> {
            self.inner.get(run_id)
        }

        fn list(&self, deal_id: DealId) -> ValuationResult<Vec<ValuationRun>> {
            self.inner.list(deal_id)
        }
    }

    fn request(name: &str) -> ValuationRequest {
        ValuationRequest {
            name: name.into(),
            assumptions: AssumptionSet {
                purchase_price: dec!(1000000),
                loan_amount: dec!(800000),
                interest_rate: dec!(0.05),
                amortization_term_years: 30,
                hold_period_years: 5,
                exit_cap_rate: dec!(0.05),
                vacancy_rate: dec!(0.05),
                expense_ratio: dec!(0.35),
                rent_growth_rate: None,
                selling_cost_rate: None,
                expense_growth_rate: None,
                discount_rate: DEFAULT_DISCOUNT_RATE,
                closing_costs: Decimal::ZERO,
                capital_reserves: Decimal::ZERO,
                payment_frequency: PaymentFrequency::Annual,
            },
        }
    }

    fn baselines() -> InMemoryBaselines {
        let b = InMemoryBaselines::new();
        b.insert(
            1,
            DealBaseline {
                gross_potential_rent: dec!(100000),
                other_income: Decimal::ZERO,
                operating_expenses: None,
            },
        )
        .unwrap();
        b
    }

    #[test]
    fn test_persistence_failure_returns_computed_run() {
        let store = FlakyStore::default();
        store
            .fail_terminal
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let service = ValuationService::new(baselines(), store);

        let err = service.run(1, request("base")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);
        let run = match err {
            ValuationError::Persistence { run, .. } => *run,
            other => panic!("unexpected error {other}"),
        };
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.results.is_some());

        // the store still holds the running record
        assert_eq!(
            service.get_run(run.id).unwrap().status,
            RunStatus::Running
        );

        service
            .store()
            .fail_terminal
            .store(false, std::sync::atomic::Ordering::SeqCst);
        let saved = service.retry_persist(run.clone()).unwrap();
        assert_eq!(saved, run);
        assert_eq!(
            service.get_run(run.id).unwrap().status,
            RunStatus::Completed
        );
    }

    #[test]
    fn test_sensitivity_requires_completed_run() {
        let service = ValuationService::new(baselines(), InMemoryRunStore::new());
        let mut req = request("zero equity");
        req.assumptions.loan_amount = req.assumptions.purchase_price;
        let run = service.run(1, req).unwrap();
        assert_eq!(run.status, RunStatus::Failed);

        let err = service
            .compute_sensitivity(
                1,
                run.id,
                SensitivityVariable::ExitCapRate,
                &SweepRange {
                    min: dec!(0.04),
                    max: dec!(0.06),
                    step: dec!(0.01),
                },
            )
            .unwrap_err();
        assert!(matches!(err, ValuationError::RunNotCompleted { .. }));
    }

    #[test]
    fn test_unknown_deal_is_not_found() {
        let service = ValuationService::new(baselines(), InMemoryRunStore::new());
        let err = service.run(99, request("missing")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(service.list_runs(99).unwrap().is_empty());
    }
}
