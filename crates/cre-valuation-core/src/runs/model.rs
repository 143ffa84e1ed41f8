use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::assumptions::AssumptionSet;
use crate::error::ValuationError;
use crate::types::DealId;
use crate::underwriting::returns::KpiResult;
use crate::warnings::Warning;
use crate::ValuationResult;

/// Lifecycle of a valuation run. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A caller's request to value a deal under one assumption set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValuationRequest {
    pub name: String,
    pub assumptions: AssumptionSet,
}

impl ValuationRequest {
    pub fn validate(&self) -> ValuationResult<()> {
        if self.name.trim().is_empty() {
            return Err(ValuationError::validation("name", "Run name cannot be empty"));
        }
        self.assumptions.validate()
    }
}

/// Stored record of one valuation. The assumptions are an owned snapshot
/// taken when the run was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationRun {
    pub id: Uuid,
    pub deal_id: DealId,
    pub name: String,
    pub status: RunStatus,
    pub assumptions: AssumptionSet,
    pub results: Option<KpiResult>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A run that has been accepted but not started.
///
/// Status changes only through [`PendingRun::start`], then
/// [`RunningRun::complete`] or [`RunningRun::fail`]. Each consumes its
/// receiver, so a finished run cannot be moved back to an earlier state.
#[derive(Debug)]
pub struct PendingRun {
    run: ValuationRun,
}

impl PendingRun {
    pub fn new(deal_id: DealId, request: ValuationRequest) -> Self {
        PendingRun {
            run: ValuationRun {
                id: Uuid::now_v7(),
                deal_id,
                name: request.name,
                status: RunStatus::Pending,
                assumptions: request.assumptions,
                results: None,
                warnings: Vec::new(),
                error: None,
                created_at: Utc::now(),
                completed_at: None,
            },
        }
    }

    pub fn id(&self) -> Uuid {
        self.run.id
    }

    pub fn start(mut self) -> RunningRun {
        self.run.status = RunStatus::Running;
        RunningRun { run: self.run }
    }
}

#[derive(Debug)]
pub struct RunningRun {
    run: ValuationRun,
}

impl RunningRun {
    pub fn id(&self) -> Uuid {
        self.run.id
    }

    pub fn assumptions(&self) -> &AssumptionSet {
        &self.run.assumptions
    }

    /// Current state of the record, for persisting the `running` status.
    pub fn record(&self) -> &ValuationRun {
        &self.run
    }

    pub fn complete(mut self, results: KpiResult, warnings: Vec<Warning>) -> ValuationRun {
        self.run.status = RunStatus::Completed;
        self.run.results = Some(results);
        self.run.warnings = warnings;
        self.run.completed_at = Some(Utc::now());
        self.run
    }

    pub fn fail(mut self, error: &ValuationError) -> ValuationRun {
        self.run.status = RunStatus::Failed;
        self.run.error = Some(error.to_string());
        self.run.completed_at = Some(Utc::now());
        self.run
    }
}
