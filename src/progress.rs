use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::events::{CaseResult, CriterionProgress, ProgressEvent, Stage};
use crate::store::TestCase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Where a single test case is within its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseStage {
    Evaluating,
    Persisted,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: RunStatus,
    pub to: RunStatus,
    pub elapsed_ms: u64,
}

/// In-flight state of one run: status history plus the per-criterion tally
/// that every progress event carries.
pub struct RunProgress {
    evaluation_id: Option<i64>,
    status: RunStatus,
    started_at: Instant,
    last_transition: Instant,
    transitions: Vec<StatusTransition>,
    total: usize,
    processed: usize,
    criteria: BTreeMap<String, CriterionProgress>,
}

impl RunProgress {
    /// Seeds the tally from a pre-scan of the suite.
    pub fn new(suite: &[TestCase]) -> Self {
        let mut criteria: BTreeMap<String, CriterionProgress> = BTreeMap::new();
        for case in suite {
            criteria.entry(case.criterion.clone()).or_default().total += 1;
        }
        let now = Instant::now();
        Self {
            evaluation_id: None,
            status: RunStatus::Pending,
            started_at: now,
            last_transition: now,
            transitions: Vec::new(),
            total: suite.len(),
            processed: 0,
            criteria,
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn transitions(&self) -> &[StatusTransition] {
        &self.transitions
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn criteria(&self) -> &BTreeMap<String, CriterionProgress> {
        &self.criteria
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, RunStatus::Completed | RunStatus::Failed)
    }

    fn transition_to(&mut self, to: RunStatus) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_transition).as_millis() as u64;
        debug!(
            evaluation_id = ?self.evaluation_id,
            from = ?self.status,
            to = ?to,
            elapsed_ms = %elapsed,
            "Run status transition"
        );
        self.transitions.push(StatusTransition {
            from: self.status,
            to,
            elapsed_ms: elapsed,
        });
        self.status = to;
        self.last_transition = now;
    }

    pub fn start(&mut self, evaluation_id: i64) {
        self.evaluation_id = Some(evaluation_id);
        self.transition_to(RunStatus::Running);
        info!(
            evaluation_id,
            test_cases = self.total,
            criteria = self.criteria.len(),
            "Run started"
        );
    }

    pub fn case_stage(&self, index: usize, test_case_id: i64, stage: CaseStage) {
        debug!(
            evaluation_id = ?self.evaluation_id,
            case = %format!("{}/{}", index + 1, self.total),
            test_case_id,
            stage = ?stage,
            "Case stage"
        );
    }

    /// Counts one processed case against its criterion.
    pub fn record_case(&mut self, criterion: &str) {
        self.processed += 1;
        self.criteria.entry(criterion.to_string()).or_default().processed += 1;
    }

    pub fn complete(&mut self) {
        self.transition_to(RunStatus::Completed);
        info!(
            evaluation_id = ?self.evaluation_id,
            elapsed_ms = %self.elapsed_ms(),
            processed = self.processed,
            "Run completed"
        );
    }

    pub fn fail(&mut self) {
        self.transition_to(RunStatus::Failed);
        warn!(
            evaluation_id = ?self.evaluation_id,
            elapsed_ms = %self.elapsed_ms(),
            processed = self.processed,
            "Run failed"
        );
    }

    fn event(&self, stage: Stage) -> ProgressEvent {
        let event = ProgressEvent::new(stage, self.processed, self.total, self.criteria.clone());
        match self.evaluation_id {
            Some(id) => event.with_evaluation_id(id),
            None => event,
        }
    }

    pub fn case_event(&self, result: CaseResult) -> ProgressEvent {
        self.event(Stage::Evaluation).with_result(result)
    }

    pub fn case_error_event(&self, result: CaseResult, message: &str) -> ProgressEvent {
        self.event(Stage::Error)
            .with_result(result)
            .with_error(message)
    }

    pub fn completed_event(&self, total_cost: f64) -> ProgressEvent {
        self.event(Stage::Completed)
            .with_status("completed")
            .with_total_cost(total_cost)
    }

    pub fn aborted_event(&self, message: &str) -> ProgressEvent {
        self.event(Stage::Error)
            .with_status("error")
            .with_error(message)
            .with_message("Evaluation aborted")
    }
}
