use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::scoring::Verdict;

#[derive(Debug, Default)]
pub struct Metrics {
    pub runs_total: AtomicU64,
    pub runs_active: AtomicU64,
    pub runs_completed: AtomicU64,
    pub runs_failed: AtomicU64,
    pub runs_rejected: AtomicU64,
    pub cases_passed: AtomicU64,
    pub cases_failed: AtomicU64,
    pub cases_errored: AtomicU64,
    pub tokens_total: AtomicU64,
    pub cost_micro_usd: AtomicU64,
    pub duration_sum_ms: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn start_run(&self) {
        self.runs_total.fetch_add(1, Ordering::Relaxed);
        self.runs_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn finish_run(&self, completed: bool, duration_ms: u64) {
        self.runs_active.fetch_sub(1, Ordering::Relaxed);
        if completed {
            self.runs_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.runs_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.duration_sum_ms
            .fetch_add(duration_ms, Ordering::Relaxed);
    }

    /// Runs turned away before start, at capacity or on bad configuration.
    pub fn reject_run(&self) {
        self.runs_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_case(&self, verdict: Verdict, tokens: u64, cost: f64) {
        let counter = match verdict {
            Verdict::Pass => &self.cases_passed,
            Verdict::Fail => &self.cases_failed,
            Verdict::Error => &self.cases_errored,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.tokens_total.fetch_add(tokens, Ordering::Relaxed);
        self.cost_micro_usd
            .fetch_add((cost.max(0.0) * 1e6).round() as u64, Ordering::Relaxed);
    }

    pub fn render_prometheus(&self) -> String {
        let runs_total = self.runs_total.load(Ordering::Relaxed);
        let runs_active = self.runs_active.load(Ordering::Relaxed);
        let runs_completed = self.runs_completed.load(Ordering::Relaxed);
        let runs_failed = self.runs_failed.load(Ordering::Relaxed);
        let runs_rejected = self.runs_rejected.load(Ordering::Relaxed);
        let passed = self.cases_passed.load(Ordering::Relaxed);
        let failed = self.cases_failed.load(Ordering::Relaxed);
        let errored = self.cases_errored.load(Ordering::Relaxed);
        let tokens = self.tokens_total.load(Ordering::Relaxed);
        let cost = self.cost_micro_usd.load(Ordering::Relaxed);
        let dur_sum = self.duration_sum_ms.load(Ordering::Relaxed);

        format!(
            "# HELP llm_eval_runs_total Total runs started.\n\
             # TYPE llm_eval_runs_total counter\n\
             llm_eval_runs_total {}\n\
             # HELP llm_eval_runs_active Currently executing runs.\n\
             # TYPE llm_eval_runs_active gauge\n\
             llm_eval_runs_active {}\n\
             # HELP llm_eval_runs_completed Runs that finished every case.\n\
             # TYPE llm_eval_runs_completed counter\n\
             llm_eval_runs_completed {}\n\
             # HELP llm_eval_runs_failed Runs aborted by a storage failure.\n\
             # TYPE llm_eval_runs_failed counter\n\
             llm_eval_runs_failed {}\n\
             # HELP llm_eval_runs_rejected Runs rejected before start.\n\
             # TYPE llm_eval_runs_rejected counter\n\
             llm_eval_runs_rejected {}\n\
             # HELP llm_eval_cases_total Scored test cases by verdict.\n\
             # TYPE llm_eval_cases_total counter\n\
             llm_eval_cases_total{{verdict=\"pass\"}} {}\n\
             llm_eval_cases_total{{verdict=\"fail\"}} {}\n\
             llm_eval_cases_total{{verdict=\"error\"}} {}\n\
             # HELP llm_eval_tokens_total Tokens accounted across all runs.\n\
             # TYPE llm_eval_tokens_total counter\n\
             llm_eval_tokens_total {}\n\
             # HELP llm_eval_cost_micro_usd_total Accounted cost in millionths of a dollar.\n\
             # TYPE llm_eval_cost_micro_usd_total counter\n\
             llm_eval_cost_micro_usd_total {}\n\
             # HELP llm_eval_run_duration_ms_sum Sum of run durations in ms.\n\
             # TYPE llm_eval_run_duration_ms_sum counter\n\
             llm_eval_run_duration_ms_sum {}\n",
            runs_total,
            runs_active,
            runs_completed,
            runs_failed,
            runs_rejected,
            passed,
            failed,
            errored,
            tokens,
            cost,
            dur_sum
        )
    }
}
