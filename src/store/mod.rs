pub mod memory;
pub mod sqlite;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::accounting::{CostBreakdown, TokenCounts};
use crate::scoring::Verdict;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// One entry of an evaluation suite, in suite order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: i64,
    pub input: String,
    pub description: String,
    pub criterion: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTestCase {
    #[serde(default)]
    pub id: Option<i64>,
    pub criterion: String,
    pub input: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct SuiteFile {
    test_cases: Vec<NewTestCase>,
}

pub fn load_suite_file(path: &Path) -> Result<Vec<NewTestCase>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read test cases from {}", path.display()))?;
    let file: SuiteFile = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid test case file {}", path.display()))?;
    Ok(file.test_cases)
}

#[derive(Debug, Clone)]
pub struct NewEvaluation {
    pub evaluation_type: String,
    pub system_prompt: String,
    pub evaluation_model: String,
    pub scoring_model: String,
    pub totals: RunTotals,
}

#[derive(Debug, Clone)]
pub struct NewResult {
    pub evaluation_id: i64,
    pub test_case_id: i64,
    pub output: String,
    pub verdict: Verdict,
    pub explanation: String,
    pub tokens: TokenCounts,
    pub costs: CostBreakdown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTotals {
    pub tokens: u64,
    pub cost: f64,
}

impl RunTotals {
    pub fn add(&mut self, tokens: u64, cost: f64) {
        self.tokens += tokens;
        self.cost += cost;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub id: i64,
    pub evaluation_type: String,
    pub timestamp: DateTime<Utc>,
    pub system_prompt: String,
    pub model_name: String,
    pub scoring_model: String,
    pub total_score: usize,
    pub total_cases: usize,
    pub total_tokens: u64,
    pub total_cost: f64,
}

/// A stored result joined with its test case and the run's model pair.
#[derive(Debug, Clone)]
pub struct ResultRecord {
    pub test_case: TestCase,
    pub output: String,
    pub verdict: Verdict,
    pub explanation: String,
    pub tokens: TokenCounts,
    pub costs: CostBreakdown,
    pub evaluation_model: String,
    pub scoring_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseDetails {
    pub id: i64,
    pub input: String,
    pub description: String,
    pub output: String,
    pub result: Verdict,
    pub explanation: String,
    pub criterion: String,
    pub prompt_tokens: u64,
    pub response_tokens: u64,
    pub input_model: String,
    pub output_model: String,
    pub evaluation_cost: f64,
    pub scoring_cost: f64,
    pub tokens: TokenCounts,
    pub costs: CostBreakdown,
}

impl From<ResultRecord> for TestCaseDetails {
    fn from(r: ResultRecord) -> Self {
        Self {
            id: r.test_case.id,
            input: r.test_case.input,
            description: r.test_case.description,
            output: r.output,
            result: r.verdict,
            explanation: r.explanation,
            criterion: r.test_case.criterion,
            prompt_tokens: r.tokens.evaluation_input,
            response_tokens: r.tokens.evaluation_output,
            input_model: r.evaluation_model,
            output_model: r.scoring_model,
            evaluation_cost: r.costs.evaluation(),
            scoring_cost: r.costs.scoring(),
            tokens: r.tokens,
            costs: r.costs,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    pub pass_count: usize,
    pub total_count: usize,
    pub cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationDetail {
    #[serde(flatten)]
    pub summary: EvaluationSummary,
    pub test_case_results: BTreeMap<i64, TestCaseDetails>,
    pub scores_by_criteria: BTreeMap<String, CriterionScore>,
}

impl EvaluationDetail {
    pub fn assemble(summary: EvaluationSummary, records: Vec<ResultRecord>) -> Self {
        let mut scores_by_criteria: BTreeMap<String, CriterionScore> = BTreeMap::new();
        let mut test_case_results = BTreeMap::new();
        for record in records {
            let score = scores_by_criteria
                .entry(record.test_case.criterion.clone())
                .or_default();
            score.total_count += 1;
            if record.verdict == Verdict::Pass {
                score.pass_count += 1;
            }
            score.cost += record.costs.total();
            test_case_results.insert(record.test_case.id, TestCaseDetails::from(record));
        }
        Self {
            summary,
            test_case_results,
            scores_by_criteria,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub evaluations: Vec<T>,
    pub total_count: usize,
    pub page: usize,
    pub pages: usize,
}

impl<T> Page<T> {
    pub fn new(evaluations: Vec<T>, total_count: usize, page: usize, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            evaluations,
            total_count,
            page,
            pages: total_count.div_ceil(limit),
        }
    }
}

/// Normalizes a 1-based page request into (page, limit, offset).
pub fn page_window(page: usize, limit: usize) -> (usize, usize, usize) {
    let page = page.max(1);
    let limit = limit.clamp(1, 100);
    (page, limit, (page - 1).saturating_mul(limit))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuiteAnalysis {
    pub criteria: BTreeMap<String, String>,
    pub counts_per_criterion: BTreeMap<String, usize>,
    pub total_test_cases: usize,
}

pub fn snake_to_title_case(text: &str) -> String {
    text.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Persistence boundary for runs and suites. Implementations must tolerate
/// concurrent use from several runs.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn create_evaluation(&self, new: NewEvaluation) -> Result<i64>;

    async fn append_result(&self, result: NewResult) -> Result<i64>;

    async fn update_totals(&self, evaluation_id: i64, totals: RunTotals) -> Result<()>;

    /// Appends one result and sets the run totals as a single unit.
    async fn record_case(&self, result: NewResult, totals: RunTotals) -> Result<i64> {
        let evaluation_id = result.evaluation_id;
        let id = self.append_result(result).await?;
        self.update_totals(evaluation_id, totals).await?;
        Ok(id)
    }

    /// `None` when the evaluation type does not exist.
    async fn load_suite(&self, evaluation_type: &str) -> Result<Option<Vec<TestCase>>>;

    async fn get_result(
        &self,
        evaluation_id: i64,
        test_case_id: i64,
    ) -> Result<Option<TestCaseDetails>>;

    async fn list_evaluations(&self, page: usize, limit: usize)
        -> Result<Page<EvaluationSummary>>;

    async fn get_evaluation(&self, evaluation_id: i64) -> Result<Option<EvaluationDetail>>;

    async fn test_case_analysis(&self, evaluation_type: &str) -> Result<Option<SuiteAnalysis>>;

    /// Creates the evaluation type (if needed), its criteria and test cases.
    /// Returns the number of test cases inserted.
    async fn seed_suite(
        &self,
        evaluation_type: &str,
        description: Option<&str>,
        cases: Vec<NewTestCase>,
    ) -> Result<usize>;
}
