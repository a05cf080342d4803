use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{
    page_window, snake_to_title_case, EvaluationDetail, EvaluationSummary, NewEvaluation,
    NewResult, NewTestCase, Page, ResultRecord, ResultStore, RunTotals, SuiteAnalysis, TestCase,
    TestCaseDetails,
};
use crate::scoring::Verdict;

#[derive(Debug, Clone)]
struct SuiteRow {
    criteria: BTreeMap<String, String>,
    cases: Vec<TestCase>,
}

#[derive(Debug, Clone)]
struct EvaluationRow {
    id: i64,
    evaluation_type: String,
    timestamp: DateTime<Utc>,
    system_prompt: String,
    evaluation_model: String,
    scoring_model: String,
    totals: RunTotals,
}

#[derive(Debug, Default)]
struct State {
    suites: BTreeMap<String, SuiteRow>,
    evaluations: BTreeMap<i64, EvaluationRow>,
    results: Vec<(i64, NewResult)>,
    next_case_id: i64,
    next_evaluation_id: i64,
    next_result_id: i64,
}

impl State {
    fn test_case(&self, id: i64) -> Option<&TestCase> {
        self.suites
            .values()
            .flat_map(|s| s.cases.iter())
            .find(|c| c.id == id)
    }

    fn record(&self, eval: &EvaluationRow, result: &NewResult) -> Option<ResultRecord> {
        let test_case = self.test_case(result.test_case_id)?.clone();
        Some(ResultRecord {
            test_case,
            output: result.output.clone(),
            verdict: result.verdict,
            explanation: result.explanation.clone(),
            tokens: result.tokens,
            costs: result.costs,
            evaluation_model: eval.evaluation_model.clone(),
            scoring_model: eval.scoring_model.clone(),
        })
    }

    fn summary(&self, eval: &EvaluationRow) -> EvaluationSummary {
        let results = self
            .results
            .iter()
            .filter(|(_, r)| r.evaluation_id == eval.id);
        let (total_cases, total_score) = results.fold((0, 0), |(n, pass), (_, r)| {
            (n + 1, pass + usize::from(r.verdict == Verdict::Pass))
        });
        EvaluationSummary {
            id: eval.id,
            evaluation_type: eval.evaluation_type.clone(),
            timestamp: eval.timestamp,
            system_prompt: eval.system_prompt.clone(),
            model_name: eval.evaluation_model.clone(),
            scoring_model: eval.scoring_model.clone(),
            total_score,
            total_cases,
            total_tokens: eval.totals.tokens,
            total_cost: eval.totals.cost,
        }
    }
}

/// Process-local store for tests and `:memory:` deployments.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    #[cfg(test)]
    appends_before_failure: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every append after the first `n` fail.
    #[cfg(test)]
    pub fn fail_appends_after(&self, n: usize) {
        self.appends_before_failure.store(n + 1, Ordering::SeqCst);
    }

    #[cfg(test)]
    fn check_append_allowed(&self) -> Result<()> {
        let remaining = self.appends_before_failure.load(Ordering::SeqCst);
        match remaining {
            0 => Ok(()),
            1 => anyhow::bail!("disk I/O error"),
            n => {
                self.appends_before_failure.store(n - 1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    #[cfg(not(test))]
    fn check_append_allowed(&self) -> Result<()> {
        Ok(())
    }

    #[cfg(test)]
    pub fn result_count(&self, evaluation_id: i64) -> usize {
        self.state
            .read()
            .results
            .iter()
            .filter(|(_, r)| r.evaluation_id == evaluation_id)
            .count()
    }

    #[cfg(test)]
    pub fn evaluation_count(&self) -> usize {
        self.state.read().evaluations.len()
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn create_evaluation(&self, new: NewEvaluation) -> Result<i64> {
        let mut state = self.state.write();
        if !state.suites.contains_key(&new.evaluation_type) {
            anyhow::bail!("Evaluation type {} not found", new.evaluation_type);
        }
        state.next_evaluation_id += 1;
        let id = state.next_evaluation_id;
        state.evaluations.insert(
            id,
            EvaluationRow {
                id,
                evaluation_type: new.evaluation_type,
                timestamp: Utc::now(),
                system_prompt: new.system_prompt,
                evaluation_model: new.evaluation_model,
                scoring_model: new.scoring_model,
                totals: new.totals,
            },
        );
        Ok(id)
    }

    async fn append_result(&self, result: NewResult) -> Result<i64> {
        self.check_append_allowed()?;
        let mut state = self.state.write();
        if !state.evaluations.contains_key(&result.evaluation_id) {
            anyhow::bail!("Evaluation {} not found", result.evaluation_id);
        }
        if state.test_case(result.test_case_id).is_none() {
            anyhow::bail!("Test case {} not found", result.test_case_id);
        }
        state.next_result_id += 1;
        let id = state.next_result_id;
        state.results.push((id, result));
        Ok(id)
    }

    async fn update_totals(&self, evaluation_id: i64, totals: RunTotals) -> Result<()> {
        let mut state = self.state.write();
        match state.evaluations.get_mut(&evaluation_id) {
            Some(eval) => {
                eval.totals = totals;
                Ok(())
            }
            None => anyhow::bail!("Evaluation {} not found", evaluation_id),
        }
    }

    async fn load_suite(&self, evaluation_type: &str) -> Result<Option<Vec<TestCase>>> {
        Ok(self
            .state
            .read()
            .suites
            .get(evaluation_type)
            .map(|s| s.cases.clone()))
    }

    async fn get_result(
        &self,
        evaluation_id: i64,
        test_case_id: i64,
    ) -> Result<Option<TestCaseDetails>> {
        let state = self.state.read();
        let Some(eval) = state.evaluations.get(&evaluation_id) else {
            return Ok(None);
        };
        Ok(state
            .results
            .iter()
            .find(|(_, r)| r.evaluation_id == evaluation_id && r.test_case_id == test_case_id)
            .and_then(|(_, r)| state.record(eval, r))
            .map(TestCaseDetails::from))
    }

    async fn list_evaluations(
        &self,
        page: usize,
        limit: usize,
    ) -> Result<Page<EvaluationSummary>> {
        let (page, limit, offset) = page_window(page, limit);
        let state = self.state.read();
        let items = state
            .evaluations
            .values()
            .rev()
            .skip(offset)
            .take(limit)
            .map(|e| state.summary(e))
            .collect();
        Ok(Page::new(items, state.evaluations.len(), page, limit))
    }

    async fn get_evaluation(&self, evaluation_id: i64) -> Result<Option<EvaluationDetail>> {
        let state = self.state.read();
        let Some(eval) = state.evaluations.get(&evaluation_id) else {
            return Ok(None);
        };
        let records = state
            .results
            .iter()
            .filter(|(_, r)| r.evaluation_id == evaluation_id)
            .filter_map(|(_, r)| state.record(eval, r))
            .collect();
        Ok(Some(EvaluationDetail::assemble(state.summary(eval), records)))
    }

    async fn test_case_analysis(&self, evaluation_type: &str) -> Result<Option<SuiteAnalysis>> {
        let state = self.state.read();
        let Some(suite) = state.suites.get(evaluation_type) else {
            return Ok(None);
        };
        let mut counts = BTreeMap::new();
        for case in &suite.cases {
            *counts.entry(case.criterion.clone()).or_insert(0) += 1;
        }
        Ok(Some(SuiteAnalysis {
            criteria: suite.criteria.clone(),
            counts_per_criterion: counts,
            total_test_cases: suite.cases.len(),
        }))
    }

    async fn seed_suite(
        &self,
        evaluation_type: &str,
        _description: Option<&str>,
        cases: Vec<NewTestCase>,
    ) -> Result<usize> {
        if let Some(bad) = cases.iter().find(|c| c.criterion.trim().is_empty()) {
            anyhow::bail!("Test case with input {:?} has an empty criterion", bad.input);
        }
        let mut state = self.state.write();
        let mut next_id = state.next_case_id;
        let mut taken: BTreeSet<i64> = state
            .suites
            .values()
            .flat_map(|s| s.cases.iter().map(|c| c.id))
            .collect();
        let mut rows = Vec::with_capacity(cases.len());
        for case in cases {
            let id = match case.id {
                Some(id) => id,
                None => next_id + 1,
            };
            if !taken.insert(id) {
                anyhow::bail!("Test case id {} already exists", id);
            }
            next_id = next_id.max(id);
            rows.push(TestCase {
                id,
                input: case.input,
                description: case.description,
                criterion: case.criterion,
            });
        }

        let suite = state
            .suites
            .entry(evaluation_type.to_string())
            .or_insert_with(|| SuiteRow {
                criteria: BTreeMap::new(),
                cases: Vec::new(),
            });
        let inserted = rows.len();
        for row in rows {
            suite
                .criteria
                .entry(row.criterion.clone())
                .or_insert_with(|| snake_to_title_case(&row.criterion));
            suite.cases.push(row);
        }
        state.next_case_id = next_id;
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounting::{CostBreakdown, TokenCounts};

    fn case(criterion: &str, input: &str) -> NewTestCase {
        NewTestCase {
            id: None,
            criterion: criterion.to_string(),
            input: input.to_string(),
            description: format!("{} check", criterion),
        }
    }

    fn new_eval() -> NewEvaluation {
        NewEvaluation {
            evaluation_type: "speech_to_text".into(),
            system_prompt: "Transcribe".into(),
            evaluation_model: "gpt-4o-mini".into(),
            scoring_model: "gpt-4o".into(),
            totals: RunTotals { tokens: 3, cost: 0.0 },
        }
    }

    fn result(evaluation_id: i64, test_case_id: i64, verdict: Verdict) -> NewResult {
        NewResult {
            evaluation_id,
            test_case_id,
            output: "out".into(),
            verdict,
            explanation: "because".into(),
            tokens: TokenCounts {
                evaluation_input: 4,
                evaluation_output: 2,
                ..Default::default()
            },
            costs: CostBreakdown::default(),
        }
    }

    #[test]
    fn test_seed_and_load_suite_in_order() {
        let store = MemoryStore::new();
        let n = tokio_test::block_on(store.seed_suite(
            "speech_to_text",
            None,
            vec![case("clarity", "a"), case("filler_words", "b"), case("clarity", "c")],
        ))
        .unwrap();
        assert_eq!(n, 3);

        let suite = tokio_test::block_on(store.load_suite("speech_to_text"))
            .unwrap()
            .unwrap();
        let inputs: Vec<_> = suite.iter().map(|c| c.input.as_str()).collect();
        assert_eq!(inputs, vec!["a", "b", "c"]);
        assert_eq!(suite.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1, 2, 3]);

        assert!(tokio_test::block_on(store.load_suite("other")).unwrap().is_none());
    }

    #[test]
    fn test_seed_rejects_empty_criterion() {
        let store = MemoryStore::new();
        let err = tokio_test::block_on(store.seed_suite("t", None, vec![case(" ", "x")]));
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_seed_rejects_duplicate_case_id() {
        let store = MemoryStore::new();
        let with_id = |id: i64, criterion: &str, input: &str| NewTestCase {
            id: Some(id),
            ..case(criterion, input)
        };
        store
            .seed_suite("a", None, vec![with_id(1, "clarity", "first")])
            .await
            .unwrap();
        assert!(store
            .seed_suite("b", None, vec![with_id(1, "brevity", "second")])
            .await
            .is_err());
        assert!(store.load_suite("b").await.unwrap().is_none());
        assert!(store
            .seed_suite("b", None, vec![with_id(2, "brevity", "x"), with_id(2, "brevity", "y")])
            .await
            .is_err());

        store
            .seed_suite("b", None, vec![with_id(5, "brevity", "second")])
            .await
            .unwrap();
        let eval_id = store
            .create_evaluation(NewEvaluation {
                evaluation_type: "b".into(),
                ..new_eval()
            })
            .await
            .unwrap();
        store
            .append_result(result(eval_id, 5, Verdict::Pass))
            .await
            .unwrap();
        let details = store.get_result(eval_id, 5).await.unwrap().unwrap();
        assert_eq!(details.criterion, "brevity");
        assert_eq!(details.input, "second");
    }

    #[tokio::test]
    async fn test_analysis_counts() {
        let store = MemoryStore::new();
        store
            .seed_suite(
                "speech_to_text",
                None,
                vec![case("clarity", "a"), case("filler_words", "b"), case("clarity", "c")],
            )
            .await
            .unwrap();
        let analysis = store
            .test_case_analysis("speech_to_text")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(analysis.total_test_cases, 3);
        assert_eq!(analysis.counts_per_criterion["clarity"], 2);
        assert_eq!(analysis.criteria["filler_words"], "Filler Words");
    }

    #[tokio::test]
    async fn test_create_requires_known_type() {
        let store = MemoryStore::new();
        assert!(store.create_evaluation(new_eval()).await.is_err());
    }

    #[tokio::test]
    async fn test_record_case_and_read_back() {
        let store = MemoryStore::new();
        store
            .seed_suite("speech_to_text", None, vec![case("clarity", "a"), case("brevity", "b")])
            .await
            .unwrap();
        let eval_id = store.create_evaluation(new_eval()).await.unwrap();

        store
            .record_case(result(eval_id, 1, Verdict::Pass), RunTotals { tokens: 9, cost: 0.1 })
            .await
            .unwrap();
        store
            .record_case(result(eval_id, 2, Verdict::Fail), RunTotals { tokens: 15, cost: 0.2 })
            .await
            .unwrap();

        let details = store.get_result(eval_id, 1).await.unwrap().unwrap();
        assert_eq!(details.result, Verdict::Pass);
        assert_eq!(details.criterion, "clarity");
        assert_eq!(details.prompt_tokens, 4);
        assert!(store.get_result(eval_id, 99).await.unwrap().is_none());

        let detail = store.get_evaluation(eval_id).await.unwrap().unwrap();
        assert_eq!(detail.summary.total_score, 1);
        assert_eq!(detail.summary.total_cases, 2);
        assert_eq!(detail.summary.total_tokens, 15);
        assert_eq!(detail.scores_by_criteria["brevity"].pass_count, 0);
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let store = MemoryStore::new();
        store
            .seed_suite("speech_to_text", None, vec![case("clarity", "a")])
            .await
            .unwrap();
        for _ in 0..3 {
            store.create_evaluation(new_eval()).await.unwrap();
        }
        let page = store.list_evaluations(1, 2).await.unwrap();
        assert_eq!(page.total_count, 3);
        assert_eq!(page.pages, 2);
        assert_eq!(page.evaluations[0].id, 3);
        let page = store.list_evaluations(2, 2).await.unwrap();
        assert_eq!(page.evaluations.len(), 1);
        assert_eq!(page.evaluations[0].id, 1);
        let page = store.list_evaluations(usize::MAX, 10).await.unwrap();
        assert!(page.evaluations.is_empty());
    }

    #[tokio::test]
    async fn test_fail_appends_after() {
        let store = MemoryStore::new();
        store
            .seed_suite("speech_to_text", None, vec![case("clarity", "a"), case("clarity", "b")])
            .await
            .unwrap();
        let eval_id = store.create_evaluation(new_eval()).await.unwrap();
        store.fail_appends_after(1);
        assert!(store.append_result(result(eval_id, 1, Verdict::Pass)).await.is_ok());
        assert!(store.append_result(result(eval_id, 2, Verdict::Pass)).await.is_err());
        assert_eq!(store.result_count(eval_id), 1);
    }
}
