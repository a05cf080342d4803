use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::accounting::{TokenAccountant, TokenCounts, TokenKind};
use crate::broadcast::ProgressBroadcaster;
use crate::config::{EvaluationSettings, ModelDefaults, ModelsConfig};
use crate::error::EvalError;
use crate::events::CaseResult;
use crate::llm::{CompletionBackend, Message, Provider, ProviderRegistry};
use crate::metrics::Metrics;
use crate::progress::{CaseStage, RunProgress};
use crate::retry::RetryPolicy;
use crate::scoring::{ScoreOutcome, Scorer, Verdict};
use crate::store::{snake_to_title_case, NewEvaluation, NewResult, ResultStore, RunTotals, TestCase};

const DEFAULT_PACING: Duration = Duration::from_millis(500);

/// Everything that varies per run. Unset models fall back to the configured defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub evaluation_type: String,
    pub system_prompt: String,
    #[serde(default)]
    pub evaluation_model: Option<String>,
    #[serde(default)]
    pub scoring_model: Option<String>,
}

/// The model pair a run was validated against.
#[derive(Debug, Clone)]
struct RunModels {
    evaluation: String,
    evaluation_provider: Provider,
    scoring: String,
}

/// Drives one run at a time per call; several calls may run concurrently and
/// share only the store and the broadcaster.
pub struct Orchestrator {
    backend: Arc<dyn CompletionBackend>,
    store: Arc<dyn ResultStore>,
    broadcaster: Arc<ProgressBroadcaster>,
    registry: Arc<ProviderRegistry>,
    accountant: Arc<TokenAccountant>,
    scorer: Scorer,
    settings: EvaluationSettings,
    defaults: ModelDefaults,
    metrics: Arc<Metrics>,
    pacing: Duration,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        store: Arc<dyn ResultStore>,
        broadcaster: Arc<ProgressBroadcaster>,
        registry: Arc<ProviderRegistry>,
        accountant: Arc<TokenAccountant>,
        models: &ModelsConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        let scorer = Scorer::new(
            backend.clone(),
            registry.clone(),
            accountant.clone(),
            &models.settings,
        );
        Self {
            backend,
            store,
            broadcaster,
            registry,
            accountant,
            scorer,
            settings: models.settings.clone(),
            defaults: models.default.clone(),
            metrics,
            pacing: DEFAULT_PACING,
        }
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.scorer = self.scorer.with_policy(policy);
        self
    }

    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.store
    }

    fn resolve_models(&self, request: &RunRequest) -> Result<RunModels, EvalError> {
        let evaluation = request
            .evaluation_model
            .clone()
            .unwrap_or_else(|| self.defaults.evaluation_model.clone());
        let scoring = request
            .scoring_model
            .clone()
            .unwrap_or_else(|| self.defaults.scoring_model.clone());
        let evaluation_provider = self.registry.provider_for(&evaluation)?;
        self.registry.provider_for(&scoring)?;
        Ok(RunModels {
            evaluation,
            evaluation_provider,
            scoring,
        })
    }

    /// Runs the whole suite for `request` and returns the evaluation id.
    ///
    /// Configuration errors and unknown evaluation types fail before anything
    /// is written. Once the evaluation exists only a store failure aborts the
    /// run; provider failures end up as `error` results.
    pub async fn run(&self, request: RunRequest) -> Result<i64, EvalError> {
        let models = match self.resolve_models(&request) {
            Ok(models) => models,
            Err(e) => {
                warn!(error = %e, "Rejecting run with invalid model selection");
                self.metrics.reject_run();
                return Err(e);
            }
        };

        let suite = match self.store.load_suite(&request.evaluation_type).await? {
            Some(suite) => suite,
            None => {
                self.metrics.reject_run();
                return Err(EvalError::UnknownEvaluationType(request.evaluation_type));
            }
        };

        info!(
            evaluation_type = %request.evaluation_type,
            evaluation_model = %models.evaluation,
            scoring_model = %models.scoring,
            test_cases = suite.len(),
            "Starting run"
        );

        self.metrics.start_run();
        let started = Instant::now();
        let result = self.execute(&request, &models, &suite).await;
        self.metrics
            .finish_run(result.is_ok(), started.elapsed().as_millis() as u64);
        result
    }

    async fn execute(
        &self,
        request: &RunRequest,
        models: &RunModels,
        suite: &[TestCase],
    ) -> Result<i64, EvalError> {
        let mut progress = RunProgress::new(suite);

        let prompt_tokens = self
            .accountant
            .count_tokens(&request.system_prompt, &models.evaluation);
        let prompt_cost = if self.settings.track_costs {
            self.accountant
                .cost(prompt_tokens, &models.evaluation, TokenKind::Input)?
        } else {
            0.0
        };
        let mut totals = RunTotals {
            tokens: prompt_tokens,
            cost: prompt_cost,
        };

        let created = self
            .store
            .create_evaluation(NewEvaluation {
                evaluation_type: request.evaluation_type.clone(),
                system_prompt: request.system_prompt.clone(),
                evaluation_model: models.evaluation.clone(),
                scoring_model: models.scoring.clone(),
                totals,
            })
            .await;
        let evaluation_id = match created {
            Ok(id) => id,
            Err(e) => return Err(self.abort(&mut progress, e).await),
        };
        progress.start(evaluation_id);

        for (index, case) in suite.iter().enumerate() {
            if let Err(e) = self
                .process_case(request, models, evaluation_id, index, case, &mut progress, &mut totals)
                .await
            {
                return Err(self.abort(&mut progress, e).await);
            }
            if index + 1 < suite.len() && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
        }

        progress.complete();
        self.broadcaster
            .broadcast(&progress.completed_event(totals.cost))
            .await;
        info!(
            evaluation_id,
            total_tokens = totals.tokens,
            total_cost = totals.cost,
            "Run finished"
        );
        Ok(evaluation_id)
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_case(
        &self,
        request: &RunRequest,
        models: &RunModels,
        evaluation_id: i64,
        index: usize,
        case: &TestCase,
        progress: &mut RunProgress,
        totals: &mut RunTotals,
    ) -> anyhow::Result<()> {
        progress.case_stage(index, case.id, CaseStage::Evaluating);

        let messages = vec![
            Message::system(&request.system_prompt),
            Message::user(&case.input),
        ];
        let candidate = self
            .backend
            .complete(
                models.evaluation_provider,
                &models.evaluation,
                &messages,
                self.settings.temperature,
            )
            .await;

        let (output, outcome, failure) = match candidate {
            Ok(output) => {
                let description = if case.description.trim().is_empty() {
                    snake_to_title_case(&case.criterion)
                } else {
                    case.description.clone()
                };
                let outcome = self
                    .scorer
                    .score(&case.input, &output, &case.criterion, &description, &models.scoring)
                    .await;
                (output, outcome, None)
            }
            Err(e) => {
                error!(
                    evaluation_id,
                    test_case_id = case.id,
                    error = %e,
                    "Candidate completion failed"
                );
                let message = e.to_string();
                let outcome = ScoreOutcome {
                    verdict: Verdict::Error,
                    explanation: message.clone(),
                    prompt_tokens: 0,
                    response_tokens: 0,
                };
                (format!("Error: {}", message), outcome, Some(message))
            }
        };

        let tokens = if failure.is_some() {
            TokenCounts::default()
        } else {
            TokenCounts {
                evaluation_input: self.accountant.count_tokens(&case.input, &models.evaluation),
                evaluation_output: self.accountant.count_tokens(&output, &models.evaluation),
                scoring_input: outcome.prompt_tokens,
                scoring_output: outcome.response_tokens,
            }
        };
        let costs = self.accountant.case_costs(
            &tokens,
            &models.evaluation,
            &models.scoring,
            self.settings.track_costs,
        )?;
        totals.add(tokens.total(), costs.total());

        self.store
            .record_case(
                NewResult {
                    evaluation_id,
                    test_case_id: case.id,
                    output,
                    verdict: outcome.verdict,
                    explanation: outcome.explanation,
                    tokens,
                    costs,
                },
                *totals,
            )
            .await?;

        let stage = if failure.is_some() {
            CaseStage::Error
        } else {
            CaseStage::Persisted
        };
        progress.case_stage(index, case.id, stage);
        progress.record_case(&case.criterion);
        self.metrics
            .record_case(outcome.verdict, tokens.total(), costs.total());

        let result = CaseResult {
            id: case.id,
            criterion: case.criterion.clone(),
            result: outcome.verdict,
            evaluation_id,
            cost: self.settings.track_costs.then(|| costs.total()),
        };
        let event = match failure {
            Some(message) => progress.case_error_event(result, &message),
            None => progress.case_event(result),
        };
        self.broadcaster.broadcast(&event).await;
        Ok(())
    }

    async fn abort(&self, progress: &mut RunProgress, e: anyhow::Error) -> EvalError {
        error!(error = %format!("{:#}", e), processed = progress.processed(), "Run aborted");
        progress.fail();
        self.broadcaster
            .broadcast(&progress.aborted_event(&format!("{:#}", e)))
            .await;
        EvalError::Store(e)
    }
}
