use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::broadcast::ProgressBroadcaster;
use crate::config::{Config, ModelsConfig};
use crate::error::EvalError;
use crate::metrics::Metrics;
use crate::orchestrator::{Orchestrator, RunRequest};
use crate::store::ResultStore;
use crate::ws;

pub struct AppState {
    pub config: Arc<Config>,
    pub models: Arc<ModelsConfig>,
    pub orchestrator: Arc<Orchestrator>,
    pub broadcaster: Arc<ProgressBroadcaster>,
    pub metrics: Arc<Metrics>,
    pub semaphore: Arc<Semaphore>,
    pub started_at: chrono::DateTime<Utc>,
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.cors_origins);
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .route("/config", get(models_config))
        .route("/evaluate", post(evaluate))
        .route("/evaluations", get(list_evaluations))
        .route("/evaluations/:id", get(get_evaluation))
        .route(
            "/test-case-details/:evaluation_id/:test_case_id",
            get(test_case_details),
        )
        .route("/test-case-analysis", get(test_case_analysis))
        .route("/ws", get(ws::ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

impl IntoResponse for EvalError {
    fn into_response(self) -> Response {
        let status = match &self {
            EvalError::ModelNotFound(_) | EvalError::UnsupportedProvider(_) => {
                StatusCode::BAD_REQUEST
            }
            EvalError::UnknownEvaluationType(_) => StatusCode::NOT_FOUND,
            EvalError::ProviderCall { .. } => StatusCode::BAD_GATEWAY,
            EvalError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        let body = serde_json::json!({ "error": self.code(), "detail": self.to_string() });
        (status, Json(body)).into_response()
    }
}

fn not_found(what: String) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "not_found", "detail": what })),
    )
        .into_response()
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_secs: i64,
    active_runs: u64,
    total_runs: u64,
    completed_runs: u64,
    failed_runs: u64,
    observers: usize,
    capacity: usize,
    available_slots: usize,
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let uptime = (Utc::now() - state.started_at).num_seconds();
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: uptime,
        active_runs: state.metrics.runs_active.load(Ordering::Relaxed),
        total_runs: state.metrics.runs_total.load(Ordering::Relaxed),
        completed_runs: state.metrics.runs_completed.load(Ordering::Relaxed),
        failed_runs: state.metrics.runs_failed.load(Ordering::Relaxed),
        observers: state.broadcaster.observer_count(),
        capacity: state.config.max_concurrent_runs,
        available_slots: state.semaphore.available_permits(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let body = state.metrics.render_prometheus();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

async fn models_config(State(state): State<Arc<AppState>>) -> Json<ModelsConfig> {
    Json(state.models.as_ref().clone())
}

#[derive(Deserialize)]
struct EvaluatePayload {
    prompt: String,
    #[serde(default)]
    evaluation_type: Option<String>,
    #[serde(default)]
    evaluation_model: Option<String>,
    #[serde(default)]
    scoring_model: Option<String>,
}

async fn evaluate(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<EvaluatePayload>,
) -> Result<Response, Response> {
    let permit = match state.semaphore.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            state.metrics.reject_run();
            return Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "error": "at_capacity",
                    "detail": format!(
                        "At capacity ({}/{}). Try again later.",
                        state.config.max_concurrent_runs, state.config.max_concurrent_runs
                    ),
                })),
            )
                .into_response());
        }
    };

    let request = RunRequest {
        evaluation_type: payload
            .evaluation_type
            .unwrap_or_else(|| state.config.evaluation_type.clone()),
        system_prompt: payload.prompt,
        evaluation_model: payload.evaluation_model,
        scoring_model: payload.scoring_model,
    };

    // The run outlives a dropped client connection; the permit is held until it ends.
    let orchestrator = state.orchestrator.clone();
    let handle = tokio::spawn(async move {
        let result = orchestrator.run(request).await;
        drop(permit);
        result
    });

    let evaluation_id = match handle.await {
        Ok(Ok(id)) => id,
        Ok(Err(e)) => return Err(e.into_response()),
        Err(e) => {
            return Err(EvalError::Store(anyhow::anyhow!("run task failed: {}", e)).into_response())
        }
    };

    Ok(Json(serde_json::json!({
        "evaluation_id": evaluation_id,
        "message": "Evaluation completed",
    }))
    .into_response())
}

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default = "default_page")]
    page: usize,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_page() -> usize {
    1
}

fn default_limit() -> usize {
    10
}

async fn list_evaluations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> Result<Response, EvalError> {
    let page = state
        .orchestrator
        .store()
        .list_evaluations(query.page, query.limit)
        .await?;
    Ok(Json(page).into_response())
}

async fn get_evaluation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, EvalError> {
    match state.orchestrator.store().get_evaluation(id).await? {
        Some(detail) => Ok(Json(detail).into_response()),
        None => Ok(not_found(format!("Evaluation {} not found", id))),
    }
}

async fn test_case_details(
    State(state): State<Arc<AppState>>,
    Path((evaluation_id, test_case_id)): Path<(i64, i64)>,
) -> Result<Response, EvalError> {
    match state
        .orchestrator
        .store()
        .get_result(evaluation_id, test_case_id)
        .await?
    {
        Some(details) => Ok(Json(details).into_response()),
        None => Ok(not_found(format!(
            "Test case {} not found in evaluation {}",
            test_case_id, evaluation_id
        ))),
    }
}

#[derive(Deserialize)]
struct AnalysisQuery {
    #[serde(default)]
    evaluation_type: Option<String>,
}

async fn test_case_analysis(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AnalysisQuery>,
) -> Result<Response, EvalError> {
    let evaluation_type = query
        .evaluation_type
        .unwrap_or_else(|| state.config.evaluation_type.clone());
    match state
        .orchestrator
        .store()
        .test_case_analysis(&evaluation_type)
        .await?
    {
        Some(analysis) => Ok(Json(analysis).into_response()),
        None => Err(EvalError::UnknownEvaluationType(evaluation_type)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounting::TokenAccountant;
    use crate::retry::RetryPolicy;
    use crate::scoring::tests::{test_registry, ScriptedBackend};
    use crate::store::{MemoryStore, NewTestCase};
    use std::time::Duration;

    async fn spawn_app(permits: usize) -> (String, Arc<AppState>) {
        let store = Arc::new(MemoryStore::new());
        store
            .seed_suite(
                "speech_to_text",
                None,
                vec![
                    NewTestCase {
                        id: None,
                        criterion: "clarity".into(),
                        input: "Hi".into(),
                        description: "Greets clearly".into(),
                    },
                    NewTestCase {
                        id: None,
                        criterion: "filler_words".into(),
                        input: "um hello".into(),
                        description: String::new(),
                    },
                ],
            )
            .await
            .unwrap();

        let registry = test_registry();
        let accountant = Arc::new(TokenAccountant::new(registry.clone()).unwrap());
        let broadcaster = ProgressBroadcaster::new(Duration::from_secs(30));
        let metrics = Metrics::new();
        let models = ModelsConfig::builtin().unwrap();
        let orchestrator = Orchestrator::new(
            Arc::new(ScriptedBackend::always(Ok("pass - fine".into()))),
            store,
            broadcaster.clone(),
            registry,
            accountant,
            &models,
            metrics.clone(),
        )
        .with_pacing(Duration::ZERO)
        .with_retry_policy(RetryPolicy::new(3, Duration::ZERO));

        let state = Arc::new(AppState {
            config: Arc::new(Config::from_env()),
            models: Arc::new(models),
            orchestrator: Arc::new(orchestrator),
            broadcaster,
            metrics,
            semaphore: Arc::new(Semaphore::new(permits)),
            started_at: Utc::now(),
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), state)
    }

    #[tokio::test]
    async fn test_health() {
        let (base, _) = spawn_app(1).await;
        let resp = reqwest::get(format!("{}/health", base)).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_evaluate_then_read_back() {
        let (base, state) = spawn_app(2).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{}/evaluate", base))
            .json(&serde_json::json!({ "prompt": "Be concise" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        let id = body["evaluation_id"].as_i64().unwrap();
        assert_eq!(state.semaphore.available_permits(), 2);

        let list: serde_json::Value = client
            .get(format!("{}/evaluations?page=1&limit=5", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(list["total_count"], 1);
        assert_eq!(list["pages"], 1);
        assert_eq!(list["evaluations"][0]["total_score"], 2);

        let detail: serde_json::Value = client
            .get(format!("{}/evaluations/{}", base, id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(detail["scores_by_criteria"]["clarity"]["pass_count"], 1);
        assert_eq!(detail["model_name"], "gpt-4o-mini");

        let details: serde_json::Value = client
            .get(format!("{}/test-case-details/{}/1", base, id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(details["result"], "pass");
        assert_eq!(details["explanation"], "- fine");
        assert_eq!(details["input_model"], "gpt-4o-mini");

        let missing = client
            .get(format!("{}/test-case-details/{}/99", base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);
    }

    #[tokio::test]
    async fn test_evaluate_unknown_model_is_bad_request() {
        let (base, state) = spawn_app(1).await;
        let resp = reqwest::Client::new()
            .post(format!("{}/evaluate", base))
            .json(&serde_json::json!({ "prompt": "x", "evaluation_model": "gpt-9" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "model_not_found");
        let page = state.orchestrator.store().list_evaluations(1, 10).await.unwrap();
        assert_eq!(page.total_count, 0);
    }

    #[tokio::test]
    async fn test_evaluate_unknown_type_is_not_found() {
        let (base, _) = spawn_app(1).await;
        let resp = reqwest::Client::new()
            .post(format!("{}/evaluate", base))
            .json(&serde_json::json!({ "prompt": "x", "evaluation_type": "translation" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn test_evaluate_at_capacity() {
        let (base, _) = spawn_app(0).await;
        let resp = reqwest::Client::new()
            .post(format!("{}/evaluate", base))
            .json(&serde_json::json!({ "prompt": "x" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 503);
    }

    #[tokio::test]
    async fn test_analysis_and_config() {
        let (base, _) = spawn_app(1).await;
        let analysis: serde_json::Value = reqwest::get(format!("{}/test-case-analysis", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(analysis["total_test_cases"], 2);
        assert_eq!(analysis["criteria"]["filler_words"], "Filler Words");

        let config: serde_json::Value = reqwest::get(format!("{}/config", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(config["default"]["scoring_model"], "gpt-4o");
        assert!(config["models"]["Anthropic"].is_object());
    }

    #[tokio::test]
    async fn test_metrics_and_status() {
        let (base, _) = spawn_app(3).await;
        let resp = reqwest::get(format!("{}/metrics", base)).await.unwrap();
        assert_eq!(resp.status(), 200);
        let text = resp.text().await.unwrap();
        assert!(text.contains("llm_eval_runs_total 0"));

        let status: serde_json::Value = reqwest::get(format!("{}/status", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["available_slots"], 3);
        assert_eq!(status["observers"], 0);
    }
}
