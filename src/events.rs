use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::scoring::Verdict;

/// Liveness frame sent by observer heartbeats.
pub const PING_FRAME: &str = r#"{"type":"ping"}"#;

/// Sent once to a new observer, before any progress event reaches it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomeFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub observer_id: Uuid,
    pub observers: usize,
}

impl WelcomeFrame {
    pub fn new(observer_id: Uuid, observers: usize) -> Self {
        Self {
            kind: "connected".to_string(),
            observer_id,
            observers,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionProgress {
    pub total: usize,
    pub processed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Evaluation,
    Error,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub id: i64,
    pub criterion: String,
    pub result: Verdict,
    pub evaluation_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

/// Wire shape of every progress message pushed to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub total_progress: String,
    pub criteria_progress: BTreeMap<String, CriterionProgress>,
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_result: Option<CaseResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressEvent {
    pub fn new(
        stage: Stage,
        processed: usize,
        total: usize,
        criteria_progress: BTreeMap<String, CriterionProgress>,
    ) -> Self {
        Self {
            total_progress: format!("{}/{}", processed, total),
            criteria_progress,
            stage,
            current_result: None,
            total_cost: None,
            evaluation_id: None,
            status: None,
            error: None,
            message: None,
        }
    }

    pub fn with_result(mut self, result: CaseResult) -> Self {
        self.current_result = Some(result);
        self
    }

    pub fn with_total_cost(mut self, cost: f64) -> Self {
        self.total_cost = Some(cost);
        self
    }

    pub fn with_evaluation_id(mut self, id: i64) -> Self {
        self.evaluation_id = Some(id);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
