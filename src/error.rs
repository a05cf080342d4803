use thiserror::Error;

use crate::llm::Provider;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Model {0} not found in configuration")]
    ModelNotFound(String),

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("Evaluation type {0} not found")]
    UnknownEvaluationType(String),

    #[error("{provider} API error: {message}")]
    ProviderCall { provider: Provider, message: String },

    #[error("Database error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl EvalError {
    pub fn provider(provider: Provider, message: impl Into<String>) -> Self {
        Self::ProviderCall {
            provider,
            message: message.into(),
        }
    }

    /// Errors raised before a run has any side effect.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            EvalError::ModelNotFound(_) | EvalError::UnsupportedProvider(_)
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            EvalError::ModelNotFound(_) => "model_not_found",
            EvalError::UnsupportedProvider(_) => "unsupported_provider",
            EvalError::UnknownEvaluationType(_) => "unknown_evaluation_type",
            EvalError::ProviderCall { .. } => "provider_call_failed",
            EvalError::Store(_) => "store_error",
        }
    }
}
