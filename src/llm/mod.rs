pub mod anthropic;
pub mod google;
pub mod openai;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::config::{Config, ModelRates, ModelsConfig};
use crate::error::EvalError;

const REQUEST_TIMEOUT_SECS: u64 = 120;
const MAX_ERROR_BODY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Capitalised label used when flattening a conversation into a transcript.
    pub fn label(&self) -> &'static str {
        match self {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "OpenAI")]
    OpenAi,
    Anthropic,
    Google,
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OpenAI",
            Provider::Anthropic => "Anthropic",
            Provider::Google => "Google",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Provider {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            "google" => Ok(Provider::Google),
            _ => Err(EvalError::UnsupportedProvider(s.to_string())),
        }
    }
}

/// Model identifier → provider and rates, built once from the models file.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    models: HashMap<String, (Provider, ModelRates)>,
}

impl ProviderRegistry {
    pub fn from_config(cfg: &ModelsConfig) -> Result<Self, EvalError> {
        let mut models = HashMap::new();
        for (provider_name, table) in &cfg.models {
            let provider = Provider::from_str(provider_name)?;
            for (model, rates) in table {
                models.insert(model.clone(), (provider, *rates));
            }
        }
        Ok(Self { models })
    }

    pub fn provider_for(&self, model: &str) -> Result<Provider, EvalError> {
        self.models
            .get(model)
            .map(|(provider, _)| *provider)
            .ok_or_else(|| EvalError::ModelNotFound(model.to_string()))
    }

    pub fn rates(&self, model: &str) -> Result<ModelRates, EvalError> {
        self.models
            .get(model)
            .map(|(_, rates)| *rates)
            .ok_or_else(|| EvalError::ModelNotFound(model.to_string()))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }
}

/// One completion call against a vendor. Implementations do not retry.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(
        &self,
        provider: Provider,
        model: &str,
        messages: &[Message],
        temperature: f32,
    ) -> Result<String, EvalError>;
}

#[derive(Debug, Clone)]
pub struct ProviderEndpoint {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl ProviderEndpoint {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub(crate) fn api_key(&self) -> Result<&str> {
        self.api_key.as_deref().context("API key not configured")
    }
}

pub struct HttpBackend {
    client: reqwest::Client,
    openai: ProviderEndpoint,
    anthropic: ProviderEndpoint,
    google: ProviderEndpoint,
    max_tokens: u32,
}

impl HttpBackend {
    pub fn new(
        openai: ProviderEndpoint,
        anthropic: ProviderEndpoint,
        google: ProviderEndpoint,
        max_tokens: u32,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client for provider APIs")?;
        Ok(Self {
            client,
            openai,
            anthropic,
            google,
            max_tokens,
        })
    }

    pub fn from_config(config: &Config, max_tokens: u32) -> Result<Self> {
        Self::new(
            ProviderEndpoint::new(&config.openai_base_url, config.openai_api_key.clone()),
            ProviderEndpoint::new(&config.anthropic_base_url, config.anthropic_api_key.clone()),
            ProviderEndpoint::new(&config.google_base_url, config.google_api_key.clone()),
            max_tokens,
        )
    }
}

#[async_trait]
impl CompletionBackend for HttpBackend {
    async fn complete(
        &self,
        provider: Provider,
        model: &str,
        messages: &[Message],
        temperature: f32,
    ) -> Result<String, EvalError> {
        debug!(%provider, model, messages = messages.len(), "Requesting completion");
        let result = match provider {
            Provider::OpenAi => {
                openai::complete(&self.client, &self.openai, model, messages, temperature).await
            }
            Provider::Anthropic => {
                anthropic::complete(
                    &self.client,
                    &self.anthropic,
                    model,
                    messages,
                    temperature,
                    self.max_tokens,
                )
                .await
            }
            Provider::Google => {
                google::complete(&self.client, &self.google, model, messages, temperature).await
            }
        };
        result.map_err(|e| EvalError::provider(provider, format!("{:#}", e)))
    }
}

pub(crate) async fn read_json(resp: reqwest::Response) -> Result<serde_json::Value> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        let end = body
            .char_indices()
            .nth(MAX_ERROR_BODY)
            .map(|(i, _)| i)
            .unwrap_or(body.len());
        anyhow::bail!("HTTP {}: {}", status.as_u16(), &body[..end]);
    }
    resp.json().await.context("Failed to parse response body")
}
