use anyhow::Result;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tiktoken_rs::tokenizer::{get_tokenizer, Tokenizer};
use tiktoken_rs::CoreBPE;
use tracing::debug;

use crate::error::EvalError;
use crate::llm::ProviderRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Input,
    Output,
}

/// Token counts for the two calls made per test case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    pub evaluation_input: u64,
    pub evaluation_output: u64,
    pub scoring_input: u64,
    pub scoring_output: u64,
}

impl TokenCounts {
    pub fn total(&self) -> u64 {
        self.evaluation_input + self.evaluation_output + self.scoring_input + self.scoring_output
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub evaluation_input: f64,
    pub evaluation_output: f64,
    pub scoring_input: f64,
    pub scoring_output: f64,
}

impl CostBreakdown {
    pub fn total(&self) -> f64 {
        self.evaluation_input + self.evaluation_output + self.scoring_input + self.scoring_output
    }

    pub fn evaluation(&self) -> f64 {
        self.evaluation_input + self.evaluation_output
    }

    pub fn scoring(&self) -> f64 {
        self.scoring_input + self.scoring_output
    }
}

/// Counts tokens with each model's own encoding and prices them from the rate table.
pub struct TokenAccountant {
    registry: Arc<ProviderRegistry>,
    encoders: DashMap<String, Arc<CoreBPE>>,
    fallback: Arc<CoreBPE>,
}

impl TokenAccountant {
    /// Encoders for every configured model are built here, one per distinct
    /// tokenizer. Lookups during a run never construct BPE tables.
    pub fn new(registry: Arc<ProviderRegistry>) -> Result<Self> {
        let fallback = Arc::new(tiktoken_rs::cl100k_base()?);
        let encoders = DashMap::new();
        let mut built: HashMap<Tokenizer, Arc<CoreBPE>> = HashMap::new();
        built.insert(Tokenizer::Cl100kBase, fallback.clone());
        for model in registry.model_names() {
            let enc = match get_tokenizer(model) {
                Some(tokenizer) => match built.get(&tokenizer) {
                    Some(enc) => enc.clone(),
                    None => {
                        let enc = Arc::new(tiktoken_rs::get_bpe_from_tokenizer(tokenizer)?);
                        built.insert(tokenizer, enc.clone());
                        enc
                    }
                },
                None => fallback.clone(),
            };
            encoders.insert(model.to_string(), enc);
        }
        debug!(models = encoders.len(), "Tokenizers ready");
        Ok(Self {
            registry,
            encoders,
            fallback,
        })
    }

    fn encoder(&self, model: &str) -> Arc<CoreBPE> {
        if let Some(enc) = self.encoders.get(model) {
            return enc.value().clone();
        }
        let enc = match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => Arc::new(bpe),
            Err(_) => {
                debug!(model, "No dedicated tokenizer, using cl100k_base");
                self.fallback.clone()
            }
        };
        self.encoders.insert(model.to_string(), enc.clone());
        enc
    }

    pub fn count_tokens(&self, text: &str, model: &str) -> u64 {
        self.encoder(model).encode_with_special_tokens(text).len() as u64
    }

    pub fn cost(&self, tokens: u64, model: &str, kind: TokenKind) -> Result<f64, EvalError> {
        let rates = self.registry.rates(model)?;
        let rate = match kind {
            TokenKind::Input => rates.input,
            TokenKind::Output => rates.output,
        };
        Ok(tokens as f64 / 1_000_000.0 * rate)
    }

    /// Four-way breakdown for one test case. All zero when cost tracking is off.
    pub fn case_costs(
        &self,
        counts: &TokenCounts,
        evaluation_model: &str,
        scoring_model: &str,
        track_costs: bool,
    ) -> Result<CostBreakdown, EvalError> {
        if !track_costs {
            return Ok(CostBreakdown::default());
        }
        Ok(CostBreakdown {
            evaluation_input: self.cost(counts.evaluation_input, evaluation_model, TokenKind::Input)?,
            evaluation_output: self.cost(
                counts.evaluation_output,
                evaluation_model,
                TokenKind::Output,
            )?,
            scoring_input: self.cost(counts.scoring_input, scoring_model, TokenKind::Input)?,
            scoring_output: self.cost(counts.scoring_output, scoring_model, TokenKind::Output)?,
        })
    }
}
