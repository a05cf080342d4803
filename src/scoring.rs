use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

use crate::accounting::TokenAccountant;
use crate::config::EvaluationSettings;
use crate::llm::{CompletionBackend, Message, ProviderRegistry};
use crate::retry::{retry, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
    Error,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "pass",
            Verdict::Fail => "fail",
            Verdict::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pass" => Some(Verdict::Pass),
            "fail" => Some(Verdict::Fail),
            "error" => Some(Verdict::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreOutcome {
    pub verdict: Verdict,
    pub explanation: String,
    pub prompt_tokens: u64,
    pub response_tokens: u64,
}

pub fn render_prompt(
    template: &str,
    input: &str,
    output: &str,
    criterion: &str,
    description: &str,
) -> String {
    template
        .replace("{input}", input)
        .replace("{output}", output)
        .replace("{criterion}", criterion)
        .replace("{description}", description)
}

/// Any line mentioning "pass" (case-insensitive, anywhere) makes the verdict a
/// pass. The explanation is the response with standalone pass/fail words
/// removed; the remaining text keeps its spacing and indentation.
pub fn parse_verdict(response: &str) -> (Verdict, String) {
    let passed = response
        .lines()
        .any(|line| line.to_lowercase().contains("pass"));

    // Lines that held nothing but a verdict word disappear entirely.
    let explanation = response
        .lines()
        .filter_map(|line| {
            let stripped = strip_verdict_words(line);
            if stripped.trim().is_empty() && !line.trim().is_empty() {
                None
            } else {
                Some(stripped)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim_matches('\n')
        .to_string();

    let verdict = if passed { Verdict::Pass } else { Verdict::Fail };
    (verdict, explanation)
}

fn is_verdict_word(word: &str) -> bool {
    let core = word
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_ascii_lowercase();
    core == "pass" || core == "fail"
}

/// Drops each verdict word together with the whitespace that follows it.
fn strip_verdict_words(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while !rest.is_empty() {
        let word_start = rest.len() - rest.trim_start().len();
        out.push_str(&rest[..word_start]);
        rest = &rest[word_start..];
        let word_len = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let (word, tail) = rest.split_at(word_len);
        if is_verdict_word(word) {
            rest = tail.trim_start();
        } else {
            out.push_str(word);
            rest = tail;
        }
    }
    out.trim_end().to_string()
}

/// Asks the scoring model for a verdict under a bounded retry envelope.
/// Never fails: exhausted retries come back as an `error` verdict.
pub struct Scorer {
    backend: Arc<dyn CompletionBackend>,
    registry: Arc<ProviderRegistry>,
    accountant: Arc<TokenAccountant>,
    system_prompt: String,
    template: String,
    temperature: f32,
    policy: RetryPolicy,
}

impl Scorer {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        registry: Arc<ProviderRegistry>,
        accountant: Arc<TokenAccountant>,
        settings: &EvaluationSettings,
    ) -> Self {
        Self {
            backend,
            registry,
            accountant,
            system_prompt: settings.system_prompt.clone(),
            template: settings.evaluation_prompt_template.clone(),
            temperature: settings.scoring_temperature,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn score(
        &self,
        input: &str,
        output: &str,
        criterion: &str,
        description: &str,
        model: &str,
    ) -> ScoreOutcome {
        let provider = match self.registry.provider_for(model) {
            Ok(p) => p,
            Err(e) => return error_outcome(e.to_string()),
        };

        let prompt = render_prompt(&self.template, input, output, criterion, description);
        let messages = vec![Message::system(&self.system_prompt), Message::user(&prompt)];

        let result = retry(
            self.policy,
            "scoring",
            |_| {
                self.backend
                    .complete(provider, model, &messages, self.temperature)
            },
            |text: &String| !text.trim().is_empty(),
        )
        .await;

        match result {
            Ok(text) => {
                let (verdict, explanation) = parse_verdict(&text);
                debug!(criterion, %verdict, "Scored output");
                ScoreOutcome {
                    verdict,
                    explanation,
                    prompt_tokens: self.accountant.count_tokens(&self.system_prompt, model)
                        + self.accountant.count_tokens(&prompt, model),
                    response_tokens: self.accountant.count_tokens(&text, model),
                }
            }
            Err(e) => {
                error!(
                    criterion,
                    model,
                    attempts = e.attempts,
                    error = %e.last_error,
                    "Scoring failed after all retries"
                );
                error_outcome(e.last_error)
            }
        }
    }
}

fn error_outcome(explanation: String) -> ScoreOutcome {
    ScoreOutcome {
        verdict: Verdict::Error,
        explanation,
        prompt_tokens: 0,
        response_tokens: 0,
    }
}
