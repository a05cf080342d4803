use anyhow::{Context, Result};
use serde_json::json;

use super::{read_json, Message, ProviderEndpoint, Role};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic has no system role. System content is folded into the next user
/// message; if nothing user-authored leads the conversation, the pending
/// system content becomes a synthetic first user message. Blank messages are
/// dropped.
pub fn shape_messages(messages: &[Message]) -> Vec<Message> {
    let mut shaped = Vec::with_capacity(messages.len());
    let mut pending_system = String::new();

    for msg in messages {
        let content = msg.content.trim();
        if content.is_empty() {
            continue;
        }
        match msg.role {
            Role::System => {
                pending_system.push_str(content);
                pending_system.push_str("\n\n");
            }
            Role::User => {
                let mut merged = std::mem::take(&mut pending_system);
                merged.push_str(content);
                shaped.push(Message::user(merged));
            }
            Role::Assistant => shaped.push(Message::assistant(content)),
        }
    }

    let leads_with_user = shaped.first().is_some_and(|m| m.role == Role::User);
    if !pending_system.is_empty() && !leads_with_user {
        shaped.insert(0, Message::user(pending_system));
    }

    shaped
}

pub(crate) async fn complete(
    client: &reqwest::Client,
    endpoint: &ProviderEndpoint,
    model: &str,
    messages: &[Message],
    temperature: f32,
    max_tokens: u32,
) -> Result<String> {
    let body = json!({
        "model": model,
        "messages": shape_messages(messages),
        "temperature": temperature,
        "max_tokens": max_tokens,
    });

    let resp = client
        .post(endpoint.url("/v1/messages"))
        .header("x-api-key", endpoint.api_key()?)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .json(&body)
        .send()
        .await
        .context("Failed to send request to Anthropic")?;

    let json = read_json(resp).await?;
    json.pointer("/content/0/text")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .context("Response missing content[0].text")
}
