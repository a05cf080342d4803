use anyhow::{Context, Result};
use serde_json::json;

use super::{read_json, Message, ProviderEndpoint};

/// Gemini gets a single prompt: one `Role: content` line per message.
pub fn flatten_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.label(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) async fn complete(
    client: &reqwest::Client,
    endpoint: &ProviderEndpoint,
    model: &str,
    messages: &[Message],
    temperature: f32,
) -> Result<String> {
    let body = json!({
        "contents": [{
            "role": "user",
            "parts": [{"text": flatten_transcript(messages)}],
        }],
        "generationConfig": {"temperature": temperature},
    });

    let resp = client
        .post(endpoint.url(&format!("/v1beta/models/{}:generateContent", model)))
        .query(&[("key", endpoint.api_key()?)])
        .json(&body)
        .send()
        .await
        .context("Failed to send request to Google")?;

    let json = read_json(resp).await?;
    json.pointer("/candidates/0/content/parts/0/text")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .context("Response missing candidates[0].content.parts[0].text")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionBackend, HttpBackend, Provider};
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_flatten_transcript() {
        let prompt = flatten_transcript(&[
            Message::system("Be terse"),
            Message::user("Hi"),
            Message::assistant("Hello"),
        ]);
        assert_eq!(prompt, "System: Be terse\nUser: Hi\nAssistant: Hello");
    }

    #[test]
    fn test_flatten_empty() {
        assert_eq!(flatten_transcript(&[]), "");
    }

    #[tokio::test]
    async fn test_complete_posts_flattened_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-1.5-flash:generateContent"))
            .and(query_param("key", "gk-test"))
            .and(body_partial_json(json!({
                "contents": [{"parts": [{"text": "System: S\nUser: U"}]}],
                "generationConfig": {"temperature": 0.0}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "fail: off topic"}]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let endpoint = ProviderEndpoint::new(server.uri(), Some("gk-test".to_string()));
        let backend =
            HttpBackend::new(endpoint.clone(), endpoint.clone(), endpoint, 256).unwrap();
        let text = backend
            .complete(
                Provider::Google,
                "gemini-1.5-flash",
                &[Message::system("S"), Message::user("U")],
                0.0,
            )
            .await
            .unwrap();
        assert_eq!(text, "fail: off topic");
    }

    #[tokio::test]
    async fn test_server_error_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let endpoint = ProviderEndpoint::new(server.uri(), Some("gk-test".to_string()));
        let backend =
            HttpBackend::new(endpoint.clone(), endpoint.clone(), endpoint, 256).unwrap();
        let err = backend
            .complete(Provider::Google, "gemini-1.5-pro", &[Message::user("U")], 0.0)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Google API error"));
        assert!(err.to_string().contains("503"));
    }
}
