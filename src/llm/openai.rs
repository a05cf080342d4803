use anyhow::{Context, Result};
use serde_json::json;

use super::{read_json, Message, ProviderEndpoint};

pub(crate) async fn complete(
    client: &reqwest::Client,
    endpoint: &ProviderEndpoint,
    model: &str,
    messages: &[Message],
    temperature: f32,
) -> Result<String> {
    let body = json!({
        "model": model,
        "messages": messages,
        "temperature": temperature,
    });

    let resp = client
        .post(endpoint.url("/v1/chat/completions"))
        .bearer_auth(endpoint.api_key()?)
        .json(&body)
        .send()
        .await
        .context("Failed to send request to OpenAI")?;

    let json = read_json(resp).await?;
    json.pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .context("Response missing choices[0].message.content")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionBackend, HttpBackend, Provider};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(server: &MockServer) -> HttpBackend {
        let endpoint = ProviderEndpoint::new(server.uri(), Some("sk-test".to_string()));
        HttpBackend::new(endpoint.clone(), endpoint.clone(), endpoint, 256).unwrap()
    }

    #[tokio::test]
    async fn test_messages_sent_unmodified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4o",
                "messages": [
                    {"role": "system", "content": "S"},
                    {"role": "user", "content": "U"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "hello"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = backend(&server)
            .complete(
                Provider::OpenAi,
                "gpt-4o",
                &[Message::system("S"), Message::user("U")],
                0.7,
            )
            .await
            .unwrap();
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn test_http_error_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let err = backend(&server)
            .complete(Provider::OpenAi, "gpt-4o", &[Message::user("U")], 0.0)
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("OpenAI API error"));
        assert!(msg.contains("429"));
        assert!(msg.contains("rate limited"));
    }

    #[tokio::test]
    async fn test_missing_content_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let err = backend(&server)
            .complete(Provider::OpenAi, "gpt-4o", &[Message::user("U")], 0.0)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("choices[0].message.content"));
    }
}
