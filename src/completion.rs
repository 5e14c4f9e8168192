//! Chat-completion client for the Together API.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// One prompt, one response. No streaming.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Anything that can turn a prompt into free text.
#[async_trait::async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// Together client for OpenAI-compatible chat completions.
#[derive(Clone)]
pub struct TogetherClient {
    client: Client,
    api_url: String,
    api_key: String,
}

impl TogetherClient {
    /// Build a client whose every request is bounded by `timeout`.
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_url: api_url.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait::async_trait]
impl CompletionClient for TogetherClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = ChatCompletionRequest {
            model: &request.model,
            messages: vec![Message::user(&request.prompt)],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        debug!(
            "Sending request to Together: model={} temperature={} max_tokens={}",
            request.model, request.temperature, request.max_tokens
        );

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to send request to Together")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Together API error ({}): {}", status, error_text);
        }

        let response: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse Together response")?;

        if let Some(usage) = &response.usage {
            info!(
                "Together response: {} tokens (prompt: {}, completion: {})",
                usage.total_tokens, usage.prompt_tokens, usage.completion_tokens
            );
        }

        first_choice_content(response)
    }
}

fn first_choice_content(response: ChatCompletionResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .context("Together response has no message content")
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum Role {
    User,
}

impl<'a> Message<'a> {
    fn user(content: &'a str) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::PipelineError;
    use axum::{
        http::{HeaderMap, StatusCode},
        routing::post,
        Json, Router,
    };
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Serve `router` on an ephemeral local port and return its base URL.
    pub async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{}", addr)
    }

    /// Completion client returning a canned reply (or error) and recording requests.
    pub struct FakeCompletion {
        reply: std::result::Result<String, String>,
        pub requests: Mutex<Vec<CompletionRequest>>,
    }

    impl FakeCompletion {
        pub fn replying(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(message: &str) -> Self {
            Self {
                reply: Err(message.to_string()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn last_request(&self) -> CompletionRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait::async_trait]
    impl CompletionClient for FakeCompletion {
        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            self.requests.lock().unwrap().push(request.clone());
            self.reply.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    #[test]
    fn test_request_body_shape() {
        let body = ChatCompletionRequest {
            model: "m",
            messages: vec![Message::user("hello")],
            temperature: 0.1,
            max_tokens: 2048,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "m");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hello");
        assert_eq!(json["max_tokens"], 2048);
    }

    #[test]
    fn test_first_choice_content() {
        let resp: ChatCompletionResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"{\"tds\": 1}"}}]}"#,
        )
        .unwrap();
        assert_eq!(first_choice_content(resp).unwrap(), r#"{"tds": 1}"#);
    }

    #[test]
    fn test_missing_content_is_error() {
        let resp: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
        assert!(first_choice_content(resp).is_err());

        let resp: ChatCompletionResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(first_choice_content(resp).is_err());
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "test-model".to_string(),
            prompt: "Extract the fields".to_string(),
            temperature: 0.1,
            max_tokens: 2048,
        }
    }

    async fn replying_with(status: StatusCode, body: &'static str) -> TogetherClient {
        let url = serve(Router::new().route("/", post(move || async move { (status, body) }))).await;
        TogetherClient::new(format!("{}/", url), "test-key", Duration::from_secs(5)).unwrap()
    }

    fn external_parts(err: &anyhow::Error) -> (String, bool) {
        match PipelineError::external(err) {
            PipelineError::ExternalService { message, timed_out } => (message, timed_out),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_together_sends_bearer_and_reads_content() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let echo = format!(
                    "{} {} {} {}",
                    auth, body["model"], body["max_tokens"], body["messages"][0]["content"]
                );
                Json(json!({
                    "choices": [{"message": {"role": "assistant", "content": echo}}],
                    "usage": {"prompt_tokens": 12, "completion_tokens": 4, "total_tokens": 16}
                }))
            }),
        );
        let url = serve(router).await;
        let client = TogetherClient::new(
            format!("{}/v1/chat/completions", url),
            "test-key",
            Duration::from_secs(5),
        )
        .unwrap();

        let text = client.complete(&request()).await.unwrap();
        assert_eq!(text, r#"Bearer test-key "test-model" 2048 "Extract the fields""#);
    }

    #[tokio::test]
    async fn test_together_unauthorized_is_external_error() {
        let client = replying_with(StatusCode::UNAUTHORIZED, "invalid api key").await;
        let err = client.complete(&request()).await.unwrap_err();

        let (message, timed_out) = external_parts(&err);
        assert!(message.contains("401"), "{}", message);
        assert!(message.contains("invalid api key"), "{}", message);
        assert!(!timed_out);
    }

    #[tokio::test]
    async fn test_together_server_error_is_external_error() {
        let client = replying_with(StatusCode::SERVICE_UNAVAILABLE, "overloaded").await;
        let err = client.complete(&request()).await.unwrap_err();

        let (message, timed_out) = external_parts(&err);
        assert!(message.contains("503"), "{}", message);
        assert!(message.contains("overloaded"), "{}", message);
        assert!(!timed_out);
    }

    #[tokio::test]
    async fn test_together_malformed_body_is_error() {
        let client = replying_with(StatusCode::OK, "not json").await;
        let err = client.complete(&request()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse Together response"));
    }

    #[tokio::test]
    async fn test_together_timeout_is_flagged() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client =
            TogetherClient::new(format!("http://{}/", addr), "test-key", Duration::from_millis(200))
                .unwrap();
        let err = client.complete(&request()).await.unwrap_err();

        let (message, timed_out) = external_parts(&err);
        assert!(timed_out);
        assert!(message.starts_with("timed out"), "{}", message);
    }
}
