//! Minimal client for an OpenAI-compatible chat-completions endpoint.
//!
//! Every request goes through [`poll_completion`], which keeps retrying
//! transient failures until a completion, a hard failure, or the wait bound.

use crate::config::ClassifierSettings;
use crate::error::ClassifyError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::{Body, Client, Method, Request, StatusCode};
use hyper_rustls::HttpsConnector;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Outcome of a single attempt against the model service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallState {
    /// Rate limited, overloaded or unreachable; worth asking again.
    Pending(String),
    /// The model asked for a tool call, which this client never offers.
    RequiresAction,
    Completed(String),
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Anything that can turn a chat request into completion text.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String, ClassifyError>;
}

#[derive(Debug, Clone, Copy)]
pub struct PollBounds {
    pub max_wait: Duration,
    pub interval: Duration,
}

/// Repeats `attempt` while it reports `Pending`, sleeping `interval` between
/// tries, and gives up once another try would end past `max_wait`.
pub async fn poll_completion<F, Fut>(bounds: PollBounds, mut attempt: F) -> Result<String, ClassifyError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CallState>,
{
    let deadline = Instant::now() + bounds.max_wait;
    let mut tries = 0u32;

    loop {
        tries += 1;
        match attempt().await {
            CallState::Completed(text) => return Ok(text),
            CallState::RequiresAction => return Err(ClassifyError::RequiresAction),
            CallState::Failed(reason) => return Err(ClassifyError::Service(reason)),
            CallState::Pending(reason) => {
                if Instant::now() + bounds.interval >= deadline {
                    warn!(tries, %reason, "model service still pending at wait bound");
                    return Err(ClassifyError::Timeout(bounds.max_wait));
                }
                debug!(tries, %reason, "model service pending, retrying");
                tokio::time::sleep(bounds.interval).await;
            }
        }
    }
}

/// Maps an HTTP status and body onto a call state.
pub fn interpret_response(status: StatusCode, body: &[u8]) -> CallState {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return CallState::Pending(format!("HTTP {status}"));
    }
    if !status.is_success() {
        let excerpt: String = String::from_utf8_lossy(body).chars().take(200).collect();
        return CallState::Failed(format!("HTTP {status}: {excerpt}"));
    }

    let parsed: ChatResponse = match serde_json::from_slice(body) {
        Ok(parsed) => parsed,
        Err(e) => return CallState::Failed(format!("malformed response: {e}")),
    };
    let Some(choice) = parsed.choices.into_iter().next() else {
        return CallState::Failed("response has no choices".to_string());
    };

    if matches!(
        choice.finish_reason.as_deref(),
        Some("tool_calls") | Some("function_call")
    ) {
        return CallState::RequiresAction;
    }

    match choice.message.content {
        Some(text) if !text.trim().is_empty() => CallState::Completed(text),
        _ => CallState::Failed("response has no content".to_string()),
    }
}

#[derive(Clone)]
pub struct OpenAiClient {
    http: Client<HttpsConnector<HttpConnector>>,
    endpoint: String,
    api_key: String,
    request_timeout: Duration,
    bounds: PollBounds,
}

impl OpenAiClient {
    pub fn new(settings: &ClassifierSettings, api_key: String) -> Result<Self> {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .context("Failed to load native roots")?
            .https_or_http()
            .enable_http1()
            .build();

        Ok(Self {
            http: Client::builder().build(https),
            endpoint: format!("{}/chat/completions", settings.api_base.trim_end_matches('/')),
            api_key,
            request_timeout: settings.request_timeout(),
            bounds: PollBounds {
                max_wait: settings.max_wait(),
                interval: settings.poll_interval(),
            },
        })
    }

    async fn attempt(&self, payload: &[u8]) -> CallState {
        let req = Request::builder()
            .method(Method::POST)
            .uri(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .body(Body::from(payload.to_vec()));
        let req = match req {
            Ok(req) => req,
            Err(e) => return CallState::Failed(format!("invalid request: {e}")),
        };

        let exchange = async {
            let resp = self.http.request(req).await?;
            let status = resp.status();
            let bytes = hyper::body::to_bytes(resp.into_body()).await?;
            Ok::<_, hyper::Error>((status, bytes))
        };

        match tokio::time::timeout(self.request_timeout, exchange).await {
            Ok(Ok((status, bytes))) => interpret_response(status, &bytes),
            Ok(Err(e)) => CallState::Pending(format!("transport: {e}")),
            Err(_) => CallState::Pending("request timed out".to_string()),
        }
    }
}

#[async_trait]
impl ChatCompletion for OpenAiClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, ClassifyError> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| ClassifyError::Service(format!("could not encode request: {e}")))?;
        poll_completion(self.bounds, || self.attempt(&payload)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn bounds(max_wait_ms: u64, interval_ms: u64) -> PollBounds {
        PollBounds {
            max_wait: Duration::from_millis(max_wait_ms),
            interval: Duration::from_millis(interval_ms),
        }
    }

    #[test]
    fn test_interpret_completed() {
        let body = br#"{"choices":[{"message":{"role":"assistant","content":"medium"},"finish_reason":"stop"}]}"#;
        assert_eq!(
            interpret_response(StatusCode::OK, body),
            CallState::Completed("medium".to_string())
        );
    }

    #[test]
    fn test_interpret_rate_limit_is_pending() {
        assert!(matches!(
            interpret_response(StatusCode::TOO_MANY_REQUESTS, b"slow down"),
            CallState::Pending(_)
        ));
        assert!(matches!(
            interpret_response(StatusCode::BAD_GATEWAY, b""),
            CallState::Pending(_)
        ));
    }

    #[test]
    fn test_interpret_client_error_fails() {
        let state = interpret_response(StatusCode::UNAUTHORIZED, b"{\"error\":\"bad key\"}");
        assert!(matches!(state, CallState::Failed(ref r) if r.contains("401")));
    }

    #[test]
    fn test_interpret_tool_call_requires_action() {
        let body = br#"{"choices":[{"message":{"content":null},"finish_reason":"tool_calls"}]}"#;
        assert_eq!(interpret_response(StatusCode::OK, body), CallState::RequiresAction);
    }

    #[test]
    fn test_interpret_malformed_and_empty() {
        assert!(matches!(
            interpret_response(StatusCode::OK, b"not json"),
            CallState::Failed(_)
        ));
        assert!(matches!(
            interpret_response(StatusCode::OK, br#"{"choices":[]}"#),
            CallState::Failed(_)
        ));
        assert!(matches!(
            interpret_response(StatusCode::OK, br#"{"choices":[{"message":{"content":"  "}}]}"#),
            CallState::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_poll_retries_pending_until_completed() {
        let calls = AtomicUsize::new(0);
        let result = poll_completion(bounds(1_000, 1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    CallState::Pending("busy".to_string())
                } else {
                    CallState::Completed("low".to_string())
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "low");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_gives_up_at_wait_bound() {
        let calls = AtomicUsize::new(0);
        let result = poll_completion(bounds(30, 10), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { CallState::Pending("busy".to_string()) }
        })
        .await;

        assert!(matches!(result, Err(ClassifyError::Timeout(_))));
        let tries = calls.load(Ordering::SeqCst);
        assert!((1..=4).contains(&tries));
    }

    #[tokio::test]
    async fn test_poll_does_not_retry_failures() {
        let calls = AtomicUsize::new(0);
        let result = poll_completion(bounds(1_000, 1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { CallState::Failed("HTTP 400".to_string()) }
        })
        .await;

        assert!(matches!(result, Err(ClassifyError::Service(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_poll_stops_on_requires_action() {
        let result = poll_completion(bounds(1_000, 1), || async { CallState::RequiresAction }).await;
        assert!(matches!(result, Err(ClassifyError::RequiresAction)));
    }
}
