//! Generation gateway.
//!
//! Client for a Gemini-style `generateContent` API. The session history is
//! translated into the wire role vocabulary here (internal `user` stays
//! `user`, internal `model` maps to the service's assistant role, which is
//! also named `model`), with an optional system-instruction context.
//!
//! Transient failures (connect, timeout, HTTP 429 and 5xx) are retried
//! under the configured [`RetryPolicy`]; any other 4xx is an invalid
//! request whose upstream message is surfaced verbatim.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::chat::core::config::{GenerationConfig, RetryPolicy};
use crate::chat::core::errors::{ChatResult, GenerationError};
use crate::chat::core::message::{Message, MessageRole};
use crate::chat::gateway::GatewayFuture;

/// Generation backend trait.
pub trait TextGenerator: Send + Sync {
    /// Generate a reply for the given history and optional system context.
    ///
    /// # Errors
    /// Returns a [`GenerationError`] once the retry budget is exhausted or
    /// the upstream rejects the request.
    fn generate(
        &self,
        history: Vec<Message>,
        system_context: Option<String>,
    ) -> GatewayFuture<'_, Result<String, GenerationError>>;
}

#[derive(Serialize)]
struct WirePart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct WireContent<'a> {
    role: &'static str,
    parts: Vec<WirePart<'a>>,
}

#[derive(Serialize)]
struct WireSystemInstruction<'a> {
    parts: Vec<WirePart<'a>>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<WireContent<'a>>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireSystemInstruction<'a>>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Wire role vocabulary for an internal role.
const fn wire_role(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Model => "model",
    }
}

fn to_wire_contents(history: &[Message]) -> Vec<WireContent<'_>> {
    history
        .iter()
        .map(|message| WireContent {
            role: wire_role(message.role),
            parts: message
                .parts
                .iter()
                .map(|part| WirePart { text: &part.text })
                .collect(),
        })
        .collect()
}

/// HTTP implementation of the generation gateway.
pub struct HttpGenerationGateway {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl HttpGenerationGateway {
    /// Build the gateway from configuration.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &GenerationConfig) -> ChatResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let endpoint = format!(
            "{}/v1beta/models/{}:generateContent",
            config.base_url.trim_end_matches('/'),
            config.model
        );

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            retry: config.retry,
        })
    }

    async fn attempt(&self, request: &GenerateRequest<'_>) -> Result<String, GenerationError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.query(&[("key", key.as_str())]);
        }

        let response = builder.send().await.map_err(|err| {
            GenerationError::Unavailable(err.to_string())
        })?;

        let status = response.status();
        if status.is_success() {
            let body: GenerateResponse = response
                .json()
                .await
                .map_err(|err| GenerationError::Malformed(err.to_string()))?;
            return extract_text(&body);
        }

        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(GenerationError::Unavailable(format!(
                "status {status}: {body}"
            )));
        }
        Err(GenerationError::InvalidRequest(upstream_message(
            status.as_u16(),
            &body,
        )))
    }
}

fn extract_text(body: &GenerateResponse) -> Result<String, GenerationError> {
    let text = body
        .candidates
        .first()
        .and_then(|candidate| candidate.content.as_ref())
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.is_empty() {
        return Err(GenerationError::Malformed(
            "no candidate text in response".to_string(),
        ));
    }
    Ok(text)
}

fn upstream_message(status: u16, body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body).map_or_else(
        |_| format!("generation request rejected with status {status}"),
        |envelope| envelope.error.message,
    )
}

const fn is_retryable(err: &GenerationError) -> bool {
    matches!(err, GenerationError::Unavailable(_))
}

impl TextGenerator for HttpGenerationGateway {
    fn generate(
        &self,
        history: Vec<Message>,
        system_context: Option<String>,
    ) -> GatewayFuture<'_, Result<String, GenerationError>> {
        Box::pin(async move {
            let request = GenerateRequest {
                contents: to_wire_contents(&history),
                system_instruction: system_context.as_deref().map(|text| {
                    WireSystemInstruction {
                        parts: vec![WirePart { text }],
                    }
                }),
            };

            let mut attempt = 0;
            loop {
                match self.attempt(&request).await {
                    Ok(text) => return Ok(text),
                    Err(err) if is_retryable(&err) && attempt + 1 < self.retry.max_attempts => {
                        let delay = self.retry.delay_for_attempt(attempt);
                        warn!(
                            "generation attempt {} failed ({err}), retrying in {:?}",
                            attempt + 1,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Err(err) => return Err(err),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MODEL_PATH: &str = "/v1beta/models/gemini-1.5-flash:generateContent";

    fn gateway_for(addr: std::net::SocketAddr, retry: RetryPolicy) -> HttpGenerationGateway {
        let config = GenerationConfig {
            base_url: format!("http://{addr}"),
            timeout_secs: 2,
            retry,
            ..GenerationConfig::default()
        };
        HttpGenerationGateway::new(&config).unwrap()
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 1,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    async fn spawn_stub(router: Router) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn candidate_body(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [
                {"content": {"parts": [{"text": text}]}}
            ]
        })
    }

    #[tokio::test]
    async fn returns_candidate_text() {
        let router = Router::new().route(
            MODEL_PATH,
            post(|Json(body): Json<serde_json::Value>| async move {
                // Role vocabulary must already be the wire one.
                assert_eq!(body["contents"][0]["role"], "user");
                assert_eq!(body["contents"][1]["role"], "model");
                Json(candidate_body("the answer"))
            }),
        );
        let addr = spawn_stub(router).await;

        let history = vec![Message::user("question"), Message::model("earlier reply")];
        let text = gateway_for(addr, fast_retry())
            .generate(history, None)
            .await
            .unwrap();
        assert_eq!(text, "the answer");
    }

    #[tokio::test]
    async fn system_context_is_forwarded() {
        let router = Router::new().route(
            MODEL_PATH,
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(
                    body["systemInstruction"]["parts"][0]["text"],
                    "use these documents"
                );
                Json(candidate_body("ok"))
            }),
        );
        let addr = spawn_stub(router).await;

        let text = gateway_for(addr, fast_retry())
            .generate(
                vec![Message::user("q")],
                Some("use these documents".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(text, "ok");
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                MODEL_PATH,
                post(|State(calls): State<Arc<AtomicUsize>>| async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err((axum::http::StatusCode::SERVICE_UNAVAILABLE, "warming up"))
                    } else {
                        Ok(Json(candidate_body("recovered")))
                    }
                }),
            )
            .with_state(Arc::clone(&calls));
        let addr = spawn_stub(router).await;

        let text = gateway_for(addr, fast_retry())
            .generate(vec![Message::user("q")], None)
            .await
            .unwrap();
        assert_eq!(text, "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn bounded_retry_gives_up() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                MODEL_PATH,
                post(|State(calls): State<Arc<AtomicUsize>>| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "down")
                }),
            )
            .with_state(Arc::clone(&calls));
        let addr = spawn_stub(router).await;

        let result = gateway_for(addr, fast_retry())
            .generate(vec![Message::user("q")], None)
            .await;
        assert!(matches!(result, Err(GenerationError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn invalid_request_is_not_retried_and_keeps_message() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                MODEL_PATH,
                post(|State(calls): State<Arc<AtomicUsize>>| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    (
                        axum::http::StatusCode::BAD_REQUEST,
                        Json(serde_json::json!({"error": {"message": "prompt was blocked"}})),
                    )
                }),
            )
            .with_state(Arc::clone(&calls));
        let addr = spawn_stub(router).await;

        let result = gateway_for(addr, fast_retry())
            .generate(vec![Message::user("q")], None)
            .await;
        match result {
            Err(GenerationError::InvalidRequest(message)) => {
                assert_eq!(message, "prompt was blocked");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_candidates_are_malformed() {
        let router = Router::new().route(
            MODEL_PATH,
            post(|| async { Json(serde_json::json!({"candidates": []})) }),
        );
        let addr = spawn_stub(router).await;

        let result = gateway_for(addr, fast_retry())
            .generate(vec![Message::user("q")], None)
            .await;
        assert!(matches!(result, Err(GenerationError::Malformed(_))));
    }
}
