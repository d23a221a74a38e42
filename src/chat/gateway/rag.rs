//! Retrieval (RAG) gateway.
//!
//! Thin client over the external retrieval service:
//! `POST {base}/query {user_id, query, k}` → `{relevantDocs: [...]}`.
//!
//! Failure policy mirrors the degradation contract: connect failures and
//! timeouts are classified as "service unavailable" so the chat path can
//! fall back to context-free generation; a reachable service answering
//! with a malformed payload or a non-success status degrades to an empty
//! result with a warning.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::chat::core::config::RagConfig;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::UserId;
use crate::chat::gateway::GatewayFuture;

/// One retrieved document in relevance order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrievedDoc {
    /// Document text supplied as generation context.
    pub content: String,
    /// Optional origin label (file name, chunk id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Optional relevance score from the service's own ranking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Retrieval backend trait.
pub trait DocumentRetriever: Send + Sync {
    /// Fetch at most `k` documents relevant to `query` for a user.
    ///
    /// # Errors
    /// Returns `ChatError::RagUnavailable` when the service cannot be
    /// reached in time; other degradations yield an empty result instead.
    fn retrieve(
        &self,
        user_id: UserId,
        query: String,
        k: usize,
    ) -> GatewayFuture<'_, ChatResult<Vec<RetrievedDoc>>>;
}

#[derive(Serialize)]
struct QueryRequest {
    user_id: String,
    query: String,
    k: usize,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(rename = "relevantDocs", default)]
    relevant_docs: Option<Vec<RetrievedDoc>>,
}

/// HTTP implementation of the retrieval gateway.
pub struct HttpRagGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRagGateway {
    /// Build the gateway from configuration.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &RagConfig) -> ChatResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl DocumentRetriever for HttpRagGateway {
    fn retrieve(
        &self,
        user_id: UserId,
        query: String,
        k: usize,
    ) -> GatewayFuture<'_, ChatResult<Vec<RetrievedDoc>>> {
        Box::pin(async move {
            let url = format!("{}/query", self.base_url);
            let request = QueryRequest {
                user_id: user_id.to_string(),
                query,
                k,
            };

            let response = match self.client.post(&url).json(&request).send().await {
                Ok(response) => response,
                Err(err) if err.is_connect() || err.is_timeout() => {
                    return Err(ChatError::RagUnavailable(err.to_string()));
                }
                Err(err) => {
                    warn!("retrieval request failed: {err}");
                    return Ok(Vec::new());
                }
            };

            if !response.status().is_success() {
                warn!(
                    "retrieval service answered with status {}",
                    response.status()
                );
                return Ok(Vec::new());
            }

            match response.json::<QueryResponse>().await {
                Ok(body) => {
                    let mut docs = body.relevant_docs.unwrap_or_else(|| {
                        warn!("retrieval service returned an invalid response format");
                        Vec::new()
                    });
                    docs.truncate(k);
                    Ok(docs)
                }
                Err(err) => {
                    warn!("retrieval response could not be decoded: {err}");
                    Ok(Vec::new())
                }
            }
        })
    }
}
