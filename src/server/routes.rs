//! HTTP route handlers for the Converse chat API.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::core::errors::ChatError;
use crate::chat::core::ids::SessionId;
use crate::chat::core::message::Message;
use crate::chat::core::session::SessionRecord;
use crate::chat::gateway::RetrievedDoc;
use crate::chat::lifecycle::manager::{RotationOutcome, SessionListing};

use super::auth::AuthedUser;
use super::state::AppState;

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/chat/message", post(chat_message))
        .route("/api/chat/history", post(rotate_history))
        .route("/api/chat/rag", post(rag_query))
        .route("/api/chat/sessions", get(list_sessions).post(create_session))
        .route(
            "/api/chat/sessions/{session_id}",
            get(session_details).delete(delete_session),
        )
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "converse",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Conversation-turn request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageRequest {
    /// The user's message text.
    pub message: String,
    /// Session the message belongs to.
    pub session_id: String,
    /// Whether to augment generation with retrieved documents.
    #[serde(default)]
    pub is_rag_enabled: bool,
}

/// Conversation-turn response.
#[derive(Debug, Serialize)]
pub struct ChatMessageResponse {
    /// The model reply (possibly synthesized on upstream failure).
    pub message: String,
}

/// Handle one conversation turn.
async fn chat_message(
    State(state): State<Arc<AppState>>,
    AuthedUser(user_id): AuthedUser,
    Json(request): Json<ChatMessageRequest>,
) -> Result<Json<ChatMessageResponse>, ChatError> {
    state.rate_limiter.check(user_id)?;

    let message = state
        .manager
        .handle_message(
            user_id,
            &request.session_id,
            &request.message,
            request.is_rag_enabled,
        )
        .await?;

    Ok(Json(ChatMessageResponse { message }))
}

/// Rotation request: the session to close out and its current history.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateHistoryRequest {
    /// Session being closed out.
    pub session_id: String,
    /// Current message list, persisted verbatim.
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Rotation response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateHistoryResponse {
    /// Fresh session identifier, or `null` when rotation was a no-op.
    pub new_session_id: Option<SessionId>,
    /// Present when the finished session may not have been durably saved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Persist the current session and hand out a fresh identifier.
async fn rotate_history(
    State(state): State<Arc<AppState>>,
    AuthedUser(user_id): AuthedUser,
    Json(request): Json<RotateHistoryRequest>,
) -> Result<Json<RotateHistoryResponse>, ChatError> {
    let outcome = state
        .manager
        .rotate(user_id, &request.session_id, request.messages)
        .await?;

    let response = match outcome {
        RotationOutcome::Unchanged => RotateHistoryResponse {
            new_session_id: None,
            warning: None,
        },
        RotationOutcome::Rotated {
            new_session_id,
            warning,
        } => RotateHistoryResponse {
            new_session_id: Some(new_session_id),
            warning,
        },
    };

    Ok(Json(response))
}

/// Standalone retrieval request.
#[derive(Debug, Deserialize)]
pub struct RagQueryRequest {
    /// Query text.
    pub message: String,
}

/// Standalone retrieval response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RagQueryResponse {
    /// Documents in the retrieval service's relevance order.
    pub relevant_docs: Vec<RetrievedDoc>,
}

/// Query the retrieval service directly.
async fn rag_query(
    State(state): State<Arc<AppState>>,
    AuthedUser(user_id): AuthedUser,
    Json(request): Json<RagQueryRequest>,
) -> Result<Json<RagQueryResponse>, ChatError> {
    state.rate_limiter.check(user_id)?;

    let relevant_docs = state
        .manager
        .retrieve_documents(user_id, &request.message)
        .await?;

    Ok(Json(RagQueryResponse { relevant_docs }))
}

/// Listing query parameters.
#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    /// 1-based page number.
    #[serde(default)]
    pub page: Option<u64>,
    /// Page size.
    #[serde(default)]
    pub limit: Option<u64>,
}

/// List the caller's sessions, grouped by date.
async fn list_sessions(
    State(state): State<Arc<AppState>>,
    AuthedUser(user_id): AuthedUser,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<SessionListing>, ChatError> {
    let listing = state
        .manager
        .list_sessions(user_id, query.page.unwrap_or(1), query.limit)
        .await?;

    Ok(Json(listing))
}

/// Full detail of one session.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetailResponse {
    /// Session identifier.
    pub session_id: SessionId,
    /// Complete message history in conversational order.
    pub messages: Vec<Message>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
    /// Number of messages.
    pub message_count: usize,
}

impl From<SessionRecord> for SessionDetailResponse {
    fn from(record: SessionRecord) -> Self {
        let message_count = record.message_count();
        Self {
            session_id: record.session_id,
            messages: record.messages,
            created_at: record.created_at,
            updated_at: record.updated_at,
            message_count,
        }
    }
}

/// Fetch one owned session with its full history.
async fn session_details(
    State(state): State<Arc<AppState>>,
    AuthedUser(user_id): AuthedUser,
    Path(session_id): Path<String>,
) -> Result<Json<SessionDetailResponse>, ChatError> {
    let record = state.manager.session_details(user_id, &session_id).await?;
    Ok(Json(SessionDetailResponse::from(record)))
}

/// Explicit session creation response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    /// Identifier of the new empty session.
    pub session_id: SessionId,
}

/// Create an empty session.
async fn create_session(
    State(state): State<Arc<AppState>>,
    AuthedUser(user_id): AuthedUser,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ChatError> {
    let session_id = state.manager.create_session(user_id).await?;
    Ok((StatusCode::CREATED, Json(CreateSessionResponse { session_id })))
}

/// Permanently delete one owned session.
async fn delete_session(
    State(state): State<Arc<AppState>>,
    AuthedUser(user_id): AuthedUser,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, ChatError> {
    state.manager.delete_session(user_id, &session_id).await?;
    Ok(Json(
        serde_json::json!({ "message": "Session deleted successfully" }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::core::config::{ChatConfig, StorageConfig};
    use crate::chat::core::errors::{ChatResult, GenerationError};
    use crate::chat::core::ids::UserId;
    use crate::chat::gateway::{DocumentRetriever, GatewayFuture, TextGenerator};
    use crate::chat::lifecycle::manager::ChatBackends;
    use crate::chat::store::SqliteSessionStore;
    use crate::server::rate_limit::RateLimiter;

    struct FixedGenerator;

    impl TextGenerator for FixedGenerator {
        fn generate(
            &self,
            _history: Vec<Message>,
            _system_context: Option<String>,
        ) -> GatewayFuture<'_, Result<String, GenerationError>> {
            Box::pin(async { Ok("stubbed reply".to_string()) })
        }
    }

    struct NoDocsRetriever;

    impl DocumentRetriever for NoDocsRetriever {
        fn retrieve(
            &self,
            _user_id: UserId,
            _query: String,
            _k: usize,
        ) -> GatewayFuture<'_, ChatResult<Vec<RetrievedDoc>>> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    async fn spawn_app() -> (std::net::SocketAddr, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageConfig {
            sqlite_path: dir.path().join("test.sqlite"),
            ..StorageConfig::default()
        };
        let store = Arc::new(SqliteSessionStore::new(&storage).await.unwrap());
        let config = ChatConfig::default();
        let rate_limiter = RateLimiter::new(config.rate_limit);
        let manager = crate::chat::lifecycle::manager::SessionLifecycleManager::new(
            config,
            ChatBackends {
                session_store: store,
                retriever: Arc::new(NoDocsRetriever),
                generator: Arc::new(FixedGenerator),
            },
        )
        .unwrap();
        let state = AppState::new(manager, rate_limiter);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = create_router(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, dir)
    }

    #[tokio::test]
    async fn message_endpoint_round_trip() {
        let (addr, _dir) = spawn_app().await;
        let client = reqwest::Client::new();
        let user_id = UserId::new();
        let session_id = SessionId::new();

        // Without identity: 401.
        let response = client
            .post(format!("http://{addr}/api/chat/message"))
            .json(&serde_json::json!({
                "message": "Hello",
                "sessionId": session_id.to_string()
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 401);

        // Malformed session id: 400 with the validation message.
        let response = client
            .post(format!("http://{addr}/api/chat/message"))
            .header("x-user-id", user_id.to_string())
            .json(&serde_json::json!({
                "message": "Hello",
                "sessionId": "nope"
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["message"], "Valid session ID required.");

        // Happy path: the stubbed reply comes back.
        let response = client
            .post(format!("http://{addr}/api/chat/message"))
            .header("x-user-id", user_id.to_string())
            .json(&serde_json::json!({
                "message": "Hello",
                "sessionId": session_id.to_string()
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["message"], "stubbed reply");

        // The turn shows up in the session detail.
        let response = client
            .get(format!("http://{addr}/api/chat/sessions/{session_id}"))
            .header("x-user-id", user_id.to_string())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["messageCount"], 2);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][1]["role"], "model");
    }

    #[tokio::test]
    async fn rotation_endpoint_mints_and_noops() {
        let (addr, _dir) = spawn_app().await;
        let client = reqwest::Client::new();
        let user_id = UserId::new();
        let session_id = SessionId::new();

        // Empty history: no-op, null new id.
        let response = client
            .post(format!("http://{addr}/api/chat/history"))
            .header("x-user-id", user_id.to_string())
            .json(&serde_json::json!({
                "sessionId": session_id.to_string(),
                "messages": []
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert!(body["newSessionId"].is_null());

        // Non-empty history: a fresh id comes back.
        let response = client
            .post(format!("http://{addr}/api/chat/history"))
            .header("x-user-id", user_id.to_string())
            .json(&serde_json::json!({
                "sessionId": session_id.to_string(),
                "messages": [
                    {
                        "role": "user",
                        "parts": [{"text": "Hello"}],
                        "timestamp": Utc::now()
                    }
                ]
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        let new_id = body["newSessionId"].as_str().unwrap();
        assert_ne!(new_id, session_id.to_string());
        assert!(new_id.parse::<uuid::Uuid>().is_ok());
    }

    #[tokio::test]
    async fn sessions_listing_and_delete() {
        let (addr, _dir) = spawn_app().await;
        let client = reqwest::Client::new();
        let user_id = UserId::new();

        let response = client
            .post(format!("http://{addr}/api/chat/sessions"))
            .header("x-user-id", user_id.to_string())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 201);
        let body: serde_json::Value = response.json().await.unwrap();
        let session_id = body["sessionId"].as_str().unwrap().to_string();

        let response = client
            .get(format!("http://{addr}/api/chat/sessions"))
            .header("x-user-id", user_id.to_string())
            .send()
            .await
            .unwrap();
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["pagination"]["total"], 1);
        assert_eq!(body["sessionsByDate"][0]["sessions"][0]["sessionId"], session_id);

        // Deleting as another user fails and leaves the session in place.
        let response = client
            .delete(format!("http://{addr}/api/chat/sessions/{session_id}"))
            .header("x-user-id", UserId::new().to_string())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 404);

        let response = client
            .delete(format!("http://{addr}/api/chat/sessions/{session_id}"))
            .header("x-user-id", user_id.to_string())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["message"], "Session deleted successfully");
    }
}
