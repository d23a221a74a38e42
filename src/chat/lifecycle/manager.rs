//! Session lifecycle orchestration.
//!
//! The manager is the single source of truth for how a conversation turn
//! is processed and how sessions rotate. Gateways and the store are
//! injected as trait objects so tests can script them.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chat::core::config::ChatConfig;
use crate::chat::core::errors::{ChatError, ChatResult, GenerationError};
use crate::chat::core::ids::{SessionId, UserId};
use crate::chat::core::message::Message;
use crate::chat::core::session::SessionRecord;
use crate::chat::gateway::generation::HttpGenerationGateway;
use crate::chat::gateway::rag::HttpRagGateway;
use crate::chat::gateway::{DocumentRetriever, RetrievedDoc, TextGenerator};
use crate::chat::lifecycle::rag_context::build_rag_context;
use crate::chat::store::{SessionStore, SqliteSessionStore};

/// Validation message for a malformed session id in a chat request.
const VALID_SESSION_ID_REQUIRED: &str = "Valid session ID required.";
/// Validation message for a malformed session id in a path parameter.
const VALID_SESSION_PARAM_REQUIRED: &str = "Valid session ID parameter is required.";
/// Validation message for an empty chat message.
const MESSAGE_TEXT_REQUIRED: &str = "Message text required.";
/// Validation message for an empty standalone retrieval query.
const QUERY_TEXT_REQUIRED: &str = "Query message text required.";
/// Not-found message; deliberately identical for absent and foreign sessions.
const SESSION_NOT_FOUND: &str = "Chat session not found or access denied.";
/// Synthesized reply when generation fails for reasons the user cannot fix.
const GENERATION_FALLBACK: &str = "Sorry, there was an issue generating the response.";
/// Informational note when retrieval finds nothing relevant.
const NO_DOCS_NOTE: &str = "No relevant documents found; answering without RAG context.";
/// Non-fatal warning when rotation could not persist the finished session.
const ROTATION_WARNING: &str =
    "Chat history could not be saved; a fresh session was started anyway.";

/// Backend dependencies for the lifecycle manager.
pub struct ChatBackends {
    /// Session store implementation.
    pub session_store: Arc<dyn SessionStore>,
    /// Retrieval gateway implementation.
    pub retriever: Arc<dyn DocumentRetriever>,
    /// Generation gateway implementation.
    pub generator: Arc<dyn TextGenerator>,
}

impl ChatBackends {
    /// Build the production wiring: `SQLite` store plus HTTP gateways.
    ///
    /// # Errors
    /// Returns an error if any backend cannot be initialized.
    pub async fn sqlite(config: &ChatConfig) -> ChatResult<Self> {
        let session_store = Arc::new(SqliteSessionStore::new(&config.storage).await?);
        let retriever = Arc::new(HttpRagGateway::new(&config.rag)?);
        let generator = Arc::new(HttpGenerationGateway::new(&config.generation)?);

        Ok(Self {
            session_store,
            retriever,
            generator,
        })
    }
}

/// Outcome of a rotation request.
#[derive(Debug)]
pub enum RotationOutcome {
    /// Nothing to save (empty history or a turn in flight); no id minted.
    Unchanged,
    /// History persisted (or persistence attempted); the caller must switch
    /// to the new identifier.
    Rotated {
        /// Fresh identifier for the next conversation.
        new_session_id: SessionId,
        /// Present when the finished session may not have been durably
        /// saved; the conversation continues regardless.
        warning: Option<String>,
    },
}

/// One session entry in a history listing.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Session identifier.
    pub session_id: SessionId,
    /// Number of messages in the session.
    pub message_count: usize,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
    /// First characters of the first message.
    pub preview: String,
}

/// Sessions sharing one calendar date of last update.
#[derive(Clone, Debug, Serialize)]
pub struct DateGroup {
    /// Calendar date (UTC) of `updated_at`.
    pub date: NaiveDate,
    /// Sessions last updated on that date, newest first.
    pub sessions: Vec<SessionSummary>,
}

/// Offset-pagination envelope.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct PageInfo {
    /// Total sessions owned by the user.
    pub total: u64,
    /// Requested page (1-based).
    pub page: u64,
    /// Page size.
    pub limit: u64,
    /// Total pages: `ceil(total / limit)`.
    pub pages: u64,
}

/// One page of a user's session history.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionListing {
    /// Date groups, newest date first.
    pub sessions_by_date: Vec<DateGroup>,
    /// Pagination envelope.
    pub pagination: PageInfo,
}

/// Removes the per-user in-flight marker when a turn ends, however it ends.
struct InFlightGuard<'a> {
    turns: &'a DashMap<UserId, ()>,
    user_id: UserId,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(turns: &'a DashMap<UserId, ()>, user_id: UserId) -> Self {
        turns.insert(user_id, ());
        Self { turns, user_id }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.turns.remove(&self.user_id);
    }
}

/// Orchestrates conversation turns, rotation, and the history surface.
pub struct SessionLifecycleManager {
    config: ChatConfig,
    store: Arc<dyn SessionStore>,
    retriever: Arc<dyn DocumentRetriever>,
    generator: Arc<dyn TextGenerator>,
    in_flight: DashMap<UserId, ()>,
}

impl SessionLifecycleManager {
    /// Create a new manager.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(config: ChatConfig, backends: ChatBackends) -> ChatResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            store: backends.session_store,
            retriever: backends.retriever,
            generator: backends.generator,
            in_flight: DashMap::new(),
        })
    }

    /// Process one inbound chat message and return the model reply.
    ///
    /// Exactly one session document is read and exactly one is written;
    /// the whole history is persisted as a single document update.
    ///
    /// # Errors
    /// Returns `ChatError::Validation` for malformed input (before any
    /// storage access) and storage errors for persistence failures.
    /// Generation failures do not fail the turn: they become a synthesized
    /// model reply.
    pub async fn handle_message(
        &self,
        user_id: UserId,
        session_id: &str,
        text: &str,
        rag_enabled: bool,
    ) -> ChatResult<String> {
        let session_id: SessionId = session_id
            .parse()
            .map_err(|_| ChatError::Validation(VALID_SESSION_ID_REQUIRED.to_string()))?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ChatError::Validation(MESSAGE_TEXT_REQUIRED.to_string()));
        }

        let _turn = InFlightGuard::acquire(&self.in_flight, user_id);

        let mut record = self
            .store
            .find(session_id, user_id)
            .await?
            .unwrap_or_else(|| SessionRecord::new(session_id, user_id));
        record.push_message(Message::user(trimmed));

        let reply = if rag_enabled {
            self.rag_turn(user_id, trimmed, &record.messages).await
        } else {
            self.plain_turn(&record.messages).await
        };

        record.push_message(Message::model(reply.clone()));
        self.store.save(&record).await?;

        debug!(
            "processed turn for session {} ({} messages)",
            record.session_id,
            record.message_count()
        );

        Ok(reply)
    }

    async fn plain_turn(&self, history: &[Message]) -> String {
        match self.generator.generate(history.to_vec(), None).await {
            Ok(text) => text,
            Err(err) => degraded_reply(&err),
        }
    }

    async fn rag_turn(&self, user_id: UserId, query: &str, history: &[Message]) -> String {
        let docs = match self
            .retriever
            .retrieve(user_id, query.to_string(), self.config.rag.top_k)
            .await
        {
            Ok(docs) => docs,
            Err(ChatError::RagUnavailable(reason)) => {
                warn!("retrieval unavailable, continuing without context: {reason}");
                Vec::new()
            }
            Err(err) => {
                warn!("retrieval failed, continuing without context: {err}");
                Vec::new()
            }
        };

        if docs.is_empty() {
            warn!("retrieval returned no relevant documents");
            return match self.generator.generate(history.to_vec(), None).await {
                Ok(text) => format!("{NO_DOCS_NOTE}\n\n{text}"),
                Err(err) => degraded_reply(&err),
            };
        }

        let context = build_rag_context(&docs, self.config.rag.max_context_chars);
        match self
            .generator
            .generate(history.to_vec(), Some(context))
            .await
        {
            Ok(text) => text,
            Err(err) => degraded_reply(&err),
        }
    }

    /// Persist the finished session and mint a fresh identifier.
    ///
    /// A persistence failure still hands the caller a usable new id so the
    /// conversation can continue; the failure is reported as a warning,
    /// not an error. This availability-over-durability trade-off is
    /// deliberate.
    ///
    /// # Errors
    /// Returns `ChatError::Validation` for a malformed session id or an
    /// invalid message in the supplied history.
    pub async fn rotate(
        &self,
        user_id: UserId,
        session_id: &str,
        messages: Vec<Message>,
    ) -> ChatResult<RotationOutcome> {
        let session_id: SessionId = session_id
            .parse()
            .map_err(|_| ChatError::Validation(VALID_SESSION_ID_REQUIRED.to_string()))?;

        if messages.is_empty() {
            return Ok(RotationOutcome::Unchanged);
        }
        if self.in_flight.contains_key(&user_id) {
            info!("rotation skipped for user {user_id}: turn in flight");
            return Ok(RotationOutcome::Unchanged);
        }
        for message in &messages {
            message.validate()?;
        }

        let existing = match self.store.find(session_id, user_id).await {
            Ok(existing) => existing,
            Err(err) => {
                warn!("rotation could not read session {session_id}: {err}");
                return Ok(Self::rotated_with_warning());
            }
        };
        let mut record =
            existing.unwrap_or_else(|| SessionRecord::new(session_id, user_id));
        record.replace_messages(messages);

        match self.store.save(&record).await {
            Ok(()) => {
                let new_session_id = SessionId::new();
                info!("rotated session {session_id} -> {new_session_id}");
                Ok(RotationOutcome::Rotated {
                    new_session_id,
                    warning: None,
                })
            }
            Err(err) => {
                warn!("rotation could not persist session {session_id}: {err}");
                Ok(Self::rotated_with_warning())
            }
        }
    }

    fn rotated_with_warning() -> RotationOutcome {
        RotationOutcome::Rotated {
            new_session_id: SessionId::new(),
            warning: Some(ROTATION_WARNING.to_string()),
        }
    }

    /// One page of the user's sessions, grouped by calendar date of last
    /// update, newest first within and across groups.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn list_sessions(
        &self,
        user_id: UserId,
        page: u64,
        limit: Option<u64>,
    ) -> ChatResult<SessionListing> {
        let page = page.max(1);
        let limit = limit
            .unwrap_or(self.config.history.default_page_size)
            .max(1);
        let offset = (page - 1) * limit;

        let records = self.store.list_page(user_id, offset, limit).await?;
        let total = self.store.count(user_id).await?;

        let mut sessions_by_date: Vec<DateGroup> = Vec::new();
        for record in records {
            let date = record.updated_at.date_naive();
            let summary = SessionSummary {
                session_id: record.session_id,
                message_count: record.message_count(),
                created_at: record.created_at,
                updated_at: record.updated_at,
                preview: record.preview(self.config.history.preview_chars),
            };
            match sessions_by_date.last_mut() {
                Some(group) if group.date == date => group.sessions.push(summary),
                _ => sessions_by_date.push(DateGroup {
                    date,
                    sessions: vec![summary],
                }),
            }
        }

        Ok(SessionListing {
            sessions_by_date,
            pagination: PageInfo {
                total,
                page,
                limit,
                pages: total.div_ceil(limit),
            },
        })
    }

    /// Full history of one owned session.
    ///
    /// # Errors
    /// Returns `ChatError::NotFound` if the session is absent or owned by
    /// another user.
    pub async fn session_details(
        &self,
        user_id: UserId,
        session_id: &str,
    ) -> ChatResult<SessionRecord> {
        let session_id: SessionId = session_id
            .parse()
            .map_err(|_| ChatError::Validation(VALID_SESSION_PARAM_REQUIRED.to_string()))?;

        self.store
            .find(session_id, user_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(SESSION_NOT_FOUND.to_string()))
    }

    /// Explicitly create an empty session and return its identifier.
    ///
    /// # Errors
    /// Returns an error if persistence fails.
    pub async fn create_session(&self, user_id: UserId) -> ChatResult<SessionId> {
        let record = SessionRecord::new(SessionId::new(), user_id);
        self.store.save(&record).await?;
        info!("created session {} for user {user_id}", record.session_id);
        Ok(record.session_id)
    }

    /// Permanently delete an owned session and all its messages.
    ///
    /// # Errors
    /// Returns `ChatError::NotFound` if the session is absent or owned by
    /// another user (cross-user deletion never succeeds).
    pub async fn delete_session(&self, user_id: UserId, session_id: &str) -> ChatResult<()> {
        let session_id: SessionId = session_id
            .parse()
            .map_err(|_| ChatError::Validation(VALID_SESSION_PARAM_REQUIRED.to_string()))?;

        if self.store.delete(session_id, user_id).await? {
            info!("deleted session {session_id} for user {user_id}");
            Ok(())
        } else {
            Err(ChatError::NotFound(SESSION_NOT_FOUND.to_string()))
        }
    }

    /// Standalone retrieval for the caller's own inspection.
    ///
    /// Unlike the chat path, unavailability of the retrieval service is
    /// surfaced to the caller here.
    ///
    /// # Errors
    /// Returns `ChatError::Validation` for an empty query and
    /// `ChatError::RagUnavailable` when the service cannot be reached.
    pub async fn retrieve_documents(
        &self,
        user_id: UserId,
        text: &str,
    ) -> ChatResult<Vec<RetrievedDoc>> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ChatError::Validation(QUERY_TEXT_REQUIRED.to_string()));
        }

        self.retriever
            .retrieve(user_id, trimmed.to_string(), self.config.rag.top_k)
            .await
    }

    #[cfg(test)]
    fn set_in_flight(&self, user_id: UserId) {
        self.in_flight.insert(user_id, ());
    }
}

fn degraded_reply(err: &GenerationError) -> String {
    warn!("generation failed, synthesizing reply: {err}");
    match err {
        GenerationError::InvalidRequest(message) => message.clone(),
        GenerationError::Unavailable(_) | GenerationError::Malformed(_) => {
            GENERATION_FALLBACK.to_string()
        }
    }
}
