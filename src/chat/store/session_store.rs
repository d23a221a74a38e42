//! SQLite-backed session store.
//!
//! One row per session; the message history lives in a JSON document
//! column, so every save is a single `INSERT OR REPLACE` and concurrent
//! writers resolve to last-write-wins on the whole session.

use std::future::Future;
use std::pin::Pin;

use chrono::{TimeZone, Utc};
use tokio_rusqlite::Connection;

use crate::chat::core::config::StorageConfig;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::{SessionId, UserId};
use crate::chat::core::message::Message;
use crate::chat::core::session::SessionRecord;

/// Boxed future type for session store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Session store trait.
pub trait SessionStore: Send + Sync {
    /// Load a session scoped to its owner.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn find(
        &self,
        session_id: SessionId,
        user_id: UserId,
    ) -> StoreFuture<'_, ChatResult<Option<SessionRecord>>>;

    /// Write the whole session document (insert or replace).
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn save(&self, record: &SessionRecord) -> StoreFuture<'_, ChatResult<()>>;

    /// Delete a session scoped to its owner; `true` if a row was removed.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn delete(
        &self,
        session_id: SessionId,
        user_id: UserId,
    ) -> StoreFuture<'_, ChatResult<bool>>;

    /// One page of a user's sessions, newest `updated_at` first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list_page(
        &self,
        user_id: UserId,
        offset: u64,
        limit: u64,
    ) -> StoreFuture<'_, ChatResult<Vec<SessionRecord>>>;

    /// Total number of sessions owned by a user.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn count(&self, user_id: UserId) -> StoreFuture<'_, ChatResult<u64>>;
}

/// `SQLite` implementation of the session store.
pub struct SqliteSessionStore {
    conn: Connection,
    table: String,
}

/// Raw row shape before decoding.
type SessionRow = (String, String, String, i64, i64);

impl SqliteSessionStore {
    /// Initialize the session store.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn new(config: &StorageConfig) -> ChatResult<Self> {
        let conn = Connection::open(&config.sqlite_path).await?;
        let table = config.sessions_table.clone();
        let table_name = table.clone();

        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    session_id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    messages_json TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_{table_name}_user_updated
                    ON {table_name} (user_id, updated_at);"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, table })
    }

    fn decode_row(row: SessionRow) -> ChatResult<SessionRecord> {
        let (session_id, user_id, messages_json, created_at, updated_at) = row;
        let session_id: SessionId = session_id
            .parse()
            .map_err(|err| ChatError::Storage(format!("invalid session id: {err}")))?;
        let user_id: UserId = user_id
            .parse()
            .map_err(|err| ChatError::Storage(format!("invalid user id: {err}")))?;
        let messages: Vec<Message> = serde_json::from_str(&messages_json)?;
        let created_at = Utc
            .timestamp_millis_opt(created_at)
            .single()
            .ok_or_else(|| ChatError::Storage("invalid created_at timestamp".to_string()))?;
        let updated_at = Utc
            .timestamp_millis_opt(updated_at)
            .single()
            .ok_or_else(|| ChatError::Storage("invalid updated_at timestamp".to_string()))?;

        Ok(SessionRecord {
            session_id,
            user_id,
            messages,
            created_at,
            updated_at,
        })
    }
}

impl SessionStore for SqliteSessionStore {
    fn find(
        &self,
        session_id: SessionId,
        user_id: UserId,
    ) -> StoreFuture<'_, ChatResult<Option<SessionRecord>>> {
        Box::pin(async move {
            let table = self.table.clone();
            let session = session_id.to_string();
            let user = user_id.to_string();

            let row: Option<SessionRow> = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT session_id, user_id, messages_json, created_at, updated_at
                         FROM {table}
                         WHERE session_id = ?1 AND user_id = ?2"
                    ))?;
                    let row = stmt
                        .query_row(rusqlite::params![session, user], |row| {
                            Ok((
                                row.get(0)?,
                                row.get(1)?,
                                row.get(2)?,
                                row.get(3)?,
                                row.get(4)?,
                            ))
                        })
                        .ok();
                    Ok(row)
                })
                .await?;

            row.map(Self::decode_row).transpose()
        })
    }

    fn save(&self, record: &SessionRecord) -> StoreFuture<'_, ChatResult<()>> {
        let record = record.clone();
        Box::pin(async move {
            let table = self.table.clone();
            let session = record.session_id.to_string();
            let user = record.user_id.to_string();
            let messages_json = serde_json::to_string(&record.messages)?;
            let created_at = record.created_at.timestamp_millis();
            let updated_at = record.updated_at.timestamp_millis();

            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!(
                            "INSERT OR REPLACE INTO {table}
                             (session_id, user_id, messages_json, created_at, updated_at)
                             VALUES (?1, ?2, ?3, ?4, ?5)"
                        ),
                        rusqlite::params![session, user, messages_json, created_at, updated_at],
                    )?;
                    Ok(())
                })
                .await?;

            Ok(())
        })
    }

    fn delete(
        &self,
        session_id: SessionId,
        user_id: UserId,
    ) -> StoreFuture<'_, ChatResult<bool>> {
        Box::pin(async move {
            let table = self.table.clone();
            let session = session_id.to_string();
            let user = user_id.to_string();

            let removed = self
                .conn
                .call(move |conn| {
                    let changed = conn.execute(
                        &format!("DELETE FROM {table} WHERE session_id = ?1 AND user_id = ?2"),
                        rusqlite::params![session, user],
                    )?;
                    Ok(changed > 0)
                })
                .await?;

            Ok(removed)
        })
    }

    fn list_page(
        &self,
        user_id: UserId,
        offset: u64,
        limit: u64,
    ) -> StoreFuture<'_, ChatResult<Vec<SessionRecord>>> {
        Box::pin(async move {
            let table = self.table.clone();
            let user = user_id.to_string();
            let limit = i64::try_from(limit)
                .map_err(|_| ChatError::Storage("limit exceeds i64".to_string()))?;
            let offset = i64::try_from(offset)
                .map_err(|_| ChatError::Storage("offset exceeds i64".to_string()))?;

            let rows: Vec<SessionRow> = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT session_id, user_id, messages_json, created_at, updated_at
                         FROM {table}
                         WHERE user_id = ?1
                         ORDER BY updated_at DESC, session_id DESC
                         LIMIT ?2 OFFSET ?3"
                    ))?;
                    let rows = stmt
                        .query_map(rusqlite::params![user, limit, offset], |row| {
                            Ok((
                                row.get(0)?,
                                row.get(1)?,
                                row.get(2)?,
                                row.get(3)?,
                                row.get(4)?,
                            ))
                        })?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;

            rows.into_iter().map(Self::decode_row).collect()
        })
    }

    fn count(&self, user_id: UserId) -> StoreFuture<'_, ChatResult<u64>> {
        Box::pin(async move {
            let table = self.table.clone();
            let user = user_id.to_string();

            let count = self
                .conn
                .call(move |conn| {
                    let count: i64 = conn.query_row(
                        &format!("SELECT COUNT(*) FROM {table} WHERE user_id = ?1"),
                        rusqlite::params![user],
                        |row| row.get(0),
                    )?;
                    Ok(count)
                })
                .await?;

            u64::try_from(count).map_err(|_| ChatError::Storage("invalid count".to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::core::message::Message;
    use chrono::Duration;

    async fn temp_store() -> (SqliteSessionStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            sqlite_path: dir.path().join("test.sqlite"),
            ..StorageConfig::default()
        };
        let store = SqliteSessionStore::new(&config).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn save_find_roundtrip_scoped_to_owner() {
        let (store, _dir) = temp_store().await;
        let user = UserId::new();
        let mut record = SessionRecord::new(SessionId::new(), user);
        record.push_message(Message::user("hello"));
        record.push_message(Message::model("hi there"));
        store.save(&record).await.unwrap();

        let found = store.find(record.session_id, user).await.unwrap().unwrap();
        assert_eq!(found.session_id, record.session_id);
        assert_eq!(found.messages, record.messages);
        assert_eq!(
            found.created_at.timestamp_millis(),
            record.created_at.timestamp_millis()
        );

        // Same id, different user: invisible.
        let other = store.find(record.session_id, UserId::new()).await.unwrap();
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn save_is_document_upsert() {
        let (store, _dir) = temp_store().await;
        let user = UserId::new();
        let mut record = SessionRecord::new(SessionId::new(), user);
        record.push_message(Message::user("one"));
        store.save(&record).await.unwrap();

        record.push_message(Message::model("two"));
        store.save(&record).await.unwrap();

        assert_eq!(store.count(user).await.unwrap(), 1);
        let found = store.find(record.session_id, user).await.unwrap().unwrap();
        assert_eq!(found.message_count(), 2);
    }

    #[tokio::test]
    async fn delete_is_scoped_and_permanent() {
        let (store, _dir) = temp_store().await;
        let user = UserId::new();
        let mut record = SessionRecord::new(SessionId::new(), user);
        record.push_message(Message::user("bye"));
        store.save(&record).await.unwrap();

        assert!(!store.delete(record.session_id, UserId::new()).await.unwrap());
        assert!(store.find(record.session_id, user).await.unwrap().is_some());

        assert!(store.delete(record.session_id, user).await.unwrap());
        assert!(store.find(record.session_id, user).await.unwrap().is_none());
        assert!(!store.delete(record.session_id, user).await.unwrap());
    }

    #[tokio::test]
    async fn list_pages_newest_first() {
        let (store, _dir) = temp_store().await;
        let user = UserId::new();
        let now = Utc::now();

        let mut ids = Vec::new();
        for age in 0..5_i64 {
            let mut record = SessionRecord::new(SessionId::new(), user);
            record.push_message(Message::user(format!("msg {age}")));
            record.updated_at = now - Duration::minutes(age);
            store.save(&record).await.unwrap();
            ids.push(record.session_id);
        }
        // A foreign user's session never shows up.
        let mut foreign = SessionRecord::new(SessionId::new(), UserId::new());
        foreign.push_message(Message::user("other"));
        store.save(&foreign).await.unwrap();

        assert_eq!(store.count(user).await.unwrap(), 5);

        let first = store.list_page(user, 0, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].session_id, ids[0]);
        assert_eq!(first[1].session_id, ids[1]);
        assert!(first[0].updated_at >= first[1].updated_at);

        let last = store.list_page(user, 4, 2).await.unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].session_id, ids[4]);
    }
}
