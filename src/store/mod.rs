//! SQLite-backed persistence for users, items, classifications and
//! provider connections.
//!
//! All access goes through [`SqliteStore`], which serializes statements
//! behind a mutex. Methods are synchronous and hold the lock only for the
//! duration of the statement, so callers on the async runtime never await
//! while the connection is held.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    Classification, ClassificationResult, Item, MessageType, NewConnection, NewItem,
    ProviderConnection, Source, User,
};

/// Errors that can occur in the store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user not found: {0}")]
    UserNotFound(Uuid),

    #[error("telegram tag already registered: {0}")]
    DuplicateTelegramTag(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    LockPoisoned,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    telegram_tag TEXT UNIQUE,
    telegram_session TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS items (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL REFERENCES users(id),
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    source TEXT,
    message_type TEXT,
    original_text TEXT,
    metadata TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_items_owner ON items(owner_id);

CREATE TABLE IF NOT EXISTS classifications (
    item_id TEXT PRIMARY KEY REFERENCES items(id) ON DELETE CASCADE,
    category TEXT NOT NULL,
    priority TEXT NOT NULL,
    confidence REAL NOT NULL,
    action_required INTEGER NOT NULL,
    summary TEXT NOT NULL,
    dates TEXT NOT NULL,
    times TEXT NOT NULL,
    contact TEXT,
    projects TEXT NOT NULL,
    keywords TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS connections (
    user_id TEXT NOT NULL REFERENCES users(id),
    provider TEXT NOT NULL,
    provider_account_id TEXT,
    provider_account_email TEXT,
    access_token TEXT NOT NULL,
    refresh_token TEXT,
    expires_at TEXT,
    token_type TEXT,
    scope TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (user_id, provider)
);
";

/// SQLite store shared across the service
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (and initialize) a store at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory store.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    // ---- users ----

    /// Register a new user, optionally reachable at a Telegram tag.
    pub fn create_user(&self, telegram_tag: Option<&str>) -> Result<User, StoreError> {
        let user = User {
            id: Uuid::new_v4(),
            telegram_tag: telegram_tag.map(|t| t.to_string()),
            telegram_session: None,
            created_at: Utc::now(),
        };

        let result = self.conn()?.execute(
            "INSERT INTO users (id, telegram_tag, telegram_session, created_at)
             VALUES (?1, ?2, NULL, ?3)",
            params![
                user.id.to_string(),
                user.telegram_tag,
                user.created_at.to_rfc3339()
            ],
        );

        match result {
            Ok(_) => Ok(user),
            Err(e) if is_constraint_violation(&e) => Err(StoreError::DuplicateTelegramTag(
                telegram_tag.unwrap_or_default().to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT id, telegram_tag, telegram_session, created_at
                 FROM users WHERE id = ?1",
                params![id.to_string()],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn find_user_by_telegram_tag(&self, tag: &str) -> Result<Option<User>, StoreError> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT id, telegram_tag, telegram_session, created_at
                 FROM users WHERE telegram_tag = ?1",
                params![tag],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, telegram_tag, telegram_session, created_at
             FROM users ORDER BY created_at",
        )?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Store the serialized Telegram session for a user.
    pub fn set_telegram_session(&self, user_id: Uuid, session: &str) -> Result<(), StoreError> {
        let changed = self.conn()?.execute(
            "UPDATE users SET telegram_session = ?1 WHERE id = ?2",
            params![session, user_id.to_string()],
        )?;
        if changed == 0 {
            return Err(StoreError::UserNotFound(user_id));
        }
        Ok(())
    }

    pub fn clear_telegram_session(&self, user_id: Uuid) -> Result<(), StoreError> {
        self.conn()?.execute(
            "UPDATE users SET telegram_session = NULL WHERE id = ?1",
            params![user_id.to_string()],
        )?;
        Ok(())
    }

    /// Users holding a stored Telegram session, for restore at startup.
    pub fn users_with_telegram_session(&self) -> Result<Vec<User>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, telegram_tag, telegram_session, created_at
             FROM users
             WHERE telegram_session IS NOT NULL AND telegram_session != ''
             ORDER BY created_at",
        )?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    // ---- provider connections ----

    /// Create or replace the connection for (user, provider).
    ///
    /// A missing refresh token in the new record keeps the previously stored
    /// one, since providers only issue refresh tokens on first consent.
    pub fn upsert_connection(
        &self,
        user_id: Uuid,
        conn_in: &NewConnection,
    ) -> Result<ProviderConnection, StoreError> {
        let updated_at = Utc::now();
        self.conn()?.execute(
            "INSERT INTO connections
                 (user_id, provider, provider_account_id, provider_account_email,
                  access_token, refresh_token, expires_at, token_type, scope, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(user_id, provider) DO UPDATE SET
                 provider_account_id = excluded.provider_account_id,
                 provider_account_email = excluded.provider_account_email,
                 access_token = excluded.access_token,
                 refresh_token = COALESCE(excluded.refresh_token, connections.refresh_token),
                 expires_at = excluded.expires_at,
                 token_type = excluded.token_type,
                 scope = excluded.scope,
                 updated_at = excluded.updated_at",
            params![
                user_id.to_string(),
                conn_in.provider,
                conn_in.provider_account_id,
                conn_in.provider_account_email,
                conn_in.access_token,
                conn_in.refresh_token,
                conn_in.expires_at.map(|t| t.to_rfc3339()),
                conn_in.token_type,
                conn_in.scope,
                updated_at.to_rfc3339()
            ],
        )?;

        match self.find_connection(user_id, &conn_in.provider)? {
            Some(conn) => Ok(conn),
            None => Err(StoreError::UserNotFound(user_id)),
        }
    }

    pub fn find_connection(
        &self,
        user_id: Uuid,
        provider: &str,
    ) -> Result<Option<ProviderConnection>, StoreError> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT user_id, provider, provider_account_id, provider_account_email,
                        access_token, refresh_token, expires_at, token_type, scope, updated_at
                 FROM connections WHERE user_id = ?1 AND provider = ?2",
                params![user_id.to_string(), provider],
                connection_from_row,
            )
            .optional()?;
        Ok(found)
    }

    /// Persist refreshed tokens. A missing refresh token keeps the stored one.
    pub fn update_connection_tokens(
        &self,
        user_id: Uuid,
        provider: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let changed = self.conn()?.execute(
            "UPDATE connections SET
                 access_token = ?1,
                 refresh_token = COALESCE(?2, refresh_token),
                 expires_at = ?3,
                 updated_at = ?4
             WHERE user_id = ?5 AND provider = ?6",
            params![
                access_token,
                refresh_token,
                expires_at.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339(),
                user_id.to_string(),
                provider
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::UserNotFound(user_id));
        }
        Ok(())
    }

    /// Remove the connection for (user, provider). Returns whether one existed.
    pub fn delete_connection(&self, user_id: Uuid, provider: &str) -> Result<bool, StoreError> {
        let changed = self.conn()?.execute(
            "DELETE FROM connections WHERE user_id = ?1 AND provider = ?2",
            params![user_id.to_string(), provider],
        )?;
        Ok(changed > 0)
    }

    /// Ids of users holding a connection for the given provider.
    pub fn users_with_connection(&self, provider: &str) -> Result<Vec<Uuid>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT user_id FROM connections WHERE provider = ?1 ORDER BY user_id",
        )?;
        let ids = stmt
            .query_map(params![provider], |row| get_uuid(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    // ---- items ----

    /// Persist an item together with its classification in one transaction.
    ///
    /// Title resolution: a classification-provided title wins; otherwise the
    /// supplied title; otherwise the first words of the original text.
    pub fn create_item_with_classification(
        &self,
        owner_id: Uuid,
        item_in: NewItem,
        classification: Option<&ClassificationResult>,
    ) -> Result<Item, StoreError> {
        let title = match classification {
            Some(c) if !c.title.is_empty() => c.title.clone(),
            _ if !item_in.title.is_empty() => item_in.title.clone(),
            _ => item_in
                .original_text
                .as_deref()
                .map(derive_title)
                .unwrap_or_default(),
        };

        let item = Item {
            id: Uuid::new_v4(),
            owner_id,
            title,
            description: item_in.description,
            source: item_in.source,
            message_type: item_in.message_type,
            original_text: item_in.original_text,
            metadata: item_in.metadata,
            created_at: Utc::now(),
        };

        let metadata_json = item
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut guard = self.conn()?;
        let tx = guard.transaction()?;

        tx.execute(
            "INSERT INTO items
                 (id, owner_id, title, description, source, message_type,
                  original_text, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                item.id.to_string(),
                item.owner_id.to_string(),
                item.title,
                item.description,
                item.source.map(|s| s.as_str()),
                item.message_type.map(|m| m.as_str()),
                item.original_text,
                metadata_json,
                item.created_at.to_rfc3339()
            ],
        )?;

        if let Some(c) = classification {
            insert_classification(&tx, item.id, c)?;
        }

        tx.commit()?;
        Ok(item)
    }

    pub fn get_item(&self, id: Uuid) -> Result<Option<Item>, StoreError> {
        let conn = self.conn()?;
        let item = conn
            .query_row(
                "SELECT id, owner_id, title, description, source, message_type,
                        original_text, metadata, created_at
                 FROM items WHERE id = ?1",
                params![id.to_string()],
                item_from_row,
            )
            .optional()?;
        Ok(item)
    }

    pub fn count_items(&self, owner_id: Uuid) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM items WHERE owner_id = ?1",
            params![owner_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ---- classifications ----

    pub fn get_classification(
        &self,
        item_id: Uuid,
    ) -> Result<Option<Classification>, StoreError> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT item_id, category, priority, confidence, action_required,
                        summary, dates, times, contact, projects, keywords
                 FROM classifications WHERE item_id = ?1",
                params![item_id.to_string()],
                classification_from_row,
            )
            .optional()?;
        Ok(found)
    }

    /// Replace the classification for an existing item.
    pub fn replace_classification(
        &self,
        item_id: Uuid,
        result: &ClassificationResult,
    ) -> Result<(), StoreError> {
        let mut guard = self.conn()?;
        let tx = guard.transaction()?;
        tx.execute(
            "DELETE FROM classifications WHERE item_id = ?1",
            params![item_id.to_string()],
        )?;
        insert_classification(&tx, item_id, result)?;
        tx.commit()?;
        Ok(())
    }
}

fn insert_classification(
    tx: &rusqlite::Transaction<'_>,
    item_id: Uuid,
    c: &ClassificationResult,
) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO classifications
             (item_id, category, priority, confidence, action_required,
              summary, dates, times, contact, projects, keywords)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            item_id.to_string(),
            c.category.as_str(),
            c.priority.as_str(),
            c.confidence,
            c.action_required as i64,
            c.summary,
            serde_json::to_string(&c.entities.dates)?,
            serde_json::to_string(&c.entities.times)?,
            c.entities.contact,
            serde_json::to_string(&c.entities.projects)?,
            serde_json::to_string(&c.entities.keywords)?
        ],
    )?;
    Ok(())
}

/// First six words of the text, shortened with an ellipsis past 50 chars.
fn derive_title(text: &str) -> String {
    let joined = text.split_whitespace().take(6).collect::<Vec<_>>().join(" ");
    if joined.chars().count() > 50 {
        let head: String = joined.chars().take(47).collect();
        format!("{head}...")
    } else {
        joined
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::ConstraintViolation)
    )
}

// ---- row mapping ----

fn conversion_failure(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn get_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_failure(idx, e))
}

fn get_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_failure(idx, e))
}

fn get_opt_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(s) => DateTime::parse_from_rfc3339(&s)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| conversion_failure(idx, e)),
        None => Ok(None),
    }
}

fn get_string_list(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_failure(idx, e))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: get_uuid(row, 0)?,
        telegram_tag: row.get(1)?,
        telegram_session: row.get(2)?,
        created_at: get_timestamp(row, 3)?,
    })
}

fn connection_from_row(row: &Row<'_>) -> rusqlite::Result<ProviderConnection> {
    Ok(ProviderConnection {
        user_id: get_uuid(row, 0)?,
        provider: row.get(1)?,
        provider_account_id: row.get(2)?,
        provider_account_email: row.get(3)?,
        access_token: row.get(4)?,
        refresh_token: row.get(5)?,
        expires_at: get_opt_timestamp(row, 6)?,
        token_type: row.get(7)?,
        scope: row.get(8)?,
        updated_at: get_timestamp(row, 9)?,
    })
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    let source: Option<String> = row.get(4)?;
    let message_type: Option<String> = row.get(5)?;
    let metadata: Option<String> = row.get(7)?;
    let metadata = match metadata {
        Some(raw) => Some(serde_json::from_str(&raw).map_err(|e| conversion_failure(7, e))?),
        None => None,
    };

    Ok(Item {
        id: get_uuid(row, 0)?,
        owner_id: get_uuid(row, 1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        source: source.as_deref().and_then(Source::parse),
        message_type: message_type.as_deref().and_then(MessageType::parse),
        original_text: row.get(6)?,
        metadata,
        created_at: get_timestamp(row, 8)?,
    })
}

fn classification_from_row(row: &Row<'_>) -> rusqlite::Result<Classification> {
    let category: String = row.get(1)?;
    let priority: String = row.get(2)?;
    let action_required: i64 = row.get(4)?;

    Ok(Classification {
        item_id: get_uuid(row, 0)?,
        category: crate::domain::Category::parse_or_default(&category),
        priority: crate::domain::Priority::parse_or_default(&priority),
        confidence: row.get(3)?,
        action_required: action_required != 0,
        summary: row.get(5)?,
        dates: get_string_list(row, 6)?,
        times: get_string_list(row, 7)?,
        contact: row.get(8)?,
        projects: get_string_list(row, 9)?,
        keywords: get_string_list(row, 10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Category, Entities, Priority, PROVIDER_GOOGLE};

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn sample_result(title: &str) -> ClassificationResult {
        ClassificationResult {
            title: title.to_string(),
            category: Category::Meeting,
            priority: Priority::High,
            confidence: 0.9,
            action_required: true,
            summary: "Budget meeting tomorrow".to_string(),
            entities: Entities {
                dates: vec!["tomorrow".to_string()],
                times: vec!["3pm".to_string()],
                contact: Some("Alice".to_string()),
                projects: vec![],
                keywords: vec!["budget".to_string()],
            },
        }
    }

    fn sample_connection() -> NewConnection {
        NewConnection {
            provider: PROVIDER_GOOGLE.to_string(),
            provider_account_id: Some("acct-1".to_string()),
            provider_account_email: Some("user@example.com".to_string()),
            access_token: "access-1".to_string(),
            refresh_token: Some("refresh-1".to_string()),
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
            token_type: Some("Bearer".to_string()),
            scope: Some("gmail.readonly".to_string()),
        }
    }

    #[test]
    fn test_create_and_fetch_user() {
        let store = test_store();
        let user = store.create_user(Some("alice")).unwrap();

        let fetched = store.get_user(user.id).unwrap().unwrap();
        assert_eq!(fetched.telegram_tag.as_deref(), Some("alice"));
        assert!(!fetched.has_telegram_session());

        let by_tag = store.find_user_by_telegram_tag("alice").unwrap().unwrap();
        assert_eq!(by_tag.id, user.id);

        assert!(store.find_user_by_telegram_tag("bob").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_telegram_tag_rejected() {
        let store = test_store();
        store.create_user(Some("alice")).unwrap();

        let err = store.create_user(Some("alice")).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateTelegramTag(_)));
    }

    #[test]
    fn test_telegram_session_round_trip() {
        let store = test_store();
        let user = store.create_user(Some("alice")).unwrap();

        store.set_telegram_session(user.id, "session-blob").unwrap();
        let with_session = store.users_with_telegram_session().unwrap();
        assert_eq!(with_session.len(), 1);
        assert_eq!(
            with_session[0].telegram_session.as_deref(),
            Some("session-blob")
        );

        store.clear_telegram_session(user.id).unwrap();
        assert!(store.users_with_telegram_session().unwrap().is_empty());
    }

    #[test]
    fn test_set_session_for_unknown_user() {
        let store = test_store();
        let err = store
            .set_telegram_session(Uuid::new_v4(), "blob")
            .unwrap_err();
        assert!(matches!(err, StoreError::UserNotFound(_)));
    }

    #[test]
    fn test_connection_upsert_is_single_row() {
        let store = test_store();
        let user = store.create_user(None).unwrap();

        store.upsert_connection(user.id, &sample_connection()).unwrap();

        let mut second = sample_connection();
        second.access_token = "access-2".to_string();
        second.refresh_token = None;
        store.upsert_connection(user.id, &second).unwrap();

        let conn = store
            .find_connection(user.id, PROVIDER_GOOGLE)
            .unwrap()
            .unwrap();
        assert_eq!(conn.access_token, "access-2");
        // missing refresh token in the update keeps the original
        assert_eq!(conn.refresh_token.as_deref(), Some("refresh-1"));

        let ids = store.users_with_connection(PROVIDER_GOOGLE).unwrap();
        assert_eq!(ids, vec![user.id]);
    }

    #[test]
    fn test_delete_connection() {
        let store = test_store();
        let user = store.create_user(None).unwrap();
        store.upsert_connection(user.id, &sample_connection()).unwrap();

        assert!(store.delete_connection(user.id, PROVIDER_GOOGLE).unwrap());
        assert!(!store.delete_connection(user.id, PROVIDER_GOOGLE).unwrap());
        assert!(store
            .find_connection(user.id, PROVIDER_GOOGLE)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_update_connection_tokens() {
        let store = test_store();
        let user = store.create_user(None).unwrap();
        store.upsert_connection(user.id, &sample_connection()).unwrap();

        let expires = Utc::now() + chrono::Duration::hours(2);
        store
            .update_connection_tokens(user.id, PROVIDER_GOOGLE, "access-3", None, Some(expires))
            .unwrap();

        let conn = store
            .find_connection(user.id, PROVIDER_GOOGLE)
            .unwrap()
            .unwrap();
        assert_eq!(conn.access_token, "access-3");
        assert_eq!(conn.refresh_token.as_deref(), Some("refresh-1"));
    }

    #[test]
    fn test_item_title_from_classification() {
        let store = test_store();
        let user = store.create_user(None).unwrap();

        let item = store
            .create_item_with_classification(
                user.id,
                NewItem {
                    title: "Provided".to_string(),
                    description: "body".to_string(),
                    source: Some(Source::Telegram),
                    message_type: Some(MessageType::Text),
                    original_text: Some("hello world".to_string()),
                    metadata: None,
                },
                Some(&sample_result("Budget meeting")),
            )
            .unwrap();

        assert_eq!(item.title, "Budget meeting");

        let stored = store.get_classification(item.id).unwrap().unwrap();
        assert_eq!(stored.category, Category::Meeting);
        assert_eq!(stored.priority, Priority::High);
        assert!(stored.action_required);
        assert_eq!(stored.dates, vec!["tomorrow".to_string()]);
        assert_eq!(stored.contact.as_deref(), Some("Alice"));
    }

    #[test]
    fn test_item_title_derived_from_original_text() {
        let store = test_store();
        let user = store.create_user(None).unwrap();

        let item = store
            .create_item_with_classification(
                user.id,
                NewItem {
                    original_text: Some(
                        "remember to send the quarterly report to finance".to_string(),
                    ),
                    ..Default::default()
                },
                None,
            )
            .unwrap();

        // first six words
        assert_eq!(item.title, "remember to send the quarterly report");
    }

    #[test]
    fn test_derived_title_is_shortened() {
        let long = "supercalifragilisticexpialidocious antidisestablishmentarianism \
                    pneumonoultramicroscopicsilicovolcanoconiosis floccinaucinihilipilification";
        let title = derive_title(long);
        assert_eq!(title.chars().count(), 50);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn test_item_title_provided_wins_without_classification() {
        let store = test_store();
        let user = store.create_user(None).unwrap();

        let item = store
            .create_item_with_classification(
                user.id,
                NewItem {
                    title: "Provided".to_string(),
                    original_text: Some("something else entirely".to_string()),
                    ..Default::default()
                },
                None,
            )
            .unwrap();

        assert_eq!(item.title, "Provided");
    }

    #[test]
    fn test_item_metadata_round_trip() {
        let store = test_store();
        let user = store.create_user(None).unwrap();

        let metadata = serde_json::json!({
            "gmail_message_id": "m-1",
            "sender": "alice@example.com",
        });

        let item = store
            .create_item_with_classification(
                user.id,
                NewItem {
                    title: "Mail".to_string(),
                    metadata: Some(metadata.clone()),
                    source: Some(Source::Gmail),
                    message_type: Some(MessageType::Email),
                    ..Default::default()
                },
                None,
            )
            .unwrap();

        let fetched = store.get_item(item.id).unwrap().unwrap();
        assert_eq!(fetched.metadata, Some(metadata));
        assert_eq!(fetched.source, Some(Source::Gmail));
        assert_eq!(fetched.message_type, Some(MessageType::Email));
    }

    #[test]
    fn test_item_requires_known_owner() {
        let store = test_store();
        let result = store.create_item_with_classification(
            Uuid::new_v4(),
            NewItem {
                title: "Orphan".to_string(),
                ..Default::default()
            },
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_replace_classification() {
        let store = test_store();
        let user = store.create_user(None).unwrap();
        let item = store
            .create_item_with_classification(
                user.id,
                NewItem::default(),
                Some(&sample_result("First")),
            )
            .unwrap();

        let mut updated = sample_result("Second");
        updated.category = Category::Task;
        updated.priority = Priority::Low;
        store.replace_classification(item.id, &updated).unwrap();

        let stored = store.get_classification(item.id).unwrap().unwrap();
        assert_eq!(stored.category, Category::Task);
        assert_eq!(stored.priority, Priority::Low);
    }

    #[test]
    fn test_count_items() {
        let store = test_store();
        let user = store.create_user(None).unwrap();
        assert_eq!(store.count_items(user.id).unwrap(), 0);

        for _ in 0..3 {
            store
                .create_item_with_classification(
                    user.id,
                    NewItem {
                        title: "x".to_string(),
                        ..Default::default()
                    },
                    None,
                )
                .unwrap();
        }
        assert_eq!(store.count_items(user.id).unwrap(), 3);
    }
}
