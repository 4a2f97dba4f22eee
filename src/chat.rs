//! Chat session store.
//!
//! Sessions and their ordered messages persist in SQLite. A save replaces
//! the session's message list wholesale; callers send complete snapshots.
//! The process-wide "current session" pointer lives in the single-row
//! `current_session` table: set by [`set_current`], cleared when the current
//! session is deleted, read by [`load_current`].

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{ChatMessage, SessionSummary, Source};

/// Maximum characters of the first user message used as a session title.
const TITLE_CHARS: usize = 30;
const PLACEHOLDER_TITLE: &str = "New conversation";

/// Persist a full message snapshot, creating the session if needed.
///
/// With no `session_id`, the current session is reused when one is set;
/// otherwise a fresh session is created and marked current. Returns the
/// session id written to.
pub async fn save_session(
    pool: &SqlitePool,
    session_id: Option<&str>,
    messages: &[ChatMessage],
) -> Result<String> {
    let (session_id, make_current) = match session_id {
        Some(id) => (id.to_string(), false),
        None => match current_session_id(pool).await? {
            Some(current) => (current, false),
            None => (Uuid::new_v4().to_string(), true),
        },
    };

    let title = derive_title(messages);
    let now = chrono::Utc::now().timestamp();

    let mut tx = pool.begin().await?;

    let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_sessions WHERE session_id = ?")
        .bind(&session_id)
        .fetch_one(&mut *tx)
        .await?;

    if exists > 0 {
        sqlx::query(
            "UPDATE chat_sessions SET title = ?, last_updated = ?, message_count = ? \
             WHERE session_id = ?",
        )
        .bind(&title)
        .bind(now)
        .bind(messages.len() as i64)
        .bind(&session_id)
        .execute(&mut *tx)
        .await?;
    } else {
        sqlx::query(
            "INSERT INTO chat_sessions (session_id, title, created_at, last_updated, message_count) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&session_id)
        .bind(&title)
        .bind(now)
        .bind(now)
        .bind(messages.len() as i64)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("DELETE FROM chat_messages WHERE session_id = ?")
        .bind(&session_id)
        .execute(&mut *tx)
        .await?;

    for (seq, message) in messages.iter().enumerate() {
        let sources_json = match &message.sources {
            Some(sources) => Some(serde_json::to_string(sources)?),
            None => None,
        };
        sqlx::query(
            "INSERT INTO chat_messages (id, session_id, seq, role, content, sources_json, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&session_id)
        .bind(seq as i64)
        .bind(&message.role)
        .bind(&message.content)
        .bind(sources_json)
        .bind(message.timestamp)
        .execute(&mut *tx)
        .await?;
    }

    if make_current {
        set_current_tx(&mut tx, &session_id).await?;
    }

    tx.commit().await?;
    Ok(session_id)
}

/// Create an empty session and mark it current.
pub async fn new_session(pool: &SqlitePool) -> Result<String> {
    let session_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();

    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO chat_sessions (session_id, title, created_at, last_updated, message_count) \
         VALUES (?, ?, ?, ?, 0)",
    )
    .bind(&session_id)
    .bind(PLACEHOLDER_TITLE)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;
    set_current_tx(&mut tx, &session_id).await?;
    tx.commit().await?;

    Ok(session_id)
}

/// Load the current session, or `None` when no pointer is set (including
/// a stale pointer at a session that no longer exists).
pub async fn load_current(pool: &SqlitePool) -> Result<Option<(SessionSummary, Vec<ChatMessage>)>> {
    match current_session_id(pool).await? {
        Some(id) => load_session(pool, &id).await,
        None => Ok(None),
    }
}

/// Load one session with its messages in save order.
pub async fn load_session(
    pool: &SqlitePool,
    session_id: &str,
) -> Result<Option<(SessionSummary, Vec<ChatMessage>)>> {
    let row = sqlx::query(
        "SELECT session_id, title, created_at, last_updated, message_count \
         FROM chat_sessions WHERE session_id = ?",
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let summary = SessionSummary {
        session_id: row.get("session_id"),
        title: row.get("title"),
        created_at: row.get("created_at"),
        last_updated: row.get("last_updated"),
        message_count: row.get("message_count"),
    };

    let message_rows = sqlx::query(
        "SELECT id, role, content, sources_json, created_at \
         FROM chat_messages WHERE session_id = ? ORDER BY seq",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?;

    let mut messages = Vec::with_capacity(message_rows.len());
    for row in message_rows {
        let sources_json: Option<String> = row.get("sources_json");
        let sources: Option<Vec<Source>> = match sources_json {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        };
        messages.push(ChatMessage {
            id: row.get("id"),
            role: row.get("role"),
            content: row.get("content"),
            sources,
            timestamp: row.get("created_at"),
        });
    }

    Ok(Some((summary, messages)))
}

/// Session summaries, most recently updated first.
pub async fn list_sessions(pool: &SqlitePool) -> Result<Vec<SessionSummary>> {
    let rows = sqlx::query(
        "SELECT session_id, title, created_at, last_updated, message_count \
         FROM chat_sessions ORDER BY last_updated DESC, session_id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| SessionSummary {
            session_id: row.get("session_id"),
            title: row.get("title"),
            created_at: row.get("created_at"),
            last_updated: row.get("last_updated"),
            message_count: row.get("message_count"),
        })
        .collect())
}

/// Point the process-wide current-session marker at `session_id`.
/// Returns `false` when the session does not exist.
pub async fn set_current(pool: &SqlitePool, session_id: &str) -> Result<bool> {
    let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_sessions WHERE session_id = ?")
        .bind(session_id)
        .fetch_one(pool)
        .await?;
    if exists == 0 {
        return Ok(false);
    }

    let mut tx = pool.begin().await?;
    set_current_tx(&mut tx, session_id).await?;
    tx.commit().await?;
    Ok(true)
}

pub async fn clear_current(pool: &SqlitePool) -> Result<()> {
    sqlx::query("DELETE FROM current_session WHERE id = 0")
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn current_session_id(pool: &SqlitePool) -> Result<Option<String>> {
    let id = sqlx::query_scalar("SELECT session_id FROM current_session WHERE id = 0")
        .fetch_optional(pool)
        .await?;
    Ok(id)
}

/// Delete a session and its messages. Deleting the current session clears
/// the current pointer. Returns `false` for unknown ids.
pub async fn delete_session(pool: &SqlitePool, session_id: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;

    // Children first: chat_messages holds a foreign key into chat_sessions,
    // so the parent row must go last.
    sqlx::query("DELETE FROM chat_messages WHERE session_id = ?")
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM current_session WHERE id = 0 AND session_id = ?")
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

    let deleted = sqlx::query("DELETE FROM chat_sessions WHERE session_id = ?")
        .bind(session_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    if deleted == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    tx.commit().await?;
    Ok(true)
}

async fn set_current_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    session_id: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO current_session (id, session_id) VALUES (0, ?) \
         ON CONFLICT(id) DO UPDATE SET session_id = excluded.session_id",
    )
    .bind(session_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// First user message, truncated; placeholder when none exists.
fn derive_title(messages: &[ChatMessage]) -> String {
    let Some(first_user) = messages.iter().find(|m| m.role == "user") else {
        return PLACEHOLDER_TITLE.to_string();
    };

    let content = first_user.content.trim();
    if content.is_empty() {
        return PLACEHOLDER_TITLE.to_string();
    }

    if content.chars().count() <= TITLE_CHARS {
        content.to_string()
    } else {
        let truncated: String = content.chars().take(TITLE_CHARS).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::apply_schema;
    use tempfile::TempDir;

    async fn test_pool(tmp: &TempDir) -> SqlitePool {
        let pool = crate::db::connect_path(&tmp.path().join("test.sqlite"))
            .await
            .unwrap();
        apply_schema(&pool).await.unwrap();
        pool
    }

    fn msg(role: &str, content: &str) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4().to_string(),
            role: role.to_string(),
            content: content.to_string(),
            sources: None,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    #[tokio::test]
    async fn first_save_creates_session_and_marks_it_current() {
        let tmp = TempDir::new().unwrap();
        let pool = test_pool(&tmp).await;

        let id = save_session(&pool, None, &[msg("user", "What is in the report?")])
            .await
            .unwrap();
        assert_eq!(current_session_id(&pool).await.unwrap(), Some(id.clone()));

        let (summary, messages) = load_current(&pool).await.unwrap().unwrap();
        assert_eq!(summary.session_id, id);
        assert_eq!(summary.message_count, 1);
        assert_eq!(messages[0].content, "What is in the report?");
    }

    #[tokio::test]
    async fn second_save_appends_in_order_and_increments_count() {
        let tmp = TempDir::new().unwrap();
        let pool = test_pool(&tmp).await;

        let first = vec![msg("user", "question one")];
        let id = save_session(&pool, None, &first).await.unwrap();

        let mut second = first.clone();
        second.push(msg("assistant", "answer one"));
        let id2 = save_session(&pool, Some(&id), &second).await.unwrap();
        assert_eq!(id, id2);

        let (summary, messages) = load_session(&pool, &id).await.unwrap().unwrap();
        assert_eq!(summary.message_count, 2);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "question one");
        assert_eq!(messages[1].content, "answer one");
    }

    #[tokio::test]
    async fn title_derives_from_first_user_message() {
        let tmp = TempDir::new().unwrap();
        let pool = test_pool(&tmp).await;

        let long = "This question is definitely longer than thirty characters total";
        let id = save_session(&pool, None, &[msg("assistant", "hi"), msg("user", long)])
            .await
            .unwrap();
        let (summary, _) = load_session(&pool, &id).await.unwrap().unwrap();
        assert!(summary.title.ends_with("..."));
        assert_eq!(summary.title.chars().count(), TITLE_CHARS + 3);

        let id2 = save_session(&pool, Some("other"), &[msg("assistant", "hello")])
            .await
            .unwrap();
        let (summary2, _) = load_session(&pool, &id2).await.unwrap().unwrap();
        assert_eq!(summary2.title, PLACEHOLDER_TITLE);
    }

    #[tokio::test]
    async fn sources_round_trip_through_persistence() {
        let tmp = TempDir::new().unwrap();
        let pool = test_pool(&tmp).await;

        let mut reply = msg("assistant", "grounded answer");
        reply.sources = Some(vec![Source {
            source_file: "report.pdf".to_string(),
            chunk_index: 2,
            similarity: 0.87,
            preview: "the relevant excerpt".to_string(),
        }]);

        let id = save_session(&pool, None, &[msg("user", "q"), reply]).await.unwrap();
        let (_, messages) = load_session(&pool, &id).await.unwrap().unwrap();
        let sources = messages[1].sources.as_ref().unwrap();
        assert_eq!(sources[0].source_file, "report.pdf");
        assert_eq!(sources[0].chunk_index, 2);
    }

    #[tokio::test]
    async fn deleting_current_session_clears_the_pointer() {
        let tmp = TempDir::new().unwrap();
        let pool = test_pool(&tmp).await;

        // The session must carry messages: their foreign key into
        // chat_sessions constrains the delete order.
        let id = save_session(
            &pool,
            None,
            &[msg("user", "hello"), msg("assistant", "hi there")],
        )
        .await
        .unwrap();
        assert!(delete_session(&pool, &id).await.unwrap());
        assert_eq!(current_session_id(&pool).await.unwrap(), None);
        assert!(load_current(&pool).await.unwrap().is_none());

        let remaining: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chat_messages WHERE session_id = ?")
                .bind(&id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(remaining, 0);

        // Unknown id: not found, not an error.
        assert!(!delete_session(&pool, &id).await.unwrap());
    }

    #[tokio::test]
    async fn set_current_requires_existing_session() {
        let tmp = TempDir::new().unwrap();
        let pool = test_pool(&tmp).await;

        assert!(!set_current(&pool, "ghost").await.unwrap());

        let a = new_session(&pool).await.unwrap();
        let b = new_session(&pool).await.unwrap();
        assert_eq!(current_session_id(&pool).await.unwrap(), Some(b.clone()));
        assert!(set_current(&pool, &a).await.unwrap());
        assert_eq!(current_session_id(&pool).await.unwrap(), Some(a));
    }

    #[tokio::test]
    async fn list_sessions_sorts_by_last_updated_desc() {
        let tmp = TempDir::new().unwrap();
        let pool = test_pool(&tmp).await;

        let a = save_session(&pool, Some("a"), &[msg("user", "first")]).await.unwrap();
        let b = save_session(&pool, Some("b"), &[msg("user", "second")]).await.unwrap();

        // Force distinct timestamps.
        sqlx::query("UPDATE chat_sessions SET last_updated = 100 WHERE session_id = ?")
            .bind(&a)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("UPDATE chat_sessions SET last_updated = 200 WHERE session_id = ?")
            .bind(&b)
            .execute(&pool)
            .await
            .unwrap();

        let sessions = list_sessions(&pool).await.unwrap();
        assert_eq!(sessions[0].session_id, b);
        assert_eq!(sessions[1].session_id, a);
    }
}
