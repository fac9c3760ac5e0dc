use std::{
    path::Path,
    sync::{Arc, Mutex as StdMutex},
};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use msp_core::PuppetId;
use rusqlite::{Connection, OptionalExtension, params};
use tokio::task::spawn_blocking;

use crate::{ThreadStore, TokenRecord, TokenStore};

const CREATE_TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS slack_tokens (
    puppet_id INTEGER PRIMARY KEY,
    token TEXT NOT NULL,
    team_id TEXT NOT NULL,
    user_id TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS slack_threads (
    event_id TEXT PRIMARY KEY,
    thread_first_event_id TEXT,
    thread_last_event_id TEXT
);
CREATE INDEX IF NOT EXISTS slack_threads_first ON slack_threads (thread_first_event_id);
"#;

/// Token and thread tables in one sqlite database.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<StdMutex<Connection>>,
}

pub fn sqlite_store(path: impl AsRef<Path>) -> Result<SqliteStore> {
    let path = path.as_ref();
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite store {}", path.display()))?;
    conn.execute_batch(CREATE_TABLES_SQL)
        .context("create bridge tables")?;
    Ok(SqliteStore {
        conn: Arc::new(StdMutex::new(conn)),
    })
}

impl SqliteStore {
    async fn with_conn<F, T>(&self, func: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| anyhow!("sqlite connection mutex poisoned"))?;
            func(&guard).map_err(anyhow::Error::from)
        })
        .await
        .context("sqlite task panicked")?
    }
}

#[async_trait]
impl ThreadStore for SqliteStore {
    async fn set_first(&self, event_id: &str, first: &str) -> Result<bool> {
        let (event_id, first) = (event_id.to_string(), first.to_string());
        self.with_conn(move |conn| {
            let existing: Option<Option<String>> = conn
                .query_row(
                    "SELECT thread_first_event_id FROM slack_threads WHERE event_id = ?1",
                    params![event_id],
                    |row| row.get(0),
                )
                .optional()?;
            match existing {
                Some(Some(_)) => Ok(false),
                Some(None) => {
                    conn.execute(
                        "UPDATE slack_threads SET thread_first_event_id = ?2 WHERE event_id = ?1",
                        params![event_id, first],
                    )?;
                    Ok(true)
                }
                None => {
                    conn.execute(
                        "INSERT INTO slack_threads (event_id, thread_first_event_id) VALUES (?1, ?2)",
                        params![event_id, first],
                    )?;
                    Ok(true)
                }
            }
        })
        .await
    }

    async fn get_first(&self, event_id: &str) -> Result<Option<String>> {
        let event_id = event_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT thread_first_event_id FROM slack_threads WHERE event_id = ?1",
                params![event_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()
            .map(Option::flatten)
        })
        .await
    }

    async fn set_last(&self, root: &str, last: &str) -> Result<()> {
        let (root, last) = (root.to_string(), last.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO slack_threads (event_id, thread_last_event_id) VALUES (?1, ?2)
                 ON CONFLICT(event_id) DO UPDATE SET thread_last_event_id = excluded.thread_last_event_id",
                params![root, last],
            )
            .map(|_| ())
        })
        .await
    }

    async fn get_last(&self, root: &str) -> Result<Option<String>> {
        let root = root.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT thread_last_event_id FROM slack_threads WHERE event_id = ?1",
                params![root],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()
            .map(Option::flatten)
        })
        .await
    }

    async fn remove(&self, event_id: &str) -> Result<()> {
        let event_id = event_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM slack_threads WHERE event_id = ?1 OR thread_first_event_id = ?1",
                params![event_id],
            )
            .map(|_| ())
        })
        .await
    }
}

#[async_trait]
impl TokenStore for SqliteStore {
    async fn save(&self, record: TokenRecord) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO slack_tokens (puppet_id, token, team_id, user_id)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(puppet_id) DO UPDATE SET token = excluded.token,
                 team_id = excluded.team_id,
                 user_id = excluded.user_id",
                params![
                    puppet_column(record.puppet),
                    record.token,
                    record.team_id,
                    record.user_id
                ],
            )
            .map(|_| ())
        })
        .await
    }

    async fn get(&self, puppet: PuppetId) -> Result<Option<TokenRecord>> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT token, team_id, user_id FROM slack_tokens WHERE puppet_id = ?1",
                params![puppet_column(puppet)],
                |row| {
                    Ok(TokenRecord {
                        puppet,
                        token: row.get(0)?,
                        team_id: row.get(1)?,
                        user_id: row.get(2)?,
                    })
                },
            )
            .optional()
        })
        .await
    }

    async fn delete(&self, puppet: PuppetId) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM slack_tokens WHERE puppet_id = ?1",
                params![puppet_column(puppet)],
            )
            .map(|_| ())
        })
        .await
    }
}

fn puppet_column(puppet: PuppetId) -> i64 {
    i64::try_from(puppet.0).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(puppet: u64, token: &str) -> TokenRecord {
        TokenRecord {
            puppet: PuppetId(puppet),
            token: token.into(),
            team_id: "T1".into(),
            user_id: "U1".into(),
        }
    }

    #[tokio::test]
    async fn tokens_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.db");
        {
            let store = sqlite_store(&path).unwrap();
            store.save(record(7, "xoxp-old")).await.unwrap();
            store.save(record(7, "xoxp-new")).await.unwrap();
        }
        let store = sqlite_store(&path).unwrap();
        assert_eq!(
            store.get(PuppetId(7)).await.unwrap(),
            Some(record(7, "xoxp-new"))
        );
        store.delete(PuppetId(7)).await.unwrap();
        assert_eq!(store.get(PuppetId(7)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn thread_rows_never_overwrite_parents() {
        let dir = tempfile::tempdir().unwrap();
        let store = sqlite_store(dir.path().join("bridge.db")).unwrap();
        store.set_last("root", "b").await.unwrap();
        assert!(store.set_first("root", "elsewhere").await.unwrap());
        assert!(store.set_first("a", "root").await.unwrap());
        assert!(!store.set_first("a", "other").await.unwrap());
        assert_eq!(store.get_first("a").await.unwrap().as_deref(), Some("root"));
        assert_eq!(store.get_last("root").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn remove_drops_children_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = sqlite_store(dir.path().join("bridge.db")).unwrap();
        store.set_first("a", "root").await.unwrap();
        store.set_first("b", "root").await.unwrap();
        store.set_first("c", "a").await.unwrap();
        store.remove("root").await.unwrap();
        assert_eq!(store.get_first("a").await.unwrap(), None);
        assert_eq!(store.get_first("b").await.unwrap(), None);
        assert_eq!(store.get_first("c").await.unwrap().as_deref(), Some("a"));
    }
}
