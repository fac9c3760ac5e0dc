mod memory;
mod sqlite;
mod threads;

use std::{path::Path, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use msp_core::PuppetId;
use serde::{Deserialize, Serialize};
use tracing::info;

pub use memory::{MemoryThreadStore, MemoryTokenStore};
pub use sqlite::{SqliteStore, sqlite_store};
pub use threads::{ThreadRoot, ThreadTracker};

pub type SharedThreadStore = Arc<dyn ThreadStore>;
pub type SharedTokenStore = Arc<dyn TokenStore>;

/// Credentials recorded when an account authenticates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub puppet: PuppetId,
    pub token: String,
    pub team_id: String,
    pub user_id: String,
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn save(&self, record: TokenRecord) -> Result<()>;
    async fn get(&self, puppet: PuppetId) -> Result<Option<TokenRecord>>;
    async fn delete(&self, puppet: PuppetId) -> Result<()>;
}

/// Persistence behind [`ThreadTracker`].
///
/// One row per event: `first` is the event it replies to, `last` the most
/// recent reply known for a thread root.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Records `event_id -> first`. Returns `false` when `event_id` already
    /// has a parent; existing rows are never overwritten.
    async fn set_first(&self, event_id: &str, first: &str) -> Result<bool>;
    async fn get_first(&self, event_id: &str) -> Result<Option<String>>;
    async fn set_last(&self, root: &str, last: &str) -> Result<()>;
    async fn get_last(&self, root: &str) -> Result<Option<String>>;
    /// Removes `event_id` and every row naming it as parent.
    async fn remove(&self, event_id: &str) -> Result<()>;
}

/// Returns in-memory stores.
pub fn shared_memory_stores() -> (SharedThreadStore, SharedTokenStore) {
    (
        Arc::new(MemoryThreadStore::new()),
        Arc::new(MemoryTokenStore::new()),
    )
}

/// Opens the sqlite store at `path`, or in-memory stores when no path is
/// configured.
pub fn stores_from_path(path: Option<&Path>) -> Result<(SharedThreadStore, SharedTokenStore)> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "opening sqlite store");
            let store = Arc::new(sqlite_store(path)?);
            Ok((store.clone(), store))
        }
        None => Ok(shared_memory_stores()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn configured_path_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.db");
        let record = TokenRecord {
            puppet: PuppetId(3),
            token: "xoxp-3".into(),
            team_id: "T1".into(),
            user_id: "U1".into(),
        };

        let (threads, tokens) = stores_from_path(Some(path.as_path())).unwrap();
        tokens.save(record.clone()).await.unwrap();
        threads.set_first("2.0", "1.0").await.unwrap();
        drop((threads, tokens));

        let (threads, tokens) = stores_from_path(Some(path.as_path())).unwrap();
        assert_eq!(tokens.get(PuppetId(3)).await.unwrap(), Some(record));
        assert_eq!(threads.get_first("2.0").await.unwrap().as_deref(), Some("1.0"));
    }

    #[tokio::test]
    async fn no_path_keeps_state_in_memory() {
        let (_, tokens) = stores_from_path(None).unwrap();
        assert_eq!(tokens.get(PuppetId(1)).await.unwrap(), None);
    }
}
