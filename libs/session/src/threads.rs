//! Reply chain bookkeeping.
//!
//! Slack threads are one level deep while Matrix replies nest freely. The
//! tracker remembers which event each bridged reply answered so a reply to
//! a reply can be posted under the right Slack thread root, and remembers
//! the latest reply per root so inbound thread messages reply to it.

use std::collections::HashSet;

use anyhow::Result;
use tracing::{debug, warn};

use crate::SharedThreadStore;

/// Result of walking a reply chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRoot {
    pub root: String,
    /// Parent links followed to reach `root`.
    pub hops: usize,
}

#[derive(Clone)]
pub struct ThreadTracker {
    store: SharedThreadStore,
}

impl ThreadTracker {
    pub fn new(store: SharedThreadStore) -> Self {
        Self { store }
    }

    /// Records that `child` replies to `parent`.
    ///
    /// Only fresh ids may be linked: a child that already has a parent, or
    /// one that would close a loop, is refused and `false` returned.
    pub async fn link(&self, child: &str, parent: &str) -> Result<bool> {
        if child == parent || self.resolve_root(parent).await?.root == child {
            warn!(child, parent, "refusing thread link that would loop");
            return Ok(false);
        }
        let linked = self.store.set_first(child, parent).await?;
        if !linked {
            debug!(child, parent, "event already linked to a thread");
        }
        Ok(linked)
    }

    /// Walks parent links until an event with no parent is reached.
    pub async fn resolve_root(&self, event_id: &str) -> Result<ThreadRoot> {
        let mut current = event_id.to_string();
        let mut visited = HashSet::from([current.clone()]);
        let mut hops = 0;
        while let Some(parent) = self.store.get_first(&current).await? {
            if !visited.insert(parent.clone()) {
                warn!(event_id, at = %current, "thread chain loops, stopping");
                break;
            }
            current = parent;
            hops += 1;
        }
        Ok(ThreadRoot {
            root: current,
            hops,
        })
    }

    /// Remembers `latest` as the newest reply under `root`.
    pub async fn record_latest(&self, root: &str, latest: &str) -> Result<()> {
        self.store.set_last(root, latest).await
    }

    /// Event an inbound thread message should reply to: the latest known
    /// reply under `root`, or `root` itself.
    pub async fn reply_target(&self, root: &str) -> Result<String> {
        Ok(self
            .store
            .get_last(root)
            .await?
            .unwrap_or_else(|| root.to_string()))
    }

    /// Drops bookkeeping for a deleted event.
    pub async fn forget(&self, event_id: &str) -> Result<()> {
        self.store.remove(event_id).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::MemoryThreadStore;

    fn tracker() -> ThreadTracker {
        ThreadTracker::new(Arc::new(MemoryThreadStore::new()))
    }

    #[tokio::test]
    async fn chain_of_depth_k_resolves_in_k_hops() {
        let tracker = tracker();
        let mut parent = "root".to_string();
        for depth in 1..=5 {
            let child = format!("reply-{depth}");
            assert!(tracker.link(&child, &parent).await.unwrap());
            let resolved = tracker.resolve_root(&child).await.unwrap();
            assert_eq!(resolved.root, "root");
            assert_eq!(resolved.hops, depth);
            parent = child;
        }
    }

    #[tokio::test]
    async fn existing_children_are_not_relinked() {
        let tracker = tracker();
        assert!(tracker.link("b", "a").await.unwrap());
        assert!(!tracker.link("b", "c").await.unwrap());
        assert_eq!(tracker.resolve_root("b").await.unwrap().root, "a");
    }

    #[tokio::test]
    async fn loops_are_refused() {
        let tracker = tracker();
        assert!(tracker.link("b", "a").await.unwrap());
        assert!(!tracker.link("a", "b").await.unwrap());
        assert!(!tracker.link("a", "a").await.unwrap());
        assert_eq!(
            tracker.resolve_root("a").await.unwrap(),
            ThreadRoot {
                root: "a".into(),
                hops: 0
            }
        );
    }

    #[tokio::test]
    async fn reply_target_follows_latest() {
        let tracker = tracker();
        assert_eq!(tracker.reply_target("root").await.unwrap(), "root");
        tracker.record_latest("root", "r2").await.unwrap();
        assert_eq!(tracker.reply_target("root").await.unwrap(), "r2");
        tracker.forget("root").await.unwrap();
        assert_eq!(tracker.reply_target("root").await.unwrap(), "root");
    }
}
