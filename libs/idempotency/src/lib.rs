//! Echo suppression for bridge-originated messages.
//!
//! Slack delivers every message the bridge posts back over the event
//! stream. Before each send the orchestrator locks the conversation with
//! the sender and a content fingerprint; once the send returns it unlocks
//! with the new remote id. Inbound events are checked against that state
//! and dropped when they are the echo.

use std::{
    collections::HashMap,
    fmt::{Display, Formatter},
};

use msp_core::PuppetId;
use msp_telemetry::record_echo_suppressed;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Conversation a send is in flight for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupeKey {
    pub puppet: PuppetId,
    pub room: String,
}

impl DedupeKey {
    pub fn new(puppet: PuppetId, room: impl Into<String>) -> Self {
        Self {
            puppet,
            room: room.into(),
        }
    }
}

impl Display for DedupeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{};{}", self.puppet, self.room)
    }
}

/// Fingerprint used for file uploads, whose echo carries no comparable text.
pub fn file_fingerprint(name: &str) -> String {
    format!("file:{name}")
}

/// Fingerprint used for reactions.
pub fn reaction_fingerprint(name: &str) -> String {
    format!("reaction:{name}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    /// A send is in flight; the echo may beat the response.
    Locked { sender: String, fingerprint: String },
    /// The send returned this remote id.
    Resolved { sender: String, event_id: String },
}

/// Per-conversation echo state machine: idle, locked, resolved, idle.
#[derive(Debug, Default)]
pub struct Deduplicator {
    entries: RwLock<HashMap<DedupeKey, Entry>>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a send as in flight. Replaces whatever state the key held.
    #[instrument(name = "dedupe.lock", skip(self, fingerprint), fields(key = %key))]
    pub async fn lock(&self, key: &DedupeKey, sender: &str, fingerprint: &str) {
        self.entries.write().await.insert(
            key.clone(),
            Entry::Locked {
                sender: sender.to_string(),
                fingerprint: fingerprint.to_string(),
            },
        );
    }

    /// Completes a send. `None` means the send failed or produced no id,
    /// returning the key to idle.
    #[instrument(name = "dedupe.unlock", skip(self), fields(key = %key))]
    pub async fn unlock(&self, key: &DedupeKey, event_id: Option<&str>) {
        let mut entries = self.entries.write().await;
        let sender = match entries.get(key) {
            Some(Entry::Locked { sender, .. }) => sender.clone(),
            _ => {
                debug!("unlock without a pending send");
                return;
            }
        };
        match event_id {
            Some(event_id) => {
                entries.insert(
                    key.clone(),
                    Entry::Resolved {
                        sender,
                        event_id: event_id.to_string(),
                    },
                );
            }
            None => {
                entries.remove(key);
            }
        }
    }

    /// Returns `true` when an inbound event is the echo of a bridge send
    /// and must be dropped.
    ///
    /// The sender must match the lock holder. A locked entry then matches
    /// on fingerprint; a resolved entry matches on event id and returns to
    /// idle.
    pub async fn dedupe(
        &self,
        key: &DedupeKey,
        sender: &str,
        event_id: Option<&str>,
        fingerprint: Option<&str>,
    ) -> bool {
        let mut entries = self.entries.write().await;
        let suppress = match entries.get(key) {
            Some(Entry::Locked {
                sender: holder,
                fingerprint: locked,
            }) => holder == sender && fingerprint == Some(locked.as_str()),
            Some(Entry::Resolved {
                sender: holder,
                event_id: resolved,
            }) => {
                let matched = holder == sender && event_id == Some(resolved.as_str());
                if matched {
                    entries.remove(key);
                }
                matched
            }
            None => false,
        };
        if suppress {
            debug!(key = %key, sender, event_id, "echo suppressed");
            record_echo_suppressed(key.puppet.0);
        }
        suppress
    }

    /// Drops every entry belonging to `puppet`.
    pub async fn forget_puppet(&self, puppet: PuppetId) {
        self.entries
            .write()
            .await
            .retain(|key, _| key.puppet != puppet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> DedupeKey {
        DedupeKey::new(PuppetId(1), "C1")
    }

    #[tokio::test]
    async fn echo_before_send_returns_matches_fingerprint() {
        let dedupe = Deduplicator::new();
        dedupe.lock(&key(), "U1", "hello").await;
        assert!(dedupe.dedupe(&key(), "U1", Some("any"), Some("hello")).await);
        // Still locked until the send returns.
        assert!(dedupe.dedupe(&key(), "U1", Some("other"), Some("hello")).await);
        assert!(!dedupe.dedupe(&key(), "U1", Some("x"), Some("different")).await);
    }

    #[tokio::test]
    async fn echo_after_send_returns_matches_event_id_once() {
        let dedupe = Deduplicator::new();
        dedupe.lock(&key(), "U1", "hello").await;
        dedupe.unlock(&key(), Some("1.0001")).await;
        assert!(!dedupe.dedupe(&key(), "U1", Some("1.0002"), Some("hello")).await);
        assert!(dedupe.dedupe(&key(), "U1", Some("1.0001"), Some("hello")).await);
        assert!(!dedupe.dedupe(&key(), "U1", Some("1.0001"), Some("hello")).await);
    }

    #[tokio::test]
    async fn other_senders_are_never_suppressed() {
        let dedupe = Deduplicator::new();
        dedupe.lock(&key(), "U1", "hello").await;
        assert!(!dedupe.dedupe(&key(), "U2", Some("1"), Some("hello")).await);
        dedupe.unlock(&key(), Some("1")).await;
        assert!(!dedupe.dedupe(&key(), "U2", Some("1"), Some("hello")).await);
    }

    #[tokio::test]
    async fn failed_send_returns_to_idle() {
        let dedupe = Deduplicator::new();
        dedupe.lock(&key(), "U1", "hello").await;
        dedupe.unlock(&key(), None).await;
        assert!(!dedupe.dedupe(&key(), "U1", None, Some("hello")).await);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let dedupe = Deduplicator::new();
        dedupe.lock(&key(), "U1", "hello").await;
        let other = DedupeKey::new(PuppetId(2), "C1");
        assert!(!dedupe.dedupe(&other, "U1", None, Some("hello")).await);
        dedupe.forget_puppet(PuppetId(1)).await;
        assert!(!dedupe.dedupe(&key(), "U1", None, Some("hello")).await);
    }

    #[test]
    fn fingerprints() {
        assert_eq!(file_fingerprint("cat.png"), "file:cat.png");
        assert_eq!(reaction_fingerprint("tada"), "reaction:tada");
        assert_eq!(key().to_string(), "1;C1");
    }
}
