//! Single-flight Fetch Lock.
//!
//! At most one lookup per `(kind, id)` fetches from Slack at a time. Other
//! callers get a [`Waiter`] that resolves when the holder releases or the
//! entry expires. Every entry carries a token so a holder whose entry
//! expired and was replaced cannot release its successor.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use msp_core::EntityKind;
use tokio::{
    sync::watch,
    time::{Instant, timeout_at},
};
use tracing::debug;

pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(60);

type LockKey = (EntityKind, String);

struct LockEntry {
    token: u64,
    expires: Instant,
    released: watch::Sender<bool>,
}

pub struct FetchLock {
    ttl: Duration,
    next_token: AtomicU64,
    entries: Arc<DashMap<LockKey, LockEntry>>,
}

pub enum Acquire {
    /// Caller owns the fetch; dropping the guard releases it.
    Held(LockGuard),
    /// Someone else is fetching.
    Busy(Waiter),
}

impl FetchLock {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            next_token: AtomicU64::new(1),
            entries: Arc::new(DashMap::new()),
        }
    }

    pub fn acquire(&self, kind: EntityKind, id: &str) -> Acquire {
        let key = (kind, id.to_string());
        let now = Instant::now();
        match self.entries.entry(key.clone()) {
            Entry::Occupied(entry) if entry.get().expires > now => Acquire::Busy(Waiter {
                released: entry.get().released.subscribe(),
                expires: entry.get().expires,
            }),
            Entry::Occupied(mut entry) => {
                debug!(kind = kind.as_str(), id, "fetch lock expired, taking over");
                let (fresh, token) = self.fresh_entry(now);
                let stale = entry.insert(fresh);
                stale.released.send_replace(true);
                Acquire::Held(self.guard(key, token))
            }
            Entry::Vacant(slot) => {
                let (fresh, token) = self.fresh_entry(now);
                slot.insert(fresh);
                Acquire::Held(self.guard(key, token))
            }
        }
    }

    /// Keys currently locked, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn fresh_entry(&self, now: Instant) -> (LockEntry, u64) {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (released, _) = watch::channel(false);
        let entry = LockEntry {
            token,
            expires: now + self.ttl,
            released,
        };
        (entry, token)
    }

    fn guard(&self, key: LockKey, token: u64) -> LockGuard {
        LockGuard {
            entries: Arc::clone(&self.entries),
            key,
            token,
        }
    }
}

impl Default for FetchLock {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TTL)
    }
}

pub struct LockGuard {
    entries: Arc<DashMap<LockKey, LockEntry>>,
    key: LockKey,
    token: u64,
}

impl LockGuard {
    pub fn token(&self) -> u64 {
        self.token
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let token = self.token;
        match self.entries.remove_if(&self.key, |_, entry| entry.token == token) {
            Some((_, entry)) => {
                entry.released.send_replace(true);
            }
            None => debug!(
                kind = self.key.0.as_str(),
                id = %self.key.1,
                token,
                "stale fetch lock release ignored"
            ),
        }
    }
}

pub struct Waiter {
    released: watch::Receiver<bool>,
    expires: Instant,
}

impl Waiter {
    /// Resolves on release or expiry, whichever comes first.
    pub async fn wait(mut self) {
        let released = async {
            while !*self.released.borrow_and_update() {
                if self.released.changed().await.is_err() {
                    break;
                }
            }
        };
        if timeout_at(self.expires, released).await.is_err() {
            debug!("fetch lock wait timed out");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn second_caller_waits_for_release() {
        let lock = FetchLock::default();
        let Acquire::Held(guard) = lock.acquire(EntityKind::User, "U1") else {
            panic!("first acquire must hold");
        };
        let Acquire::Busy(waiter) = lock.acquire(EntityKind::User, "U1") else {
            panic!("second acquire must wait");
        };
        let started = Instant::now();
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(guard);
        });
        waiter.wait().await;
        assert_eq!(started.elapsed(), Duration::from_secs(2));
        release.await.unwrap();
        assert!(lock.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_give_up_at_expiry_and_take_over() {
        let lock = FetchLock::new(Duration::from_secs(60));
        let Acquire::Held(stale) = lock.acquire(EntityKind::Channel, "C1") else {
            panic!("first acquire must hold");
        };
        let Acquire::Busy(waiter) = lock.acquire(EntityKind::Channel, "C1") else {
            panic!("second acquire must wait");
        };
        let started = Instant::now();
        waiter.wait().await;
        assert_eq!(started.elapsed(), Duration::from_secs(60));

        let Acquire::Held(fresh) = lock.acquire(EntityKind::Channel, "C1") else {
            panic!("expired entry must be replaced");
        };
        assert_ne!(fresh.token(), stale.token());

        // The stale holder finishing late must not release the new entry.
        drop(stale);
        assert!(matches!(
            lock.acquire(EntityKind::Channel, "C1"),
            Acquire::Busy(_)
        ));
        drop(fresh);
        assert!(lock.is_empty());
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let lock = FetchLock::default();
        let _user = lock.acquire(EntityKind::User, "X1");
        assert!(matches!(
            lock.acquire(EntityKind::Bot, "X1"),
            Acquire::Held(_)
        ));
    }
}
