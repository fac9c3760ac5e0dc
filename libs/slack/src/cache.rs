//! Per-account Entity Cache.
//!
//! Lookups accept an id or a display name. Ids are authoritative; a name
//! lookup scans in insertion order and returns the first match.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use msp_core::{RemoteBot, RemoteChannel, RemoteTeam, RemoteUser};

use crate::wire::Usergroup;

trait Keyed {
    fn key(&self) -> &str;
    fn matches(&self, key: &str) -> bool;
}

impl Keyed for RemoteUser {
    fn key(&self) -> &str {
        &self.id
    }
    fn matches(&self, key: &str) -> bool {
        RemoteUser::matches(self, key)
    }
}

impl Keyed for RemoteBot {
    fn key(&self) -> &str {
        &self.id
    }
    fn matches(&self, key: &str) -> bool {
        RemoteBot::matches(self, key)
    }
}

impl Keyed for RemoteChannel {
    fn key(&self) -> &str {
        &self.id
    }
    fn matches(&self, key: &str) -> bool {
        RemoteChannel::matches(self, key)
    }
}

impl Keyed for Usergroup {
    fn key(&self) -> &str {
        &self.id
    }
    fn matches(&self, key: &str) -> bool {
        self.id == key || self.handle == key
    }
}

struct Table<T> {
    rows: RwLock<Rows<T>>,
}

struct Rows<T> {
    by_id: HashMap<String, T>,
    order: Vec<String>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: RwLock::new(Rows {
                by_id: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }
}

impl<T: Keyed + Clone> Table<T> {
    fn get(&self, key: &str) -> Option<T> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(row) = rows.by_id.get(key) {
            return Some(row.clone());
        }
        rows.order
            .iter()
            .filter_map(|id| rows.by_id.get(id))
            .find(|row| row.matches(key))
            .cloned()
    }

    fn upsert(&self, row: T) {
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        let id = row.key().to_string();
        if rows.by_id.insert(id.clone(), row).is_none() {
            rows.order.push(id);
        }
    }

    fn all(&self) -> Vec<T> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        rows.order
            .iter()
            .filter_map(|id| rows.by_id.get(id))
            .cloned()
            .collect()
    }

    fn is_empty(&self) -> bool {
        self.rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .is_empty()
    }
}

#[derive(Default)]
pub struct EntityCache {
    users: Table<RemoteUser>,
    bots: Table<RemoteBot>,
    channels: Table<RemoteChannel>,
    usergroups: Table<Usergroup>,
    team: RwLock<Option<RemoteTeam>>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(&self, key: &str) -> Option<RemoteUser> {
        self.users.get(key)
    }

    pub fn upsert_user(&self, user: RemoteUser) {
        self.users.upsert(user);
    }

    pub fn users(&self) -> Vec<RemoteUser> {
        self.users.all()
    }

    pub fn bot(&self, key: &str) -> Option<RemoteBot> {
        self.bots.get(key)
    }

    pub fn upsert_bot(&self, bot: RemoteBot) {
        self.bots.upsert(bot);
    }

    pub fn channel(&self, key: &str) -> Option<RemoteChannel> {
        self.channels.get(key)
    }

    pub fn upsert_channel(&self, channel: RemoteChannel) {
        self.channels.upsert(channel);
    }

    /// Applies a partial channel update (renames carry only id and name).
    pub fn merge_channel(&self, update: RemoteChannel) -> RemoteChannel {
        let merged = match self.channels.get(&update.id) {
            Some(mut existing) => {
                if update.name.is_some() {
                    existing.name = update.name;
                }
                if update.topic.is_some() {
                    existing.topic = update.topic;
                }
                if update.team_id.is_some() {
                    existing.team_id = update.team_id;
                }
                existing
            }
            None => update,
        };
        self.channels.upsert(merged.clone());
        merged
    }

    pub fn channels(&self) -> Vec<RemoteChannel> {
        self.channels.all()
    }

    pub fn usergroup(&self, key: &str) -> Option<Usergroup> {
        self.usergroups.get(key)
    }

    pub fn set_usergroups(&self, groups: Vec<Usergroup>) {
        for group in groups {
            self.usergroups.upsert(group);
        }
    }

    pub fn team(&self) -> Option<RemoteTeam> {
        self.team
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_team(&self, team: RemoteTeam) {
        *self.team.write().unwrap_or_else(PoisonError::into_inner) = Some(team);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, name: &str) -> RemoteUser {
        RemoteUser {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    #[test]
    fn id_lookup_wins_over_name() {
        let cache = EntityCache::new();
        cache.upsert_user(user("U1", "U2"));
        cache.upsert_user(user("U2", "bob"));
        assert_eq!(cache.user("U2").unwrap().name, "bob");
    }

    #[test]
    fn name_lookup_returns_first_inserted_match() {
        let cache = EntityCache::new();
        cache.upsert_user(user("U1", "sam"));
        cache.upsert_user(user("U2", "sam"));
        cache.upsert_user(user("U1", "sam"));
        assert_eq!(cache.user("sam").unwrap().id, "U1");
        assert_eq!(cache.users().len(), 2);
    }

    #[test]
    fn renames_merge_into_existing_channel() {
        let cache = EntityCache::new();
        cache.upsert_channel(RemoteChannel {
            id: "C1".into(),
            name: Some("old".into()),
            topic: Some("topic".into()),
            ..Default::default()
        });
        let merged = cache.merge_channel(RemoteChannel {
            id: "C1".into(),
            name: Some("new".into()),
            ..Default::default()
        });
        assert_eq!(merged.name.as_deref(), Some("new"));
        assert_eq!(merged.topic.as_deref(), Some("topic"));
        assert_eq!(cache.channel("new").unwrap().id, "C1");
    }
}
