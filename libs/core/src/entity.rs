//! Remote entity records kept in the per-account cache.

use serde::{Deserialize, Serialize};

/// Kinds of remote entity the client caches and fetches on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    User,
    Bot,
    Channel,
    Team,
    Usergroup,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Bot => "bot",
            EntityKind::Channel => "channel",
            EntityKind::Team => "team",
            EntityKind::Usergroup => "usergroup",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUser {
    pub id: String,
    /// Account handle, unique within the team.
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub real_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
}

impl RemoteUser {
    /// Name shown to federated users: profile display name, then real name,
    /// then the handle.
    pub fn display(&self) -> &str {
        [&self.display_name, &self.real_name]
            .into_iter()
            .find(|candidate| !candidate.trim().is_empty())
            .map(String::as_str)
            .unwrap_or(&self.name)
    }

    pub fn matches(&self, key: &str) -> bool {
        self.id == key || self.name == key
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteBot {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
}

impl RemoteBot {
    /// Placeholder handed out when a bot cannot be fetched.
    pub fn unknown(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: "unknown".into(),
            ..Default::default()
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        self.id == key || self.name == key
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteChannel {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub is_direct: bool,
    /// Counterpart of a direct-message channel.
    #[serde(default)]
    pub dm_user: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
}

impl RemoteChannel {
    pub fn matches(&self, key: &str) -> bool {
        self.id == key || self.name.as_deref() == Some(key)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTeam {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub channels: Vec<String>,
}

/// Picks the highest resolution image among Slack's `image_*` keys.
///
/// `image_original` always wins, then the numerically largest size. Keys
/// that are neither sort last.
///
/// ```
/// use msp_core::best_image;
///
/// let images = [
///     ("image_48", "small"),
///     ("image_512", "large"),
///     ("image_192", "medium"),
/// ];
/// assert_eq!(best_image(images), Some("large"));
///
/// let with_original = [("image_1024", "big"), ("image_original", "orig")];
/// assert_eq!(best_image(with_original), Some("orig"));
/// ```
pub fn best_image<'a, I>(entries: I) -> Option<&'a str>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    entries
        .into_iter()
        .filter_map(|(key, value)| {
            let size = key.strip_prefix("image_")?;
            let rank = match size {
                "original" => (2, 0),
                numeric => match numeric.parse::<u64>() {
                    Ok(pixels) => (1, pixels),
                    Err(_) => (0, 0),
                },
            };
            Some((rank, value))
        })
        .fold(None, |best: Option<((u8, u64), &str)>, candidate| match best {
            Some(current) if current.0 >= candidate.0 => Some(current),
            _ => Some(candidate),
        })
        .map(|(_, value)| value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefers_profile_name() {
        let mut user = RemoteUser {
            id: "U1".into(),
            name: "ann.handle".into(),
            ..Default::default()
        };
        assert_eq!(user.display(), "ann.handle");
        user.real_name = "Ann Real".into();
        assert_eq!(user.display(), "Ann Real");
        user.display_name = "Ann".into();
        assert_eq!(user.display(), "Ann");
    }

    #[test]
    fn best_image_ignores_non_image_keys() {
        let entries = [("title", "x"), ("image_foo", "odd"), ("image_24", "tiny")];
        assert_eq!(best_image(entries), Some("tiny"));
        assert_eq!(best_image([("avatar_hash", "abc")]), None);
    }

    #[test]
    fn best_image_first_non_numeric_wins_ties() {
        let entries = [("image_a", "first"), ("image_b", "second")];
        assert_eq!(best_image(entries), Some("first"));
    }

    #[test]
    fn names_are_a_lookup_fallback() {
        let chan = RemoteChannel {
            id: "C1".into(),
            name: Some("general".into()),
            ..Default::default()
        };
        assert!(chan.matches("C1"));
        assert!(chan.matches("general"));
        assert!(!chan.matches("random"));
    }
}
