//! Slack Web API and event payload shapes.
//!
//! Only the fields the bridge reads are modelled. Conversions into the
//! `msp_core` entities pick display names and the best avatar here so the
//! rest of the bridge never sees raw Slack JSON.

use std::collections::HashMap;

use msp_core::{RemoteBot, RemoteChannel, RemoteTeam, RemoteUser, best_image};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity behind a token, as reported by `auth.test`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthIdentity {
    pub user_id: String,
    pub team_id: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub team: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usergroup {
    pub id: String,
    #[serde(default)]
    pub handle: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireUser {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub real_name: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub profile: WireProfile,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct WireProfile {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub real_name: String,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl From<WireUser> for RemoteUser {
    fn from(user: WireUser) -> Self {
        let avatar_url = best_image(string_entries(&user.profile.extra)).map(str::to_string);
        let real_name = if user.profile.real_name.is_empty() {
            user.real_name.unwrap_or_default()
        } else {
            user.profile.real_name
        };
        RemoteUser {
            id: user.id,
            name: user.name,
            display_name: user.profile.display_name,
            real_name,
            avatar_url,
            team_id: user.team_id,
            is_bot: user.is_bot,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireBot {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub icons: HashMap<String, Value>,
}

impl From<WireBot> for RemoteBot {
    fn from(bot: WireBot) -> Self {
        RemoteBot {
            avatar_url: best_image(string_entries(&bot.icons)).map(str::to_string),
            id: bot.id,
            name: bot.name,
            team_id: bot.team_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireChannel {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_im: bool,
    /// Peer of a direct message channel.
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub topic: Option<WireTopic>,
    #[serde(default)]
    pub context_team_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireTopic {
    #[serde(default)]
    pub value: String,
}

impl From<WireChannel> for RemoteChannel {
    fn from(channel: WireChannel) -> Self {
        // Direct messages carry neither name nor topic.
        if channel.is_im {
            return RemoteChannel {
                id: channel.id,
                name: None,
                topic: None,
                is_direct: true,
                dm_user: channel.user,
                team_id: channel.context_team_id,
            };
        }
        RemoteChannel {
            id: channel.id,
            name: channel.name,
            topic: channel
                .topic
                .map(|topic| topic.value)
                .filter(|topic| !topic.is_empty()),
            is_direct: false,
            dm_user: None,
            team_id: channel.context_team_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireTeam {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub icon: HashMap<String, Value>,
}

impl From<WireTeam> for RemoteTeam {
    fn from(team: WireTeam) -> Self {
        RemoteTeam {
            icon_url: best_image(string_entries(&team.icon)).map(str::to_string),
            id: team.id,
            name: team.name,
            channels: Vec::new(),
        }
    }
}

fn string_entries(map: &HashMap<String, Value>) -> impl Iterator<Item = (&str, &str)> {
    map.iter()
        .filter_map(|(key, value)| Some((key.as_str(), value.as_str()?)))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn user_projection_prefers_profile_fields() {
        let wire: WireUser = serde_json::from_value(json!({
            "id": "U1",
            "name": "ann",
            "real_name": "Ann Top",
            "team_id": "T1",
            "profile": {
                "display_name": "annie",
                "real_name": "Ann Profile",
                "image_48": "https://img/48",
                "image_original": "https://img/orig",
                "image_512": "https://img/512",
                "is_custom_image": true
            }
        }))
        .unwrap();
        let user = RemoteUser::from(wire);
        assert_eq!(user.display_name, "annie");
        assert_eq!(user.real_name, "Ann Profile");
        assert_eq!(user.avatar_url.as_deref(), Some("https://img/orig"));
        assert_eq!(user.team_id.as_deref(), Some("T1"));
    }

    #[test]
    fn direct_channels_drop_name_and_topic() {
        let wire: WireChannel = serde_json::from_value(json!({
            "id": "D1",
            "name": "ignored",
            "is_im": true,
            "user": "U2",
            "topic": { "value": "ignored" }
        }))
        .unwrap();
        let channel = RemoteChannel::from(wire);
        assert!(channel.is_direct);
        assert_eq!(channel.name, None);
        assert_eq!(channel.topic, None);
        assert_eq!(channel.dm_user.as_deref(), Some("U2"));
    }

    #[test]
    fn team_icon_skips_non_string_entries() {
        let wire: WireTeam = serde_json::from_value(json!({
            "id": "T1",
            "name": "Acme",
            "icon": { "image_default": true, "image_34": "small", "image_230": "large" }
        }))
        .unwrap();
        assert_eq!(RemoteTeam::from(wire).icon_url.as_deref(), Some("large"));
    }
}
