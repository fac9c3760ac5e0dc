use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Identifier of one bridged Slack account (a "puppet").
///
/// ```
/// use msp_core::PuppetId;
///
/// assert_eq!(PuppetId(7).to_string(), "7");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PuppetId(pub u64);

impl Display for PuppetId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PuppetId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A Slack conversation as seen from one puppet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomRef {
    pub puppet: PuppetId,
    pub room_id: String,
}

impl RoomRef {
    pub fn new(puppet: PuppetId, room_id: impl Into<String>) -> Self {
        Self {
            puppet,
            room_id: room_id.into(),
        }
    }
}

/// A Slack user or bot as seen from one puppet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserRef {
    pub puppet: PuppetId,
    pub user_id: String,
}

impl UserRef {
    pub fn new(puppet: PuppetId, user_id: impl Into<String>) -> Self {
        Self {
            puppet,
            user_id: user_id.into(),
        }
    }
}

/// Routing information attached to every event delivered into Matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveParams {
    pub room: RoomRef,
    pub user: UserRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

/// Canonical message body pair understood by the federated side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_body: Option<String>,
    #[serde(default)]
    pub emote: bool,
}

impl CanonicalMessage {
    pub fn plain(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            formatted_body: None,
            emote: false,
        }
    }

    pub fn emote(body: impl Into<String>) -> Self {
        Self {
            emote: true,
            ..Self::plain(body)
        }
    }
}

/// Presence states the federated side distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Offline,
    Unavailable,
}

impl Presence {
    /// Maps a Slack presence string. Only `active` counts as online.
    ///
    /// ```
    /// use msp_core::Presence;
    ///
    /// assert_eq!(Presence::from_slack("active"), Presence::Online);
    /// assert_eq!(Presence::from_slack("away"), Presence::Offline);
    /// assert_eq!(Presence::from_slack("???"), Presence::Offline);
    /// ```
    pub fn from_slack(value: &str) -> Self {
        match value {
            "active" => Presence::Online,
            _ => Presence::Offline,
        }
    }
}

/// Entry returned by the listing hooks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    pub id: String,
    pub name: String,
}
