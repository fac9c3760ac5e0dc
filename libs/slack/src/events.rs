//! Slack event payloads mapped onto the closed [`TransportEvent`] set.
//!
//! Socket Mode and the Events API deliver the same inner `event` objects;
//! both transports funnel them through [`parse_event`].

use async_trait::async_trait;
use msp_core::{RemoteBot, RemoteChannel, RemoteMessage, RemoteUser, TransportError};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::wire::{AuthIdentity, WireBot, WireChannel, WireUser};

/// Opens one event stream for an authenticated account.
///
/// The stream yields [`TransportEvent::Ready`] once events flow and ends when
/// the connection is lost.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        identity: &AuthIdentity,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError>;
}

/// Everything a transport can report.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Transport is up and delivering events.
    Ready,
    Message(RemoteMessage),
    ChannelAdded(RemoteChannel),
    ChannelChanged(RemoteChannel),
    UserChanged(RemoteUser),
    BotChanged(RemoteBot),
    Typing {
        channel: String,
        user: String,
    },
    Presence {
        user: String,
        presence: String,
    },
    Reaction {
        added: bool,
        channel: String,
        user: String,
        item_ts: String,
        reaction: String,
    },
}

/// Maps one Slack event object. Unknown or malformed events yield `None`.
pub fn parse_event(event: &Value) -> Option<TransportEvent> {
    let kind = event.get("type").and_then(Value::as_str)?;
    match kind {
        "hello" => Some(TransportEvent::Ready),
        "message" => decode::<RemoteMessage>(kind, event).map(TransportEvent::Message),
        "channel_joined" | "group_joined" | "mpim_joined" | "channel_created" => {
            channel(kind, event).map(TransportEvent::ChannelAdded)
        }
        "im_created" => channel(kind, event).map(|mut channel| {
            channel.is_direct = true;
            channel.name = None;
            channel.topic = None;
            channel.dm_user = channel.dm_user.or_else(|| str_field(event, "user"));
            TransportEvent::ChannelAdded(channel)
        }),
        "channel_rename" | "group_rename" => {
            channel(kind, event).map(TransportEvent::ChannelChanged)
        }
        "team_join" | "user_change" => event
            .get("user")
            .and_then(|user| decode::<WireUser>(kind, user))
            .map(|user| TransportEvent::UserChanged(user.into())),
        "bot_added" | "bot_changed" => event
            .get("bot")
            .and_then(|bot| decode::<WireBot>(kind, bot))
            .map(|bot| TransportEvent::BotChanged(bot.into())),
        "user_typing" => Some(TransportEvent::Typing {
            channel: str_field(event, "channel")?,
            user: str_field(event, "user")?,
        }),
        "presence_change" => Some(TransportEvent::Presence {
            user: str_field(event, "user")?,
            presence: str_field(event, "presence")?,
        }),
        "reaction_added" | "reaction_removed" => {
            let item = event.get("item")?;
            Some(TransportEvent::Reaction {
                added: kind == "reaction_added",
                channel: str_field(item, "channel")?,
                user: str_field(event, "user")?,
                item_ts: str_field(item, "ts")?,
                reaction: str_field(event, "reaction")?,
            })
        }
        other => {
            debug!(event_type = other, "ignoring slack event");
            None
        }
    }
}

fn channel(kind: &str, event: &Value) -> Option<RemoteChannel> {
    match event.get("channel")? {
        // `channel_created` and friends carry an object, some carry an id.
        Value::String(id) => Some(RemoteChannel {
            id: id.clone(),
            ..Default::default()
        }),
        object => decode::<WireChannel>(kind, object).map(RemoteChannel::from),
    }
}

fn decode<T: serde::de::DeserializeOwned>(kind: &str, value: &Value) -> Option<T> {
    match serde_json::from_value(value.clone()) {
        Ok(decoded) => Some(decoded),
        Err(error) => {
            warn!(event_type = kind, %error, "malformed slack event");
            None
        }
    }
}

fn str_field(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn hello_signals_ready() {
        assert_eq!(
            parse_event(&json!({ "type": "hello" })),
            Some(TransportEvent::Ready)
        );
    }

    #[test]
    fn edits_keep_nested_payloads() {
        let event = parse_event(&json!({
            "type": "message",
            "subtype": "message_changed",
            "channel": "C1",
            "ts": "2.0",
            "message": { "user": "U1", "text": "new", "ts": "1.0" },
            "previous_message": { "user": "U1", "text": "old", "ts": "1.0" }
        }));
        let Some(TransportEvent::Message(message)) = event else {
            panic!("expected message, got {event:?}");
        };
        assert_eq!(message.sender(), Some("U1"));
        assert_eq!(message.message.unwrap().text.as_deref(), Some("new"));
    }

    #[test]
    fn reactions_flatten_item() {
        let event = parse_event(&json!({
            "type": "reaction_removed",
            "user": "U1",
            "reaction": "tada",
            "item": { "type": "message", "channel": "C1", "ts": "1.0" }
        }));
        assert_eq!(
            event,
            Some(TransportEvent::Reaction {
                added: false,
                channel: "C1".into(),
                user: "U1".into(),
                item_ts: "1.0".into(),
                reaction: "tada".into(),
            })
        );
    }

    #[test]
    fn renames_carry_partial_channels() {
        let event = parse_event(&json!({
            "type": "channel_rename",
            "channel": { "id": "C1", "name": "renamed", "created": 1 }
        }));
        let Some(TransportEvent::ChannelChanged(channel)) = event else {
            panic!("expected channel change");
        };
        assert_eq!(channel.name.as_deref(), Some("renamed"));
    }

    #[test]
    fn im_created_is_direct() {
        let event = parse_event(&json!({
            "type": "im_created",
            "user": "U2",
            "channel": { "id": "D1" }
        }));
        let Some(TransportEvent::ChannelAdded(channel)) = event else {
            panic!("expected channel added");
        };
        assert!(channel.is_direct);
        assert_eq!(channel.dm_user.as_deref(), Some("U2"));
    }

    #[test]
    fn unknown_and_incomplete_events_are_dropped() {
        assert_eq!(parse_event(&json!({ "type": "dnd_updated" })), None);
        assert_eq!(parse_event(&json!({ "type": "user_typing" })), None);
        assert_eq!(parse_event(&json!({ "no_type": true })), None);
    }
}
