//! Projections of cached Slack entities onto host framework parameters.

use msp_core::{
    PuppetId, ReceiveParams, RemoteBot, RemoteChannel, RemoteGroupParams, RemoteMessage,
    RemoteRoomParams, RemoteTeam, RemoteUser, RemoteUserParams, RoomRef, UserRef,
};

pub fn user_params(puppet: PuppetId, user: &RemoteUser) -> RemoteUserParams {
    RemoteUserParams {
        user: UserRef::new(puppet, &user.id),
        name: Some(user.display().to_string()),
        avatar_url: user.avatar_url.clone(),
    }
}

pub fn bot_params(puppet: PuppetId, bot: &RemoteBot) -> RemoteUserParams {
    RemoteUserParams {
        user: UserRef::new(puppet, &bot.id),
        name: Some(bot.name.clone()),
        avatar_url: bot.avatar_url.clone(),
    }
}

/// Direct messages carry nothing but the flag; channels are named
/// `"<name> - <team>"` and take the team icon.
pub fn room_params(
    puppet: PuppetId,
    channel: &RemoteChannel,
    team: Option<&RemoteTeam>,
) -> RemoteRoomParams {
    let room = RoomRef::new(puppet, &channel.id);
    if channel.is_direct {
        return RemoteRoomParams {
            room,
            name: None,
            topic: None,
            avatar_url: None,
            is_direct: true,
            group_id: None,
        };
    }
    let name = match (channel.name.as_deref(), team) {
        (Some(name), Some(team)) => Some(format!("{name} - {}", team.name)),
        (name, _) => name.map(str::to_string),
    };
    RemoteRoomParams {
        room,
        name,
        topic: channel.topic.clone(),
        avatar_url: team.and_then(|team| team.icon_url.clone()),
        is_direct: false,
        group_id: team
            .map(|team| team.id.clone())
            .or_else(|| channel.team_id.clone()),
    }
}

pub fn group_params(
    puppet: PuppetId,
    team: &RemoteTeam,
    channels: &[RemoteChannel],
) -> RemoteGroupParams {
    RemoteGroupParams {
        puppet,
        group_id: team.id.clone(),
        name: team.name.clone(),
        avatar_url: team.icon_url.clone(),
        room_ids: channels
            .iter()
            .filter(|channel| !channel.is_direct)
            .map(|channel| channel.id.clone())
            .collect(),
    }
}

/// Routing for an inbound message, falling back to the nested edit
/// payloads for sender and event id.
pub fn receive_params(puppet: PuppetId, message: &RemoteMessage) -> Option<ReceiveParams> {
    let sender = message.sender()?;
    Some(ReceiveParams {
        room: RoomRef::new(puppet, &message.channel),
        user: UserRef::new(puppet, sender),
        event_id: message.event_id().map(str::to_string),
    })
}
