//! Entity creation, listing and account hooks the host framework calls.

use msp_core::{
    ListEntry, PuppetId, RemoteBot, RemoteGroupParams, RemoteRoomParams, RemoteUserParams,
    RoomRef, UserRef,
};

use crate::{
    error::BridgeError,
    orchestrator::Orchestrator,
    params::{bot_params, group_params, room_params, user_params},
};

impl Orchestrator {
    /// Full record for a Slack user or bot, `None` when Slack knows
    /// neither.
    pub async fn create_user(
        &self,
        user: &UserRef,
    ) -> Result<Option<RemoteUserParams>, BridgeError> {
        let client = self.client(user.puppet)?;
        if let Some(found) = client.get_user(&user.user_id).await {
            return Ok(Some(user_params(user.puppet, &found)));
        }
        let bot = client.get_bot(&user.user_id).await;
        if bot == RemoteBot::unknown(&user.user_id) {
            return Ok(None);
        }
        Ok(Some(bot_params(user.puppet, &bot)))
    }

    pub async fn create_room(
        &self,
        room: &RoomRef,
    ) -> Result<Option<RemoteRoomParams>, BridgeError> {
        let client = self.client(room.puppet)?;
        let Some(channel) = client.get_channel(&room.room_id).await else {
            return Ok(None);
        };
        let team = client.get_team().await;
        Ok(Some(room_params(room.puppet, &channel, team.as_ref())))
    }

    /// Space record for the account's team; other team ids are unknown.
    pub async fn create_group(
        &self,
        puppet: PuppetId,
        group_id: &str,
    ) -> Result<Option<RemoteGroupParams>, BridgeError> {
        let client = self.client(puppet)?;
        let Some(team) = client.get_team().await.filter(|team| team.id == group_id) else {
            return Ok(None);
        };
        let channels = client.list_channels().await;
        Ok(Some(group_params(puppet, &team, &channels)))
    }

    /// Opens (or returns) the direct message channel with `user`.
    pub async fn get_dm_room(&self, user: &UserRef) -> Result<String, BridgeError> {
        let client = self.client(user.puppet)?;
        Ok(client.open_dm(&user.user_id).await?)
    }

    pub async fn list_users(&self, puppet: PuppetId) -> Result<Vec<ListEntry>, BridgeError> {
        let client = self.client(puppet)?;
        Ok(client
            .list_users()
            .await
            .iter()
            .map(|user| ListEntry {
                id: user.id.clone(),
                name: user.display().to_string(),
            })
            .collect())
    }

    /// Shared channels only; direct messages are not listed.
    pub async fn list_rooms(&self, puppet: PuppetId) -> Result<Vec<ListEntry>, BridgeError> {
        let client = self.client(puppet)?;
        Ok(client
            .list_channels()
            .await
            .into_iter()
            .filter(|channel| !channel.is_direct)
            .map(|channel| ListEntry {
                name: channel.name.unwrap_or_else(|| channel.id.clone()),
                id: channel.id,
            })
            .collect())
    }

    pub async fn get_user_ids_in_room(&self, room: &RoomRef) -> Result<Vec<String>, BridgeError> {
        let client = self.client(room.puppet)?;
        Ok(client.channel_members(&room.room_id).await)
    }

    /// One-line account description, e.g. ``Slack on `Acme` as `ann` ``.
    pub fn describe(&self, puppet: PuppetId) -> Result<String, BridgeError> {
        let identity = self
            .client(puppet)?
            .identity()
            .ok_or(BridgeError::NotAuthenticated)?;
        Ok(format!("Slack on `{}` as `{}`", identity.team, identity.user))
    }

    /// Parses link data typed by a user into a Slack token.
    pub fn data_from_str(&self, input: &str) -> Result<String, BridgeError> {
        let token = input.trim();
        if !token.is_empty() {
            return Ok(token.to_string());
        }
        let mut hint = String::from("Please specify a token to link!");
        if let Some(url) = self.oauth.authorize_url() {
            hint.push_str(&format!("\nYou can get a token via OAuth from {url}"));
        }
        Err(BridgeError::Link(hint))
    }
}
