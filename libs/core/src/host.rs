//! Contracts between the bridge and the host puppet framework.
//!
//! The host owns Matrix-side rooms, ghosts, and media. The bridge calls into
//! it through [`HostBridge`]; the host calls back into the orchestrator with
//! the `Matrix*` payloads defined here.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{CanonicalMessage, Presence, PuppetId, ReceiveParams, RoomRef, UserRef};

/// Shared host handle used across sessions.
pub type SharedHost = Arc<dyn HostBridge>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MentionKind {
    User,
    Room,
}

/// A federated identifier resolved back to the remote entity it mirrors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionTarget {
    pub puppet: PuppetId,
    pub kind: MentionKind,
    pub remote_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUserParams {
    pub user: UserRef,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRoomParams {
    pub room: RoomRef,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub is_direct: bool,
    #[serde(default)]
    pub group_id: Option<String>,
}

/// Description of a Slack team, bridged as a federated space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteGroupParams {
    pub puppet: PuppetId,
    pub group_id: String,
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub room_ids: Vec<String>,
}

/// Message sent by a Matrix user into a bridged room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixMessage {
    pub event_id: String,
    pub body: String,
    #[serde(default)]
    pub formatted_body: Option<String>,
    #[serde(default)]
    pub emote: bool,
}

/// File sent by a Matrix user; `url` is an HTTP URL the bridge can fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixFile {
    pub event_id: String,
    pub url: String,
    pub filename: String,
}

#[async_trait]
pub trait HostBridge: Send + Sync {
    /// Resolves a federated user or room id to the remote entity it mirrors,
    /// or `None` when it does not belong to this bridge.
    async fn mention_target(&self, federated_id: &str) -> Result<Option<MentionTarget>>;
    /// Returns (creating on demand) the federated id mirroring a remote user.
    async fn mxid_for_user(&self, user: &UserRef) -> Result<String>;
    /// Returns the federated room mirroring a remote channel, if one exists.
    async fn mxid_for_room(&self, room: &RoomRef) -> Result<Option<String>>;

    async fn send_message(&self, params: &ReceiveParams, msg: CanonicalMessage) -> Result<()>;
    async fn send_reply(
        &self,
        params: &ReceiveParams,
        in_reply_to: &str,
        msg: CanonicalMessage,
    ) -> Result<()>;
    async fn send_edit(
        &self,
        params: &ReceiveParams,
        original_event_id: &str,
        msg: CanonicalMessage,
    ) -> Result<()>;
    async fn send_redact(&self, params: &ReceiveParams, event_id: &str) -> Result<()>;
    async fn send_reaction(&self, params: &ReceiveParams, event_id: &str, key: &str)
    -> Result<()>;
    async fn remove_reaction(
        &self,
        params: &ReceiveParams,
        event_id: &str,
        key: &str,
    ) -> Result<()>;
    async fn send_file(&self, params: &ReceiveParams, data: Bytes, filename: &str) -> Result<()>;

    async fn update_user(&self, user: RemoteUserParams) -> Result<()>;
    async fn update_room(&self, room: RemoteRoomParams) -> Result<()>;
    async fn update_group(&self, group: RemoteGroupParams) -> Result<()>;
    async fn set_typing(&self, params: &ReceiveParams, typing: bool) -> Result<()>;
    async fn set_presence(&self, user: &UserRef, presence: Presence) -> Result<()>;

    /// Records that `local_event_id` was bridged as `remote_event_id`.
    async fn record_event(
        &self,
        puppet: PuppetId,
        local_event_id: &str,
        remote_event_id: &str,
    ) -> Result<()>;
    async fn set_remote_user_id(&self, puppet: PuppetId, remote_user_id: &str) -> Result<()>;
    /// Posts a status line to the owner of `puppet`.
    async fn send_status(&self, puppet: PuppetId, text: &str) -> Result<()>;

    /// Fetches a federated media URL a Matrix user attached to a message.
    async fn download_media(&self, url: &str) -> Result<Bytes>;
    /// Stores `data` in federated media storage and returns its content URI.
    async fn upload_media(
        &self,
        data: Bytes,
        filename: &str,
        mimetype: Option<&str>,
    ) -> Result<String>;
}
