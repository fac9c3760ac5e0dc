//! Matrix-to-Slack handlers called by the host framework.
//!
//! Every send follows the same shape: format, lock the conversation in the
//! [`Deduplicator`](msp_idempotency::Deduplicator), call Slack, unlock with
//! the returned id, then record the id correlation with the host.

use bytes::Bytes;
use msp_core::{MatrixFile, MatrixMessage, PuppetId, RoomRef, SELF_SENT_MARKER};
use msp_idempotency::{DedupeKey, file_fingerprint, reaction_fingerprint};
use msp_slack::{FileUpload, PostMessage, RemoteClient};
use msp_telemetry::{Direction, record_bridged};
use msp_translator::{emoji, format_outbound};
use tracing::instrument;

use crate::{error::BridgeError, orchestrator::Orchestrator, resolve::HostMentions};

impl Orchestrator {
    /// Posts a Matrix message; returns the Slack `ts`.
    #[instrument(skip_all, fields(puppet = %room.puppet, room = %room.room_id, event_id = %msg.event_id))]
    pub async fn handle_matrix_message(
        &self,
        room: &RoomRef,
        msg: &MatrixMessage,
    ) -> Result<String, BridgeError> {
        self.post(room, msg, None).await
    }

    /// Posts a reply under the Slack thread root of `replied_to`, a remote
    /// event id. Slack threads are one level deep, so replies to replies
    /// attach to the root.
    #[instrument(skip_all, fields(puppet = %room.puppet, room = %room.room_id, event_id = %msg.event_id))]
    pub async fn handle_matrix_reply(
        &self,
        room: &RoomRef,
        msg: &MatrixMessage,
        replied_to: &str,
    ) -> Result<String, BridgeError> {
        let root = self
            .threads
            .resolve_root(replied_to)
            .await
            .map_err(BridgeError::Store)?;
        let ts = self.post(room, msg, Some(root.root.clone())).await?;
        self.threads
            .link(&ts, replied_to)
            .await
            .map_err(BridgeError::Store)?;
        self.threads
            .record_latest(&root.root, &ts)
            .await
            .map_err(BridgeError::Store)?;
        Ok(ts)
    }

    #[instrument(skip_all, fields(puppet = %room.puppet, room = %room.room_id, event_id = %msg.event_id))]
    pub async fn handle_matrix_edit(
        &self,
        room: &RoomRef,
        remote_event_id: &str,
        msg: &MatrixMessage,
    ) -> Result<(), BridgeError> {
        let (client, sender) = self.sender(room.puppet)?;
        let text = self.render(room.puppet, msg).await;
        let key = DedupeKey::new(room.puppet, &room.room_id);
        self.dedupe.lock(&key, &sender, &text).await;
        let edited = client.edit_message(&room.room_id, remote_event_id, &text).await;
        self.dedupe.unlock(&key, edited.as_deref().ok()).await;
        let ts = edited?;
        self.record(room.puppet, &msg.event_id, &ts).await?;
        record_bridged(Direction::Outbound, "edit");
        Ok(())
    }

    #[instrument(skip_all, fields(puppet = %room.puppet, room = %room.room_id))]
    pub async fn handle_matrix_redact(
        &self,
        room: &RoomRef,
        remote_event_id: &str,
    ) -> Result<(), BridgeError> {
        let (client, sender) = self.sender(room.puppet)?;
        let key = DedupeKey::new(room.puppet, &room.room_id);
        self.dedupe
            .lock(&key, &sender, &format!("delete:{remote_event_id}"))
            .await;
        let deleted = client.delete_message(&room.room_id, remote_event_id).await;
        self.dedupe
            .unlock(&key, deleted.is_ok().then_some(remote_event_id))
            .await;
        deleted?;
        self.threads
            .forget(remote_event_id)
            .await
            .map_err(BridgeError::Store)?;
        record_bridged(Direction::Outbound, "redact");
        Ok(())
    }

    /// Adds a reaction; `key` is the Matrix reaction key, usually an emoji.
    #[instrument(skip_all, fields(puppet = %room.puppet, room = %room.room_id))]
    pub async fn handle_matrix_reaction(
        &self,
        room: &RoomRef,
        remote_event_id: &str,
        key: &str,
    ) -> Result<(), BridgeError> {
        self.react(room, remote_event_id, key, true).await
    }

    #[instrument(skip_all, fields(puppet = %room.puppet, room = %room.room_id))]
    pub async fn handle_matrix_remove_reaction(
        &self,
        room: &RoomRef,
        remote_event_id: &str,
        key: &str,
    ) -> Result<(), BridgeError> {
        self.react(room, remote_event_id, key, false).await
    }

    /// Uploads a Matrix attachment; returns the Slack file id.
    #[instrument(skip_all, fields(puppet = %room.puppet, room = %room.room_id, event_id = %file.event_id))]
    pub async fn handle_matrix_file(
        &self,
        room: &RoomRef,
        file: &MatrixFile,
    ) -> Result<String, BridgeError> {
        let (client, sender) = self.sender(room.puppet)?;
        let data: Bytes = self
            .host
            .download_media(&file.url)
            .await
            .map_err(BridgeError::Host)?;
        let key = DedupeKey::new(room.puppet, &room.room_id);
        self.dedupe
            .lock(&key, &sender, &file_fingerprint(&file.filename))
            .await;
        let upload = FileUpload {
            channel: room.room_id.clone(),
            filename: file.filename.clone(),
            title: Some(format!("{SELF_SENT_MARKER}{}", file.filename)),
            thread_ts: None,
            data,
        };
        let uploaded = client.send_file_message(&upload).await;
        self.dedupe.unlock(&key, uploaded.as_deref().ok()).await;
        let file_id = uploaded?;
        self.record(room.puppet, &file.event_id, &file_id).await?;
        record_bridged(Direction::Outbound, "file");
        Ok(file_id)
    }

    async fn post(
        &self,
        room: &RoomRef,
        msg: &MatrixMessage,
        thread_ts: Option<String>,
    ) -> Result<String, BridgeError> {
        let (client, sender) = self.sender(room.puppet)?;
        let text = self.render(room.puppet, msg).await;
        let key = DedupeKey::new(room.puppet, &room.room_id);
        self.dedupe.lock(&key, &sender, &text).await;
        let posted = client
            .send_message(&PostMessage {
                channel: room.room_id.clone(),
                text,
                thread_ts,
                emote: msg.emote,
            })
            .await;
        self.dedupe.unlock(&key, posted.as_deref().ok()).await;
        let ts = posted?;
        self.record(room.puppet, &msg.event_id, &ts).await?;
        record_bridged(Direction::Outbound, "message");
        Ok(ts)
    }

    async fn react(
        &self,
        room: &RoomRef,
        remote_event_id: &str,
        key: &str,
        add: bool,
    ) -> Result<(), BridgeError> {
        let (client, sender) = self.sender(room.puppet)?;
        let name = emoji::to_shortcode(key);
        let dedupe_key = DedupeKey::new(room.puppet, &room.room_id);
        self.dedupe
            .lock(&dedupe_key, &sender, &reaction_fingerprint(&name))
            .await;
        let reacted = if add {
            client
                .send_reaction(&room.room_id, remote_event_id, &name)
                .await
        } else {
            client
                .remove_reaction(&room.room_id, remote_event_id, &name)
                .await
        };
        self.dedupe
            .unlock(&dedupe_key, reacted.is_ok().then_some(remote_event_id))
            .await;
        reacted?;
        record_bridged(Direction::Outbound, "reaction");
        Ok(())
    }

    async fn render(&self, puppet: PuppetId, msg: &MatrixMessage) -> String {
        let mentions = HostMentions {
            host: self.host.as_ref(),
        };
        format_outbound(puppet, &msg.body, msg.formatted_body.as_deref(), &mentions).await
    }

    /// Client and Slack user id of an authenticated session.
    fn sender(&self, puppet: PuppetId) -> Result<(RemoteClient, String), BridgeError> {
        let client = self.client(puppet)?;
        let sender = client.self_id().ok_or(BridgeError::NotAuthenticated)?;
        Ok((client, sender))
    }

    async fn record(&self, puppet: PuppetId, local: &str, remote: &str) -> Result<(), BridgeError> {
        self.host
            .record_event(puppet, local, remote)
            .await
            .map_err(BridgeError::Host)
    }
}
