//! Per-puppet lifecycle and the Slack-to-Matrix event path.
//!
//! The [`Orchestrator`] owns one [`PuppetSession`] per linked account. Each
//! session holds the account's [`RemoteClient`] and a pump task draining
//! that client's [`ClientEvent`] channel in order. Matrix-side handlers and
//! host hooks are further `impl` blocks in sibling modules.

use std::sync::{Arc, Weak};

use anyhow::{Context, Result};
use dashmap::DashMap;
use msp_core::{
    CanonicalMessage, MessageKind, PuppetId, ReceiveParams, RemoteFile, RemoteMessage, RoomRef,
    SharedHost, UserRef,
};
use msp_idempotency::{DedupeKey, Deduplicator, file_fingerprint, reaction_fingerprint};
use msp_session::{
    SharedThreadStore, SharedTokenStore, ThreadTracker, TokenRecord, stores_from_path,
};
use msp_slack::{AuthIdentity, ClientEvent, RemoteClient, WebhookHub};
use msp_telemetry::{Direction, record_bridged};
use msp_translator::{emoji, format_inbound, is_noop_edit};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, instrument, warn};

use crate::{
    config::{BridgeConfig, OAuthConfig},
    error::BridgeError,
    factory::{ClientFactory, SlackClientFactory},
    params::{bot_params, group_params, receive_params, room_params, user_params},
    resolve::InboundResolver,
};

/// One linked Slack account.
pub(crate) struct PuppetSession {
    pub(crate) client: RemoteClient,
    pub(crate) token: String,
    pump: JoinHandle<()>,
}

impl Drop for PuppetSession {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

pub struct Orchestrator {
    pub(crate) host: SharedHost,
    factory: Arc<dyn ClientFactory>,
    pub(crate) sessions: DashMap<PuppetId, PuppetSession>,
    pub(crate) dedupe: Deduplicator,
    pub(crate) threads: ThreadTracker,
    tokens: SharedTokenStore,
    pub(crate) oauth: OAuthConfig,
}

impl Orchestrator {
    pub fn new(
        host: SharedHost,
        factory: Arc<dyn ClientFactory>,
        thread_store: SharedThreadStore,
        tokens: SharedTokenStore,
        oauth: OAuthConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            host,
            factory,
            sessions: DashMap::new(),
            dedupe: Deduplicator::new(),
            threads: ThreadTracker::new(thread_store),
            tokens,
            oauth,
        })
    }

    /// Production wiring for `config`: Slack over the configured transport
    /// and the stores at `store.path`. The hub is returned when the webhook
    /// transport is selected and its router has to be served.
    pub fn from_config(
        host: SharedHost,
        config: &BridgeConfig,
    ) -> Result<(Arc<Self>, Option<Arc<WebhookHub>>)> {
        let (factory, hub) = SlackClientFactory::from_config(config);
        let (threads, tokens) = stores_from_path(config.store.path.as_deref())?;
        let bridge = Self::new(host, Arc::new(factory), threads, tokens, config.oauth.clone());
        Ok((bridge, hub))
    }

    pub fn host(&self) -> &SharedHost {
        &self.host
    }

    /// Puppets with a live session, in no particular order.
    pub fn puppets(&self) -> Vec<PuppetId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn client(&self, puppet: PuppetId) -> Result<RemoteClient, BridgeError> {
        self.sessions
            .get(&puppet)
            .map(|session| session.client.clone())
            .ok_or(BridgeError::UnknownPuppet(puppet))
    }

    /// Links an account: replaces any existing session for `puppet`, then
    /// connects.
    #[instrument(skip_all, fields(puppet = %puppet))]
    pub async fn new_puppet(
        self: &Arc<Self>,
        puppet: PuppetId,
        token: &str,
    ) -> Result<AuthIdentity, BridgeError> {
        if let Some((_, previous)) = self.sessions.remove(&puppet) {
            info!("replacing existing slack session");
            previous.client.disconnect();
        }
        let (client, events) = self.factory.create(puppet, token);
        let pump = self.spawn_pump(puppet, events);
        self.sessions.insert(
            puppet,
            PuppetSession {
                client,
                token: token.to_string(),
                pump,
            },
        );
        self.start_client(puppet).await
    }

    /// Connects (or reconnects) an existing session. Failures are reported
    /// to the account owner before being returned.
    pub async fn start_client(&self, puppet: PuppetId) -> Result<AuthIdentity, BridgeError> {
        let client = self.client(puppet)?;
        match client.connect().await {
            Ok(identity) => {
                info!(%puppet, team = %identity.team_id, user = %identity.user_id, "slack session connected");
                Ok(identity)
            }
            Err(err) => {
                warn!(%puppet, code = err.code(), error = %err, "slack connect failed");
                self.status(puppet, &format!("Failed to connect to Slack: {err}"))
                    .await;
                Err(err.into())
            }
        }
    }

    /// Stops the client without forgetting the account.
    pub fn stop_client(&self, puppet: PuppetId) -> Result<(), BridgeError> {
        self.client(puppet)?.disconnect();
        Ok(())
    }

    /// Unlinks an account: disconnects, drops in-memory state and the
    /// stored token.
    #[instrument(skip_all, fields(puppet = %puppet))]
    pub async fn delete_puppet(&self, puppet: PuppetId) -> Result<(), BridgeError> {
        let (_, session) = self
            .sessions
            .remove(&puppet)
            .ok_or(BridgeError::UnknownPuppet(puppet))?;
        session.client.disconnect();
        drop(session);
        self.dedupe.forget_puppet(puppet).await;
        self.tokens
            .delete(puppet)
            .await
            .map_err(BridgeError::Store)?;
        info!("slack session removed");
        Ok(())
    }

    fn spawn_pump(
        self: &Arc<Self>,
        puppet: PuppetId,
        mut events: mpsc::UnboundedReceiver<ClientEvent>,
    ) -> JoinHandle<()> {
        let this: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(this) = this.upgrade() else {
                    break;
                };
                this.handle_client_event(puppet, event).await;
            }
            debug!(%puppet, "client event stream closed");
        })
    }

    async fn handle_client_event(&self, puppet: PuppetId, event: ClientEvent) {
        let Ok(client) = self.client(puppet) else {
            debug!(%puppet, "event for a removed session dropped");
            return;
        };
        let kind = event_kind(&event);
        if let Err(err) = self.dispatch(&client, event).await {
            warn!(%puppet, kind, error = %format!("{err:#}"), "client event handling failed");
        }
    }

    async fn dispatch(&self, client: &RemoteClient, event: ClientEvent) -> Result<()> {
        let puppet = client.puppet();
        match event {
            ClientEvent::Authenticated(identity) => self.on_authenticated(puppet, identity).await,
            ClientEvent::ConnectionLost => {
                self.status(puppet, "Lost connection to Slack, a reconnect is scheduled")
                    .await;
                Ok(())
            }
            ClientEvent::Reconnected => {
                self.status(puppet, "Reconnected to Slack").await;
                Ok(())
            }
            ClientEvent::ReconnectFailed(reason) => {
                self.status(puppet, &format!("Failed to reconnect to Slack: {reason}"))
                    .await;
                Ok(())
            }
            ClientEvent::Message(message) => self.on_message(client, message).await,
            ClientEvent::MessageChanged(message) => self.on_edit(client, message).await,
            ClientEvent::MessageDeleted(message) => self.on_delete(client, message).await,
            ClientEvent::UserUpdated(user) => {
                self.host.update_user(user_params(puppet, &user)).await
            }
            ClientEvent::BotUpdated(bot) => self.host.update_user(bot_params(puppet, &bot)).await,
            ClientEvent::ChannelAdded(channel) | ClientEvent::ChannelUpdated(channel) => {
                let team = client.get_team().await;
                self.host
                    .update_room(room_params(puppet, &channel, team.as_ref()))
                    .await
            }
            ClientEvent::TeamUpdated(team) => {
                let channels = client.cache().channels();
                self.host
                    .update_group(group_params(puppet, &team, &channels))
                    .await
            }
            ClientEvent::Typing { channel, user } => {
                let params = ReceiveParams {
                    room: RoomRef::new(puppet, channel),
                    user: UserRef::new(puppet, user),
                    event_id: None,
                };
                self.host.set_typing(&params, true).await
            }
            ClientEvent::Presence { user, presence } => {
                self.host
                    .set_presence(&UserRef::new(puppet, user), presence)
                    .await
            }
            ClientEvent::Reaction {
                added,
                channel,
                user,
                item_ts,
                reaction,
            } => {
                let key = DedupeKey::new(puppet, &channel);
                let fingerprint = reaction_fingerprint(&reaction);
                if self
                    .dedupe
                    .dedupe(&key, &user, Some(&item_ts), Some(&fingerprint))
                    .await
                {
                    return Ok(());
                }
                let params = ReceiveParams {
                    room: RoomRef::new(puppet, channel),
                    user: UserRef::new(puppet, user),
                    event_id: Some(item_ts.clone()),
                };
                let unicode = emoji::to_unicode(&reaction);
                if added {
                    self.host.send_reaction(&params, &item_ts, &unicode).await?;
                } else {
                    self.host.remove_reaction(&params, &item_ts, &unicode).await?;
                }
                record_bridged(Direction::Inbound, "reaction");
                Ok(())
            }
        }
    }

    async fn on_authenticated(&self, puppet: PuppetId, identity: AuthIdentity) -> Result<()> {
        let token = self
            .sessions
            .get(&puppet)
            .map(|session| session.token.clone())
            .unwrap_or_default();
        self.tokens
            .save(TokenRecord {
                puppet,
                token,
                team_id: identity.team_id.clone(),
                user_id: identity.user_id.clone(),
            })
            .await
            .context("saving slack token")?;
        self.host
            .set_remote_user_id(puppet, &identity.user_id)
            .await
    }

    #[instrument(skip_all, fields(puppet = %client.puppet(), room = %message.channel, event_id = ?message.ts))]
    async fn on_message(&self, client: &RemoteClient, message: RemoteMessage) -> Result<()> {
        let puppet = client.puppet();
        let Some(params) = receive_params(puppet, &message) else {
            debug!("message without a sender dropped");
            return Ok(());
        };
        let key = DedupeKey::new(puppet, &message.channel);
        let sender = params.user.user_id.clone();
        if self
            .dedupe
            .dedupe(&key, &sender, message.event_id(), message.text.as_deref())
            .await
        {
            return Ok(());
        }

        if message.is_self_sent() {
            debug!("self-sent text skipped");
        } else {
            let content = message.content();
            if !content.is_empty() {
                let resolver = InboundResolver {
                    puppet,
                    client,
                    host: self.host.as_ref(),
                };
                let formatted = format_inbound(puppet, &content, &resolver).await;
                let emote = message.kind() == MessageKind::Emote;
                self.deliver(&params, &message, formatted.into_message(emote))
                    .await?;
                record_bridged(Direction::Inbound, "message");
            }
        }

        for file in &message.files {
            self.on_file(client, &params, &key, file).await?;
        }
        Ok(())
    }

    /// Plain send, or a reply when the message sits in a thread.
    async fn deliver(
        &self,
        params: &ReceiveParams,
        message: &RemoteMessage,
        msg: CanonicalMessage,
    ) -> Result<()> {
        match (message.thread_root(), message.event_id()) {
            (Some(root), Some(ts)) => {
                self.threads.link(ts, root).await?;
                let target = self.threads.reply_target(root).await?;
                self.threads.record_latest(root, ts).await?;
                self.host.send_reply(params, &target, msg).await
            }
            _ => self.host.send_message(params, msg).await,
        }
    }

    async fn on_file(
        &self,
        client: &RemoteClient,
        params: &ReceiveParams,
        key: &DedupeKey,
        file: &RemoteFile,
    ) -> Result<()> {
        let fingerprint = file_fingerprint(&file.name);
        if self
            .dedupe
            .dedupe(key, &params.user.user_id, Some(&file.id), Some(&fingerprint))
            .await
            || file.is_self_sent()
        {
            return Ok(());
        }
        let Some(url) = file.url_private.as_deref() else {
            debug!(file = %file.id, "file without a download url skipped");
            return Ok(());
        };
        match client.download_file(url).await {
            Ok(data) => self.host.send_file(params, data, &file.name).await?,
            Err(err) => {
                warn!(file = %file.id, error = %err, "file download failed, sending link");
                self.host
                    .send_message(params, CanonicalMessage::emote(format!("sent a file: {url}")))
                    .await?;
            }
        }
        record_bridged(Direction::Inbound, "file");
        Ok(())
    }

    async fn on_edit(&self, client: &RemoteClient, message: RemoteMessage) -> Result<()> {
        let puppet = client.puppet();
        let (Some(current), Some(previous)) = (
            message.message.as_deref(),
            message.previous_message.as_deref(),
        ) else {
            debug!(room = %message.channel, "edit without both revisions dropped");
            return Ok(());
        };
        if is_noop_edit(previous.text.as_deref(), current.text.as_deref()) {
            debug!(room = %message.channel, "no-op edit dropped");
            return Ok(());
        }
        let Some(params) = receive_params(puppet, &message) else {
            return Ok(());
        };
        let key = DedupeKey::new(puppet, &message.channel);
        if self
            .dedupe
            .dedupe(
                &key,
                &params.user.user_id,
                current.ts.as_deref(),
                current.text.as_deref(),
            )
            .await
        {
            return Ok(());
        }
        let Some(original) = previous.ts.as_deref().or(current.ts.as_deref()) else {
            return Ok(());
        };
        let resolver = InboundResolver {
            puppet,
            client,
            host: self.host.as_ref(),
        };
        let formatted = format_inbound(puppet, &current.content(), &resolver).await;
        self.host
            .send_edit(&params, original, formatted.into_message(false))
            .await?;
        record_bridged(Direction::Inbound, "edit");
        Ok(())
    }

    async fn on_delete(&self, client: &RemoteClient, message: RemoteMessage) -> Result<()> {
        let puppet = client.puppet();
        let Some(deleted) = message
            .previous_message
            .as_deref()
            .and_then(|previous| previous.ts.clone())
        else {
            debug!(room = %message.channel, "delete without a target dropped");
            return Ok(());
        };
        let Some(params) = receive_params(puppet, &message) else {
            return Ok(());
        };
        let key = DedupeKey::new(puppet, &message.channel);
        if self
            .dedupe
            .dedupe(&key, &params.user.user_id, Some(&deleted), None)
            .await
        {
            return Ok(());
        }
        self.host.send_redact(&params, &deleted).await?;
        self.threads.forget(&deleted).await?;
        record_bridged(Direction::Inbound, "redact");
        Ok(())
    }

    pub(crate) async fn status(&self, puppet: PuppetId, text: &str) {
        if let Err(err) = self.host.send_status(puppet, text).await {
            warn!(%puppet, error = %err, "status message failed");
        }
    }
}

fn event_kind(event: &ClientEvent) -> &'static str {
    match event {
        ClientEvent::Authenticated(_) => "authenticated",
        ClientEvent::ConnectionLost => "connection_lost",
        ClientEvent::Reconnected => "reconnected",
        ClientEvent::ReconnectFailed(_) => "reconnect_failed",
        ClientEvent::Message(_) => "message",
        ClientEvent::MessageChanged(_) => "message_changed",
        ClientEvent::MessageDeleted(_) => "message_deleted",
        ClientEvent::UserUpdated(_) => "user",
        ClientEvent::BotUpdated(_) => "bot",
        ClientEvent::ChannelAdded(_) => "channel_added",
        ClientEvent::ChannelUpdated(_) => "channel",
        ClientEvent::TeamUpdated(_) => "team",
        ClientEvent::Typing { .. } => "typing",
        ClientEvent::Presence { .. } => "presence",
        ClientEvent::Reaction { .. } => "reaction",
    }
}
