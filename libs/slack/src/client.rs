//! Remote Client: one live Slack connection per puppet.
//!
//! The client authenticates, opens an event transport through a
//! [`Connector`], folds entity events into its [`EntityCache`] and forwards
//! everything else as typed [`ClientEvent`]s on a single channel. Lookups
//! go through the cache and the [`FetchLock`]; outbound operations map Slack
//! failures onto [`DeliveryError`].
//!
//! A connection that drops while the client is not stopped triggers exactly
//! one reconnect attempt after [`ClientOptions::reconnect_delay`].

use std::{
    future::Future,
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use msp_core::{
    DeliveryError, EntityKind, MessageKind, Presence, PuppetId, RemoteBot, RemoteChannel,
    RemoteMessage, RemoteTeam, RemoteUser, TransportError,
};
use msp_telemetry::{FetchOutcome, record_entity_fetch, record_reconnect};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, instrument, warn};

use crate::api::{FileUpload, PostMessage, SlackApi};
use crate::cache::EntityCache;
use crate::error::ApiError;
use crate::events::{Connector, TransportEvent};
use crate::lock::{Acquire, DEFAULT_LOCK_TTL, FetchLock};
use crate::wire::{AuthIdentity, Usergroup};

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    pub reconnect_delay: Duration,
    pub lock_ttl: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            lock_ttl: DEFAULT_LOCK_TTL,
        }
    }
}

/// Lifecycle and content events, in the order the transport produced them.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Authenticated(AuthIdentity),
    ConnectionLost,
    Reconnected,
    ReconnectFailed(String),
    Message(RemoteMessage),
    MessageChanged(RemoteMessage),
    MessageDeleted(RemoteMessage),
    UserUpdated(RemoteUser),
    BotUpdated(RemoteBot),
    ChannelAdded(RemoteChannel),
    ChannelUpdated(RemoteChannel),
    TeamUpdated(RemoteTeam),
    Typing {
        channel: String,
        user: String,
    },
    Presence {
        user: String,
        presence: Presence,
    },
    Reaction {
        added: bool,
        channel: String,
        user: String,
        item_ts: String,
        reaction: String,
    },
}

#[derive(Default)]
struct Tasks {
    reader: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

struct Inner {
    puppet: PuppetId,
    api: Arc<dyn SlackApi>,
    connector: Arc<dyn Connector>,
    cache: EntityCache,
    lock: FetchLock,
    options: ClientOptions,
    events: mpsc::UnboundedSender<ClientEvent>,
    stopped: AtomicBool,
    usergroups_loaded: AtomicBool,
    identity: RwLock<Option<AuthIdentity>>,
    tasks: Mutex<Tasks>,
}

#[derive(Clone)]
pub struct RemoteClient {
    inner: Arc<Inner>,
}

impl RemoteClient {
    pub fn new(
        puppet: PuppetId,
        api: Arc<dyn SlackApi>,
        connector: Arc<dyn Connector>,
        options: ClientOptions,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let inner = Inner {
            puppet,
            api,
            connector,
            cache: EntityCache::new(),
            lock: FetchLock::new(options.lock_ttl),
            options,
            events,
            stopped: AtomicBool::new(false),
            usergroups_loaded: AtomicBool::new(false),
            identity: RwLock::new(None),
            tasks: Mutex::new(Tasks::default()),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    pub fn puppet(&self) -> PuppetId {
        self.inner.puppet
    }

    pub fn cache(&self) -> &EntityCache {
        &self.inner.cache
    }

    pub fn identity(&self) -> Option<AuthIdentity> {
        self.inner
            .identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Slack user id of the account itself, once authenticated.
    pub fn self_id(&self) -> Option<String> {
        self.identity().map(|identity| identity.user_id)
    }

    pub fn team_id(&self) -> Option<String> {
        self.identity().map(|identity| identity.team_id)
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Authenticates and opens the transport; resolves once it is ready.
    #[instrument(skip_all, fields(puppet = %self.inner.puppet))]
    pub async fn connect(&self) -> Result<AuthIdentity, TransportError> {
        self.inner.stopped.store(false, Ordering::SeqCst);
        Inner::establish(&self.inner).await
    }

    /// Marks the client stopped, then tears the transport down. A drop
    /// observed after this point never reconnects.
    pub fn disconnect(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let mut tasks = self.inner.tasks();
        for task in [tasks.reader.take(), tasks.reconnect.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
        info!(puppet = %self.inner.puppet, "slack client disconnected");
    }

    pub async fn get_user(&self, id: &str) -> Option<RemoteUser> {
        let inner = &self.inner;
        self.lookup(
            EntityKind::User,
            id,
            || inner.cache.user(id),
            || inner.api.user_info(id),
            |user| {
                inner.cache.upsert_user(user.clone());
                inner.emit(ClientEvent::UserUpdated(user.clone()));
            },
        )
        .await
    }

    /// Bots always resolve; a failed fetch yields [`RemoteBot::unknown`].
    pub async fn get_bot(&self, id: &str) -> RemoteBot {
        let inner = &self.inner;
        self.lookup(
            EntityKind::Bot,
            id,
            || inner.cache.bot(id),
            || inner.api.bot_info(id),
            |bot| {
                inner.cache.upsert_bot(bot.clone());
                inner.emit(ClientEvent::BotUpdated(bot.clone()));
            },
        )
        .await
        .unwrap_or_else(|| RemoteBot::unknown(id))
    }

    pub async fn get_channel(&self, id: &str) -> Option<RemoteChannel> {
        let inner = &self.inner;
        self.lookup(
            EntityKind::Channel,
            id,
            || inner.cache.channel(id),
            || inner.api.conversation_info(id),
            |channel| {
                inner.cache.upsert_channel(channel.clone());
                inner.emit(ClientEvent::ChannelUpdated(channel.clone()));
            },
        )
        .await
    }

    pub async fn get_team(&self) -> Option<RemoteTeam> {
        let inner = &self.inner;
        self.lookup(
            EntityKind::Team,
            "self",
            || inner.cache.team(),
            || inner.api.team_info(),
            |team| {
                inner.cache.set_team(team.clone());
                inner.emit(ClientEvent::TeamUpdated(team.clone()));
            },
        )
        .await
    }

    /// Usergroups are listed once per client; unknown ids resolve to `None`.
    pub async fn get_usergroup(&self, id: &str) -> Option<Usergroup> {
        let inner = &self.inner;
        let _guard = loop {
            if inner.usergroups_loaded.load(Ordering::SeqCst) {
                return inner.cache.usergroup(id);
            }
            match inner.lock.acquire(EntityKind::Usergroup, "*") {
                Acquire::Held(guard) => break guard,
                Acquire::Busy(waiter) => waiter.wait().await,
            }
        };
        if !inner.usergroups_loaded.load(Ordering::SeqCst) {
            match inner.api.usergroups().await {
                Ok(groups) => {
                    inner.cache.set_usergroups(groups);
                    record_entity_fetch(EntityKind::Usergroup.as_str(), FetchOutcome::Fetched);
                }
                Err(err) => {
                    debug!(puppet = %inner.puppet, error = %err, "usergroups unavailable");
                    record_entity_fetch(EntityKind::Usergroup.as_str(), FetchOutcome::Failed);
                }
            }
            inner.usergroups_loaded.store(true, Ordering::SeqCst);
        }
        inner.cache.usergroup(id)
    }

    /// Lists and caches every user visible to the account. Falls back to
    /// the cached set when Slack refuses.
    pub async fn list_users(&self) -> Vec<RemoteUser> {
        match self.inner.api.list_users().await {
            Ok(users) => {
                for user in users {
                    self.inner.cache.upsert_user(user);
                }
            }
            Err(err) => warn!(puppet = %self.inner.puppet, error = %err, "users.list failed"),
        }
        self.inner.cache.users()
    }

    pub async fn list_channels(&self) -> Vec<RemoteChannel> {
        match self.inner.api.list_conversations().await {
            Ok(channels) => {
                for channel in channels {
                    self.inner.cache.merge_channel(channel);
                }
            }
            Err(err) => {
                warn!(puppet = %self.inner.puppet, error = %err, "conversations.list failed")
            }
        }
        self.inner.cache.channels()
    }

    pub async fn channel_members(&self, channel: &str) -> Vec<String> {
        self.inner
            .api
            .conversation_members(channel)
            .await
            .unwrap_or_else(|err| {
                warn!(
                    puppet = %self.inner.puppet,
                    channel,
                    error = %err,
                    "conversations.members failed"
                );
                Vec::new()
            })
    }

    pub async fn open_dm(&self, user: &str) -> Result<String, DeliveryError> {
        self.inner
            .api
            .open_dm(user)
            .await
            .map_err(delivery("conversations.open"))
    }

    /// Posts a message; returns its `ts`.
    pub async fn send_message(&self, message: &PostMessage) -> Result<String, DeliveryError> {
        let operation = if message.emote {
            "chat.meMessage"
        } else {
            "chat.postMessage"
        };
        self.inner
            .api
            .post_message(message)
            .await
            .map_err(delivery(operation))
    }

    pub async fn edit_message(
        &self,
        channel: &str,
        ts: &str,
        text: &str,
    ) -> Result<String, DeliveryError> {
        self.inner
            .api
            .update_message(channel, ts, text)
            .await
            .map_err(delivery("chat.update"))
    }

    pub async fn delete_message(&self, channel: &str, ts: &str) -> Result<(), DeliveryError> {
        self.inner
            .api
            .delete_message(channel, ts)
            .await
            .map_err(delivery("chat.delete"))
    }

    pub async fn send_reaction(
        &self,
        channel: &str,
        ts: &str,
        name: &str,
    ) -> Result<(), DeliveryError> {
        self.inner
            .api
            .add_reaction(channel, ts, name)
            .await
            .map_err(delivery("reactions.add"))
    }

    pub async fn remove_reaction(
        &self,
        channel: &str,
        ts: &str,
        name: &str,
    ) -> Result<(), DeliveryError> {
        self.inner
            .api
            .remove_reaction(channel, ts, name)
            .await
            .map_err(delivery("reactions.remove"))
    }

    /// Uploads and shares a file; returns the Slack file id.
    pub async fn send_file_message(&self, upload: &FileUpload) -> Result<String, DeliveryError> {
        self.inner
            .api
            .upload_file(upload)
            .await
            .map_err(delivery("files.completeUploadExternal"))
    }

    pub async fn download_file(&self, url: &str) -> Result<Bytes, DeliveryError> {
        self.inner
            .api
            .download(url)
            .await
            .map_err(delivery("files.download"))
    }

    /// Cache, then single-flight fetch. Waiters re-read the cache after the
    /// holder releases and fetch themselves only if it is still missing.
    async fn lookup<T, C, F, Fut, S>(
        &self,
        kind: EntityKind,
        id: &str,
        cached: C,
        fetch: F,
        store: S,
    ) -> Option<T>
    where
        C: Fn() -> Option<T>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
        S: FnOnce(&T),
    {
        let guard = loop {
            if let Some(hit) = cached() {
                return Some(hit);
            }
            match self.inner.lock.acquire(kind, id) {
                Acquire::Held(guard) => break guard,
                Acquire::Busy(waiter) => waiter.wait().await,
            }
        };
        if let Some(hit) = cached() {
            return Some(hit);
        }

        let fetched = match fetch().await {
            Ok(entity) => {
                store(&entity);
                record_entity_fetch(kind.as_str(), FetchOutcome::Fetched);
                Some(entity)
            }
            Err(err) => {
                warn!(
                    puppet = %self.inner.puppet,
                    kind = kind.as_str(),
                    id,
                    error = %err,
                    "entity lookup failed"
                );
                record_entity_fetch(kind.as_str(), FetchOutcome::Failed);
                None
            }
        };
        drop(guard);
        fetched
    }
}

impl Inner {
    fn tasks(&self) -> std::sync::MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            debug!(puppet = %self.puppet, "client event dropped, no consumer");
        }
    }

    async fn establish(self: &Arc<Self>) -> Result<AuthIdentity, TransportError> {
        let identity = self.api.auth_test().await?;
        *self
            .identity
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(identity.clone());
        info!(
            puppet = %self.puppet,
            team = %identity.team_id,
            user = %identity.user_id,
            "slack account authenticated"
        );
        self.emit(ClientEvent::Authenticated(identity.clone()));

        let mut stream = self.connector.connect(&identity).await?;
        loop {
            match stream.recv().await {
                Some(TransportEvent::Ready) => break,
                Some(event) => self.dispatch(event),
                None => return Err(TransportError::ClosedBeforeReady),
            }
        }
        debug!(puppet = %self.puppet, "slack transport ready");

        let reader = tokio::spawn(Arc::clone(self).read(stream));
        if let Some(previous) = self.tasks().reader.replace(reader) {
            previous.abort();
        }
        Ok(identity)
    }

    async fn read(self: Arc<Self>, mut stream: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = stream.recv().await {
            self.dispatch(event);
        }
        self.connection_lost();
    }

    fn connection_lost(self: &Arc<Self>) {
        if self.stopped.load(Ordering::SeqCst) {
            debug!(puppet = %self.puppet, "transport closed after disconnect");
            return;
        }
        warn!(
            puppet = %self.puppet,
            delay_secs = self.options.reconnect_delay.as_secs(),
            "slack connection lost, reconnect scheduled"
        );
        self.emit(ClientEvent::ConnectionLost);

        let inner = Arc::clone(self);
        let reconnect = tokio::spawn(async move {
            tokio::time::sleep(inner.options.reconnect_delay).await;
            if inner.stopped.load(Ordering::SeqCst) {
                return;
            }
            match inner.establish().await {
                Ok(_) => {
                    record_reconnect(true);
                    info!(puppet = %inner.puppet, "slack connection restored");
                    inner.emit(ClientEvent::Reconnected);
                }
                Err(err) => {
                    record_reconnect(false);
                    warn!(puppet = %inner.puppet, error = %err, "slack reconnect failed");
                    inner.emit(ClientEvent::ReconnectFailed(err.to_string()));
                }
            }
        });
        self.tasks().reconnect = Some(reconnect);
    }

    fn dispatch(&self, event: TransportEvent) {
        let event = match event {
            TransportEvent::Ready => return,
            TransportEvent::Message(message) => match message.kind() {
                MessageKind::Changed => ClientEvent::MessageChanged(message),
                MessageKind::Deleted => ClientEvent::MessageDeleted(message),
                MessageKind::Plain | MessageKind::Emote => ClientEvent::Message(message),
            },
            TransportEvent::ChannelAdded(channel) => {
                ClientEvent::ChannelAdded(self.cache.merge_channel(channel))
            }
            TransportEvent::ChannelChanged(channel) => {
                ClientEvent::ChannelUpdated(self.cache.merge_channel(channel))
            }
            TransportEvent::UserChanged(user) => {
                self.cache.upsert_user(user.clone());
                ClientEvent::UserUpdated(user)
            }
            TransportEvent::BotChanged(bot) => {
                self.cache.upsert_bot(bot.clone());
                ClientEvent::BotUpdated(bot)
            }
            TransportEvent::Typing { channel, user } => ClientEvent::Typing { channel, user },
            TransportEvent::Presence { user, presence } => ClientEvent::Presence {
                user,
                presence: Presence::from_slack(&presence),
            },
            TransportEvent::Reaction {
                added,
                channel,
                user,
                item_ts,
                reaction,
            } => ClientEvent::Reaction {
                added,
                channel,
                user,
                item_ts,
                reaction,
            },
        };
        self.emit(event);
    }
}

fn delivery(operation: &'static str) -> impl FnOnce(ApiError) -> DeliveryError {
    move |err| {
        let reason = match err {
            ApiError::Slack { error, .. } => error,
            other => other.to_string(),
        };
        DeliveryError::new(operation, reason)
    }
}
