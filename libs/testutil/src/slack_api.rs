use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use msp_core::{RemoteBot, RemoteChannel, RemoteTeam, RemoteUser};
use msp_slack::{ApiError, AuthIdentity, FileUpload, PostMessage, SlackApi, Usergroup};

#[derive(Default)]
struct State {
    identity: AuthIdentity,
    users: HashMap<String, RemoteUser>,
    bots: HashMap<String, RemoteBot>,
    channels: HashMap<String, RemoteChannel>,
    team: Option<RemoteTeam>,
    usergroups: Vec<Usergroup>,
    members: HashMap<String, Vec<String>>,
    files: HashMap<String, Bytes>,
    failures: HashMap<&'static str, String>,
    delay: Option<Duration>,
    calls: Vec<(&'static str, String)>,
    posted: Vec<PostMessage>,
    edits: Vec<(String, String, String)>,
    deletes: Vec<(String, String)>,
    reactions: Vec<(bool, String, String, String)>,
    uploads: Vec<FileUpload>,
    next_ts: u64,
}

/// In-memory Slack. Every method is recorded under its Web API name
/// (`users.info`, `chat.postMessage`, ...).
pub struct MockSlackApi {
    state: Mutex<State>,
}

impl Default for MockSlackApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSlackApi {
    pub fn new() -> Self {
        let state = State {
            identity: AuthIdentity {
                user_id: "U0".into(),
                team_id: "T0".into(),
                user: "bridge".into(),
                team: "Acme".into(),
                url: "https://acme.slack.com/".into(),
            },
            next_ts: 1,
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_identity(&self, identity: AuthIdentity) {
        self.state().identity = identity;
    }

    pub fn add_user(&self, user: RemoteUser) {
        self.state().users.insert(user.id.clone(), user);
    }

    pub fn add_bot(&self, bot: RemoteBot) {
        self.state().bots.insert(bot.id.clone(), bot);
    }

    pub fn add_channel(&self, channel: RemoteChannel) {
        self.state().channels.insert(channel.id.clone(), channel);
    }

    pub fn set_team(&self, team: RemoteTeam) {
        self.state().team = Some(team);
    }

    pub fn set_usergroups(&self, groups: Vec<Usergroup>) {
        self.state().usergroups = groups;
    }

    pub fn set_members(&self, channel: &str, members: &[&str]) {
        self.state().members.insert(
            channel.into(),
            members.iter().map(|member| member.to_string()).collect(),
        );
    }

    pub fn add_file(&self, url: &str, data: impl Into<Bytes>) {
        self.state().files.insert(url.into(), data.into());
    }

    /// Makes every later call to `method` fail with Slack error `error`.
    pub fn fail(&self, method: &'static str, error: &str) {
        self.state().failures.insert(method, error.into());
    }

    pub fn recover(&self, method: &'static str) {
        self.state().failures.remove(method);
    }

    /// Delays every call, letting concurrent lookups overlap.
    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }

    pub fn calls(&self, method: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|(called, _)| *called == method)
            .count()
    }

    pub fn call_log(&self) -> Vec<(&'static str, String)> {
        self.state().calls.clone()
    }

    pub fn posted(&self) -> Vec<PostMessage> {
        self.state().posted.clone()
    }

    pub fn edits(&self) -> Vec<(String, String, String)> {
        self.state().edits.clone()
    }

    pub fn deletes(&self) -> Vec<(String, String)> {
        self.state().deletes.clone()
    }

    /// `(added, channel, ts, name)` per reaction call.
    pub fn reactions(&self) -> Vec<(bool, String, String, String)> {
        self.state().reactions.clone()
    }

    pub fn uploads(&self) -> Vec<FileUpload> {
        self.state().uploads.clone()
    }

    async fn enter(&self, method: &'static str, argument: &str) -> Result<(), ApiError> {
        let delay = {
            let mut state = self.state();
            state.calls.push((method, argument.to_string()));
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.state().failures.get(method) {
            Some(error) => Err(ApiError::slack(method, error.clone())),
            None => Ok(()),
        }
    }

    fn next_ts(&self) -> String {
        let mut state = self.state();
        let ts = format!("1700000000.{:06}", state.next_ts);
        state.next_ts += 1;
        ts
    }
}

fn found<T>(method: &'static str, value: Option<T>, error: &str) -> Result<T, ApiError> {
    value.ok_or_else(|| ApiError::slack(method, error))
}

#[async_trait]
impl SlackApi for MockSlackApi {
    async fn auth_test(&self) -> Result<AuthIdentity, ApiError> {
        self.enter("auth.test", "").await?;
        Ok(self.state().identity.clone())
    }

    async fn user_info(&self, user: &str) -> Result<RemoteUser, ApiError> {
        self.enter("users.info", user).await?;
        found("users.info", self.state().users.get(user).cloned(), "user_not_found")
    }

    async fn bot_info(&self, bot: &str) -> Result<RemoteBot, ApiError> {
        self.enter("bots.info", bot).await?;
        found("bots.info", self.state().bots.get(bot).cloned(), "bot_not_found")
    }

    async fn conversation_info(&self, channel: &str) -> Result<RemoteChannel, ApiError> {
        self.enter("conversations.info", channel).await?;
        found(
            "conversations.info",
            self.state().channels.get(channel).cloned(),
            "channel_not_found",
        )
    }

    async fn team_info(&self) -> Result<RemoteTeam, ApiError> {
        self.enter("team.info", "").await?;
        found("team.info", self.state().team.clone(), "team_not_found")
    }

    async fn usergroups(&self) -> Result<Vec<Usergroup>, ApiError> {
        self.enter("usergroups.list", "").await?;
        Ok(self.state().usergroups.clone())
    }

    async fn list_users(&self) -> Result<Vec<RemoteUser>, ApiError> {
        self.enter("users.list", "").await?;
        let mut users: Vec<_> = self.state().users.values().cloned().collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(users)
    }

    async fn list_conversations(&self) -> Result<Vec<RemoteChannel>, ApiError> {
        self.enter("conversations.list", "").await?;
        let mut channels: Vec<_> = self.state().channels.values().cloned().collect();
        channels.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(channels)
    }

    async fn conversation_members(&self, channel: &str) -> Result<Vec<String>, ApiError> {
        self.enter("conversations.members", channel).await?;
        Ok(self
            .state()
            .members
            .get(channel)
            .cloned()
            .unwrap_or_default())
    }

    async fn open_dm(&self, user: &str) -> Result<String, ApiError> {
        self.enter("conversations.open", user).await?;
        Ok(format!("D{user}"))
    }

    async fn post_message(&self, message: &PostMessage) -> Result<String, ApiError> {
        let method = if message.emote {
            "chat.meMessage"
        } else {
            "chat.postMessage"
        };
        self.enter(method, &message.channel).await?;
        self.state().posted.push(message.clone());
        Ok(self.next_ts())
    }

    async fn update_message(
        &self,
        channel: &str,
        ts: &str,
        text: &str,
    ) -> Result<String, ApiError> {
        self.enter("chat.update", channel).await?;
        self.state()
            .edits
            .push((channel.into(), ts.into(), text.into()));
        Ok(ts.to_string())
    }

    async fn delete_message(&self, channel: &str, ts: &str) -> Result<(), ApiError> {
        self.enter("chat.delete", channel).await?;
        self.state().deletes.push((channel.into(), ts.into()));
        Ok(())
    }

    async fn add_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<(), ApiError> {
        self.enter("reactions.add", channel).await?;
        self.state()
            .reactions
            .push((true, channel.into(), ts.into(), name.into()));
        Ok(())
    }

    async fn remove_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<(), ApiError> {
        self.enter("reactions.remove", channel).await?;
        self.state()
            .reactions
            .push((false, channel.into(), ts.into(), name.into()));
        Ok(())
    }

    async fn upload_file(&self, upload: &FileUpload) -> Result<String, ApiError> {
        self.enter("files.completeUploadExternal", &upload.channel)
            .await?;
        let mut state = self.state();
        state.uploads.push(upload.clone());
        Ok(format!("F{}", state.uploads.len()))
    }

    async fn download(&self, url: &str) -> Result<Bytes, ApiError> {
        self.enter("files.download", url).await?;
        found("files.download", self.state().files.get(url).cloned(), "file_not_found")
    }
}
