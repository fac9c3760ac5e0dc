//! Slack Web API surface used by the remote client.

use async_trait::async_trait;
use bytes::Bytes;
use msp_core::{RemoteBot, RemoteChannel, RemoteTeam, RemoteUser};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Map, Value, json};
use tracing::{debug, instrument};

use crate::error::ApiError;
use crate::wire::{AuthIdentity, Usergroup, WireBot, WireChannel, WireTeam, WireUser};

pub const DEFAULT_API_BASE: &str = "https://slack.com/api";
const PAGE_LIMIT: &str = "200";
const CONVERSATION_TYPES: &str = "public_channel,private_channel,mpim,im";

/// Message to post. `emote` routes through `chat.meMessage`, which Slack
/// does not thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostMessage {
    pub channel: String,
    pub text: String,
    pub thread_ts: Option<String>,
    pub emote: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub channel: String,
    pub filename: String,
    pub title: Option<String>,
    pub thread_ts: Option<String>,
    pub data: Bytes,
}

/// One account's view of the Slack Web API.
#[async_trait]
pub trait SlackApi: Send + Sync {
    async fn auth_test(&self) -> Result<AuthIdentity, ApiError>;
    async fn user_info(&self, user: &str) -> Result<RemoteUser, ApiError>;
    async fn bot_info(&self, bot: &str) -> Result<RemoteBot, ApiError>;
    async fn conversation_info(&self, channel: &str) -> Result<RemoteChannel, ApiError>;
    async fn team_info(&self) -> Result<RemoteTeam, ApiError>;
    async fn usergroups(&self) -> Result<Vec<Usergroup>, ApiError>;
    async fn list_users(&self) -> Result<Vec<RemoteUser>, ApiError>;
    async fn list_conversations(&self) -> Result<Vec<RemoteChannel>, ApiError>;
    async fn conversation_members(&self, channel: &str) -> Result<Vec<String>, ApiError>;
    /// Opens (or finds) the direct message channel with `user`.
    async fn open_dm(&self, user: &str) -> Result<String, ApiError>;
    /// Returns the `ts` of the new message.
    async fn post_message(&self, message: &PostMessage) -> Result<String, ApiError>;
    async fn update_message(&self, channel: &str, ts: &str, text: &str)
    -> Result<String, ApiError>;
    async fn delete_message(&self, channel: &str, ts: &str) -> Result<(), ApiError>;
    async fn add_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<(), ApiError>;
    async fn remove_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<(), ApiError>;
    /// Uploads and shares a file; returns the Slack file id.
    async fn upload_file(&self, upload: &FileUpload) -> Result<String, ApiError>;
    /// Fetches a `url_private` resource with the account's credentials.
    async fn download(&self, url: &str) -> Result<Bytes, ApiError>;
}

/// `reqwest` implementation talking to `slack.com` or a compatible mock.
#[derive(Clone)]
pub struct ReqwestSlackApi {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

#[derive(Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    data: Map<String, Value>,
}

#[derive(Deserialize)]
struct Page<T> {
    #[serde(flatten)]
    items: T,
    #[serde(default)]
    response_metadata: Option<PageMeta>,
}

#[derive(Deserialize)]
struct PageMeta {
    #[serde(default)]
    next_cursor: String,
}

impl ReqwestSlackApi {
    pub fn new(http: reqwest::Client, api_base: Option<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.unwrap_or_else(|| DEFAULT_API_BASE.into()),
            token: token.into(),
        }
    }

    fn build_url(&self, method: &str) -> String {
        format!(
            "{}/{}",
            self.api_base.trim_end_matches('/'),
            method.trim_start_matches('/')
        )
    }

    async fn get<T: DeserializeOwned>(
        &self,
        method: &'static str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let response = self
            .http
            .get(self.build_url(method))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;
        decode(method, response).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        method: &'static str,
        body: &Value,
    ) -> Result<T, ApiError> {
        let response = self
            .http
            .post(self.build_url(method))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        decode(method, response).await
    }

    /// Follows `response_metadata.next_cursor` until Slack stops paging.
    async fn paged<T, I>(
        &self,
        method: &'static str,
        query: &[(&str, &str)],
        mut extract: impl FnMut(T) -> Vec<I>,
    ) -> Result<Vec<I>, ApiError>
    where
        T: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut cursor = String::new();
        loop {
            let mut params = query.to_vec();
            params.push(("limit", PAGE_LIMIT));
            if !cursor.is_empty() {
                params.push(("cursor", cursor.as_str()));
            }
            let page: Page<T> = self.get(method, &params).await?;
            items.extend(extract(page.items));
            cursor = page
                .response_metadata
                .map(|meta| meta.next_cursor)
                .unwrap_or_default();
            if cursor.is_empty() {
                return Ok(items);
            }
            debug!(method, fetched = items.len(), "following slack cursor");
        }
    }
}

async fn decode<T: DeserializeOwned>(
    method: &'static str,
    response: reqwest::Response,
) -> Result<T, ApiError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ApiError::Status {
            method,
            status: status.as_u16(),
            body,
        });
    }
    let envelope: Envelope =
        serde_json::from_str(&body).map_err(|source| ApiError::Decode { method, source })?;
    if !envelope.ok {
        return Err(ApiError::slack(
            method,
            envelope.error.unwrap_or_else(|| "unknown".into()),
        ));
    }
    serde_json::from_value(Value::Object(envelope.data))
        .map_err(|source| ApiError::Decode { method, source })
}

#[derive(Deserialize)]
struct UserResponse {
    user: WireUser,
}

#[derive(Deserialize)]
struct BotResponse {
    bot: WireBot,
}

#[derive(Deserialize)]
struct ChannelResponse {
    channel: WireChannel,
}

#[derive(Deserialize)]
struct TeamResponse {
    team: WireTeam,
}

#[derive(Deserialize)]
struct UsergroupsResponse {
    #[serde(default)]
    usergroups: Vec<Usergroup>,
}

#[derive(Deserialize)]
struct MembersPage<T> {
    #[serde(default = "Vec::new")]
    members: Vec<T>,
}

#[derive(Deserialize)]
struct ChannelsPage {
    #[serde(default)]
    channels: Vec<WireChannel>,
}

#[derive(Deserialize)]
struct OpenResponse {
    channel: OpenedChannel,
}

#[derive(Deserialize)]
struct OpenedChannel {
    id: String,
}

#[derive(Deserialize)]
struct TsResponse {
    ts: String,
}

#[derive(Deserialize)]
struct Empty {}

#[derive(Deserialize)]
struct UploadTicket {
    upload_url: String,
    file_id: String,
}

#[async_trait]
impl SlackApi for ReqwestSlackApi {
    #[instrument(name = "slack.auth_test", skip(self))]
    async fn auth_test(&self) -> Result<AuthIdentity, ApiError> {
        self.post("auth.test", &json!({})).await
    }

    async fn user_info(&self, user: &str) -> Result<RemoteUser, ApiError> {
        let response: UserResponse = self.get("users.info", &[("user", user)]).await?;
        Ok(response.user.into())
    }

    async fn bot_info(&self, bot: &str) -> Result<RemoteBot, ApiError> {
        let response: BotResponse = self.get("bots.info", &[("bot", bot)]).await?;
        Ok(response.bot.into())
    }

    async fn conversation_info(&self, channel: &str) -> Result<RemoteChannel, ApiError> {
        let response: ChannelResponse = self
            .get("conversations.info", &[("channel", channel)])
            .await?;
        Ok(response.channel.into())
    }

    async fn team_info(&self) -> Result<RemoteTeam, ApiError> {
        let response: TeamResponse = self.get("team.info", &[]).await?;
        Ok(response.team.into())
    }

    async fn usergroups(&self) -> Result<Vec<Usergroup>, ApiError> {
        let response: UsergroupsResponse = self.get("usergroups.list", &[]).await?;
        Ok(response.usergroups)
    }

    async fn list_users(&self) -> Result<Vec<RemoteUser>, ApiError> {
        self.paged("users.list", &[], |page: MembersPage<WireUser>| {
            page.members.into_iter().map(RemoteUser::from).collect()
        })
        .await
    }

    async fn list_conversations(&self) -> Result<Vec<RemoteChannel>, ApiError> {
        self.paged(
            "conversations.list",
            &[("types", CONVERSATION_TYPES), ("exclude_archived", "true")],
            |page: ChannelsPage| page.channels.into_iter().map(RemoteChannel::from).collect(),
        )
        .await
    }

    async fn conversation_members(&self, channel: &str) -> Result<Vec<String>, ApiError> {
        self.paged(
            "conversations.members",
            &[("channel", channel)],
            |page: MembersPage<String>| page.members,
        )
        .await
    }

    async fn open_dm(&self, user: &str) -> Result<String, ApiError> {
        let response: OpenResponse = self
            .post("conversations.open", &json!({ "users": user }))
            .await?;
        Ok(response.channel.id)
    }

    #[instrument(name = "slack.post_message", skip(self, message), fields(channel = %message.channel))]
    async fn post_message(&self, message: &PostMessage) -> Result<String, ApiError> {
        let response: TsResponse = if message.emote {
            self.post(
                "chat.meMessage",
                &json!({ "channel": message.channel, "text": message.text }),
            )
            .await?
        } else {
            let mut body = json!({ "channel": message.channel, "text": message.text });
            if let (Some(ts), Some(obj)) = (message.thread_ts.as_deref(), body.as_object_mut()) {
                obj.insert("thread_ts".into(), json!(ts));
            }
            self.post("chat.postMessage", &body).await?
        };
        Ok(response.ts)
    }

    async fn update_message(
        &self,
        channel: &str,
        ts: &str,
        text: &str,
    ) -> Result<String, ApiError> {
        let response: TsResponse = self
            .post(
                "chat.update",
                &json!({ "channel": channel, "ts": ts, "text": text }),
            )
            .await?;
        Ok(response.ts)
    }

    async fn delete_message(&self, channel: &str, ts: &str) -> Result<(), ApiError> {
        let _: Empty = self
            .post("chat.delete", &json!({ "channel": channel, "ts": ts }))
            .await?;
        Ok(())
    }

    async fn add_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<(), ApiError> {
        let _: Empty = self
            .post(
                "reactions.add",
                &json!({ "channel": channel, "timestamp": ts, "name": name }),
            )
            .await?;
        Ok(())
    }

    async fn remove_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<(), ApiError> {
        let _: Empty = self
            .post(
                "reactions.remove",
                &json!({ "channel": channel, "timestamp": ts, "name": name }),
            )
            .await?;
        Ok(())
    }

    #[instrument(name = "slack.upload_file", skip(self, upload), fields(channel = %upload.channel, filename = %upload.filename))]
    async fn upload_file(&self, upload: &FileUpload) -> Result<String, ApiError> {
        let length = upload.data.len().to_string();
        let ticket: UploadTicket = self
            .get(
                "files.getUploadURLExternal",
                &[("filename", upload.filename.as_str()), ("length", length.as_str())],
            )
            .await?;

        let response = self
            .http
            .post(&ticket.upload_url)
            .body(upload.data.clone())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ApiError::Status {
                method: "files.upload",
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let title = upload.title.as_deref().unwrap_or(&upload.filename);
        let mut body = json!({
            "files": [{ "id": ticket.file_id, "title": title }],
            "channel_id": upload.channel,
        });
        if let (Some(ts), Some(obj)) = (upload.thread_ts.as_deref(), body.as_object_mut()) {
            obj.insert("thread_ts".into(), json!(ts));
        }
        let _: Empty = self.post("files.completeUploadExternal", &body).await?;
        Ok(ticket.file_id)
    }

    async fn download(&self, url: &str) -> Result<Bytes, ApiError> {
        let response = self.http.get(url).bearer_auth(&self.token).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                method: "files.download",
                status: status.as_u16(),
                body: String::new(),
            });
        }
        Ok(response.bytes().await?)
    }
}

/// Asks Slack for a Socket Mode websocket URL using an app-level token.
pub async fn open_socket_url(
    http: &reqwest::Client,
    api_base: &str,
    app_token: &str,
) -> Result<String, ApiError> {
    #[derive(Deserialize)]
    struct SocketUrl {
        url: String,
    }

    let response = http
        .post(format!(
            "{}/apps.connections.open",
            api_base.trim_end_matches('/')
        ))
        .bearer_auth(app_token)
        .send()
        .await?;
    let socket: SocketUrl = decode("apps.connections.open", response).await?;
    Ok(socket.url)
}
