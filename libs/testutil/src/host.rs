use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use anyhow::{Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use msp_core::{
    CanonicalMessage, HostBridge, MentionTarget, Presence, PuppetId, ReceiveParams,
    RemoteGroupParams, RemoteRoomParams, RemoteUserParams, RoomRef, UserRef,
};
use tokio::sync::Notify;

pub const HOMESERVER: &str = "example.org";

/// One call into the host framework.
#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    Message {
        params: ReceiveParams,
        msg: CanonicalMessage,
    },
    Reply {
        params: ReceiveParams,
        in_reply_to: String,
        msg: CanonicalMessage,
    },
    Edit {
        params: ReceiveParams,
        original: String,
        msg: CanonicalMessage,
    },
    Redact {
        params: ReceiveParams,
        event_id: String,
    },
    Reaction {
        params: ReceiveParams,
        event_id: String,
        key: String,
    },
    RemoveReaction {
        params: ReceiveParams,
        event_id: String,
        key: String,
    },
    File {
        params: ReceiveParams,
        filename: String,
        data: Bytes,
    },
    UpdateUser(RemoteUserParams),
    UpdateRoom(RemoteRoomParams),
    UpdateGroup(RemoteGroupParams),
    Typing {
        params: ReceiveParams,
        typing: bool,
    },
    Presence {
        user: UserRef,
        presence: Presence,
    },
    RecordEvent {
        puppet: PuppetId,
        local: String,
        remote: String,
    },
    RemoteUserId {
        puppet: PuppetId,
        remote_user_id: String,
    },
    Status {
        puppet: PuppetId,
        text: String,
    },
    Upload {
        filename: String,
        mimetype: Option<String>,
    },
}

#[derive(Default)]
struct State {
    calls: Vec<HostCall>,
    mentions: HashMap<String, MentionTarget>,
    media: HashMap<String, Bytes>,
    failing_media: bool,
}

/// Host framework double. Federated ids are derived from remote ids, so
/// `U1` on puppet 1 is always `@_slack_1_U1:example.org`.
#[derive(Default)]
pub struct RecordingHost {
    state: Mutex<State>,
    changed: Notify,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_mxid(puppet: PuppetId, user: &str) -> String {
        format!("@_slack_{puppet}_{user}:{HOMESERVER}")
    }

    pub fn room_mxid(puppet: PuppetId, room: &str) -> String {
        format!("!slack_{puppet}_{room}:{HOMESERVER}")
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: HostCall) {
        self.state().calls.push(call);
        self.changed.notify_waiters();
    }

    /// Makes `federated_id` resolve to `target` in outbound mentions.
    pub fn map_mention(&self, federated_id: &str, target: MentionTarget) {
        self.state().mentions.insert(federated_id.into(), target);
    }

    /// Serves `data` for `url` from [`HostBridge::download_media`].
    pub fn add_media(&self, url: &str, data: impl Into<Bytes>) {
        self.state().media.insert(url.into(), data.into());
    }

    pub fn fail_media_uploads(&self) {
        self.state().failing_media = true;
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.state().calls.clone()
    }

    pub fn take_calls(&self) -> Vec<HostCall> {
        std::mem::take(&mut self.state().calls)
    }

    /// Waits until some recorded call satisfies `matches`, returning it.
    ///
    /// Panics after five seconds so a missing call fails the test instead of
    /// hanging it.
    pub async fn wait_for(&self, matches: impl Fn(&HostCall) -> bool) -> HostCall {
        let wait = async {
            loop {
                let notified = self.changed.notified();
                if let Some(call) = self.state().calls.iter().find(|call| matches(call)) {
                    return call.clone();
                }
                notified.await;
            }
        };
        match tokio::time::timeout(Duration::from_secs(5), wait).await {
            Ok(call) => call,
            Err(_) => panic!("host call never arrived; recorded: {:?}", self.calls()),
        }
    }
}

#[async_trait]
impl HostBridge for RecordingHost {
    async fn mention_target(&self, federated_id: &str) -> Result<Option<MentionTarget>> {
        Ok(self.state().mentions.get(federated_id).cloned())
    }

    async fn mxid_for_user(&self, user: &UserRef) -> Result<String> {
        Ok(Self::user_mxid(user.puppet, &user.user_id))
    }

    async fn mxid_for_room(&self, room: &RoomRef) -> Result<Option<String>> {
        Ok(Some(Self::room_mxid(room.puppet, &room.room_id)))
    }

    async fn send_message(&self, params: &ReceiveParams, msg: CanonicalMessage) -> Result<()> {
        self.record(HostCall::Message {
            params: params.clone(),
            msg,
        });
        Ok(())
    }

    async fn send_reply(
        &self,
        params: &ReceiveParams,
        in_reply_to: &str,
        msg: CanonicalMessage,
    ) -> Result<()> {
        self.record(HostCall::Reply {
            params: params.clone(),
            in_reply_to: in_reply_to.into(),
            msg,
        });
        Ok(())
    }

    async fn send_edit(
        &self,
        params: &ReceiveParams,
        original_event_id: &str,
        msg: CanonicalMessage,
    ) -> Result<()> {
        self.record(HostCall::Edit {
            params: params.clone(),
            original: original_event_id.into(),
            msg,
        });
        Ok(())
    }

    async fn send_redact(&self, params: &ReceiveParams, event_id: &str) -> Result<()> {
        self.record(HostCall::Redact {
            params: params.clone(),
            event_id: event_id.into(),
        });
        Ok(())
    }

    async fn send_reaction(&self, params: &ReceiveParams, event_id: &str, key: &str) -> Result<()> {
        self.record(HostCall::Reaction {
            params: params.clone(),
            event_id: event_id.into(),
            key: key.into(),
        });
        Ok(())
    }

    async fn remove_reaction(
        &self,
        params: &ReceiveParams,
        event_id: &str,
        key: &str,
    ) -> Result<()> {
        self.record(HostCall::RemoveReaction {
            params: params.clone(),
            event_id: event_id.into(),
            key: key.into(),
        });
        Ok(())
    }

    async fn send_file(&self, params: &ReceiveParams, data: Bytes, filename: &str) -> Result<()> {
        self.record(HostCall::File {
            params: params.clone(),
            filename: filename.into(),
            data,
        });
        Ok(())
    }

    async fn update_user(&self, user: RemoteUserParams) -> Result<()> {
        self.record(HostCall::UpdateUser(user));
        Ok(())
    }

    async fn update_room(&self, room: RemoteRoomParams) -> Result<()> {
        self.record(HostCall::UpdateRoom(room));
        Ok(())
    }

    async fn update_group(&self, group: RemoteGroupParams) -> Result<()> {
        self.record(HostCall::UpdateGroup(group));
        Ok(())
    }

    async fn set_typing(&self, params: &ReceiveParams, typing: bool) -> Result<()> {
        self.record(HostCall::Typing {
            params: params.clone(),
            typing,
        });
        Ok(())
    }

    async fn set_presence(&self, user: &UserRef, presence: Presence) -> Result<()> {
        self.record(HostCall::Presence {
            user: user.clone(),
            presence,
        });
        Ok(())
    }

    async fn record_event(
        &self,
        puppet: PuppetId,
        local_event_id: &str,
        remote_event_id: &str,
    ) -> Result<()> {
        self.record(HostCall::RecordEvent {
            puppet,
            local: local_event_id.into(),
            remote: remote_event_id.into(),
        });
        Ok(())
    }

    async fn set_remote_user_id(&self, puppet: PuppetId, remote_user_id: &str) -> Result<()> {
        self.record(HostCall::RemoteUserId {
            puppet,
            remote_user_id: remote_user_id.into(),
        });
        Ok(())
    }

    async fn send_status(&self, puppet: PuppetId, text: &str) -> Result<()> {
        self.record(HostCall::Status {
            puppet,
            text: text.into(),
        });
        Ok(())
    }

    async fn download_media(&self, url: &str) -> Result<Bytes> {
        match self.state().media.get(url) {
            Some(data) => Ok(data.clone()),
            None => bail!("no media at {url}"),
        }
    }

    async fn upload_media(
        &self,
        data: Bytes,
        filename: &str,
        mimetype: Option<&str>,
    ) -> Result<String> {
        if self.state().failing_media {
            bail!("media repository unavailable");
        }
        self.record(HostCall::Upload {
            filename: filename.into(),
            mimetype: mimetype.map(str::to_string),
        });
        Ok(format!("mxc://{HOMESERVER}/{}", data.len()))
    }
}
