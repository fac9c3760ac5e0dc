//! Formatter lookups backed by one session's Slack client and the host.

use async_trait::async_trait;
use msp_core::{HostBridge, MentionTarget, PuppetId, RemoteBot, RoomRef, UserRef};
use msp_slack::RemoteClient;
use msp_translator::{MentionResolver, OutboundResolver, ResolvedEntity};
use tracing::{debug, warn};

/// Resolves Slack references found in inbound messages.
pub struct InboundResolver<'a> {
    pub puppet: PuppetId,
    pub client: &'a RemoteClient,
    pub host: &'a dyn HostBridge,
}

#[async_trait]
impl MentionResolver for InboundResolver<'_> {
    async fn user(&self, id: &str) -> Option<ResolvedEntity> {
        let name = match self.client.get_user(id).await {
            Some(user) => user.display().to_string(),
            None => {
                let bot = self.client.get_bot(id).await;
                if bot == RemoteBot::unknown(id) {
                    return None;
                }
                bot.name
            }
        };
        let mxid = match self.host.mxid_for_user(&UserRef::new(self.puppet, id)).await {
            Ok(mxid) => Some(mxid),
            Err(err) => {
                debug!(puppet = %self.puppet, id, error = %err, "no federated id for user");
                None
            }
        };
        Some(ResolvedEntity::new(name, mxid))
    }

    async fn channel(&self, id: &str) -> Option<ResolvedEntity> {
        let channel = self.client.get_channel(id).await.filter(|c| !c.is_direct)?;
        let name = channel.name.clone().unwrap_or_else(|| channel.id.clone());
        let mxid = self
            .host
            .mxid_for_room(&RoomRef::new(self.puppet, id))
            .await
            .unwrap_or_else(|err| {
                debug!(puppet = %self.puppet, id, error = %err, "no federated room for channel");
                None
            });
        Some(ResolvedEntity::new(name, mxid))
    }

    async fn usergroup(&self, id: &str) -> Option<ResolvedEntity> {
        let group = self.client.get_usergroup(id).await?;
        Some(ResolvedEntity::new(group.handle, None))
    }

    async fn upload(&self, url: &str) -> Option<String> {
        let data = match self.client.download_file(url).await {
            Ok(data) => data,
            Err(err) => {
                warn!(puppet = %self.puppet, url, error = %err, "image download failed");
                return None;
            }
        };
        let filename = url.rsplit('/').next().unwrap_or("image");
        match self.host.upload_media(data, filename, None).await {
            Ok(mxc) => Some(mxc),
            Err(err) => {
                warn!(puppet = %self.puppet, url, error = %err, "image re-host failed");
                None
            }
        }
    }
}

/// Resolves federated pills in outbound messages through the host.
pub struct HostMentions<'a> {
    pub host: &'a dyn HostBridge,
}

#[async_trait]
impl OutboundResolver for HostMentions<'_> {
    async fn mention_target(&self, federated_id: &str) -> Option<MentionTarget> {
        self.host
            .mention_target(federated_id)
            .await
            .unwrap_or_else(|err| {
                debug!(federated_id, error = %err, "mention lookup failed");
                None
            })
    }
}
