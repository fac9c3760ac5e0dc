use std::sync::Arc;

use msp_core::PuppetId;
use msp_slack::{
    ClientEvent, ClientOptions, Connector, ReqwestSlackApi, RemoteClient, SocketModeConnector,
    WebhookHub,
};
use tokio::sync::mpsc;

use crate::config::{BridgeConfig, TransportKind};

/// Builds the Remote Client for a newly linked account.
pub trait ClientFactory: Send + Sync {
    fn create(
        &self,
        puppet: PuppetId,
        token: &str,
    ) -> (RemoteClient, mpsc::UnboundedReceiver<ClientEvent>);
}

/// Production factory: Web API over `reqwest`, events over the configured
/// transport.
pub struct SlackClientFactory {
    http: reqwest::Client,
    api_base: String,
    connector: Arc<dyn Connector>,
    options: ClientOptions,
}

impl SlackClientFactory {
    pub fn new(
        http: reqwest::Client,
        api_base: impl Into<String>,
        connector: Arc<dyn Connector>,
        options: ClientOptions,
    ) -> Self {
        Self {
            http,
            api_base: api_base.into(),
            connector,
            options,
        }
    }

    /// Factory for `config`, plus the webhook hub whose router must be
    /// served when the webhook transport is selected.
    pub fn from_config(config: &BridgeConfig) -> (Self, Option<Arc<WebhookHub>>) {
        let http = reqwest::Client::new();
        let mut hub = None;
        let connector: Arc<dyn Connector> = match config.slack.transport {
            TransportKind::Socket => Arc::new(SocketModeConnector::new(
                http.clone(),
                config.slack.api_base.clone(),
                config.slack.app_token.clone().unwrap_or_default(),
            )),
            TransportKind::Webhook => {
                let secret = config.slack.webhook.signing_secret.clone();
                let webhook = WebhookHub::new(secret.unwrap_or_default());
                hub = Some(Arc::clone(&webhook));
                webhook
            }
        };
        let factory = Self::new(
            http,
            config.slack.api_base.clone(),
            connector,
            config.client_options(),
        );
        (factory, hub)
    }
}

impl ClientFactory for SlackClientFactory {
    fn create(
        &self,
        puppet: PuppetId,
        token: &str,
    ) -> (RemoteClient, mpsc::UnboundedReceiver<ClientEvent>) {
        let api = ReqwestSlackApi::new(self.http.clone(), Some(self.api_base.clone()), token);
        RemoteClient::new(
            puppet,
            Arc::new(api),
            Arc::clone(&self.connector),
            self.options,
        )
    }
}
