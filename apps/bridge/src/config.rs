//! Bridge configuration: a YAML file overlaid with environment variables.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use msp_slack::{ClientOptions, DEFAULT_API_BASE};
use serde::{Deserialize, Serialize};

const REDACTED: &str = "***";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Socket Mode websocket opened with an app-level token.
    #[default]
    Socket,
    /// Events API callbacks received on a local HTTP listener.
    Webhook,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub bind: String,
    pub signing_secret: Option<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
            signing_secret: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    pub api_base: String,
    pub transport: TransportKind,
    pub app_token: Option<String>,
    pub reconnect_delay_secs: u64,
    pub lock_ttl_secs: u64,
    pub webhook: WebhookConfig,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.into(),
            transport: TransportKind::default(),
            app_token: None,
            reconnect_delay_secs: 60,
            lock_ttl_secs: 60,
            webhook: WebhookConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database; in-memory stores when absent.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub enabled: bool,
    pub client_id: String,
    pub redirect_uri: String,
}

impl OAuthConfig {
    /// Authorize URL offered to users linking an account without a token.
    pub fn authorize_url(&self) -> Option<String> {
        self.enabled.then(|| {
            format!(
                "https://slack.com/oauth/authorize?scope=client&client_id={}&redirect_uri={}",
                self.client_id,
                urlencoding::encode(&self.redirect_uri)
            )
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub slack: SlackConfig,
    pub store: StoreConfig,
    pub oauth: OAuthConfig,
}

impl BridgeConfig {
    /// Reads `path` when it exists, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_yaml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Environment variables win over file values. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| get(key).filter(|value| !value.trim().is_empty());
        if let Some(base) = get("SLACK_API_BASE") {
            self.slack.api_base = base;
        }
        match get("SLACK_TRANSPORT").map(|v| v.to_ascii_lowercase()).as_deref() {
            Some("socket") => self.slack.transport = TransportKind::Socket,
            Some("webhook") => self.slack.transport = TransportKind::Webhook,
            _ => {}
        }
        if let Some(token) = get("SLACK_APP_TOKEN") {
            self.slack.app_token = Some(token);
        }
        if let Some(secret) = get("SLACK_SIGNING_SECRET") {
            self.slack.webhook.signing_secret = Some(secret);
        }
        if let Some(bind) = get("SLACK_WEBHOOK_BIND") {
            self.slack.webhook.bind = bind;
        }
        if let Some(secs) = get("SLACK_RECONNECT_DELAY_SECS").and_then(|v| v.parse().ok()) {
            self.slack.reconnect_delay_secs = secs;
        }
        if let Some(path) = get("BRIDGE_STORE_PATH") {
            self.store.path = Some(PathBuf::from(path));
        }
        if let Some(id) = get("SLACK_OAUTH_CLIENT_ID") {
            self.oauth.client_id = id;
        }
        if let Some(uri) = get("SLACK_OAUTH_REDIRECT_URI") {
            self.oauth.redirect_uri = uri;
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.slack.transport {
            TransportKind::Socket if self.slack.app_token.is_none() => {
                bail!("socket transport needs slack.app_token or SLACK_APP_TOKEN")
            }
            TransportKind::Webhook if self.slack.webhook.signing_secret.is_none() => {
                bail!("webhook transport needs slack.webhook.signing_secret or SLACK_SIGNING_SECRET")
            }
            _ => {}
        }
        if self.oauth.enabled && self.oauth.client_id.is_empty() {
            bail!("oauth is enabled but oauth.client_id is empty");
        }
        Ok(())
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            reconnect_delay: Duration::from_secs(self.slack.reconnect_delay_secs),
            lock_ttl: Duration::from_secs(self.slack.lock_ttl_secs),
        }
    }

    /// Copy safe to print.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.slack.app_token.is_some() {
            copy.slack.app_token = Some(REDACTED.into());
        }
        if copy.slack.webhook.signing_secret.is_some() {
            copy.slack.webhook.signing_secret = Some(REDACTED.into());
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = BridgeConfig::default();
        assert_eq!(config.slack.api_base, DEFAULT_API_BASE);
        assert_eq!(config.slack.transport, TransportKind::Socket);
        assert_eq!(
            config.client_options().reconnect_delay,
            Duration::from_secs(60)
        );
        assert!(config.store.path.is_none());
    }

    #[test]
    fn file_values_are_overridden_by_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "slack:\n  transport: webhook\n  webhook:\n    signing_secret: from-file\n  reconnect_delay_secs: 5\nstore:\n  path: /tmp/a.db\n"
        )
        .unwrap();
        let mut config = BridgeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.slack.transport, TransportKind::Webhook);
        assert_eq!(config.slack.reconnect_delay_secs, 5);
        assert_eq!(config.slack.lock_ttl_secs, 60);

        config.apply_overrides(lookup(&[
            ("SLACK_SIGNING_SECRET", "from-env"),
            ("BRIDGE_STORE_PATH", "/var/lib/bridge.db"),
            ("SLACK_APP_TOKEN", "  "),
        ]));
        assert_eq!(
            config.slack.webhook.signing_secret.as_deref(),
            Some("from-env")
        );
        assert_eq!(
            config.store.path.as_deref(),
            Some(Path::new("/var/lib/bridge.db"))
        );
        assert!(config.slack.app_token.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn transports_require_their_secret() {
        let config = BridgeConfig::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("SLACK_APP_TOKEN"));

        let mut config = BridgeConfig::default();
        config.apply_overrides(lookup(&[("SLACK_TRANSPORT", "Webhook")]));
        assert!(config.validate().is_err());
    }

    #[test]
    fn redaction_hides_secrets() {
        let mut config = BridgeConfig::default();
        config.apply_overrides(lookup(&[
            ("SLACK_APP_TOKEN", "xapp-secret"),
            ("SLACK_SIGNING_SECRET", "shh"),
        ]));
        let printed = serde_yaml::to_string(&config.redacted()).unwrap();
        assert!(!printed.contains("xapp-secret"));
        assert!(!printed.contains("shh"));
        assert!(printed.contains(REDACTED));
    }

    #[test]
    fn oauth_hint_encodes_redirect() {
        let oauth = OAuthConfig {
            enabled: true,
            client_id: "123.456".into(),
            redirect_uri: "https://bridge.example/oauth?x=1".into(),
        };
        assert_eq!(
            oauth.authorize_url().as_deref(),
            Some(
                "https://slack.com/oauth/authorize?scope=client&client_id=123.456&redirect_uri=https%3A%2F%2Fbridge.example%2Foauth%3Fx%3D1"
            )
        );
        assert!(OAuthConfig::default().authorize_url().is_none());
    }
}
