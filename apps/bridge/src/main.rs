use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use msp_bridge::{BridgeConfig, ClientFactory, SlackClientFactory};
use msp_core::PuppetId;
use msp_slack::AuthIdentity;
use msp_telemetry::{TelemetryConfig, init_telemetry};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Matrix Slack puppet bridge")]
struct Cli {
    /// YAML configuration file; environment variables override it
    #[arg(long, short, global = true, env = "BRIDGE_CONFIG", default_value = "config.yaml")]
    config: PathBuf,
    /// Emit JSON output
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the resolved configuration with secrets redacted
    CheckConfig,
    /// Connect one account, print its identity and channels, then disconnect
    Probe {
        #[arg(long, env = "SLACK_TOKEN", hide_env_values = true)]
        token: String,
    },
}

#[derive(Serialize)]
struct ProbeReport<'a> {
    identity: &'a AuthIdentity,
    channels: Vec<ProbeChannel>,
}

#[derive(Serialize)]
struct ProbeChannel {
    id: String,
    name: String,
    direct: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = BridgeConfig::load(Some(cli.config.as_path()))?;

    match cli.command {
        Commands::CheckConfig => {
            let redacted = config.redacted();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&redacted)?);
            } else {
                print!("{}", serde_yaml::to_string(&redacted)?);
            }
        }
        Commands::Probe { token } => {
            init_telemetry(TelemetryConfig::from_env(
                "msp-bridge",
                env!("CARGO_PKG_VERSION"),
            ))?;
            probe(&config, &token, cli.json).await?;
        }
    }

    Ok(())
}

async fn probe(config: &BridgeConfig, token: &str, json: bool) -> Result<()> {
    let (factory, hub) = SlackClientFactory::from_config(config);
    let server = match hub {
        Some(hub) => {
            let listener = TcpListener::bind(&config.slack.webhook.bind)
                .await
                .with_context(|| format!("binding {}", config.slack.webhook.bind))?;
            info!(bind = %config.slack.webhook.bind, "slack events listener started");
            let app = hub.router();
            Some(tokio::spawn(async move {
                if let Err(err) = axum::serve(listener, app.into_make_service()).await {
                    warn!(error = %err, "slack events listener stopped");
                }
            }))
        }
        None => None,
    };

    let (client, _events) = factory.create(PuppetId(0), token);
    let identity = client.connect().await.context("connecting to slack")?;
    let mut channels: Vec<ProbeChannel> = client
        .list_channels()
        .await
        .into_iter()
        .map(|channel| ProbeChannel {
            name: channel.name.unwrap_or_default(),
            direct: channel.is_direct,
            id: channel.id,
        })
        .collect();
    channels.sort_by(|a, b| a.name.cmp(&b.name));
    client.disconnect();
    if let Some(server) = server {
        server.abort();
    }

    if json {
        let report = ProbeReport {
            identity: &identity,
            channels,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("team   : {} ({})", identity.team, identity.team_id);
        println!("user   : {} ({})", identity.user, identity.user_id);
        println!("channels:");
        for channel in &channels {
            let kind = if channel.direct { "dm" } else { "channel" };
            println!("  {:<12} {:<8} {}", channel.id, kind, channel.name);
        }
    }
    Ok(())
}
