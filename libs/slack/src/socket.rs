//! Socket Mode transport: a websocket opened with an app-level token.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use msp_core::TransportError;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::api::open_socket_url;
use crate::events::{Connector, TransportEvent, parse_event};
use crate::routes::TeamRoutes;
use crate::wire::AuthIdentity;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Frame as Slack sends it over the socket.
#[derive(Debug, Deserialize)]
struct Frame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    reason: Option<String>,
}

/// What to do with one decoded frame.
#[derive(Debug, PartialEq)]
enum Step {
    Ready,
    /// Event for the accounts of `team`, or for every account when the
    /// payload names no team.
    Deliver {
        team: Option<String>,
        event: TransportEvent,
    },
    Skip,
    Close,
}

fn classify(frame: &Frame) -> Step {
    match frame.kind.as_str() {
        "hello" => Step::Ready,
        "disconnect" => Step::Close,
        "events_api" => {
            let Some(payload) = frame.payload.as_ref() else {
                return Step::Skip;
            };
            let team = payload
                .get("team_id")
                .and_then(Value::as_str)
                .map(str::to_string);
            payload
                .get("event")
                .and_then(parse_event)
                .map_or(Step::Skip, |event| Step::Deliver { team, event })
        }
        _ => Step::Skip,
    }
}

/// Socket Mode connector shared by every account of one Slack app.
///
/// Slack spreads events across all open connections of an app, so a single
/// socket is opened and its events are fanned out per team. When the socket
/// drops, every account stream ends and the next `connect` opens a new one.
#[derive(Clone)]
pub struct SocketModeConnector {
    http: reqwest::Client,
    api_base: String,
    app_token: String,
    routes: Arc<TeamRoutes>,
    opening: Arc<Mutex<()>>,
}

impl SocketModeConnector {
    pub fn new(
        http: reqwest::Client,
        api_base: impl Into<String>,
        app_token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            api_base: api_base.into(),
            app_token: app_token.into(),
            routes: Arc::new(TeamRoutes::default()),
            opening: Arc::new(Mutex::new(())),
        }
    }
}

#[async_trait]
impl Connector for SocketModeConnector {
    async fn connect(
        &self,
        identity: &AuthIdentity,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        let _opening = self.opening.lock().await;
        if let Some(events) = self.routes.try_subscribe(&identity.team_id) {
            debug!(
                team = %identity.team_id,
                user = %identity.user_id,
                "joined socket mode connection"
            );
            return Ok(events);
        }

        let url = open_socket_url(&self.http, &self.api_base, &self.app_token).await?;
        let (socket, _) = connect_async(url.as_str())
            .await
            .map_err(|err| TransportError::ConnectFailed(err.to_string()))?;
        info!(team = %identity.team_id, user = %identity.user_id, "socket mode connected");

        self.routes.open();
        let events = self.routes.subscribe(&identity.team_id);
        tokio::spawn(read_socket(socket, Arc::clone(&self.routes)));
        Ok(events)
    }
}

async fn read_socket(socket: Socket, routes: Arc<TeamRoutes>) {
    let (mut sink, mut stream) = socket.split();
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                warn!(error = %err, "socket mode read failed");
                break;
            }
        };
        let frame: Frame = match serde_json::from_str(text.as_str()) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "undecodable socket mode frame");
                continue;
            }
        };
        if let Some(envelope_id) = &frame.envelope_id {
            let ack = json!({ "envelope_id": envelope_id }).to_string();
            if let Err(err) = sink.send(Message::text(ack)).await {
                warn!(error = %err, "socket mode ack failed");
                break;
            }
        }
        match classify(&frame) {
            Step::Ready => routes.mark_ready(),
            Step::Deliver { team, event } => {
                if routes.dispatch(team.as_deref(), event).await == 0 {
                    debug!(team = ?team, "no account attached for slack team");
                }
            }
            Step::Skip => {}
            Step::Close => {
                debug!(reason = ?frame.reason, "slack requested disconnect");
                break;
            }
        }
    }
    routes.close_all();
    if let Err(err) = sink.close().await {
        debug!(error = %err, "socket mode close failed");
    }
    debug!("socket mode stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(raw: &str) -> Frame {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn hello_frame_is_ready() {
        assert_eq!(
            classify(&frame(r#"{"type":"hello","num_connections":1}"#)),
            Step::Ready
        );
    }

    #[test]
    fn events_api_frames_unwrap_payload() {
        let step = classify(&frame(
            r#"{"type":"events_api","envelope_id":"e1","payload":{"team_id":"T1","event":{"type":"user_typing","channel":"C1","user":"U1"}}}"#,
        ));
        assert_eq!(
            step,
            Step::Deliver {
                team: Some("T1".into()),
                event: TransportEvent::Typing {
                    channel: "C1".into(),
                    user: "U1".into()
                },
            }
        );
    }

    #[test]
    fn disconnect_closes_and_unknown_skips() {
        assert_eq!(
            classify(&frame(
                r#"{"type":"disconnect","reason":"refresh_requested"}"#
            )),
            Step::Close
        );
        assert_eq!(classify(&frame(r#"{"type":"slash_commands"}"#)), Step::Skip);
    }

    #[test]
    fn payloads_without_a_team_go_to_everyone() {
        let raw = r#"{"type":"events_api","envelope_id":"e2","payload":{"event":{"type":"user_typing","channel":"C1","user":"U1"}}}"#;
        assert!(matches!(
            classify(&frame(raw)),
            Step::Deliver { team: None, .. }
        ));
    }

    #[tokio::test]
    async fn unreachable_app_endpoint_fails_the_connect() {
        let connector = SocketModeConnector::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9/api/",
            "xapp-test",
        );
        let identity = AuthIdentity {
            user_id: "U0".into(),
            team_id: "T1".into(),
            ..Default::default()
        };
        assert!(connector.connect(&identity).await.is_err());
        assert!(connector.routes.try_subscribe("T1").is_none());
    }
}
