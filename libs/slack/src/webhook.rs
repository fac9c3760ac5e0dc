//! Events API transport: one signed HTTP endpoint shared by every account,
//! fanned out to per-team event streams.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use hmac::{Hmac, Mac};
use msp_core::TransportError;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::events::{Connector, TransportEvent, parse_event};
use crate::routes::TeamRoutes;
use crate::wire::AuthIdentity;

type HmacSha256 = Hmac<Sha256>;

pub const EVENTS_PATH: &str = "/slack/events";
/// Requests signed further in the past than this are replays.
const MAX_SKEW_SECS: i64 = 60 * 5;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    challenge: Option<String>,
    #[serde(default)]
    team_id: Option<String>,
    #[serde(default)]
    event: Option<Value>,
}

pub struct WebhookHub {
    signing_secret: String,
    routes: TeamRoutes,
}

impl WebhookHub {
    pub fn new(signing_secret: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            signing_secret: signing_secret.into(),
            routes: TeamRoutes::ready(),
        })
    }

    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route(EVENTS_PATH, post(handle))
            .with_state(Arc::clone(self))
    }

    /// Stops routing events for `team`, ending its streams.
    pub fn detach(&self, team: &str) {
        self.routes.detach(team);
    }

    pub fn is_attached(&self, team: &str) -> bool {
        self.routes.is_attached(team)
    }

    async fn dispatch(&self, team: &str, event: TransportEvent) {
        if self.routes.dispatch(Some(team), event).await == 0 {
            debug!(team, "no account attached for slack team");
        }
    }
}

#[async_trait]
impl Connector for WebhookHub {
    async fn connect(
        &self,
        identity: &AuthIdentity,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        Ok(self.routes.subscribe(&identity.team_id))
    }
}

async fn handle(State(hub): State<Arc<WebhookHub>>, headers: HeaderMap, body: Bytes) -> Response {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    if !verify_slack_sig(&hub.signing_secret, &headers, &body) || !is_fresh(&headers, now) {
        warn!("invalid slack signature");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let envelope: Envelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(error) => {
            warn!("slack payload parse error: {error}");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match envelope.kind.as_str() {
        "url_verification" => envelope.challenge.unwrap_or_default().into_response(),
        "event_callback" => {
            let (Some(team), Some(event)) = (envelope.team_id, envelope.event) else {
                return StatusCode::BAD_REQUEST.into_response();
            };
            if let Some(event) = parse_event(&event) {
                hub.dispatch(&team, event).await;
            }
            StatusCode::OK.into_response()
        }
        _ => StatusCode::OK.into_response(),
    }
}

/// Verifies Slack's signed request using the signing secret.
///
/// ```
/// use axum::http::HeaderMap;
/// use msp_slack::verify_slack_sig;
///
/// let mut headers = HeaderMap::new();
/// headers.insert("X-Slack-Request-Timestamp", "1".parse().unwrap());
/// headers.insert("X-Slack-Signature", "v0=deadbeef".parse().unwrap());
/// assert!(!verify_slack_sig("secret", &headers, b"{}"));
/// ```
pub fn verify_slack_sig(secret: &str, headers: &HeaderMap, body: &[u8]) -> bool {
    let timestamp = header(headers, "X-Slack-Request-Timestamp");
    let signature = header(headers, "X-Slack-Signature");
    if timestamp.is_empty() || signature.is_empty() {
        return false;
    }

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(format!("v0:{timestamp}:").as_bytes());
    mac.update(body);
    let calc = format!("v0={}", hex::encode(mac.finalize().into_bytes()));
    calc.as_bytes().ct_eq(signature.as_bytes()).into()
}

fn is_fresh(headers: &HeaderMap, now: i64) -> bool {
    header(headers, "X-Slack-Request-Timestamp")
        .parse::<i64>()
        .is_ok_and(|sent| (now - sent).abs() <= MAX_SKEW_SECS)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::util::ServiceExt;
    use tracing_test::traced_test;

    use super::*;

    const SECRET: &str = "top-secret";

    fn sign(timestamp: i64, body: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(format!("v0:{timestamp}:{body}").as_bytes());
        format!("v0={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn signed_request(body: &str) -> Request<Body> {
        let timestamp = OffsetDateTime::now_utc().unix_timestamp();
        Request::builder()
            .method("POST")
            .uri(EVENTS_PATH)
            .header("X-Slack-Request-Timestamp", timestamp.to_string())
            .header("X-Slack-Signature", sign(timestamp, body))
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn identity(team: &str) -> AuthIdentity {
        AuthIdentity {
            user_id: "U0".into(),
            team_id: team.into(),
            ..Default::default()
        }
    }

    #[test]
    fn verify_slack_sig_accepts_valid_signature() {
        let body = r#"{"type":"event_callback"}"#;
        let mut headers = HeaderMap::new();
        headers.insert("X-Slack-Request-Timestamp", "1700000000".parse().unwrap());
        headers.insert("X-Slack-Signature", sign(1_700_000_000, body).parse().unwrap());
        assert!(verify_slack_sig(SECRET, &headers, body.as_bytes()));
        assert!(!verify_slack_sig("other", &headers, body.as_bytes()));
    }

    #[test]
    fn stale_timestamps_are_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Slack-Request-Timestamp", "1000".parse().unwrap());
        assert!(is_fresh(&headers, 1000 + MAX_SKEW_SECS));
        assert!(!is_fresh(&headers, 1001 + MAX_SKEW_SECS));
    }

    #[tokio::test]
    async fn answers_url_verification() {
        let hub = WebhookHub::new(SECRET);
        let response = hub
            .router()
            .oneshot(signed_request(r#"{"type":"url_verification","challenge":"abc"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"abc");
    }

    #[tokio::test]
    #[traced_test]
    async fn unsigned_requests_are_refused() {
        let hub = WebhookHub::new(SECRET);
        let request = Request::builder()
            .method("POST")
            .uri(EVENTS_PATH)
            .body(Body::from("{}"))
            .unwrap();
        let response = hub.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(logs_contain("invalid slack signature"));
    }

    #[tokio::test]
    async fn routes_events_to_the_attached_team() {
        let hub = WebhookHub::new(SECRET);
        let mut events = hub.connect(&identity("T1")).await.unwrap();
        assert_eq!(events.recv().await, Some(TransportEvent::Ready));

        let body = r#"{"type":"event_callback","team_id":"T1","event":{"type":"user_typing","channel":"C1","user":"U1"}}"#;
        let response = hub.router().oneshot(signed_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Typing {
                channel: "C1".into(),
                user: "U1".into()
            })
        );

        let other = r#"{"type":"event_callback","team_id":"T2","event":{"type":"user_typing","channel":"C1","user":"U1"}}"#;
        hub.router().oneshot(signed_request(other)).await.unwrap();
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn accounts_on_one_team_share_its_events() {
        let hub = WebhookHub::new(SECRET);
        let mut first = hub.connect(&identity("T1")).await.unwrap();
        let mut second = hub.connect(&identity("T1")).await.unwrap();
        first.recv().await;
        second.recv().await;

        let body = r#"{"type":"event_callback","team_id":"T1","event":{"type":"user_typing","channel":"C1","user":"U1"}}"#;
        hub.router().oneshot(signed_request(body)).await.unwrap();

        let typing = TransportEvent::Typing {
            channel: "C1".into(),
            user: "U1".into(),
        };
        assert_eq!(first.recv().await, Some(typing.clone()));
        assert_eq!(second.recv().await, Some(typing));
    }

    #[tokio::test]
    async fn detaching_ends_the_stream() {
        let hub = WebhookHub::new(SECRET);
        let mut events = hub.connect(&identity("T1")).await.unwrap();
        events.recv().await;
        hub.detach("T1");
        assert!(!hub.is_attached("T1"));
        assert_eq!(events.recv().await, None);
    }
}
