use std::{sync::Arc, time::Duration};

use msp_core::{PuppetId, RemoteBot, RemoteChannel, TransportError};
use msp_slack::{ClientEvent, ClientOptions, PostMessage, RemoteClient, TransportEvent};
use msp_testutil::{MockSlackApi, ScriptedConnector, channel, user};
use tokio::{sync::mpsc::UnboundedReceiver, time::Instant};

struct Harness {
    api: Arc<MockSlackApi>,
    connector: Arc<ScriptedConnector>,
    client: RemoteClient,
    events: UnboundedReceiver<ClientEvent>,
}

fn harness() -> Harness {
    let api = Arc::new(MockSlackApi::new());
    let connector = Arc::new(ScriptedConnector::new());
    let (client, events) = RemoteClient::new(
        PuppetId(1),
        api.clone(),
        connector.clone(),
        ClientOptions::default(),
    );
    Harness {
        api,
        connector,
        client,
        events,
    }
}

async fn connected() -> Harness {
    let mut h = harness();
    let identity = h.client.connect().await.unwrap();
    assert_eq!(identity.user_id, "U0");
    assert_eq!(
        h.events.recv().await,
        Some(ClientEvent::Authenticated(identity))
    );
    h
}

#[tokio::test(start_paused = true)]
async fn unexpected_drop_reconnects_once_after_delay() {
    let mut h = connected().await;

    h.connector.drop_connection();
    assert_eq!(h.events.recv().await, Some(ClientEvent::ConnectionLost));
    let lost_at = Instant::now();

    tokio::time::sleep(Duration::from_secs(59)).await;
    assert_eq!(h.connector.connect_count(), 1);

    assert!(matches!(
        h.events.recv().await,
        Some(ClientEvent::Authenticated(_))
    ));
    assert!(lost_at.elapsed() >= Duration::from_secs(60));
    assert_eq!(h.events.recv().await, Some(ClientEvent::Reconnected));
    assert_eq!(h.connector.connect_count(), 2);
    assert_eq!(h.api.calls("auth.test"), 2);
    assert!(h.connector.is_connected());
}

#[tokio::test(start_paused = true)]
async fn drop_after_disconnect_never_reconnects() {
    let mut h = connected().await;

    h.client.disconnect();
    h.connector.drop_connection();
    tokio::time::sleep(Duration::from_secs(600)).await;

    assert!(h.client.is_stopped());
    assert_eq!(h.connector.connect_count(), 1);
    assert!(h.events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn failed_reconnect_is_not_retried() {
    let mut h = connected().await;
    h.connector.refuse_next(10);

    h.connector.drop_connection();
    assert_eq!(h.events.recv().await, Some(ClientEvent::ConnectionLost));
    assert!(matches!(
        h.events.recv().await,
        Some(ClientEvent::Authenticated(_))
    ));
    assert!(matches!(
        h.events.recv().await,
        Some(ClientEvent::ReconnectFailed(_))
    ));

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(h.connector.connect_count(), 2);
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn invalid_credentials_reject_connect() {
    let h = harness();
    h.api.fail("auth.test", "invalid_auth");

    let err = h.client.connect().await.unwrap_err();
    assert!(matches!(err, TransportError::AuthRejected(_)), "{err:?}");
    assert_eq!(h.connector.connect_count(), 0);
}

#[tokio::test]
async fn stream_closing_before_ready_fails_connect() {
    let h = harness();
    h.connector.set_silent(true);

    let err = h.client.connect().await.unwrap_err();
    assert!(matches!(err, TransportError::ClosedBeforeReady), "{err:?}");
}

#[tokio::test(start_paused = true)]
async fn concurrent_lookups_share_one_fetch() {
    let mut h = harness();
    h.api.add_user(user("U1", "Ann"));
    h.api.set_delay(Duration::from_secs(1));

    let (first, second) = tokio::join!(h.client.get_user("U1"), h.client.get_user("U1"));

    assert_eq!(h.api.calls("users.info"), 1);
    assert_eq!(first.as_ref().map(|u| u.display()), Some("Ann"));
    assert_eq!(first, second);
    assert!(matches!(
        h.events.try_recv(),
        Ok(ClientEvent::UserUpdated(updated)) if updated.id == "U1"
    ));
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn cached_entities_skip_the_network() {
    let h = harness();
    h.api.add_channel(channel("C1", "general"));

    assert!(h.client.get_channel("C1").await.is_some());
    assert!(h.client.get_channel("general").await.is_some());
    assert_eq!(h.api.calls("conversations.info"), 1);
}

#[tokio::test]
async fn failed_lookups_degrade_and_release() {
    let h = harness();

    assert_eq!(h.client.get_user("U404").await, None);
    assert_eq!(h.client.get_bot("B404").await, RemoteBot::unknown("B404"));
    assert_eq!(h.client.get_bot("B404").await.name, "unknown");
    assert_eq!(h.api.calls("bots.info"), 2);
}

#[tokio::test]
async fn usergroups_are_listed_once() {
    let h = harness();
    h.api.fail("usergroups.list", "missing_scope");

    assert_eq!(h.client.get_usergroup("S1").await, None);
    assert_eq!(h.client.get_usergroup("S2").await, None);
    assert_eq!(h.api.calls("usergroups.list"), 1);
}

#[tokio::test]
async fn transport_events_update_cache_and_surface() {
    let mut h = connected().await;
    h.api.add_channel(RemoteChannel {
        topic: Some("planning".into()),
        ..channel("C1", "general")
    });
    h.client.get_channel("C1").await;
    assert!(matches!(
        h.events.recv().await,
        Some(ClientEvent::ChannelUpdated(_))
    ));

    h.connector
        .push(TransportEvent::ChannelChanged(channel("C1", "renamed")))
        .await;
    let Some(ClientEvent::ChannelUpdated(renamed)) = h.events.recv().await else {
        panic!("expected channel update");
    };
    assert_eq!(renamed.name.as_deref(), Some("renamed"));
    assert_eq!(renamed.topic.as_deref(), Some("planning"));
    assert_eq!(h.client.cache().channel("renamed"), Some(renamed));

    h.connector
        .push(TransportEvent::Presence {
            user: "U1".into(),
            presence: "active".into(),
        })
        .await;
    assert_eq!(
        h.events.recv().await,
        Some(ClientEvent::Presence {
            user: "U1".into(),
            presence: msp_core::Presence::Online
        })
    );
}

#[tokio::test]
async fn rejected_sends_surface_delivery_errors() {
    let h = harness();
    h.api.fail("chat.postMessage", "channel_not_found");

    let err = h
        .client
        .send_message(&PostMessage {
            channel: "C1".into(),
            text: "hi".into(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.operation, "chat.postMessage");
    assert_eq!(err.reason, "channel_not_found");

    let ts = h
        .client
        .send_message(&PostMessage {
            channel: "C1".into(),
            text: "waves".into(),
            emote: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(ts, "1700000000.000001");
}
