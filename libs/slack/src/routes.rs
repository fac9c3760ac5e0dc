//! Per-team fan-out shared by the app-level transports.
//!
//! One Slack app connection carries events for every account linked through
//! it, so each account subscribes to its team and every subscriber of that
//! team sees each event.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tokio::sync::mpsc;

use crate::events::TransportEvent;

const EVENT_BUFFER: usize = 256;

#[derive(Default)]
struct State {
    /// The shared connection exists, though it may not be ready yet.
    live: bool,
    ready: bool,
    teams: HashMap<String, Vec<mpsc::Sender<TransportEvent>>>,
}

#[derive(Default)]
pub(crate) struct TeamRoutes {
    state: Mutex<State>,
}

impl TeamRoutes {
    /// Routes that are ready from the start.
    pub(crate) fn ready() -> Self {
        Self {
            state: Mutex::new(State {
                live: true,
                ready: true,
                teams: HashMap::new(),
            }),
        }
    }

    /// Marks a new shared connection as live but not yet ready.
    pub(crate) fn open(&self) {
        let mut state = self.state();
        state.live = true;
        state.ready = false;
    }

    /// Subscribes only while a shared connection is live.
    pub(crate) fn try_subscribe(&self, team: &str) -> Option<mpsc::Receiver<TransportEvent>> {
        let mut state = self.state();
        if !state.live {
            return None;
        }
        Some(Self::add(&mut state, team))
    }

    /// Adds a stream for `team`. It starts with [`TransportEvent::Ready`]
    /// when the shared connection is already up.
    pub(crate) fn subscribe(&self, team: &str) -> mpsc::Receiver<TransportEvent> {
        Self::add(&mut self.state(), team)
    }

    fn add(state: &mut State, team: &str) -> mpsc::Receiver<TransportEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        if state.ready {
            // Fresh channel, cannot be full.
            let _ = tx.try_send(TransportEvent::Ready);
        }
        state.teams.entry(team.to_string()).or_default().push(tx);
        rx
    }

    /// Announces readiness to every current subscriber.
    pub(crate) fn mark_ready(&self) {
        let mut state = self.state();
        state.ready = true;
        for senders in state.teams.values_mut() {
            senders.retain(|tx| tx.try_send(TransportEvent::Ready).is_ok());
        }
    }

    /// Delivers `event` to the subscribers of `team`, or to everyone when
    /// the event names no team. Returns how many streams received it.
    pub(crate) async fn dispatch(&self, team: Option<&str>, event: TransportEvent) -> usize {
        let targets: Vec<mpsc::Sender<TransportEvent>> = {
            let state = self.state();
            match team {
                Some(team) => state.teams.get(team).cloned().unwrap_or_default(),
                None => state.teams.values().flatten().cloned().collect(),
            }
        };
        let mut delivered = 0;
        for tx in &targets {
            if tx.send(event.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        if delivered < targets.len() {
            self.prune();
        }
        delivered
    }

    /// Ends every stream of `team`.
    pub(crate) fn detach(&self, team: &str) {
        self.state().teams.remove(team);
    }

    pub(crate) fn is_attached(&self, team: &str) -> bool {
        self.state()
            .teams
            .get(team)
            .is_some_and(|senders| senders.iter().any(|tx| !tx.is_closed()))
    }

    /// Ends every stream; the shared connection is gone.
    pub(crate) fn close_all(&self) {
        let mut state = self.state();
        state.live = false;
        state.ready = false;
        state.teams.clear();
    }

    fn prune(&self) {
        let mut state = self.state();
        for senders in state.teams.values_mut() {
            senders.retain(|tx| !tx.is_closed());
        }
        state.teams.retain(|_, senders| !senders.is_empty());
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typing() -> TransportEvent {
        TransportEvent::Typing {
            channel: "C1".into(),
            user: "U1".into(),
        }
    }

    #[tokio::test]
    async fn every_subscriber_of_a_team_sees_each_event() {
        let routes = TeamRoutes::ready();
        let mut first = routes.subscribe("T1");
        let mut second = routes.subscribe("T1");
        let mut other = routes.subscribe("T2");
        for rx in [&mut first, &mut second, &mut other] {
            assert_eq!(rx.recv().await, Some(TransportEvent::Ready));
        }

        assert_eq!(routes.dispatch(Some("T1"), typing()).await, 2);

        assert_eq!(first.recv().await, Some(typing()));
        assert_eq!(second.recv().await, Some(typing()));
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn ready_reaches_subscribers_once() {
        let routes = TeamRoutes::default();
        let mut early = routes.subscribe("T1");
        assert!(early.try_recv().is_err());

        routes.mark_ready();
        let mut late = routes.subscribe("T1");

        assert_eq!(early.recv().await, Some(TransportEvent::Ready));
        assert_eq!(late.recv().await, Some(TransportEvent::Ready));
        assert!(early.try_recv().is_err());
        assert!(late.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_streams_are_pruned() {
        let routes = TeamRoutes::ready();
        let gone = routes.subscribe("T1");
        let mut kept = routes.subscribe("T1");
        drop(gone);

        assert_eq!(routes.dispatch(None, typing()).await, 1);
        assert_eq!(kept.recv().await, Some(TransportEvent::Ready));
        assert_eq!(kept.recv().await, Some(typing()));
        assert!(routes.is_attached("T1"));
    }

    #[tokio::test]
    async fn closing_ends_every_stream() {
        let routes = TeamRoutes::ready();
        let mut events = routes.subscribe("T1");
        events.recv().await;

        routes.close_all();

        assert_eq!(events.recv().await, None);
        assert!(!routes.is_attached("T1"));
        assert!(routes.try_subscribe("T1").is_none());
    }

    #[tokio::test]
    async fn joining_a_live_connection() {
        let routes = TeamRoutes::default();
        assert!(routes.try_subscribe("T1").is_none());

        routes.open();
        let mut events = routes.try_subscribe("T1").unwrap();
        assert!(events.try_recv().is_err());

        routes.mark_ready();
        assert_eq!(events.recv().await, Some(TransportEvent::Ready));
    }
}
