use std::sync::{
    Mutex, MutexGuard, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use msp_core::TransportError;
use msp_slack::{AuthIdentity, Connector, TransportEvent};
use tokio::sync::mpsc;

#[derive(Default)]
struct Live {
    sender: Option<mpsc::Sender<TransportEvent>>,
    refusals: usize,
    silent: bool,
}

/// Transport whose streams are driven by the test.
#[derive(Default)]
pub struct ScriptedConnector {
    connects: AtomicUsize,
    live: Mutex<Live>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn live(&self) -> MutexGuard<'_, Live> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// The next `count` connects are refused.
    pub fn refuse_next(&self, count: usize) {
        self.live().refusals = count;
    }

    /// Later connects close their stream before signalling ready.
    pub fn set_silent(&self, silent: bool) {
        self.live().silent = silent;
    }

    pub fn is_connected(&self) -> bool {
        self.live()
            .sender
            .as_ref()
            .is_some_and(|sender| !sender.is_closed())
    }

    /// Delivers an event on the current stream; `false` when none is open.
    pub async fn push(&self, event: TransportEvent) -> bool {
        let sender = self.live().sender.clone();
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Ends the current stream as a network failure would.
    pub fn drop_connection(&self) {
        self.live().sender = None;
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        _identity: &AuthIdentity,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let mut live = self.live();
        if live.refusals > 0 {
            live.refusals -= 1;
            return Err(TransportError::ConnectFailed("scripted refusal".into()));
        }
        let (tx, rx) = mpsc::channel(64);
        if live.silent {
            return Ok(rx);
        }
        tx.try_send(TransportEvent::Ready)
            .map_err(|err| TransportError::Other(anyhow::anyhow!("ready signal: {err}")))?;
        live.sender = Some(tx);
        Ok(rx)
    }
}
