use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::{CaseInfo, DisplayRole, EvidenceItem},
    protocol::{ClientRequest, ServerEvent, StartTrialPayload, UserInput},
};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::info;

pub mod dedup;
pub mod mapping;
pub mod session;
pub mod transport;

pub use session::{ConnectionStatus, SessionEvent, SessionState, TranscriptEntry};
pub use transport::WsTrialChannel;

/// Push-based delivery target for a connected channel. The per-event
/// callbacks of the wire contract collapse into `on_event`, since
/// `ServerEvent` already distinguishes them (pong included).
#[async_trait]
pub trait ChannelSink: Send + Sync {
    async fn on_open(&self);
    async fn on_event(&self, event: ServerEvent);
    async fn on_close(&self);
}

/// One persistent connection to the trial backend. `connect` resolves once
/// the transport is open and rejects on immediate failure; afterwards events
/// are pushed to the sink in delivery order. `send` fails loudly while not
/// connected; `disconnect` is idempotent.
#[async_trait]
pub trait TrialChannel: Send + Sync {
    async fn connect(&self, sink: Arc<dyn ChannelSink>) -> Result<()>;
    async fn send(&self, request: &ClientRequest) -> Result<()>;
    async fn disconnect(&self);
    async fn is_connected(&self) -> bool;
}

pub struct MissingTrialChannel;

#[async_trait]
impl TrialChannel for MissingTrialChannel {
    async fn connect(&self, _sink: Arc<dyn ChannelSink>) -> Result<()> {
        Err(anyhow!("trial channel unavailable"))
    }

    async fn send(&self, _request: &ClientRequest) -> Result<()> {
        Err(anyhow!("trial channel unavailable"))
    }

    async fn disconnect(&self) {}

    async fn is_connected(&self) -> bool {
        false
    }
}

#[derive(Debug, Error)]
pub enum TrialClientError {
    #[error("a trial session is already active; disconnect it first")]
    AlreadyConnected,
    #[error("failed to open trial session: {0}")]
    Connect(String),
}

/// Owns the one session state and the one channel of a client process.
/// Inbound events are applied to the state atomically, one at a time, and
/// surfaced to observers through a broadcast stream.
pub struct TrialClient {
    channel: Arc<dyn TrialChannel>,
    inner: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl TrialClient {
    pub fn new(channel: Arc<dyn TrialChannel>) -> Arc<Self> {
        Self::with_operator(channel, DisplayRole::Defense)
    }

    pub fn with_operator(channel: Arc<dyn TrialChannel>, operator_role: DisplayRole) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            channel,
            inner: Mutex::new(SessionState::with_operator(operator_role)),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> SessionState {
        self.inner.lock().await.clone()
    }

    fn broadcast(&self, events: Vec<SessionEvent>) {
        for event in events {
            let _ = self.events.send(event);
        }
    }

    /// Opens the channel and asks the backend to start the trial. Refuses to
    /// open a second connection while one is active; callers tear the
    /// existing session down first.
    pub async fn connect(
        self: &Arc<Self>,
        case_info: CaseInfo,
        evidence_list: Vec<EvidenceItem>,
    ) -> std::result::Result<(), TrialClientError> {
        {
            let mut state = self.inner.lock().await;
            if state.connection_status != ConnectionStatus::Disconnected {
                return Err(TrialClientError::AlreadyConnected);
            }
            state.begin_connecting();
            state.attorney_name = case_info.attorney_name.clone();
            state.evidence_list = evidence_list.clone();
        }

        let sink: Arc<dyn ChannelSink> = Arc::clone(self) as Arc<dyn ChannelSink>;
        if let Err(err) = self.channel.connect(sink).await {
            let events = {
                let mut state = self.inner.lock().await;
                state.push_log(format!("connection failed: {err}"));
                state.mark_disconnected()
            };
            self.broadcast(events);
            return Err(TrialClientError::Connect(err.to_string()));
        }

        let request = ClientRequest::StartTrial {
            data: StartTrialPayload {
                case_info,
                evidence_list,
            },
        };
        if let Err(err) = self.channel.send(&request).await {
            self.channel.disconnect().await;
            let events = {
                let mut state = self.inner.lock().await;
                state.push_log(format!("failed to request trial start: {err}"));
                state.mark_disconnected()
            };
            self.broadcast(events);
            return Err(TrialClientError::Connect(err.to_string()));
        }

        self.inner.lock().await.push_log("start_trial dispatched");
        info!("trial start requested");
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.channel.disconnect().await;
        let events = self.inner.lock().await.mark_disconnected();
        self.broadcast(events);
    }

    /// Tears the connection down and restores the state to its initial
    /// values, ledger included.
    pub async fn clear_session(&self) {
        self.channel.disconnect().await;
        let events = {
            let mut state = self.inner.lock().await;
            let events = state.mark_disconnected();
            state.reset();
            state.push_log("session cleared");
            events
        };
        self.broadcast(events);
    }

    /// Answers the pending interrupt. Precondition violations (nothing
    /// pending, no session thread) are logged no-ops; a failed send leaves
    /// the interrupt in place so the user can retry submitting.
    pub async fn respond(&self, input: UserInput) {
        let mut state = self.inner.lock().await;
        let Some(request) = state.build_user_input(input.clone()) else {
            return;
        };
        match self.channel.send(&request).await {
            Ok(()) => {
                let events = state.commit_response(&input);
                drop(state);
                self.broadcast(events);
            }
            Err(err) => {
                state.push_log(format!("failed to send input: {err}"));
            }
        }
    }

    /// Restores the last cleared interrupt so the user can submit again.
    pub async fn retry(&self) {
        let events = self.inner.lock().await.retry();
        self.broadcast(events);
    }
}

#[async_trait]
impl ChannelSink for TrialClient {
    async fn on_open(&self) {
        self.inner.lock().await.push_log("websocket connection established");
    }

    async fn on_event(&self, event: ServerEvent) {
        let events = self.inner.lock().await.apply_server_event(event);
        self.broadcast(events);
    }

    async fn on_close(&self) {
        let events = {
            let mut state = self.inner.lock().await;
            state.push_log("websocket connection closed");
            state.mark_disconnected()
        };
        self.broadcast(events);
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
