//! Customer side of the help desk.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use helpdesk_error::HelpdeskError;

use crate::config::{ClientConfig, Labels};
use crate::conversation::{ChatEntry, ConversationLog};
use crate::protocol::Frame;
use crate::transport::Endpoint;

/// Input gate driven by the server's control tokens.
///
/// Only the receive loop writes it; the input path only reads it.
#[derive(Debug)]
pub struct SessionState {
    blocked: AtomicBool,
    connected: AtomicBool,
}

impl SessionState {
    fn new() -> Self {
        Self {
            blocked: AtomicBool::new(true),
            connected: AtomicBool::new(true),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct SupportClient {
    endpoint: Arc<Endpoint>,
    log: Arc<ConversationLog>,
    state: Arc<SessionState>,
    labels: Labels,
    cancel: CancellationToken,
    closed: CancellationToken,
    receiver: Mutex<Option<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl SupportClient {
    pub async fn connect(config: &ClientConfig) -> Result<Self, HelpdeskError> {
        let endpoint = Arc::new(Endpoint::connect(&config.host, config.port).await?);
        let log = Arc::new(ConversationLog::new());
        let state = Arc::new(SessionState::new());
        let cancel = CancellationToken::new();
        let closed = CancellationToken::new();

        let receiver = tokio::spawn(receive_loop(
            endpoint.clone(),
            log.clone(),
            state.clone(),
            config.labels.agent.clone(),
            cancel.clone(),
            closed.clone(),
        ));

        Ok(Self {
            endpoint,
            log,
            state,
            labels: config.labels.clone(),
            cancel,
            closed,
            receiver: Mutex::new(Some(receiver)),
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_blocked(&self) -> bool {
        self.state.is_blocked()
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn snapshot(&self) -> Vec<ChatEntry> {
        self.log.snapshot()
    }

    pub fn snapshot_with_epoch(&self) -> (u64, Vec<ChatEntry>) {
        self.log.snapshot_with_epoch()
    }

    /// Sends one line to the agent and echoes it into the local log.
    pub async fn send(&self, text: &str) -> Result<(), HelpdeskError> {
        if !self.state.is_connected() {
            return Err(HelpdeskError::Connection {
                connection: self.endpoint.id().get(),
                message: "disconnected from help desk".to_string(),
            });
        }
        if self.state.is_blocked() {
            return Err(HelpdeskError::SessionBlocked);
        }
        let frame = Frame::relay(text)?;
        // Echo what actually went on the wire.
        let line = frame.text().to_string();
        self.endpoint.send(frame).await?;
        self.log.append(self.labels.me.clone(), line, true);
        Ok(())
    }

    /// Resolves once the connection to the help desk is gone.
    pub async fn disconnected(&self) {
        self.closed.cancelled().await;
    }

    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        if let Some(receiver) = self.receiver.lock().await.take() {
            if let Err(err) = receiver.await {
                tracing::warn!(error = %err, "client receive task ended abnormally");
            }
        }
        self.endpoint.close().await;
        self.state.connected.store(false, Ordering::SeqCst);
    }
}

impl Drop for SupportClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn receive_loop(
    endpoint: Arc<Endpoint>,
    log: Arc<ConversationLog>,
    state: Arc<SessionState>,
    agent_label: String,
    cancel: CancellationToken,
    closed: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = endpoint.recv() => received,
        };
        match received {
            Ok(Some(line)) => handle_line(&state, &log, &agent_label, &line),
            Ok(None) => {
                tracing::info!(connection = %endpoint.id(), "help desk closed the connection");
                break;
            }
            Err(err) => {
                tracing::warn!(connection = %endpoint.id(), error = %err, "receive failed");
                break;
            }
        }
    }
    state.connected.store(false, Ordering::SeqCst);
    closed.cancel();
}

fn handle_line(state: &SessionState, log: &ConversationLog, agent_label: &str, line: &str) {
    match Frame::parse(line) {
        Frame::Wait => {
            state.blocked.store(true, Ordering::SeqCst);
            tracing::info!("waiting for an agent");
        }
        Frame::Start => {
            state.blocked.store(false, Ordering::SeqCst);
            tracing::info!("connected to an agent");
        }
        Frame::Chat(text) => log.append(agent_label, text, false),
    }
}
