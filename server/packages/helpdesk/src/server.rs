//! Agent-side runtime: acceptor, receiver and dispatcher loops around the
//! shared log, registry, queue and session slot.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use helpdesk_error::HelpdeskError;

use crate::config::{Labels, ServerConfig, TICKET_FAILED_NOTICE, TICKET_SAVED_NOTICE};
use crate::conversation::{ChatEntry, ConversationLog};
use crate::protocol::Frame;
use crate::queue::WaitingQueue;
use crate::registry::{ClientRegistry, UNKNOWN_CLIENT};
use crate::session::SessionController;
use crate::ticket::{Ticket, TicketWriter};
use crate::transport::{Endpoint, Listener};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct Shared {
    log: ConversationLog,
    registry: ClientRegistry,
    session: SessionController,
    tickets: TicketWriter,
    labels: Labels,
    idle_poll: Duration,
}

/// A running help desk.
///
/// Created by [`Helpdesk::start`], which binds the listener and spawns the
/// background loops. The methods on this type are the whole surface a UI
/// needs: read the log, append its own lines, send to the active client.
#[derive(Debug)]
pub struct Helpdesk {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl Helpdesk {
    pub async fn start(config: ServerConfig) -> Result<Self, HelpdeskError> {
        let listener = Listener::bind(&config.host, config.port, config.backlog).await?;
        let local_addr = listener.local_addr();

        let shared = Arc::new(Shared {
            log: ConversationLog::new(),
            registry: ClientRegistry::new(config.labels.client_prefix.clone()),
            session: SessionController::new(Arc::new(WaitingQueue::new())),
            tickets: TicketWriter::new(config.ticket_dir.clone(), config.ticket_format),
            labels: config.labels.clone(),
            idle_poll: config.idle_poll,
        });
        let cancel = CancellationToken::new();

        let mut tasks = vec![
            tokio::spawn(accept_loop(listener, shared.clone(), cancel.clone())),
            tokio::spawn(receive_loop(shared.clone(), cancel.clone())),
        ];
        if let Some(interval) = config.dispatch_interval {
            tasks.push(tokio::spawn(dispatch_loop(
                shared.clone(),
                interval,
                cancel.clone(),
            )));
        }

        tracing::info!(
            addr = %local_addr,
            ticket_dir = %config.ticket_dir.display(),
            ticket_format = ?config.ticket_format,
            dispatcher = config.dispatch_interval.is_some(),
            "help desk started"
        );

        Ok(Self {
            shared,
            local_addr,
            cancel,
            tasks: Mutex::new(tasks),
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn labels(&self) -> &Labels {
        &self.shared.labels
    }

    pub fn append_message(&self, sender: impl Into<String>, text: impl Into<String>, local: bool) {
        self.shared.log.append(sender, text, local);
    }

    pub fn snapshot(&self) -> Vec<ChatEntry> {
        self.shared.log.snapshot()
    }

    pub fn snapshot_with_epoch(&self) -> (u64, Vec<ChatEntry>) {
        self.shared.log.snapshot_with_epoch()
    }

    pub fn clear_log(&self) {
        self.shared.log.clear();
    }

    /// Sends one chat line to the client being served. The caller appends
    /// its own copy to the log.
    pub async fn send_to_active(&self, text: &str) -> Result<(), HelpdeskError> {
        self.shared.session.send(text).await
    }

    pub fn is_busy(&self) -> bool {
        self.shared.session.is_busy()
    }

    pub fn active_display_name(&self) -> Option<String> {
        self.shared
            .session
            .current()
            .map(|endpoint| self.shared.registry.name_of(endpoint.id()))
    }

    pub fn has_waiting(&self) -> bool {
        !self.shared.session.queue().is_empty()
    }

    pub fn waiting_count(&self) -> usize {
        self.shared.session.queue().len()
    }

    /// One dispatcher step for callers running without the background
    /// dispatcher. Returns the display name of the promoted client.
    pub async fn dispatch_tick(&self) -> Result<Option<String>, HelpdeskError> {
        self.shared.dispatch_tick().await
    }

    /// Child token cancelled when the help desk shuts down.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Stops the loops and closes every remaining connection. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "help desk task ended abnormally");
            }
        }

        if let Some(active) = self.shared.session.release() {
            active.close().await;
        }
        let mut dropped = 0usize;
        while let Some(waiting) = self.shared.session.queue().dequeue() {
            waiting.close().await;
            dropped += 1;
        }
        tracing::info!(dropped_waiting = dropped, "help desk stopped");
    }
}

impl Drop for Helpdesk {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Shared {
    async fn admit(&self, endpoint: Arc<Endpoint>) {
        let identity = self.registry.register(endpoint.id());
        tracing::info!(
            connection = %endpoint.id(),
            peer = %endpoint.peer(),
            client = %identity.display_name,
            "client connected"
        );

        // /WAIT goes out before the handle is visible to the dispatcher.
        if let Err(err) = endpoint.send(Frame::Wait).await {
            tracing::warn!(
                connection = %endpoint.id(),
                error = %err,
                "failed to send wait signal"
            );
        }
        if !self.session.queue().enqueue(endpoint.clone()) {
            tracing::debug!(connection = %endpoint.id(), "client already queued");
        }
        tracing::debug!(waiting = self.session.queue().len(), "client queued");
    }

    async fn dispatch_tick(&self) -> Result<Option<String>, HelpdeskError> {
        if self.session.is_busy() || self.session.queue().is_empty() {
            return Ok(None);
        }
        let promoted = self
            .session
            .take_next_with(|endpoint| {
                let name = self.registry.name_of(endpoint.id());
                self.log.clear();
                self.log.append(
                    self.labels.system.clone(),
                    self.labels.connected_notice(&name),
                    true,
                );
            })
            .await?;
        Ok(promoted.map(|endpoint| self.registry.name_of(endpoint.id())))
    }

    /// Writes the ticket for `endpoint`, posts the closing notice and frees
    /// the slot.
    async fn end_session(&self, endpoint: &Endpoint) {
        let transcript = self.log.snapshot();
        let ticket = match self.registry.lookup(endpoint.id()) {
            Some(identity) => Ticket::for_client(&identity, transcript, Local::now()),
            None => Ticket::new(0, UNKNOWN_CLIENT, transcript, Local::now()),
        };

        let notice = match self.tickets.write(&ticket).await {
            Ok(_) => TICKET_SAVED_NOTICE,
            Err(err) => {
                tracing::error!(
                    connection = %endpoint.id(),
                    client = %ticket.client_name,
                    error = %err,
                    "ticket not saved"
                );
                TICKET_FAILED_NOTICE
            }
        };
        self.log.append(self.labels.system.clone(), notice, true);

        endpoint.close().await;
        self.session.release_if(endpoint.id());
        tracing::info!(
            connection = %endpoint.id(),
            client = %ticket.client_name,
            messages = ticket.message_count,
            "session ended"
        );
    }
}

async fn accept_loop(listener: Listener, shared: Arc<Shared>, cancel: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok(endpoint) => shared.admit(Arc::new(endpoint)).await,
            Err(err) => {
                tracing::warn!(error = %err, "accept failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                }
            }
        }
    }
    tracing::debug!("accept loop stopped");
}

async fn receive_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    loop {
        let Some(endpoint) = shared.session.current() else {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(shared.idle_poll) => {}
            }
            continue;
        };

        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = endpoint.recv() => received,
        };
        let active = shared.session.is_current(endpoint.id());
        match received {
            Ok(Some(line)) if active => {
                let name = shared.registry.name_of(endpoint.id());
                shared.log.append(name, line, false);
            }
            Ok(Some(_)) => {
                tracing::debug!(connection = %endpoint.id(), "dropping line from inactive client");
            }
            Ok(None) if active => {
                tracing::info!(connection = %endpoint.id(), "client disconnected");
                shared.end_session(&endpoint).await;
            }
            Err(err) if active => {
                tracing::warn!(connection = %endpoint.id(), error = %err, "receive failed");
                shared.end_session(&endpoint).await;
            }
            Ok(None) | Err(_) => {
                tracing::debug!(connection = %endpoint.id(), "ignoring stale connection");
            }
        }
    }
    tracing::debug!("receive loop stopped");
}

async fn dispatch_loop(shared: Arc<Shared>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match shared.dispatch_tick().await {
            Ok(Some(name)) => tracing::info!(client = %name, "client promoted"),
            Ok(None) | Err(HelpdeskError::SessionBusy { .. }) => {}
            Err(err) => tracing::warn!(error = %err, "dispatch failed"),
        }
    }
    tracing::debug!("dispatch loop stopped");
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;

    use super::*;

    fn config(dir: &std::path::Path) -> ServerConfig {
        ServerConfig {
            port: 0,
            ticket_dir: dir.to_path_buf(),
            idle_poll: Duration::from_millis(10),
            dispatch_interval: None,
            ..ServerConfig::default()
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn next_line(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> String {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line))
            .await
            .expect("line in time")
            .expect("read line");
        line.trim_end().to_string()
    }

    #[tokio::test]
    async fn bind_conflict_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let desk = Helpdesk::start(config(dir.path())).await.expect("start");

        let mut taken = config(dir.path());
        taken.port = desk.local_addr().port();
        let err = Helpdesk::start(taken).await.expect_err("port in use");
        assert!(err.is_fatal());

        desk.shutdown().await;
    }

    #[tokio::test]
    async fn manual_dispatch_promotes_waiting_client() {
        let dir = tempfile::tempdir().expect("tempdir");
        let desk = Helpdesk::start(config(dir.path())).await.expect("start");
        assert_eq!(desk.dispatch_tick().await.expect("tick"), None);

        let stream = TcpStream::connect(desk.local_addr()).await.expect("connect");
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        assert_eq!(next_line(&mut reader).await, "/WAIT");
        wait_until(|| desk.has_waiting()).await;
        assert!(!desk.is_busy());

        desk.append_message("Sistema", "stale", true);
        let promoted = desk.dispatch_tick().await.expect("tick");
        assert_eq!(promoted.as_deref(), Some("Cliente 1"));
        assert_eq!(next_line(&mut reader).await, "/START");
        assert_eq!(desk.active_display_name().as_deref(), Some("Cliente 1"));
        assert_eq!(
            desk.snapshot(),
            vec![ChatEntry::new("Sistema", "Conectado con: Cliente 1", true)]
        );

        write_half.write_all(b"Hola\n").await.expect("write");
        wait_until(|| desk.snapshot().len() == 2).await;
        assert_eq!(desk.snapshot()[1], ChatEntry::new("Cliente 1", "Hola", false));

        desk.send_to_active("Hi").await.expect("send");
        assert_eq!(next_line(&mut reader).await, "Hi");

        desk.shutdown().await;
        desk.shutdown().await;
        assert!(!desk.is_busy());
    }

    #[tokio::test]
    async fn disconnect_writes_ticket_and_frees_slot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let desk = Helpdesk::start(config(dir.path())).await.expect("start");

        let stream = TcpStream::connect(desk.local_addr()).await.expect("connect");
        wait_until(|| desk.has_waiting()).await;
        desk.dispatch_tick().await.expect("tick");
        assert!(desk.is_busy());

        drop(stream);
        wait_until(|| !desk.is_busy()).await;

        let tickets: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(Result::ok)
            .collect();
        assert_eq!(tickets.len(), 1);
        let last = desk.snapshot().pop().expect("closing notice");
        assert_eq!(last, ChatEntry::new("Sistema", TICKET_SAVED_NOTICE, true));

        desk.shutdown().await;
    }

    #[tokio::test]
    async fn send_without_session_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let desk = Helpdesk::start(config(dir.path())).await.expect("start");
        assert!(matches!(
            desk.send_to_active("Hi").await,
            Err(HelpdeskError::NoActiveSession)
        ));
        assert_eq!(desk.active_display_name(), None);
        desk.shutdown().await;
    }
}
