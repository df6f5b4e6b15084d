//! Line-oriented terminal front end for both sides of the desk.
//!
//! Stdin lines become outgoing chat; the shared log is re-rendered to stdout
//! on a short interval. Logs go to stderr, so stdout is only the chat.

use std::io::{self, Write};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};

use helpdesk_error::HelpdeskError;

use crate::client::SupportClient;
use crate::conversation::ChatEntry;
use crate::server::Helpdesk;

const RENDER_INTERVAL: Duration = Duration::from_millis(100);

/// Tracks what has already been printed so each render only emits new lines.
#[derive(Debug, Default)]
struct Transcript {
    epoch: Option<u64>,
    printed: usize,
}

impl Transcript {
    fn render(&mut self, epoch: u64, entries: &[ChatEntry], out: &mut impl Write) -> io::Result<()> {
        if self.epoch != Some(epoch) {
            if self.epoch.is_some() {
                writeln!(out, "----")?;
            }
            self.epoch = Some(epoch);
            self.printed = 0;
        }
        let start = self.printed.min(entries.len());
        for entry in &entries[start..] {
            writeln!(out, "{}", format_entry(entry))?;
        }
        self.printed = entries.len();
        out.flush()
    }
}

fn format_entry(entry: &ChatEntry) -> String {
    let marker = if entry.local { '>' } else { '<' };
    format!("{marker} {}: {}", entry.sender, entry.text)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AgentStatus {
    Idle { waiting: usize },
    Serving { client: String, waiting: usize },
}

impl AgentStatus {
    fn of(desk: &Helpdesk) -> Self {
        let waiting = desk.waiting_count();
        match desk.active_display_name() {
            Some(client) => Self::Serving { client, waiting },
            None => Self::Idle { waiting },
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Idle { waiting } => format!("-- no active client, {waiting} waiting --"),
            Self::Serving { client, waiting } => {
                format!("-- serving {client}, {waiting} waiting --")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientStatus {
    Waiting,
    Chatting,
    Disconnected,
}

impl ClientStatus {
    fn of(client: &SupportClient) -> Self {
        if !client.is_connected() {
            Self::Disconnected
        } else if client.is_blocked() {
            Self::Waiting
        } else {
            Self::Chatting
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::Waiting => "-- waiting for an agent --",
            Self::Chatting => "-- connected to an agent --",
            Self::Disconnected => "-- disconnected --",
        }
    }
}

/// Runs the agent console until stdin closes, Ctrl-C, or the desk stops.
pub async fn run_agent(desk: &Helpdesk) -> io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(RENDER_INTERVAL);
    let stopped = desk.cancellation();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut transcript = Transcript::default();
    let mut status = None;
    write_stdout_line(&format!("help desk listening on {}", desk.local_addr()))?;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = stopped.cancelled() => break,
            line = lines.next_line() => match line? {
                Some(line) => agent_input(desk, line.trim_end()).await?,
                None => break,
            },
            _ = ticker.tick() => {}
        }

        let current = AgentStatus::of(desk);
        if status.as_ref() != Some(&current) {
            write_stdout_line(&current.describe())?;
            status = Some(current);
        }
        let (epoch, entries) = desk.snapshot_with_epoch();
        transcript.render(epoch, &entries, &mut io::stdout().lock())?;
    }
    Ok(())
}

async fn agent_input(desk: &Helpdesk, text: &str) -> io::Result<()> {
    if text.is_empty() {
        return Ok(());
    }
    match desk.send_to_active(text).await {
        Ok(()) => {
            desk.append_message(desk.labels().agent.clone(), text, true);
            Ok(())
        }
        Err(HelpdeskError::NoActiveSession) => write_stdout_line("-- no client to send to --"),
        Err(err) => {
            tracing::warn!(error = %err, "message not sent");
            write_stdout_line(&format!("-- not sent: {err} --"))
        }
    }
}

/// Runs the client console until stdin closes, Ctrl-C, or the desk hangs up.
pub async fn run_client(client: &SupportClient) -> io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(RENDER_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut transcript = Transcript::default();
    let mut status = None;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            line = lines.next_line() => match line? {
                Some(line) => client_input(client, line.trim_end()).await?,
                None => break,
            },
            _ = ticker.tick() => {}
        }

        let (epoch, entries) = client.snapshot_with_epoch();
        transcript.render(epoch, &entries, &mut io::stdout().lock())?;
        let current = ClientStatus::of(client);
        if status != Some(current) {
            write_stdout_line(current.describe())?;
            status = Some(current);
        }
        if current == ClientStatus::Disconnected {
            break;
        }
    }
    Ok(())
}

async fn client_input(client: &SupportClient, text: &str) -> io::Result<()> {
    if text.is_empty() {
        return Ok(());
    }
    match client.send(text).await {
        Ok(()) => Ok(()),
        Err(HelpdeskError::SessionBlocked) => {
            write_stdout_line("-- still waiting for an agent, message not sent --")
        }
        Err(err) => {
            tracing::warn!(error = %err, "message not sent");
            write_stdout_line(&format!("-- not sent: {err} --"))
        }
    }
}

fn write_stdout_line(text: &str) -> io::Result<()> {
    let mut out = io::stdout();
    out.write_all(text.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()
}
