use std::path::PathBuf;
use std::time::Duration;

use crate::ticket::TicketFormat;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BACKLOG: u32 = 5;
pub const DEFAULT_IDLE_POLL: Duration = Duration::from_millis(500);
pub const DEFAULT_DISPATCH_INTERVAL: Duration = Duration::from_millis(100);
pub const TICKET_DIR_ENV: &str = "HELPDESK_TICKET_DIR";

/// Display strings used in the log, tickets and system notices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels {
    /// Prefix of generated client names ("Cliente" → "Cliente 1").
    pub client_prefix: String,
    pub agent: String,
    /// How a client labels its own lines.
    pub me: String,
    pub system: String,
}

impl Default for Labels {
    fn default() -> Self {
        Self {
            client_prefix: "Cliente".to_string(),
            agent: "Soporte".to_string(),
            me: "Yo".to_string(),
            system: "Sistema".to_string(),
        }
    }
}

impl Labels {
    pub fn connected_notice(&self, client_name: &str) -> String {
        format!("Conectado con: {client_name}")
    }
}

pub const TICKET_SAVED_NOTICE: &str = "Ticket saved. Session ended.";
pub const TICKET_FAILED_NOTICE: &str = "Ticket could not be saved. Session ended.";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub backlog: u32,
    pub ticket_dir: PathBuf,
    pub ticket_format: TicketFormat,
    /// Receiver back-off while no session is active.
    pub idle_poll: Duration,
    /// `None` leaves dispatching to the caller via `Helpdesk::dispatch_tick`.
    pub dispatch_interval: Option<Duration>,
    pub labels: Labels,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            backlog: DEFAULT_BACKLOG,
            ticket_dir: default_ticket_dir(),
            ticket_format: TicketFormat::default(),
            idle_poll: DEFAULT_IDLE_POLL,
            dispatch_interval: Some(DEFAULT_DISPATCH_INTERVAL),
            labels: Labels::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub labels: Labels,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            labels: Labels::default(),
        }
    }
}

pub fn default_ticket_dir() -> PathBuf {
    match std::env::var(TICKET_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from("."),
    }
}
