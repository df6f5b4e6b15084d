//! Transcript tickets written when a session ends.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use helpdesk_error::HelpdeskError;

use crate::conversation::ChatEntry;
use crate::registry::ClientIdentity;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TicketFormat {
    #[default]
    Text,
    Json,
}

impl TicketFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Json => "json",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub client_id: u64,
    pub client_name: String,
    pub timestamp: String,
    pub unix_timestamp: i64,
    pub message_count: usize,
    pub transcript: Vec<ChatEntry>,
}

impl Ticket {
    pub fn new(
        client_id: u64,
        client_name: impl Into<String>,
        transcript: Vec<ChatEntry>,
        created_at: DateTime<Local>,
    ) -> Self {
        Self {
            client_id,
            client_name: client_name.into(),
            timestamp: created_at.format(TIMESTAMP_FORMAT).to_string(),
            unix_timestamp: created_at.timestamp(),
            message_count: transcript.len(),
            transcript,
        }
    }

    pub fn for_client(
        identity: &ClientIdentity,
        transcript: Vec<ChatEntry>,
        created_at: DateTime<Local>,
    ) -> Self {
        Self::new(
            identity.id,
            identity.display_name.clone(),
            transcript,
            created_at,
        )
    }

    /// `Ticket_<displayName>_<unixTimestamp>.<ext>`; path separators in the
    /// name are replaced so the ticket always lands in its directory.
    pub fn file_name(&self, format: TicketFormat) -> String {
        let name: String = self
            .client_name
            .chars()
            .map(|ch| if matches!(ch, '/' | '\\') { '_' } else { ch })
            .collect();
        format!(
            "Ticket_{}_{}.{}",
            name,
            self.unix_timestamp,
            format.extension()
        )
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Client ID: {}", self.client_id);
        let _ = writeln!(out, "Client: {}", self.client_name);
        let _ = writeln!(out, "Date: {}", self.timestamp);
        let _ = writeln!(out, "Messages: {}", self.message_count);
        for entry in &self.transcript {
            let _ = writeln!(out, "[{}]: {}", entry.sender, entry.text);
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct TicketWriter {
    dir: PathBuf,
    format: TicketFormat,
}

impl TicketWriter {
    pub fn new(dir: impl Into<PathBuf>, format: TicketFormat) -> Self {
        Self {
            dir: dir.into(),
            format,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes the ticket to a fresh file; an existing file is never replaced.
    pub async fn write(&self, ticket: &Ticket) -> Result<PathBuf, HelpdeskError> {
        let path = self.dir.join(ticket.file_name(self.format));
        let fail = |message: String| HelpdeskError::TicketWrite {
            path: path.clone(),
            message,
        };

        let contents = match self.format {
            TicketFormat::Text => ticket.render_text(),
            TicketFormat::Json => {
                let mut json = serde_json::to_string_pretty(ticket)
                    .map_err(|err| fail(err.to_string()))?;
                json.push('\n');
                json
            }
        };

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| fail(err.to_string()))?;
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|err| fail(err.to_string()))?;
        file.write_all(contents.as_bytes())
            .await
            .map_err(|err| fail(err.to_string()))?;
        file.flush().await.map_err(|err| fail(err.to_string()))?;

        tracing::info!(
            path = %path.display(),
            client = %ticket.client_name,
            messages = ticket.message_count,
            "ticket written"
        );
        Ok(path)
    }
}
