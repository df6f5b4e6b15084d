use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    TransportSetup,
    Connection,
    Protocol,
    TicketWrite,
    SessionBusy,
    NoActiveSession,
    SessionBlocked,
    ReservedToken,
    MessageTooLong,
}

impl ErrorType {
    pub fn as_urn(&self) -> &'static str {
        match self {
            Self::TransportSetup => "urn:helpdesk:error:transport_setup",
            Self::Connection => "urn:helpdesk:error:connection",
            Self::Protocol => "urn:helpdesk:error:protocol",
            Self::TicketWrite => "urn:helpdesk:error:ticket_write",
            Self::SessionBusy => "urn:helpdesk:error:session_busy",
            Self::NoActiveSession => "urn:helpdesk:error:no_active_session",
            Self::SessionBlocked => "urn:helpdesk:error:session_blocked",
            Self::ReservedToken => "urn:helpdesk:error:reserved_token",
            Self::MessageTooLong => "urn:helpdesk:error:message_too_long",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::TransportSetup => "Transport Setup Failed",
            Self::Connection => "Connection Failed",
            Self::Protocol => "Protocol Violation",
            Self::TicketWrite => "Ticket Write Failed",
            Self::SessionBusy => "Session Busy",
            Self::NoActiveSession => "No Active Session",
            Self::SessionBlocked => "Session Blocked",
            Self::ReservedToken => "Reserved Token",
            Self::MessageTooLong => "Message Too Long",
        }
    }

    /// Only listener/connector setup failures end the process; everything
    /// else is scoped to one connection or one call.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::TransportSetup)
    }
}

#[derive(Debug, Error)]
pub enum HelpdeskError {
    #[error("failed to {stage} {addr}: {source}")]
    TransportSetup {
        stage: &'static str,
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("connection {connection}: {message}")]
    Connection { connection: u64, message: String },
    #[error("protocol violation on connection {connection}: {message}")]
    Protocol { connection: u64, message: String },
    #[error("failed to write ticket {}: {message}", path.display())]
    TicketWrite { path: PathBuf, message: String },
    #[error("session busy with connection {connection}")]
    SessionBusy { connection: u64 },
    #[error("no active session")]
    NoActiveSession,
    #[error("session blocked: waiting in queue")]
    SessionBlocked,
    #[error("reserved protocol token cannot be sent as chat: {token}")]
    ReservedToken { token: String },
    #[error("message is {length} bytes, the limit is {limit}")]
    MessageTooLong { length: usize, limit: usize },
}

impl HelpdeskError {
    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::TransportSetup { .. } => ErrorType::TransportSetup,
            Self::Connection { .. } => ErrorType::Connection,
            Self::Protocol { .. } => ErrorType::Protocol,
            Self::TicketWrite { .. } => ErrorType::TicketWrite,
            Self::SessionBusy { .. } => ErrorType::SessionBusy,
            Self::NoActiveSession => ErrorType::NoActiveSession,
            Self::SessionBlocked => ErrorType::SessionBlocked,
            Self::ReservedToken { .. } => ErrorType::ReservedToken,
            Self::MessageTooLong { .. } => ErrorType::MessageTooLong,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.error_type().is_fatal()
    }

    /// Connection the failure is scoped to, when there is one.
    pub fn connection(&self) -> Option<u64> {
        match self {
            Self::Connection { connection, .. }
            | Self::Protocol { connection, .. }
            | Self::SessionBusy { connection } => Some(*connection),
            _ => None,
        }
    }

    pub fn connection_failed(connection: u64, err: impl std::fmt::Display) -> Self {
        Self::Connection {
            connection,
            message: err.to_string(),
        }
    }
}
