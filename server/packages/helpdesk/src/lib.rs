//! Single-agent help desk: many clients queue in arrival order, one at a
//! time is routed to the agent, and every finished session leaves a ticket.

pub mod cli;
pub mod client;
pub mod config;
pub mod console;
pub mod conversation;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod server;
pub mod session;
pub mod ticket;
pub mod transport;

pub use client::SupportClient;
pub use config::{ClientConfig, Labels, ServerConfig};
pub use conversation::{ChatEntry, ConversationLog};
pub use helpdesk_error::{ErrorType, HelpdeskError};
pub use server::Helpdesk;
