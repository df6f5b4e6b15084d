use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use helpdesk_error::HelpdeskError;

use crate::client::SupportClient;
use crate::config::{
    default_ticket_dir, ClientConfig, Labels, ServerConfig, DEFAULT_BACKLOG,
    DEFAULT_DISPATCH_INTERVAL, DEFAULT_HOST, DEFAULT_IDLE_POLL, DEFAULT_PORT,
};
use crate::console;
use crate::server::Helpdesk;
use crate::ticket::TicketFormat;

// Stdin reads park a blocking thread that never returns on its own.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(name = "helpdesk", bin_name = "helpdesk")]
#[command(about = "Single-agent help desk chat", version)]
#[command(arg_required_else_help = true)]
pub struct HelpdeskCli {
    #[command(subcommand)]
    command: Command,
}

/// Same commands with `client` as the default, for the `helpdesk-client` binary.
#[derive(Parser, Debug)]
#[command(name = "helpdesk-client", bin_name = "helpdesk-client")]
#[command(about = "Connect to a help desk as a customer", version)]
pub struct HelpdeskClientCli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the help desk and chat as the support agent.
    Server(ServerArgs),
    /// Connect to a help desk and chat as a customer.
    Client(ClientArgs),
}

#[derive(Args, Debug)]
pub struct ServerArgs {
    #[arg(long, short = 'H', default_value = DEFAULT_HOST)]
    host: String,

    #[arg(long, short = 'p', default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(long, default_value_t = DEFAULT_BACKLOG)]
    backlog: u32,

    /// Where tickets are written. Defaults to $HELPDESK_TICKET_DIR or the
    /// working directory.
    #[arg(long, short = 'd')]
    ticket_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = TicketFormat::Text)]
    ticket_format: TicketFormat,

    /// Prefix of generated client names.
    #[arg(long, default_value = "Cliente")]
    client_prefix: String,

    #[arg(long, default_value_t = DEFAULT_IDLE_POLL.as_millis() as u64)]
    idle_poll_ms: u64,

    /// Set to 0 to disable the background dispatcher.
    #[arg(long, default_value_t = DEFAULT_DISPATCH_INTERVAL.as_millis() as u64)]
    dispatch_interval_ms: u64,
}

impl ServerArgs {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            host: self.host,
            port: self.port,
            backlog: self.backlog,
            ticket_dir: self.ticket_dir.unwrap_or_else(default_ticket_dir),
            ticket_format: self.ticket_format,
            idle_poll: Duration::from_millis(self.idle_poll_ms.max(1)),
            dispatch_interval: match self.dispatch_interval_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            labels: Labels {
                client_prefix: self.client_prefix,
                ..Labels::default()
            },
        }
    }
}

#[derive(Args, Debug)]
pub struct ClientArgs {
    #[arg(long, short = 'H', default_value = DEFAULT_HOST)]
    host: String,

    #[arg(long, short = 'p', default_value_t = DEFAULT_PORT)]
    port: u16,
}

impl Default for ClientArgs {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ClientArgs {
    fn to_config(&self) -> ClientConfig {
        ClientConfig {
            host: self.host.clone(),
            port: self.port,
            ..ClientConfig::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Helpdesk(#[from] HelpdeskError),
    #[error("runtime error: {0}")]
    Runtime(String),
}

pub fn run_helpdesk() -> Result<(), CliError> {
    let cli = HelpdeskCli::parse();
    if let Err(err) = init_logging() {
        eprintln!("failed to init logging: {err}");
        return Err(err);
    }
    run_command(cli.command)
}

pub fn init_logging() -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_logfmt::builder()
                .layer()
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|err| CliError::Runtime(err.to_string()))
}

pub fn run_command(command: Command) -> Result<(), CliError> {
    match command {
        Command::Server(args) => run_server(args),
        Command::Client(args) => run_client(&args),
    }
}

fn run_server(args: ServerArgs) -> Result<(), CliError> {
    let config = args.into_config();
    let runtime = build_runtime()?;

    let result = runtime.block_on(async move {
        let desk = Helpdesk::start(config).await?;
        let outcome = console::run_agent(&desk).await;
        desk.shutdown().await;
        outcome.map_err(CliError::from)
    });
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    result
}

fn run_client(args: &ClientArgs) -> Result<(), CliError> {
    let config = args.to_config();
    let runtime = build_runtime()?;

    let result = runtime.block_on(async move {
        let client = SupportClient::connect(&config).await?;
        let outcome = console::run_client(&client).await;
        client.shutdown().await;
        outcome.map_err(CliError::from)
    });
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    result
}

fn build_runtime() -> Result<tokio::runtime::Runtime, CliError> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::Runtime(err.to_string()))
}
