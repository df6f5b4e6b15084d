use clap::Parser;
use helpdesk::cli::{init_logging, run_command, ClientArgs, CliError, Command, HelpdeskClientCli};

fn main() {
    if let Err(err) = run() {
        tracing::error!(error = %err, "helpdesk-client failed");
        std::process::exit(1);
    }
}

fn run() -> Result<(), CliError> {
    let cli = HelpdeskClientCli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Client(ClientArgs::default()));
    if let Err(err) = init_logging() {
        eprintln!("failed to init logging: {err}");
        return Err(err);
    }
    run_command(command)
}
