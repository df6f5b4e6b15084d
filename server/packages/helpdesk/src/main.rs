fn main() {
    if let Err(err) = helpdesk::cli::run_helpdesk() {
        tracing::error!(error = %err, "helpdesk failed");
        std::process::exit(1);
    }
}
