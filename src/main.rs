use clap::Parser;

use encryption_job_service::cli::{self, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Client commands log to stderr only; `serve` installs its own subscriber.
    if cli.verbose && !cli.runs_service() {
        tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_writer(std::io::stderr)
            .init();
    }

    if let Err(e) = cli::dispatch(&cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
