use clap::Parser;
use tracing_subscriber::EnvFilter;

mod broadcaster;
mod commands;
mod config;
mod events;
mod presence;

use config::{Cli, Command};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence; otherwise info, or debug with --debug
    let default_filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter))
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.into_command() {
        Command::Serve(args) => commands::serve::cmd_serve(args).await,
        Command::Read(args) => commands::read::cmd_read(&args),
        Command::Readers => commands::readers::cmd_readers(),
    }
}
