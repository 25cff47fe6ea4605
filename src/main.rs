//! moodlenav - Browse enrolled Moodle courses by semester
//!
//! Lists the courses of the selected semester from a local cache, refreshing
//! it from the portal when it is older than the configured TTL.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use moodlenav::app::{App, Credentials};
use moodlenav::cache::{FileStore, KeyValueStore, MemoryStore};
use moodlenav::cli::Cli;

/// Initialize the tracing subscriber for logging.
///
/// `--debug` wins over `RUST_LOG`; without either only warnings are shown.
/// Logs go to stderr so command output stays clean.
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("moodlenav=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("moodlenav=warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn open_store() -> Arc<dyn KeyValueStore> {
    match FileStore::new() {
        Some(store) => {
            tracing::debug!(dir = %store.dir().display(), "using file store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("no home directory, course cache will not persist");
            Arc::new(MemoryStore::new())
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<String> {
    cli.validate()?;
    let config = cli.resolve_config().context("failed to load configuration")?;

    let credentials = Credentials {
        sesskey: cli.sesskey.clone(),
        cookie: cli.cookie.clone(),
    };
    let app = App::connect(&config, credentials, open_store()).await?;

    Ok(app.run(cli.command()).await?)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);
    tracing::debug!(command = ?cli.command, source = ?cli.source, "moodlenav starting");

    match run(cli).await {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
