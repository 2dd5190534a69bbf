use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use live_tail::{Tail, TailConfig, TailEvent, TailSource};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "tailf")]
#[command(about = "Follow a file (or stdin) and print new lines as they arrive")]
struct Cli {
    /// File to follow, or `-` for stdin
    path: String,

    /// Lines to replay from the end of the file before following
    #[arg(short = 'n', long)]
    backlog: Option<usize>,

    /// TOML file with tail settings (overridden by TAIL_* env vars)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Name for the follow thread
    #[arg(long)]
    name: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let mut config = TailConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(backlog) = cli.backlog {
        config.backlog = backlog;
    }
    if cli.name.is_some() {
        config.thread_name = cli.name;
    }

    let source = if cli.path == "-" {
        TailSource::stream(std::io::stdin())
    } else {
        TailSource::file(&cli.path)
    };

    let tail = Tail::with_config(source, config)?;
    tail.add_sink(Box::new(std::io::stdout()));
    let mut events = tail.subscribe();
    tail.start()
        .with_context(|| format!("Failed to follow {}", cli.path))?;

    loop {
        match events.blocking_recv() {
            Ok(TailEvent::Reattached) => {
                info!("{} was rewritten, following from the top", cli.path)
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!("Dropped {} tail events", skipped),
            Err(RecvError::Closed) => break,
        }
    }

    Ok(())
}
