mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use echo::config::EchoConfig;
use echo::memory::types::MediaType;

#[derive(Parser)]
#[command(name = "echo", version, about = "Adaptive reminiscence feed")]
struct Cli {
    /// Config file (defaults to ~/.echo/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum MediaArg {
    Photo,
    Video,
}

impl From<MediaArg> for MediaType {
    fn from(arg: MediaArg) -> Self {
        match arg {
            MediaArg::Photo => MediaType::Photo,
            MediaArg::Video => MediaType::Video,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Register an uploaded photo or video
    Ingest {
        #[arg(long = "type", value_enum, default_value = "photo")]
        media_type: MediaArg,
        url: String,
    },
    /// List memories waiting on analysis or review
    Review,
    /// Attach the analysis script and move a memory to review
    Analyzed { id: String, script: String },
    /// Approve a reviewed memory for the feed
    Approve { id: String },
    /// Reject a memory from the review queue
    Reject { id: String },
    /// Replace a memory's narration script
    Script { id: String, text: String },
    /// Preview a novelty-weighted sample of the eligible pool
    Feed {
        #[arg(long, default_value_t = 10)]
        count: usize,
    },
    /// Run an interactive patient session on stdin
    Session,
    /// Show feed statistics
    Stats,
    /// Check database health
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EchoConfig::load_from(path)?,
        None => EchoConfig::load()?,
    };

    // Log to stderr so stdout stays clean for command output.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Ingest { media_type, url } => cli::curate::ingest(&config, media_type.into(), &url)?,
        Command::Review => cli::curate::review(&config)?,
        Command::Analyzed { id, script } => cli::curate::analyzed(&config, &id, &script)?,
        Command::Approve { id } => cli::curate::approve(&config, &id)?,
        Command::Reject { id } => cli::curate::reject(&config, &id)?,
        Command::Script { id, text } => cli::curate::script(&config, &id, &text)?,
        Command::Feed { count } => cli::feed::feed(&config, count)?,
        Command::Session => cli::session::session(&config).await?,
        Command::Stats => cli::stats::stats(&config)?,
        Command::Doctor => cli::doctor::doctor(&config)?,
    }

    Ok(())
}
