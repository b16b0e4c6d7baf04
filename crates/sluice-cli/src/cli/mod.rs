//! CLI entry and dispatch.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use sluice_core::config;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::interrupt;

mod commands;
mod render;

const LOG_ENV: &str = "SLUICE_LOG";

#[derive(Parser)]
#[command(name = "sluice")]
#[command(version)]
#[command(about = "Resilient streaming chat client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Chat endpoint (overrides SLUICE_URL and the config file)
    #[arg(long, global = true, value_name = "URL")]
    url: Option<String>,

    /// Reconnect attempts after the first request fails
    #[arg(long, global = true, value_name = "N")]
    max_retries: Option<u32>,

    /// Delay before the first reconnect, in milliseconds
    #[arg(long, global = true, value_name = "MS")]
    initial_delay_ms: Option<u64>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Interactive chat (:reset starts a new session, :q quits)
    Chat,
    /// Sends one message and prints the streamed reply
    Send {
        /// The message to send
        #[arg(short, long)]
        prompt: String,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let _log_guard = init_logging(cli.log_file.as_deref())?;
    interrupt::init()?;

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;
    let result = rt.block_on(async move { dispatch(cli).await });
    // A pending stdin read must not hold up exit.
    rt.shutdown_background();
    result
}

async fn dispatch(cli: Cli) -> Result<()> {
    let Cli {
        command,
        url,
        max_retries,
        initial_delay_ms,
        log_file: _,
    } = cli;
    let overrides = Overrides {
        url,
        max_retries,
        initial_delay_ms,
    };

    match command {
        Commands::Chat => {
            let (config, url) = overrides.apply()?;
            commands::chat::run(&config, &url).await
        }
        Commands::Send { prompt } => {
            let (config, url) = overrides.apply()?;
            commands::send::run(&config, &url, &prompt).await
        }
        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
        },
    }
}

/// Per-run settings that take precedence over the config file.
struct Overrides {
    url: Option<String>,
    max_retries: Option<u32>,
    initial_delay_ms: Option<u64>,
}

impl Overrides {
    fn apply(self) -> Result<(config::Config, String)> {
        let mut config = config::Config::load().context("load config")?;
        if let Some(max_retries) = self.max_retries {
            config.retry.max_retries = max_retries;
        }
        if let Some(initial_delay_ms) = self.initial_delay_ms {
            config.retry.initial_delay_ms = initial_delay_ms;
        }
        let url = config.resolve_url(self.url.as_deref())?;
        tracing::debug!(%url, retry = ?config.retry, "resolved settings");
        Ok((config, url))
    }
}

/// Logs go to stderr (stdout carries the streamed reply) or, with
/// `--log-file`, to a non-blocking file writer whose guard must outlive the
/// runtime.
fn init_logging(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));

    let Some(path) = log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|err| anyhow::anyhow!(err))
            .context("init logging")?;
        return Ok(None);
    };

    let file_name = path
        .file_name()
        .with_context(|| format!("log file path has no file name: {}", path.display()))?;
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create log directory {}", dir.display()))?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err))
        .context("init logging")?;
    Ok(Some(guard))
}
