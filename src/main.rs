//! `tempmail-watcher` binary: resolve settings, start the poll loop, stop on Ctrl+C.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, warn};

use tempmail_watcher::{
    Adapter, AddressOptions, DisplayMode, Endpoints, HistoryFile, MessageStore, Overrides,
    PollLoop, Provider, Renderer, Settings, StopReason, Terminal, Transport, logging,
};

/// Watch a disposable inbox and print new mail as it arrives.
#[derive(Debug, Parser)]
#[command(name = "tempmail-watcher", version, about, args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Provider to use (guerrillamail, mail.tm, tempmail.lol, mail.gw, dropmail.me).
    provider: Option<Provider>,

    /// Polling interval in seconds.
    #[arg(short, long)]
    poll: Option<u64>,

    /// Use tempmail.lol's rush endpoint for faster address generation.
    #[arg(short, long)]
    rush: bool,

    /// Display mode: rich or plain.
    #[arg(short, long)]
    display: Option<DisplayMode>,

    /// Don't save received messages to history.
    #[arg(short = 'n', long)]
    no_save: bool,

    /// Preferred domain (mail.tm, mail.gw).
    #[arg(long)]
    domain: Option<String>,

    /// Preferred alias (GuerrillaMail).
    #[arg(long)]
    alias: Option<String>,

    /// Proxy URL for all provider traffic.
    #[arg(long)]
    proxy: Option<String>,

    /// Debug logging.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the last saved message history.
    History,
    /// Copy the saved history to a JSON file.
    Export {
        /// Destination file.
        #[arg(default_value = "email_export.json")]
        file: PathBuf,
    },
    /// Delete the saved history.
    ClearHistory {
        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },
    /// List supported providers.
    Providers,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            provider: self.provider,
            poll_interval: self.poll,
            display_mode: self.display,
            no_save: self.no_save,
            proxy: self.proxy.clone(),
            address_options: AddressOptions {
                rush: self.rush,
                domain: self.domain.clone(),
                alias: self.alias.clone(),
            },
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_cli(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "tempmail-watcher failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config_dir = Settings::config_dir()?;
    let settings_path = config_dir.join("config.json");
    let history = HistoryFile::new(config_dir.join("history.json"));

    match &cli.command {
        Some(Command::History) => return show_history(&history),
        Some(Command::Export { file }) => return export_history(&history, file),
        Some(Command::ClearHistory { yes }) => return clear_history(&history, *yes),
        Some(Command::Providers) => {
            for provider in Provider::ALL {
                println!("{provider}");
            }
            return Ok(ExitCode::SUCCESS);
        }
        None => {}
    }

    let overrides = cli.overrides();

    let mut saved = Settings::load(&settings_path);
    let mut settings = saved.clone();
    settings.apply_env(|key| std::env::var(key).ok());
    let config = settings.resolve(&overrides, history.path().to_path_buf())?;

    // Validated CLI choices become the saved defaults for the next run.
    saved.merge(&overrides);
    if let Err(e) = saved.save(&settings_path) {
        warn!(path = %settings_path.display(), error = %e, "failed to save settings");
    }

    let mut transport = Transport::builder()
        .timeout(std::time::Duration::from_secs(settings.timeout_secs.max(1)));
    if let Some(proxy) = overrides.proxy.clone().or_else(|| settings.proxy.clone()) {
        transport = transport.proxy(proxy);
    }
    let transport = transport.build()?;

    let adapter = Adapter::new(config.provider(), transport, &Endpoints::default());
    let store = if config.persist_history() {
        MessageStore::persistent(history.clone(), settings.max_history_entries)
    } else {
        MessageStore::new()
    };

    let provider = config.provider();
    let mut poll = PollLoop::start(adapter, Terminal::new(std::io::stdout()), config, store)
        .await
        .with_context(|| format!("could not obtain an address from {provider}"))?;

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = stop.send(true);
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for Ctrl+C");
                // Keep the sender alive so the loop is not cancelled by its drop.
                std::future::pending::<()>().await;
                drop(stop);
            }
        }
    });

    let reason = poll.run(shutdown).await;
    let stats = poll.stats();
    eprintln!(
        "{} ({} messages, {} skipped, {} failed polls)",
        reason.describe(),
        poll.store().history().len(),
        stats.skipped,
        stats.transient_failures
    );

    Ok(match reason {
        StopReason::Cancelled => ExitCode::SUCCESS,
        StopReason::SessionLost(_) | StopReason::Fatal(_) => ExitCode::FAILURE,
    })
}

fn show_history(history: &HistoryFile) -> Result<ExitCode> {
    let messages = history
        .read()
        .with_context(|| format!("failed to read {}", history.path().display()))?;
    if messages.is_empty() {
        println!("No message history found.");
        return Ok(ExitCode::SUCCESS);
    }

    println!("Message history ({} entries)", messages.len());
    let mut terminal = Terminal::new(std::io::stdout());
    terminal.render(&messages, DisplayMode::Rich);
    Ok(ExitCode::SUCCESS)
}

fn export_history(history: &HistoryFile, file: &Path) -> Result<ExitCode> {
    let messages = history.read()?;
    if messages.is_empty() {
        println!("No message history to export.");
        return Ok(ExitCode::SUCCESS);
    }

    HistoryFile::new(file)
        .write(&messages)
        .with_context(|| format!("failed to export to {}", file.display()))?;
    println!("Exported {} messages to {}", messages.len(), file.display());
    Ok(ExitCode::SUCCESS)
}

fn clear_history(history: &HistoryFile, yes: bool) -> Result<ExitCode> {
    if !yes {
        print!("This will permanently delete all saved messages. Continue? (y/N): ");
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().lock().read_line(&mut answer)?;
        if !answer.trim().eq_ignore_ascii_case("y") {
            println!("Operation cancelled.");
            return Ok(ExitCode::SUCCESS);
        }
    }

    if history.clear()? {
        println!("Message history cleared.");
    } else {
        println!("No message history to clear.");
    }
    Ok(ExitCode::SUCCESS)
}
