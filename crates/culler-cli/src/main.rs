mod export;
mod prompt;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use culler_client::{MarkupCellParser, WebhookObserver};
use culler_core::traits::{ActionTrigger, RenderedListHost};
use culler_core::{
    AutoConfirm, ConfirmationMode, Controller, CullerConfig, DetachedHost, ExecutionRequest,
    ExecutorState,
};
use culler_db::{DatabaseConfig, StateStore};

use crate::prompt::TerminalPrompt;

type App<H> = Controller<H, MarkupCellParser, H, StateStore, Option<WebhookObserver>>;

#[derive(Parser)]
#[command(name = "culler", version, about = "Prune the accounts you follow")]
struct Cli {
    /// JSON file holding run state
    #[arg(
        long,
        global = true,
        env = "CULLER_STATE_FILE",
        default_value = "culler-state.json"
    )]
    state_file: PathBuf,

    /// Keep run state in PostgreSQL instead (requires DATABASE_URL)
    #[arg(long, global = true, default_value_t = false)]
    postgres: bool,

    /// Webhook receiving progress events as JSON
    #[arg(long, global = true, env = "CULLER_WEBHOOK_URL")]
    webhook: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect accounts from a following list
    Harvest {
        /// Account whose following list is opened
        #[arg(long, env = "CULLER_HANDLE")]
        handle: String,

        /// Number of accounts to collect (defaults to CULLER_TARGET_COUNT)
        #[arg(short, long)]
        target: Option<usize>,

        /// Also write the collected accounts to a CSV file
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Also collect accounts that follow back
        #[arg(long, default_value_t = false)]
        include_mutuals: bool,
    },

    /// Unfollow a batch of accounts
    Execute {
        /// Account whose following list is opened
        #[arg(long, env = "CULLER_HANDLE")]
        handle: String,

        /// Account list (CSV or JSON); defaults to the last harvest
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Only continue the saved batch
        #[arg(long, default_value_t = false, conflicts_with_all = ["file", "reseed"])]
        resume: bool,

        /// Discard any saved batch and start over from the list
        #[arg(long, default_value_t = false)]
        reseed: bool,

        /// Skip the confirmation prompt for this run
        #[arg(short, long, default_value_t = false)]
        yes: bool,
    },

    /// Scroll the following list to its end
    ScrollToBottom {
        #[arg(long, env = "CULLER_HANDLE")]
        handle: String,
    },

    /// Show the latest progress snapshot
    Progress,

    /// Keep an account out of every batch
    Retain {
        id: String,

        /// Remove the account from the retained set instead
        #[arg(long, default_value_t = false)]
        off: bool,
    },

    /// List retained accounts
    Exclusions,

    /// Show the diagnostic log
    Logs {
        /// Number of most recent entries to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Clear saved run state (retained accounts are kept)
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("culler=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = CullerConfig::from_env()?;
    let database = if cli.postgres {
        Some(DatabaseConfig::from_env()?)
    } else {
        None
    };
    let store = StateStore::open(database, cli.state_file)
        .await
        .context("Failed to open state store")?;
    let observer = cli
        .webhook
        .as_deref()
        .map(WebhookObserver::new)
        .transpose()?;
    let parser = MarkupCellParser::new()?;

    match cli.command {
        Commands::Harvest {
            handle,
            target,
            csv,
            include_mutuals,
        } => {
            let parser = if include_mutuals {
                parser.include_mutuals()
            } else {
                parser
            };
            let app = attach(&handle, parser, store, observer, config).await?;
            cmd_harvest(&app, target, csv.as_deref()).await?;
        }
        Commands::Execute {
            handle,
            file,
            resume,
            reseed,
            yes,
        } => {
            let app = attach(&handle, parser, store, observer, config).await?;
            cmd_execute(&app, file.as_deref(), resume, reseed, yes).await?;
        }
        Commands::ScrollToBottom { handle } => {
            let app = attach(&handle, parser, store, observer, config).await?;
            stop_on_ctrl_c(&app);
            let extent = app.scroll_to_bottom().await?;
            println!("Reached the end of the list (height {extent:.0}px)");
        }
        Commands::Progress => {
            cmd_progress(&detached(parser, store, observer, config)).await?;
        }
        Commands::Retain { id, off } => {
            let app = detached(parser, store, observer, config);
            let exclusions = app.mark_retained(&id, !off).await?;
            let verb = if off { "released" } else { "retained" };
            println!("@{} {verb} ({} retained)", id.trim_start_matches('@'), exclusions.len());
        }
        Commands::Exclusions => {
            let exclusions = detached(parser, store, observer, config).exclusions().await?;
            for id in exclusions.iter() {
                println!("@{id}");
            }
            eprintln!("{} retained", exclusions.len());
        }
        Commands::Logs { limit } => {
            cmd_logs(&detached(parser, store, observer, config), limit).await?;
        }
        Commands::Reset => {
            let app = detached(parser, store, observer, config);
            app.reset().await?;
            println!("Run state cleared ({})", app.store().describe());
        }
    }

    Ok(())
}

/// Launches the browser and opens `handle`'s following list.
#[cfg(feature = "browser")]
async fn attach(
    handle: &str,
    parser: MarkupCellParser,
    store: StateStore,
    observer: Option<WebhookObserver>,
    config: CullerConfig,
) -> Result<App<culler_client::BrowserHost>> {
    use culler_client::{BrowserConfig, BrowserHost};

    let browser_config = BrowserConfig {
        selectors: config.selectors.clone(),
        ..BrowserConfig::from_env()
    };
    let host = BrowserHost::launch(browser_config)
        .await
        .context("Failed to start browser")?;
    host.open_following(handle)
        .await
        .with_context(|| format!("Failed to open the following list of @{handle}"))?;

    Ok(Controller::new(
        host.clone(),
        parser,
        host,
        store,
        observer,
        config,
    ))
}

#[cfg(not(feature = "browser"))]
async fn attach(
    _handle: &str,
    _parser: MarkupCellParser,
    _store: StateStore,
    _observer: Option<WebhookObserver>,
    _config: CullerConfig,
) -> Result<App<DetachedHost>> {
    anyhow::bail!("This build has no browser support. Rebuild with `--features browser`.")
}

/// A controller for commands that only touch saved state.
fn detached(
    parser: MarkupCellParser,
    store: StateStore,
    observer: Option<WebhookObserver>,
    config: CullerConfig,
) -> App<DetachedHost> {
    Controller::new(DetachedHost, parser, DetachedHost, store, observer, config)
}

/// Stops the active run on Ctrl-C. Saved state stays resumable.
fn stop_on_ctrl_c<H>(app: &App<H>)
where
    H: RenderedListHost + ActionTrigger + 'static,
{
    let app = app.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping");
            app.stop();
        }
    });
}

async fn cmd_harvest<H>(app: &App<H>, target: Option<usize>, csv: Option<&Path>) -> Result<()>
where
    H: RenderedListHost + ActionTrigger + 'static,
{
    stop_on_ctrl_c(app);
    let result = app.start_harvest(target).await?;
    let list = result.action_list(&app.exclusions().await?);

    if result.partial {
        tracing::warn!("Harvest stopped early; the list is incomplete");
    }

    if let Some(path) = csv {
        export::write_csv(path, &list)?;
        tracing::info!(path = %path.display(), count = list.len(), "Wrote CSV");
    }

    println!("{}", serde_json::to_string_pretty(&list)?);
    Ok(())
}

async fn cmd_execute<H>(
    app: &App<H>,
    file: Option<&Path>,
    resume: bool,
    reseed: bool,
    yes: bool,
) -> Result<()>
where
    H: RenderedListHost + ActionTrigger + 'static,
{
    let request = if resume {
        ExecutionRequest::resume()
    } else {
        let list = match file {
            Some(path) => export::read_entities(path)?,
            None => app.action_list().await?.context(
                "No harvest found. Run `culler harvest` first or pass --file.",
            )?,
        };
        tracing::info!(count = list.len(), "Loaded account list");
        if reseed {
            ExecutionRequest::reseeded(list)
        } else {
            ExecutionRequest::with_entities(list)
        }
    };

    let confirmation = if yes {
        ConfirmationMode::Auto(AutoConfirm)
    } else {
        ConfirmationMode::from_store(app.store(), TerminalPrompt).await?
    };

    stop_on_ctrl_c(app);
    let outcome = app.start_execution(request, &confirmation).await?;

    println!(
        "{}: {} unfollowed, {} pending",
        outcome.state.status().describe(),
        outcome.completed,
        outcome.pending
    );
    match outcome.state {
        ExecutorState::Errored => {
            if let Some(error) = &outcome.error {
                eprintln!("Last error: {error}");
            }
            eprintln!("Continue with `culler execute --resume`.");
        }
        ExecutorState::Stopped if outcome.pending > 0 => {
            eprintln!("Continue with `culler execute --resume`.");
        }
        _ => {}
    }
    Ok(())
}

async fn cmd_progress(app: &App<DetachedHost>) -> Result<()> {
    let snapshot = app.progress_snapshot().await?;
    println!("Status:     {}", snapshot.message());
    println!("Found:      {}", snapshot.found);
    println!("Unfollowed: {} / {}", snapshot.unfollowed, snapshot.total);
    println!(
        "Updated:    {}",
        snapshot.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(error) = &snapshot.error {
        println!("Error:      {error}");
    }
    Ok(())
}

async fn cmd_logs(app: &App<DetachedHost>, limit: usize) -> Result<()> {
    let entries = app.logs().await?;
    if entries.is_empty() {
        println!("No log entries");
        return Ok(());
    }

    let skip = entries.len().saturating_sub(limit);
    for entry in entries.iter().skip(skip) {
        println!(
            "  {} [{}] {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.scope,
            entry.message
        );
    }
    println!("\nShowing {} of {} entries", entries.len() - skip, entries.len());
    Ok(())
}
