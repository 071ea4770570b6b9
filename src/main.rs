//! Dubwatch CLI - English dub tracking for anime watch-lists.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use dubwatch::config::Config;
use dubwatch::console::Console;
use dubwatch::notifier::next_run_after;
use dubwatch::{DubTracker, JsonStore, Store, TrackerDeps, User};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Tracks English dub progress for anime on your list.
#[derive(Parser, Debug)]
#[command(name = "dubwatch")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Use this config file instead of the default location.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the dub status of a title, resolving it if needed.
    Status {
        /// AniList media id.
        title_id: u64,

        /// Print the status as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Reconcile watch-lists with subscriptions.
    Sync {
        /// Local user id.
        #[arg(required_unless_present = "all")]
        user_id: Option<u64>,

        /// Sync every registered user.
        #[arg(long, conflicts_with = "user_id")]
        all: bool,
    },

    /// Re-check tracked titles once and deliver notifications.
    Sweep,

    /// Run a catch-up tick now, then one tick per day.
    Run,

    /// Manage registered users.
    User {
        #[command(subcommand)]
        action: UserCommand,
    },
}

#[derive(Subcommand, Debug)]
enum UserCommand {
    /// Register or update a user.
    Add {
        /// Local user id.
        user_id: u64,

        /// AniList account id whose lists are synced.
        #[arg(long)]
        anilist_id: u64,

        /// AniList access token for private lists.
        #[arg(long)]
        token: Option<String>,

        /// Where notifications for this user go.
        #[arg(long)]
        contact: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dubwatch=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let console = Console::new();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => Config::config_path()?,
    };
    let config = Config::load_from(&config_path).context("Failed to load configuration")?;

    // Registering users works before the schedule token is set up.
    if !matches!(args.command, Command::User { .. }) {
        if !config.animeschedule.is_configured() {
            console.warning(&format!(
                "AnimeSchedule token not configured. Please edit: {}",
                config_path.display()
            ));
            console.info("Set your AnimeSchedule API token in the config file and run again.");
            return Ok(());
        }
        config.validate().context("Invalid configuration")?;
    }

    let store_path = config.store_path()?;
    let store: Arc<dyn Store> = Arc::new(
        JsonStore::open(&store_path)
            .await
            .with_context(|| format!("Failed to open store at {}", store_path.display()))?,
    );
    let deps = TrackerDeps::live(&config, store).context("Failed to build HTTP client")?;
    let tracker = DubTracker::new(&config, deps);

    match args.command {
        Command::Status { title_id, json } => {
            let status = tracker
                .status(title_id)
                .await
                .with_context(|| format!("Failed to resolve title {title_id}"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                console.print_status(&status);
            }
        }

        Command::Sync { user_id, all } => {
            if all {
                console.step("Syncing all users...");
                let outcomes = tracker.sync_all().await?;
                for (user_id, outcome) in outcomes {
                    match outcome {
                        Ok(report) => console.success(&console.sync_line(&report)),
                        Err(e) => console.error(&format!("user {user_id}: {e}")),
                    }
                }
            } else if let Some(user_id) = user_id {
                console.step(&format!("Syncing user {user_id}..."));
                let report = tracker
                    .sync_user(user_id)
                    .await
                    .with_context(|| format!("Failed to sync user {user_id}"))?;
                console.success(&console.sync_line(&report));
            }
        }

        Command::Sweep => {
            console.step("Re-checking tracked titles...");
            let events = tracker.run_daily_sweep().await?;
            for event in &events {
                console.info(&format!(
                    "dub finished: {} -> user {}",
                    event.title.name, event.user_id
                ));
            }
            let delivery = tracker.deliver(&events).await;
            console.success(&console.delivery_line(&delivery));
        }

        Command::Run => run_daemon(&tracker, &config, &console).await,

        Command::User {
            action:
                UserCommand::Add {
                    user_id,
                    anilist_id,
                    token,
                    contact,
                },
        } => {
            tracker
                .add_user(User {
                    id: user_id,
                    anilist_id,
                    access_token: token,
                    contact,
                })
                .await?;
            console.success(&format!("Registered user {user_id}"));
        }
    }

    Ok(())
}

/// Ticks once at startup, then daily at the configured hour until ctrl-c.
async fn run_daemon(tracker: &DubTracker, config: &Config, console: &Console) {
    console.section("Dubwatch daemon");

    loop {
        match tracker.daily_tick().await {
            Ok(report) => console.success(&console.tick_line(&report)),
            Err(e) => warn!(error = %e, "daily tick failed"),
        }

        let now = Utc::now();
        let next = next_run_after(now, config.sweep.run_at_hour_utc);
        info!(next = %next.to_rfc3339(), "waiting for next tick");
        console.info(&console.muted(&format!("next tick at {}", next.to_rfc3339())));

        let wait = (next - now).to_std().unwrap_or_default();
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = tokio::signal::ctrl_c() => {
                console.info("Shutting down");
                return;
            }
        }
    }
}
