use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use ldrmirror::api::HttpReaderClient;
use ldrmirror::browse::{ReadPosition, StartAt};
use ldrmirror::config::Config;
use ldrmirror::storage::{Database, DatabaseError, SubscriptionSort};
use ldrmirror::sync::{SyncEngine, SyncEvent, SyncOptions, SyncScheduler};

#[derive(Parser, Debug)]
#[command(name = "ldrmirror", about = "Local mirror of a livedoor Reader style feed service")]
struct Args {
    /// Reset database (delete and recreate)
    #[arg(long)]
    reset_db: bool,

    /// Config file (default: ~/.config/ldrmirror/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one sync cycle, push queued pins, and log out
    Sync,
    /// Sync on the configured interval until interrupted
    Daemon,
    /// List local subscriptions
    Subs {
        /// modified_desc, unread_desc, title_asc, ...
        #[arg(long)]
        sort: Option<SubscriptionSort>,
    },
    /// Print the items of a subscription and mark them read
    Read {
        subscription_id: i64,
        /// Include items already read even when view_unread_only is set
        #[arg(long)]
        all: bool,
        /// Start at the last item viewed
        #[arg(long)]
        resume: bool,
    },
    /// Toggle the pin on a link
    Pin {
        uri: String,
        #[arg(long)]
        title: Option<String>,
    },
    /// List pinned links
    Pins {
        /// Push queued pin changes to the server first
        #[arg(long)]
        push: bool,
    },
    /// Mark every local item read
    MarkAllRead,
}

fn config_dir() -> Result<PathBuf> {
    Config::default_dir().context("HOME environment variable not set")
}

fn ensure_private_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).context("Failed to create config directory")?;
        println!("Created config directory: {}", dir.display());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(dir, perms) {
                    tracing::warn!(
                        path = %dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(path = %dir.display(), error = %e, "Failed to read config directory metadata");
            }
        }
    }
    Ok(())
}

async fn open_database(path: &Path) -> Result<Database> {
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    match Database::open(path_str).await {
        Ok(db) => Ok(db),
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: Another instance of ldrmirror appears to be running. Please close it and try again.");
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database: {}", e)),
    }
}

fn build_engine(db: Database, config: &Config) -> Result<SyncEngine<HttpReaderClient>> {
    let base_url = config
        .api_base_url
        .as_deref()
        .context("api_base_url is not set in the config file")?;
    let client = HttpReaderClient::new(base_url, config.request_timeout())
        .context("Failed to create HTTP client")?;
    let mut engine = SyncEngine::new(db, Arc::new(client), SyncOptions::from_config(config));
    if let Some(credentials) = config.credentials() {
        engine = engine.with_credentials(credentials);
    }
    Ok(engine)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let dir = config_dir()?;
    ensure_private_dir(&dir)?;

    let config_path = args.config.clone().unwrap_or_else(|| dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = dir.join("ldrmirror.db");
    if args.reset_db && db_path.exists() {
        std::fs::remove_file(&db_path).context("Failed to delete database")?;
        println!("Database reset.");
    }
    let db = open_database(&db_path).await?;

    match args.command {
        Command::Sync => {
            let engine = build_engine(db, &config)?;
            let report = engine.sync().await.context("Sync failed")?;
            println!(
                "Synced {} subscriptions, {} new items",
                report.subscriptions_seen, report.inserted
            );
            if let Some(e) = &report.first_error {
                eprintln!("Warning: some subscriptions failed: {}", e);
            }
            let pins = engine.drain_pins().await.context("Pin push failed")?;
            if pins.pushed + pins.failed > 0 {
                println!("Pushed {} pin changes ({} pending)", pins.pushed, pins.failed);
            }
            engine.logout().await;
        }
        Command::Daemon => {
            let interval = config
                .sync_interval()
                .context("sync_interval_hours is 0; nothing to schedule")?;
            let engine = Arc::new(build_engine(db, &config)?);
            let (tx, mut rx) = mpsc::channel(32);
            let scheduler = SyncScheduler::new(engine, tx);
            scheduler.start_timer(Duration::ZERO, interval);
            println!("Syncing every {} hours; Ctrl-C to stop", config.sync_interval_hours);

            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);
            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Some(SyncEvent::Started) => println!("Sync started"),
                        Some(SyncEvent::Finished { inserted, unread }) => {
                            println!("Sync finished: {} new items, {} unread", inserted, unread)
                        }
                        Some(SyncEvent::Failed(msg)) => eprintln!("Sync failed: {}", msg),
                        None => break,
                    },
                    _ = &mut ctrl_c => {
                        if scheduler.engine().is_running() {
                            println!("Stopping after the current subscription...");
                        }
                        scheduler.shutdown().await;
                        break;
                    }
                }
            }
        }
        Command::Subs { sort } => {
            let sort = sort.unwrap_or(config.subscription_sort);
            for sub in db.subscriptions(sort).await.context("Failed to load subscriptions")? {
                println!(
                    "{:>8}  {:>5}  {}",
                    sub.id,
                    sub.unread_count,
                    sub.title.as_deref().unwrap_or("(untitled)")
                );
            }
        }
        Command::Read {
            subscription_id,
            all,
            resume,
        } => {
            let unread_only = !all && config.view_unread_only;
            let start = if resume { StartAt::LastRead } else { StartAt::Newest };
            let mut position = ReadPosition::open(db, subscription_id, unread_only, start)
                .await
                .context("Failed to open subscription")?;
            if position.total_count() > 0 {
                loop {
                    if let Some(item) = position.current_item() {
                        println!(
                            "{}  {}",
                            if item.unread { "*" } else { " " },
                            item.title.as_deref().unwrap_or("(untitled)")
                        );
                        if let Some(uri) = &item.uri {
                            println!("   {}", uri);
                        }
                    }
                    if !position.next().await? {
                        break;
                    }
                }
            }
            position.finish().await;
        }
        Command::Pin { uri, title } => {
            let pinned = db
                .toggle_pin(&uri, title.as_deref())
                .await
                .context("Failed to record pin")?;
            println!("{} {}", if pinned { "Pinned" } else { "Unpinned" }, uri);
        }
        Command::Pins { push } => {
            if push {
                let engine = build_engine(db.clone(), &config)?;
                let report = engine.drain_pins().await.context("Pin push failed")?;
                println!(
                    "Pushed {}, superseded {}, pending {}",
                    report.pushed, report.superseded, report.failed
                );
                engine.logout().await;
            }
            for pin in db.pins().await.context("Failed to load pins")? {
                println!("{}  {}", pin.uri, pin.title.as_deref().unwrap_or(""));
            }
        }
        Command::MarkAllRead => {
            let marked = db.mark_all_read().await.context("Failed to mark all read")?;
            println!("Marked {} items read", marked);
        }
    }

    Ok(())
}
