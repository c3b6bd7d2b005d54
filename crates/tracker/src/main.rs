// crates/tracker/src/main.rs
//! `lumina`: offline-first blink tracker.

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use lumina_core::{Config, SessionId, User, ValidationError};
use lumina_db::Database;
use lumina_tracker::auth::{AuthClient, ProfileStore};
use lumina_tracker::sync::{HttpRemote, SyncWorker};
use lumina_tracker::{BatchBuffer, LifecycleController, LineSensor, NoopSensor, TrackerApp};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lumina", version, about = "Offline-first blink tracker")]
struct Cli {
    /// Database file (overrides LUMINA_DB_PATH).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Remote service base URL (overrides LUMINA_API_URL).
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an account on the remote service.
    Signup {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        name: Option<String>,
        /// Agree to data processing (required).
        #[arg(long)]
        consent: bool,
    },

    /// Log in and remember the credential for sync.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },

    /// Forget the stored credential.
    Logout,

    /// Capture counter values from stdin (one integer per line) and sync in
    /// the background until Ctrl-C.
    Run {
        /// Start a session right away if none is open.
        #[arg(long)]
        start: bool,
        /// Name for a session started with --start.
        #[arg(long)]
        name: Option<String>,
    },

    /// Open a session.
    Start {
        #[arg(long)]
        name: Option<String>,
    },

    /// Close the open session.
    Stop,

    /// List sessions, newest first.
    Sessions,

    /// Rename a session.
    Rename {
        id: i64,
        name: Option<String>,
        /// Remove the name instead.
        #[arg(long, conflicts_with = "name")]
        clear: bool,
    },

    /// Delete a session from listings. Its samples are kept.
    Delete { id: i64 },

    /// Run one sync tick now.
    Sync,

    /// Show identity, open session and sync backlog.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,lumina_tracker=info,lumina_db=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(db) = cli.db {
        config.db_path = Some(db);
    }
    if let Some(url) = cli.api_url {
        config.api_base_url = url.trim_end_matches('/').to_string();
    }

    let profiles = ProfileStore::open_default()
        .ok_or_else(|| anyhow!("Could not determine a config directory for the user profile"))?;

    match cli.command {
        Command::Signup {
            email,
            password,
            name,
            consent,
        } => {
            let auth = AuthClient::new(&config.api_base_url, config.request_timeout)?;
            let user = auth
                .signup(&email, &password, name.as_deref(), consent)
                .await?;
            println!("Account created for {}. Run `lumina login` next.", user.email);
        }
        Command::Login { email, password } => {
            let auth = AuthClient::new(&config.api_base_url, config.request_timeout)?;
            let mut user = auth.login(&email, &password).await?;
            if let Some(previous) = profiles.load()?.filter(|p| p.email == user.email) {
                user.name = previous.name;
            }
            profiles.save(&user)?;
            println!("Logged in as {}", user.email);
        }
        Command::Logout => {
            if profiles.clear()? {
                println!("Logged out");
            } else {
                println!("Not logged in");
            }
        }
        Command::Run { start, name } => {
            let user = require_user(&profiles)?;
            let db = open_db(&config).await?;
            run(&config, db, user, start, name.as_deref()).await?;
        }
        Command::Start { name } => {
            let user = require_user(&profiles)?;
            let db = open_db(&config).await?;
            let lifecycle = controller(&config, &db, &user).await?;
            let id = lifecycle.start(name.as_deref()).await?;
            println!("Session {id} active");
            db.close().await;
        }
        Command::Stop => {
            let user = require_user(&profiles)?;
            let db = open_db(&config).await?;
            let lifecycle = controller(&config, &db, &user).await?;
            match lifecycle.stop().await? {
                Some(id) => println!("Session {id} stopped"),
                None => println!("No open session"),
            }
            db.close().await;
        }
        Command::Sessions => {
            let user = require_user(&profiles)?;
            let db = open_db(&config).await?;
            list_sessions(&db, &user.email).await?;
            db.close().await;
        }
        Command::Rename { id, name, clear } => {
            let name = match (name, clear) {
                (_, true) => None,
                (Some(n), false) if n.trim().is_empty() => {
                    return Err(ValidationError::BlankSessionName.into())
                }
                (Some(n), false) => Some(n),
                (None, false) => bail!("Give a new name or pass --clear"),
            };
            let user = require_user(&profiles)?;
            let db = open_db(&config).await?;
            let id = owned_session(&db, &user.email, id).await?;
            db.rename_session(id, name.as_deref()).await?;
            println!("Session {id} renamed");
            db.close().await;
        }
        Command::Delete { id } => {
            let user = require_user(&profiles)?;
            let db = open_db(&config).await?;
            let id = owned_session(&db, &user.email, id).await?;
            if db.active_session(&user.email).await? == Some(id) {
                bail!("Session {id} is still open; run `lumina stop` first");
            }
            db.soft_delete_session(id).await?;
            println!("Session {id} deleted");
            db.close().await;
        }
        Command::Sync => {
            let user = require_user(&profiles)?;
            let db = open_db(&config).await?;
            let remote = HttpRemote::new(&config.api_base_url, config.request_timeout)?;
            let worker = SyncWorker::new(
                db.clone(),
                Arc::new(remote),
                Arc::new(RwLock::new(user)),
                &config,
            );
            let outcome = worker.tick(&CancellationToken::new()).await;
            let progress = worker.progress();
            println!(
                "Sync {}: {} sessions, {} samples pushed",
                outcome.as_str(),
                progress.sessions_pushed(),
                progress.samples_pushed()
            );
            if let Some(err) = progress.last_error() {
                println!("Last error: {err}");
            }
            db.close().await;
        }
        Command::Status => {
            let user = profiles.load()?;
            let Some(user) = user else {
                println!("Not logged in");
                return Ok(());
            };
            let db = open_db(&config).await?;
            let pending = db.pending_counts(&user.email).await?;
            println!(
                "User:    {}{}",
                user.email,
                if user.bearer().is_some() { "" } else { " (offline, no credential)" }
            );
            match db.active_session(&user.email).await? {
                Some(id) => println!("Session: {id} open"),
                None => println!("Session: none open"),
            }
            println!(
                "Backlog: {} sessions, {} samples unsynced",
                pending.sessions, pending.samples
            );
            db.close().await;
        }
    }

    Ok(())
}

fn require_user(profiles: &ProfileStore) -> Result<User> {
    profiles
        .load()?
        .ok_or_else(|| anyhow!("Not logged in. Run `lumina login` first."))
}

async fn open_db(config: &Config) -> Result<Database> {
    let path = config
        .resolved_db_path()
        .ok_or_else(|| anyhow!("Could not determine a cache directory for the database"))?;
    Database::new(&path)
        .await
        .with_context(|| format!("opening {}", path.display()))
}

async fn controller(config: &Config, db: &Database, user: &User) -> Result<LifecycleController> {
    let buffer = Arc::new(BatchBuffer::new(db.clone(), user.email.clone(), config.batch_size));
    Ok(LifecycleController::restore(db.clone(), buffer, Arc::new(NoopSensor::new())).await?)
}

async fn owned_session(db: &Database, owner: &str, id: i64) -> Result<SessionId> {
    match db.get_session(SessionId(id)).await? {
        Some(s) if s.owner_email == owner => Ok(s.local_id),
        _ => bail!("No session {id}"),
    }
}

async fn list_sessions(db: &Database, owner: &str) -> Result<()> {
    let sessions = db.list_sessions(owner).await?;
    if sessions.is_empty() {
        println!("No sessions");
        return Ok(());
    }
    let now = Utc::now();
    for s in sessions {
        let summary = db.session_summary(s.local_id).await?;
        let minutes = s.duration(now).num_minutes();
        println!(
            "{:>5}  {:<20}  {}  {:>4} min  {:>6} samples  peak {:>4}  {}{}",
            s.local_id.0,
            s.display_name.as_deref().unwrap_or("-"),
            s.start_time.format("%Y-%m-%d %H:%M"),
            minutes,
            summary.sample_count,
            summary.peak_value.map_or("-".to_string(), |p| p.to_string()),
            if s.sync_state.is_synced() { "synced" } else { "pending" },
            if s.is_open() { "  (open)" } else { "" },
        );
    }
    Ok(())
}

async fn run(
    config: &Config,
    db: Database,
    user: User,
    start: bool,
    name: Option<&str>,
) -> Result<()> {
    if user.bearer().is_none() {
        tracing::warn!("No stored credential; capturing offline, sync will wait for `lumina login`");
    }
    let remote = HttpRemote::new(&config.api_base_url, config.request_timeout)?;
    let app = TrackerApp::start(
        config,
        db,
        Arc::new(RwLock::new(user)),
        Arc::new(remote),
        Arc::new(LineSensor::stdin()),
    )
    .await?;

    if start {
        let id = app.lifecycle().start(name).await?;
        eprintln!("Session {id} active; reading values from stdin, Ctrl-C to stop");
    } else if let Some(id) = app.lifecycle().state().await.session() {
        eprintln!("Resumed session {id}; reading values from stdin, Ctrl-C to stop");
    } else {
        eprintln!("No open session; values are ignored (use --start to open one, Ctrl-C to quit)");
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    let progress = app.progress().clone();
    eprintln!("Shutting down...");
    app.shutdown().await?;
    eprintln!(
        "Last sync {}: {} sessions, {} samples pushed this run",
        progress.last_outcome().as_str(),
        progress.sessions_pushed(),
        progress.samples_pushed()
    );
    Ok(())
}
