use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use malsync_core::{Credentials, extract_authorization_code};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use malsyncd::config::DaemonConfig;
use malsyncd::daemon::{DaemonRuntime, load_tokens, open_store};
use malsyncd::prefs::SyncPreferences;
use malsyncd::sync::Direction;

#[derive(Parser, Debug)]
#[command(name = "malsyncd", version)]
#[command(about = "Keeps a MyAnimeList list in step with AniList")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Save MAL API client credentials and print the authorization link
    Configure {
        #[arg(long)]
        client_id: String,
        #[arg(long)]
        client_secret: String,
    },
    /// Finish authorization with the code or the full redirect URL
    Connect { code: String },
    /// Run one full sync and exit
    Sync {
        #[arg(long, value_enum)]
        direction: Option<DirectionArg>,
        /// Print the change log as JSON afterwards
        #[arg(long)]
        print_changes: bool,
    },
    /// Show or change sync preferences
    Prefs(PrefsArgs),
    /// Stay running: startup and daily syncs, live updates from stdin
    Run,
    /// Remove saved MAL tokens
    Logout,
}

#[derive(clap::Args, Debug, Default)]
struct PrefsArgs {
    #[arg(long)]
    live_sync: Option<bool>,
    #[arg(long)]
    sync_on_startup: Option<bool>,
    #[arg(long)]
    sync_every_24h: Option<bool>,
    /// Delete MAL entries missing from AniList
    #[arg(long)]
    mirror_deletions: Option<bool>,
    /// Delete only MAL entries a previous sync linked to AniList
    #[arg(long)]
    safe_removals: Option<bool>,
    #[arg(long, value_enum)]
    direction: Option<DirectionArg>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum DirectionArg {
    AniToMal,
    MalToAni,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::AniToMal => Direction::AniListToMal,
            DirectionArg::MalToAni => Direction::MalToAniList,
        }
    }
}

impl PrefsArgs {
    fn is_empty(&self) -> bool {
        self.live_sync.is_none()
            && self.sync_on_startup.is_none()
            && self.sync_every_24h.is_none()
            && self.mirror_deletions.is_none()
            && self.safe_removals.is_none()
            && self.direction.is_none()
    }

    fn apply(&self, prefs: &mut SyncPreferences) {
        if let Some(value) = self.live_sync {
            prefs.live_sync = value;
        }
        if let Some(value) = self.sync_on_startup {
            prefs.sync_on_startup = value;
        }
        if let Some(value) = self.sync_every_24h {
            prefs.sync_every_24h = value;
        }
        if let Some(value) = self.mirror_deletions {
            prefs.mirror_deletions = value;
        }
        if let Some(value) = self.safe_removals {
            prefs.safe_removals = value;
        }
        if let Some(direction) = self.direction {
            prefs.direction = direction.into();
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("malsyncd=info,malsync_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();
    let config = DaemonConfig::from_env()?;

    match cli.command {
        Command::Configure {
            client_id,
            client_secret,
        } => {
            let store = open_store(&config).await?;
            let tokens = load_tokens(&config, store).await?;
            tokens
                .store_credentials(&Credentials {
                    client_id,
                    client_secret,
                })
                .await?;
            let url = tokens.prepare_authorization().await?;
            println!("Open this link, allow access, then run `malsyncd connect <url>`:");
            println!("{url}");
        }
        Command::Connect { code } => {
            let code = extract_authorization_code(&code)
                .context("no authorization code found in the input")?;
            let store = open_store(&config).await?;
            let tokens = load_tokens(&config, store).await?;
            tokens.exchange_code(&code).await?;
            println!("Connected to MyAnimeList.");
        }
        Command::Sync {
            direction,
            print_changes,
        } => {
            let mut config = config;
            config.finalize_delay = std::time::Duration::ZERO;
            let daemon = DaemonRuntime::bootstrap(config).await?;
            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("cancelling sync");
                    on_ctrl_c.cancel();
                }
            });

            let report = daemon.sync_once(direction.map(Into::into), &cancel).await?;
            println!("{}", report.summary());
            if print_changes {
                println!("{}", daemon.engine().audit().to_json_pretty()?);
            }
        }
        Command::Prefs(args) => {
            let store = open_store(&config).await?;
            let mut prefs = SyncPreferences::load(store.as_ref()).await?;
            if !args.is_empty() {
                args.apply(&mut prefs);
                prefs.save(store.as_ref()).await?;
            }
            println!("live sync:        {}", prefs.live_sync);
            println!("sync on startup:  {}", prefs.sync_on_startup);
            println!("sync every 24h:   {}", prefs.sync_every_24h);
            println!("mirror deletions: {}", prefs.mirror_deletions);
            println!("safe removals:    {}", prefs.safe_removals);
            println!("direction:        {}", prefs.direction);
        }
        Command::Run => {
            let daemon = DaemonRuntime::bootstrap(config).await?;
            daemon.run().await?;
        }
        Command::Logout => {
            let store = open_store(&config).await?;
            let tokens = load_tokens(&config, store).await?;
            tokens.sign_out().await?;
            eprintln!("saved MyAnimeList tokens removed");
        }
    }
    Ok(())
}
