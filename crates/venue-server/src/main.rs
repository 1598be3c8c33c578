//! venue-server binary.
//!
//! Reads `config.toml` (or the path specified with `--config`) layered with
//! `VENUE_*` environment variables, opens the SQLite store, and serves the
//! booking API over HTTP.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use chrono_tz::Tz;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use venue_booking::BookingServices;
use venue_core::clock::{Clock, VenueClock};
use venue_server::{ServerConfig, seed_default_slots, spawn_reconcile_sweep};
use venue_store_sqlite::SqliteStore;

#[derive(Parser)]
#[command(author, version, about = "Venue booking server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("VENUE").try_parsing(true))
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  let timezone: Tz = server_cfg
    .timezone
    .parse()
    .map_err(|e| anyhow::anyhow!("unknown timezone {:?}: {e}", server_cfg.timezone))?;

  let store_path = expand_tilde(&server_cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let clock: Arc<dyn Clock> = Arc::new(VenueClock::new(timezone));
  let services =
    BookingServices::new(Arc::new(store), clock, server_cfg.lock_timeout());

  if server_cfg.seed_default_slots {
    seed_default_slots(&services)
      .await
      .context("failed to seed default visit slots")?;
  }

  if let Some(interval) = server_cfg.reconcile_interval() {
    tracing::info!(?interval, "starting orphan sweep");
    spawn_reconcile_sweep(services.clone(), interval);
  }

  let app = venue_server::app(services);
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!(%timezone, "Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
