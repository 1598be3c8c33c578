//! Runtime wiring for the venue booking server.
//!
//! The binary in `main.rs` only parses the CLI and configuration; everything
//! it assembles lives here so it can be exercised from tests.

use std::{path::PathBuf, time::Duration};

use axum::{Json, Router, routing::get};
use chrono::NaiveTime;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use uuid::Uuid;
use venue_booking::BookingServices;
use venue_core::{
  Result,
  capacity::{CapacityConfig, Eligibility},
  resource::TimeSlot,
  store::BookingStore,
  subject::Caller,
};

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `VENUE_*` environment variables.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
  pub host:                    String,
  pub port:                    u16,
  pub store_path:              PathBuf,
  /// IANA name of the venue timezone.
  pub timezone:                String,
  pub lock_timeout_ms:         u64,
  /// Seconds between orphan sweeps; `0` disables the sweep.
  pub reconcile_interval_secs: u64,
  pub seed_default_slots:      bool,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:                    "127.0.0.1".to_owned(),
      port:                    8080,
      store_path:              PathBuf::from("venue.db"),
      timezone:                "Asia/Shanghai".to_owned(),
      lock_timeout_ms:         5_000,
      reconcile_interval_secs: 300,
      seed_default_slots:      true,
    }
  }
}

impl ServerConfig {
  pub fn lock_timeout(&self) -> Duration {
    Duration::from_millis(self.lock_timeout_ms)
  }

  pub fn reconcile_interval(&self) -> Option<Duration> {
    (self.reconcile_interval_secs > 0)
      .then(|| Duration::from_secs(self.reconcile_interval_secs))
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the full application router: the booking API under `/api` and a
/// liveness probe at `/health`.
pub fn app<S>(services: BookingServices<S>) -> Router
where
  S: BookingStore + 'static,
{
  Router::new()
    .route("/health", get(health))
    .nest("/api", venue_api::api_router(services))
    .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<Value> { Json(json!({ "status": "ok" })) }

// ─── Default data ─────────────────────────────────────────────────────────────

/// Visitors admitted per slot when seeding.
pub const DEFAULT_SLOT_CAPACITY: u32 = 30;

/// Daily opening windows, with the midday break left out.
const DEFAULT_SLOTS: [(u32, u32); 7] =
  [(9, 10), (10, 11), (11, 12), (13, 14), (14, 15), (15, 16), (16, 17)];

pub fn default_slots() -> Result<Vec<TimeSlot>> {
  DEFAULT_SLOTS
    .iter()
    .map(|&(start, end)| {
      let at = |hour| {
        NaiveTime::from_hms_opt(hour, 0, 0).ok_or_else(|| {
          venue_core::Error::Validation(format!("invalid hour {hour}"))
        })
      };
      TimeSlot::new(at(start)?, at(end)?)
    })
    .collect()
}

/// Seed the default visit slots when no visit config exists yet.
///
/// Returns the number of configs written.
pub async fn seed_default_slots<S>(services: &BookingServices<S>) -> Result<usize>
where
  S: BookingStore + 'static,
{
  let system = Caller::admin(Uuid::nil());
  if !services.visits.admin_list_configs(&system).await?.is_empty() {
    tracing::debug!("visit configs present, skipping seed");
    return Ok(0);
  }

  let slots = default_slots()?;
  for slot in &slots {
    let config = CapacityConfig::new(*slot, DEFAULT_SLOT_CAPACITY)
      .with_eligibility(Eligibility::AnyDay);
    services.visits.admin_put_config(&system, config).await?;
  }
  tracing::info!(count = slots.len(), "seeded default visit slots");
  Ok(slots.len())
}

// ─── Reconciliation sweep ─────────────────────────────────────────────────────

/// Run one orphan sweep over both resource families.
///
/// Returns the number of reservations cancelled. A failure in one family is
/// logged and does not stop the other.
pub async fn reconcile_once<S>(services: &BookingServices<S>) -> usize
where
  S: BookingStore + 'static,
{
  let mut cancelled = 0;

  match services.visits.reconcile_all().await {
    Ok(ids) => cancelled += ids.len(),
    Err(e) => tracing::error!(error = %e, "visit reconciliation failed"),
  }
  match services.seats.reconcile_all().await {
    Ok(ids) => cancelled += ids.len(),
    Err(e) => tracing::error!(error = %e, "activity reconciliation failed"),
  }

  if cancelled > 0 {
    tracing::info!(cancelled, "orphan sweep cancelled reservations");
  }
  cancelled
}

/// Spawn a background task running [`reconcile_once`] every `interval`.
pub fn spawn_reconcile_sweep<S>(
  services: BookingServices<S>,
  interval: Duration,
) -> JoinHandle<()>
where
  S: BookingStore + 'static,
{
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
      ticker.tick().await;
      reconcile_once(&services).await;
    }
  })
}
