//! Handlers for one resource family, nested at `/visits` or `/activities`.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`    | `/availability` | Visits: `?date=YYYY-MM-DD`; activities: no parameters |
//! | `GET`    | `/availability/{*key}` | Units still free on one key |
//! | `POST`   | `/reservations` | Body: [`ReserveBody`]; returns 201 |
//! | `GET`    | `/reservations/mine` | The caller's reservations, newest first |
//! | `GET`    | `/reservations/{id}` | Owner or admin |
//! | `POST`   | `/reservations/{id}/cancel` | Owner only |
//! | `GET`    | `/admin/reservations` | `?subject_id&status&key&limit&offset` |
//! | `PATCH`  | `/admin/reservations/{id}` | Body: `{"status":..,"notes":..}` |
//! | `DELETE` | `/admin/reservations/{id}` | Physical delete; returns 204 |
//! | `POST`   | `/admin/reservations/bulk-status` | Body: [`BulkStatusBody`] |
//! | `GET`    | `/admin/configs` | |
//! | `PUT`    | `/admin/configs` | Body: [`ConfigBody`] |
//! | `GET`    | `/admin/counts` | Reservations per status |
//! | `POST`   | `/admin/reconcile` | Sweep orphaned reservations |

use axum::{
  Json,
  extract::State,
  http::StatusCode,
  response::IntoResponse,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use venue_booking::{AvailabilityRow, ReservationService};
use venue_core::{
  capacity::{CapacityConfig, Eligibility},
  clock::venue_instant,
  reservation::{
    ContactInfo, Reservation, ReservationQuery, ReservationStatus,
    StatusCounts, StatusUpdate,
  },
  resource::Resource,
  store::BookingStore,
};

use crate::{
  caller::CallerIdentity,
  error::{ApiError, ErrorBody},
  extract::{ApiJson, ApiPath, ApiQuery},
};

type Service<R, S> = State<ReservationService<R, S>>;

fn parse_key<R: Resource>(raw: &str) -> Result<R::Key, ApiError> {
  Ok(raw.parse::<R::Key>()?)
}

// ─── Availability ────────────────────────────────────────────────────────────

/// `GET /availability`
pub async fn availability<R, S>(
  State(service): Service<R, S>,
  ApiQuery(filter): ApiQuery<R::Filter>,
) -> Result<Json<Vec<AvailabilityRow<R::Key>>>, ApiError>
where
  R: Resource,
  S: BookingStore + 'static,
{
  let listing = service.list_availability(filter).await?;
  Ok(Json(listing.iter().collect()))
}

#[derive(Debug, Serialize)]
pub struct AvailableUnits<K> {
  pub key:       K,
  pub available: u32,
}

/// `GET /availability/{*key}`
pub async fn available_units<R, S>(
  State(service): Service<R, S>,
  ApiPath(raw): ApiPath<String>,
) -> Result<Json<AvailableUnits<R::Key>>, ApiError>
where
  R: Resource,
  S: BookingStore + 'static,
{
  let key = parse_key::<R>(&raw)?;
  let available = service.available_units(key.clone()).await?;
  Ok(Json(AvailableUnits { key, available }))
}

// ─── Reservations ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ReserveBody {
  /// Text form of the reservation key.
  pub key:     String,
  #[serde(default = "one")]
  pub units:   u32,
  pub contact: Option<ContactInfo>,
}

fn one() -> u32 { 1 }

/// `POST /reservations`
pub async fn reserve<R, S>(
  State(service): Service<R, S>,
  CallerIdentity(caller): CallerIdentity,
  ApiJson(body): ApiJson<ReserveBody>,
) -> Result<impl IntoResponse, ApiError>
where
  R: Resource,
  S: BookingStore + 'static,
{
  let key = parse_key::<R>(&body.key)?;
  let reservation = service
    .reserve(caller.subject_id, key, body.units, body.contact)
    .await?;
  Ok((StatusCode::CREATED, Json(reservation)))
}

/// `GET /reservations/mine`
pub async fn list_mine<R, S>(
  State(service): Service<R, S>,
  CallerIdentity(caller): CallerIdentity,
) -> Result<Json<Vec<Reservation<R::Key>>>, ApiError>
where
  R: Resource,
  S: BookingStore + 'static,
{
  Ok(Json(service.list_mine(caller.subject_id).await?))
}

/// `GET /reservations/{id}`
pub async fn get_one<R, S>(
  State(service): Service<R, S>,
  CallerIdentity(caller): CallerIdentity,
  ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<Reservation<R::Key>>, ApiError>
where
  R: Resource,
  S: BookingStore + 'static,
{
  Ok(Json(service.get(&caller, id).await?))
}

/// `POST /reservations/{id}/cancel`
pub async fn cancel<R, S>(
  State(service): Service<R, S>,
  CallerIdentity(caller): CallerIdentity,
  ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<Reservation<R::Key>>, ApiError>
where
  R: Resource,
  S: BookingStore + 'static,
{
  Ok(Json(service.cancel(caller.subject_id, id).await?))
}

// ─── Administration ──────────────────────────────────────────────────────────

/// `GET /admin/reservations`
pub async fn admin_list<R, S>(
  State(service): Service<R, S>,
  CallerIdentity(caller): CallerIdentity,
  ApiQuery(query): ApiQuery<ReservationQuery>,
) -> Result<Json<Vec<Reservation<R::Key>>>, ApiError>
where
  R: Resource,
  S: BookingStore + 'static,
{
  Ok(Json(service.admin_list_all(&caller, query).await?))
}

/// `PATCH /admin/reservations/{id}`
pub async fn admin_update<R, S>(
  State(service): Service<R, S>,
  CallerIdentity(caller): CallerIdentity,
  ApiPath(id): ApiPath<Uuid>,
  ApiJson(update): ApiJson<StatusUpdate>,
) -> Result<Json<Reservation<R::Key>>, ApiError>
where
  R: Resource,
  S: BookingStore + 'static,
{
  Ok(Json(service.admin_update_status(&caller, id, update).await?))
}

/// `DELETE /admin/reservations/{id}`
pub async fn admin_purge<R, S>(
  State(service): Service<R, S>,
  CallerIdentity(caller): CallerIdentity,
  ApiPath(id): ApiPath<Uuid>,
) -> Result<StatusCode, ApiError>
where
  R: Resource,
  S: BookingStore + 'static,
{
  service.admin_purge(&caller, id).await?;
  Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct BulkStatusBody {
  pub ids:    Vec<Uuid>,
  pub status: ReservationStatus,
}

#[derive(Debug, Serialize)]
pub struct BulkRow<K> {
  pub id:          Uuid,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub reservation: Option<Reservation<K>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error:       Option<ErrorBody>,
}

/// `POST /admin/reservations/bulk-status`
pub async fn admin_bulk_status<R, S>(
  State(service): Service<R, S>,
  CallerIdentity(caller): CallerIdentity,
  ApiJson(body): ApiJson<BulkStatusBody>,
) -> Result<Json<Vec<BulkRow<R::Key>>>, ApiError>
where
  R: Resource,
  S: BookingStore + 'static,
{
  let items = service
    .admin_bulk_update_status(&caller, body.ids, body.status)
    .await?;
  let rows = items
    .into_iter()
    .map(|item| match item.result {
      Ok(reservation) => BulkRow {
        id:          item.id,
        reservation: Some(reservation),
        error:       None,
      },
      Err(e) => BulkRow {
        id:          item.id,
        reservation: None,
        error:       Some(ErrorBody::from_booking(&e)),
      },
    })
    .collect();
  Ok(Json(rows))
}

/// Config as submitted by an administrator. `closes_at` is a wall-clock time
/// in the venue timezone.
#[derive(Debug, Deserialize)]
pub struct ConfigBody {
  pub key:         String,
  pub max_units:   u32,
  #[serde(default = "enabled")]
  pub active:      bool,
  #[serde(default)]
  pub eligibility: Eligibility,
  pub closes_at:   Option<NaiveDateTime>,
  pub label:       Option<String>,
}

fn enabled() -> bool { true }

/// `GET /admin/configs`
pub async fn admin_list_configs<R, S>(
  State(service): Service<R, S>,
  CallerIdentity(caller): CallerIdentity,
) -> Result<Json<Vec<CapacityConfig<R::ConfigKey>>>, ApiError>
where
  R: Resource,
  S: BookingStore + 'static,
{
  Ok(Json(service.admin_list_configs(&caller).await?))
}

/// `PUT /admin/configs`
pub async fn admin_put_config<R, S>(
  State(service): Service<R, S>,
  CallerIdentity(caller): CallerIdentity,
  ApiJson(body): ApiJson<ConfigBody>,
) -> Result<Json<CapacityConfig<R::ConfigKey>>, ApiError>
where
  R: Resource,
  S: BookingStore + 'static,
{
  let key = body.key.parse::<R::ConfigKey>()?;
  let closes_at = body
    .closes_at
    .map(|local| venue_instant(service.timezone(), local))
    .transpose()?;

  let mut config = CapacityConfig::new(key, body.max_units)
    .with_eligibility(body.eligibility)
    .with_closes_at(closes_at);
  config.active = body.active;
  config.label = body.label;

  Ok(Json(service.admin_put_config(&caller, config).await?))
}

/// `GET /admin/counts`
pub async fn admin_counts<R, S>(
  State(service): Service<R, S>,
  CallerIdentity(caller): CallerIdentity,
) -> Result<Json<StatusCounts>, ApiError>
where
  R: Resource,
  S: BookingStore + 'static,
{
  Ok(Json(service.admin_counts(&caller).await?))
}

#[derive(Debug, Serialize)]
pub struct ReconcileReport {
  pub cancelled: Vec<Uuid>,
}

/// `POST /admin/reconcile`
pub async fn admin_reconcile<R, S>(
  State(service): Service<R, S>,
  CallerIdentity(caller): CallerIdentity,
) -> Result<Json<ReconcileReport>, ApiError>
where
  R: Resource,
  S: BookingStore + 'static,
{
  caller.require_admin()?;
  let cancelled = service.reconcile_all().await?;
  Ok(Json(ReconcileReport { cancelled }))
}
