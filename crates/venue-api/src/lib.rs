//! JSON REST API for the venue booking services.
//!
//! Exposes an axum [`Router`] over [`venue_booking::BookingServices`].
//! Caller identity arrives in headers set by an upstream gateway (see
//! [`caller`]); TLS and transport concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", venue_api::api_router(services.clone()))
//! ```

pub mod caller;
pub mod error;
pub mod extract;
pub mod reservations;
pub mod subjects;

use axum::{
  Router,
  routing::{delete, get, post},
};
use venue_booking::{BookingServices, ReservationService};
use venue_core::{resource::Resource, store::BookingStore};

pub use caller::CallerIdentity;
pub use error::ApiError;

/// Routes for one resource family, to be nested under its own prefix.
pub fn resource_router<R, S>(service: ReservationService<R, S>) -> Router<()>
where
  R: Resource,
  S: BookingStore + 'static,
{
  use reservations as h;

  Router::new()
    .route("/availability", get(h::availability::<R, S>))
    .route("/availability/{*key}", get(h::available_units::<R, S>))
    .route("/reservations", post(h::reserve::<R, S>))
    .route("/reservations/mine", get(h::list_mine::<R, S>))
    .route("/reservations/{id}", get(h::get_one::<R, S>))
    .route("/reservations/{id}/cancel", post(h::cancel::<R, S>))
    .route("/admin/reservations", get(h::admin_list::<R, S>))
    .route(
      "/admin/reservations/bulk-status",
      post(h::admin_bulk_status::<R, S>),
    )
    .route(
      "/admin/reservations/{id}",
      delete(h::admin_purge::<R, S>).patch(h::admin_update::<R, S>),
    )
    .route(
      "/admin/configs",
      get(h::admin_list_configs::<R, S>).put(h::admin_put_config::<R, S>),
    )
    .route("/admin/counts", get(h::admin_counts::<R, S>))
    .route("/admin/reconcile", post(h::admin_reconcile::<R, S>))
    .with_state(service)
}

/// Build the full API router: `/visits`, `/activities` and `/subjects`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(services: BookingServices<S>) -> Router<()>
where
  S: BookingStore + 'static,
{
  let subjects = Router::new()
    .route("/subjects/me", post(subjects::register::<S>))
    .route("/subjects/{id}", delete(subjects::remove::<S>))
    .with_state(services.subjects);

  Router::new()
    .nest("/visits", resource_router(services.visits))
    .nest("/activities", resource_router(services.seats))
    .merge(subjects)
}
