//! Service-level tests against an in-memory `SqliteStore`.

use std::{
  collections::HashMap,
  sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
  },
  time::Duration,
};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::{Asia::Shanghai, Tz};
use uuid::Uuid;
use venue_core::{
  Error, ErrorKind,
  capacity::{CapacityConfig, Eligibility},
  clock::{Clock, FixedClock},
  reservation::{
    ContactInfo, NewReservation, Reservation, ReservationQuery,
    ReservationStatus, StatusCounts, StatusUpdate,
  },
  resource::{
    Activity, ActivityFilter, ActivityId, Resource, SlotKey, TimeSlot, Visit,
    VisitFilter,
  },
  store::{
    BookingStore, ConfigOutcome, ReleaseOutcome, ReserveOutcome, StoreError,
    UpdateOutcome,
  },
  subject::{Caller, Subject},
};
use venue_store_sqlite::SqliteStore;

use crate::{
  SeatRegistrationService, SlotBookingService, SubjectDirectory,
  service::ReservationService,
};

// ─── Fixtures ────────────────────────────────────────────────────────────────

/// Friday 2024-05-31, midday in the venue.
fn friday_noon() -> DateTime<Tz> {
  Shanghai.with_ymd_and_hms(2024, 5, 31, 12, 0, 0).unwrap()
}

fn slot() -> TimeSlot { "09:00-10:00".parse().unwrap() }

fn key(date: &str) -> SlotKey { format!("{date}/09:00-10:00").parse().unwrap() }

fn contact() -> Option<ContactInfo> {
  Some(ContactInfo { name: "Zhang San".into(), phone: "13900000000".into() })
}

fn admin() -> Caller { Caller::admin(Uuid::new_v4()) }

struct Fixture {
  store:  Arc<SqliteStore>,
  clock:  Arc<FixedClock>,
  visits: SlotBookingService<SqliteStore>,
  seats:  SeatRegistrationService<SqliteStore>,
}

impl Fixture {
  async fn new() -> Self {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let clock = Arc::new(FixedClock::new(friday_noon()));
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    Self {
      visits: ReservationService::new(store.clone(), dyn_clock.clone()),
      seats: ReservationService::new(store.clone(), dyn_clock),
      store,
      clock,
    }
  }

  async fn slot_with(&self, config: CapacityConfig<TimeSlot>) {
    self.visits.admin_put_config(&admin(), config).await.unwrap();
  }

  async fn activity(&self, max_units: u32) -> ActivityId {
    let id = ActivityId::new();
    self
      .seats
      .admin_put_config(&admin(), CapacityConfig::new(id, max_units))
      .await
      .unwrap();
    id
  }

  fn directory(&self) -> SubjectDirectory<SqliteStore> {
    let clock: Arc<dyn Clock> = self.clock.clone();
    SubjectDirectory::new(self.store.clone(), clock)
  }
}

// ─── Capacity ────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reserves_never_overbook() {
  let f = Fixture::new().await;
  f.slot_with(CapacityConfig::new(slot(), 5)).await;
  let k = key("2024-06-01");

  let tasks = (0..20)
    .map(|_| {
      let visits = f.visits.clone();
      tokio::spawn(async move {
        visits.reserve(Uuid::new_v4(), k, 1, contact()).await
      })
    })
    .collect::<Vec<_>>();

  let mut admitted = 0;
  let mut rejected = 0;
  for task in tasks {
    match task.await.unwrap() {
      Ok(_) => admitted += 1,
      Err(Error::CapacityExceeded { available: 0, .. }) => rejected += 1,
      Err(e) => panic!("unexpected error: {e}"),
    }
  }
  assert_eq!((admitted, rejected), (5, 15));
  assert_eq!(f.visits.available_units(k).await.unwrap(), 0);
  assert_eq!(f.store.consumed_units::<Visit>(k).await.unwrap(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn racing_reserves_on_a_two_unit_slot() {
  let f = Fixture::new().await;
  f.slot_with(CapacityConfig::new(slot(), 2)).await;
  let k = key("2024-06-01");

  let a = {
    let visits = f.visits.clone();
    tokio::spawn(async move { visits.reserve(Uuid::new_v4(), k, 1, contact()).await })
  };
  let b = {
    let visits = f.visits.clone();
    tokio::spawn(async move { visits.reserve(Uuid::new_v4(), k, 2, contact()).await })
  };
  let (a, b) = (a.await.unwrap(), b.await.unwrap());

  assert!(a.is_ok() != b.is_ok(), "exactly one of A and B is admitted");
  let loser = if a.is_ok() { &b } else { &a };
  assert!(matches!(loser, Err(Error::CapacityExceeded { .. })));

  let c = f.visits.reserve(Uuid::new_v4(), k, 1, contact()).await;
  assert_eq!(c.is_ok(), a.is_ok());
}

#[tokio::test]
async fn cancel_returns_exactly_the_cancelled_units() {
  let f = Fixture::new().await;
  f.slot_with(CapacityConfig::new(slot(), 30)).await;
  let k = key("2024-06-01");
  let subject = Uuid::new_v4();

  let r = f.visits.reserve(subject, k, 4, contact()).await.unwrap();
  f.visits.reserve(Uuid::new_v4(), k, 3, contact()).await.unwrap();
  let before = f.visits.available_units(k).await.unwrap();
  assert_eq!(before, 23);

  f.visits.cancel(subject, r.id).await.unwrap();
  assert_eq!(f.visits.available_units(k).await.unwrap(), before + 4);
}

#[tokio::test]
async fn duplicate_reserve_leaves_ledger_unchanged() {
  let f = Fixture::new().await;
  f.slot_with(CapacityConfig::new(slot(), 30)).await;
  let k = key("2024-06-01");
  let subject = Uuid::new_v4();

  let first = f.visits.reserve(subject, k, 2, contact()).await.unwrap();
  let err = f.visits.reserve(subject, k, 1, contact()).await.unwrap_err();
  assert!(matches!(
    err,
    Error::DuplicateActiveReservation { existing, .. } if existing == first.id
  ));
  assert_eq!(err.kind(), ErrorKind::DuplicateActiveReservation);
  assert_eq!(f.visits.available_units(k).await.unwrap(), 28);
}

#[tokio::test]
async fn reserve_cancel_reserve_again() {
  let f = Fixture::new().await;
  let activity = f.activity(1).await;
  let subject = Uuid::new_v4();

  let first = f.seats.reserve(subject, activity, 1, None).await.unwrap();
  assert_eq!(first.status, ReservationStatus::Confirmed);
  f.seats.cancel(subject, first.id).await.unwrap();

  let again = f.seats.reserve(subject, activity, 1, None).await.unwrap();
  assert_ne!(again.id, first.id);
}

#[tokio::test]
async fn available_units_of_unknown_key_is_not_found() {
  let f = Fixture::new().await;
  let err = f.seats.available_units(ActivityId::new()).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NotFound);

  f.slot_with(CapacityConfig::new(slot(), 30).inactive()).await;
  let err = f.visits.available_units(key("2024-06-01")).await.unwrap_err();
  assert!(matches!(err, Error::UnknownResourceKey(_)));
}

// ─── Listing ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn listing_is_sorted_and_reports_consumption() {
  let f = Fixture::new().await;
  for text in ["14:00-15:00", "09:00-10:00", "11:00-12:00"] {
    f.slot_with(CapacityConfig::new(text.parse().unwrap(), 30)).await;
  }
  f.slot_with(CapacityConfig::new("16:00-17:00".parse().unwrap(), 30).inactive())
    .await;
  f.visits
    .reserve(Uuid::new_v4(), key("2024-06-01"), 30, contact())
    .await
    .unwrap();

  let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
  let listing = f.visits.list_availability(VisitFilter { date }).await.unwrap();
  let rows = listing
    .iter()
    .map(|row| (row.key.time_slot.to_string(), row.consumed, row.available))
    .collect::<Vec<_>>();

  // Full slots stay listed with nothing available.
  assert_eq!(
    rows,
    [
      ("09:00-10:00".to_owned(), 30, 0),
      ("11:00-12:00".to_owned(), 0, 30),
      ("14:00-15:00".to_owned(), 0, 30),
    ]
  );
  assert_eq!(listing.iter().count(), 3, "listing can be iterated again");
}

#[tokio::test]
async fn weekday_only_slot_is_omitted_on_saturday() {
  let f = Fixture::new().await;
  f.slot_with(CapacityConfig::new(slot(), 30).with_eligibility(Eligibility::WeekdayOnly))
    .await;
  f.slot_with(CapacityConfig::new("13:00-14:00".parse().unwrap(), 30)).await;

  let saturday = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
  let listing = f
    .visits
    .list_availability(VisitFilter { date: saturday })
    .await
    .unwrap();
  let slots = listing
    .iter()
    .map(|row| row.key.time_slot.to_string())
    .collect::<Vec<_>>();
  assert_eq!(slots, ["13:00-14:00"]);

  let err = f
    .visits
    .reserve(Uuid::new_v4(), key("2024-06-01"), 1, contact())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Closed { .. }));
}

#[tokio::test]
async fn past_dates_list_nothing_and_reject_reservations() {
  let f = Fixture::new().await;
  f.slot_with(CapacityConfig::new(slot(), 30)).await;

  let yesterday = NaiveDate::from_ymd_opt(2024, 5, 30).unwrap();
  let listing = f
    .visits
    .list_availability(VisitFilter { date: yesterday })
    .await
    .unwrap();
  assert!(listing.is_empty());

  let err = f
    .visits
    .reserve(Uuid::new_v4(), key("2024-05-30"), 1, contact())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Closed { .. }));
  assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn activities_close_at_their_deadline() {
  let f = Fixture::new().await;
  let open = f.activity(10).await;
  let closing = ActivityId::new();
  let deadline = (friday_noon() + chrono::Duration::hours(1)).with_timezone(&Utc);
  f.seats
    .admin_put_config(
      &admin(),
      CapacityConfig::new(closing, 10).with_closes_at(Some(deadline)),
    )
    .await
    .unwrap();

  let listed = f.seats.list_availability(ActivityFilter {}).await.unwrap();
  assert_eq!(listed.len(), 2);

  f.clock.advance(chrono::Duration::hours(1));
  let listed = f.seats.list_availability(ActivityFilter {}).await.unwrap();
  assert_eq!(listed.iter().map(|row| row.key).collect::<Vec<_>>(), [open]);

  let err = f
    .seats
    .reserve(Uuid::new_v4(), closing, 1, None)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Closed { .. }));
}

// ─── Validation ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_key_is_reported_before_bad_units() {
  let f = Fixture::new().await;
  let err = f
    .visits
    .reserve(Uuid::new_v4(), key("2024-06-01"), 0, None)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::UnknownResourceKey(_)));

  f.slot_with(CapacityConfig::new(slot(), 30)).await;
  let err = f
    .visits
    .reserve(Uuid::new_v4(), key("2024-06-01"), 0, contact())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn visits_require_contact_details() {
  let f = Fixture::new().await;
  f.slot_with(CapacityConfig::new(slot(), 30)).await;
  let blank = ContactInfo { name: "  ".into(), phone: "139".into() };

  for contact in [None, Some(blank)] {
    let err = f
      .visits
      .reserve(Uuid::new_v4(), key("2024-06-01"), 1, contact)
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
  }

  let padded = ContactInfo { name: " Li Si ".into(), phone: " 137 ".into() };
  let r = f
    .visits
    .reserve(Uuid::new_v4(), key("2024-06-01"), 1, Some(padded))
    .await
    .unwrap();
  assert_eq!(r.status, ReservationStatus::Pending);
  assert_eq!(r.contact.unwrap().name, "Li Si");
}

#[tokio::test]
async fn capacity_error_reports_requested_and_available() {
  let f = Fixture::new().await;
  let activity = f.activity(3).await;
  f.seats.reserve(Uuid::new_v4(), activity, 2, None).await.unwrap();

  let err = f
    .seats
    .reserve(Uuid::new_v4(), activity, 2, None)
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    Error::CapacityExceeded { requested: 2, available: 1, .. }
  ));
  assert!(err.is_retryable());
}

// ─── Cancellation ────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancel_rules() {
  let f = Fixture::new().await;
  let activity = f.activity(10).await;
  let owner = Uuid::new_v4();
  let r = f.seats.reserve(owner, activity, 1, None).await.unwrap();

  let err = f.seats.cancel(Uuid::new_v4(), r.id).await.unwrap_err();
  assert!(matches!(err, Error::ReservationNotFound(id) if id == r.id));

  let err = f.seats.cancel(owner, Uuid::new_v4()).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NotFound);

  let cancelled = f.seats.cancel(owner, r.id).await.unwrap();
  assert_eq!(cancelled.status, ReservationStatus::Cancelled);

  let err = f.seats.cancel(owner, r.id).await.unwrap_err();
  assert!(matches!(err, Error::AlreadyCancelled(_)));
}

#[tokio::test]
async fn attended_reservation_cannot_be_cancelled() {
  let f = Fixture::new().await;
  let activity = f.activity(10).await;
  let owner = Uuid::new_v4();
  let r = f.seats.reserve(owner, activity, 1, None).await.unwrap();

  f.seats
    .admin_update_status(
      &admin(),
      r.id,
      StatusUpdate { status: Some(ReservationStatus::Attended), notes: None },
    )
    .await
    .unwrap();

  let err = f.seats.cancel(owner, r.id).await.unwrap_err();
  assert!(matches!(
    err,
    Error::Immutable { status: ReservationStatus::Attended, .. }
  ));
  assert_eq!(err.kind(), ErrorKind::StateTransition);
}

// ─── Access ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn only_owner_or_admin_may_read() {
  let f = Fixture::new().await;
  let activity = f.activity(10).await;
  let owner = Uuid::new_v4();
  let r = f.seats.reserve(owner, activity, 1, None).await.unwrap();

  assert_eq!(f.seats.get(&Caller::subject(owner), r.id).await.unwrap(), r);
  assert_eq!(f.seats.get(&admin(), r.id).await.unwrap(), r);

  let err = f
    .seats
    .get(&Caller::subject(Uuid::new_v4()), r.id)
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Authorization);
}

#[tokio::test]
async fn admin_operations_require_admin() {
  let f = Fixture::new().await;
  let caller = Caller::subject(Uuid::new_v4());
  let id = Uuid::new_v4();

  let errors = vec![
    f.visits
      .admin_list_all(&caller, ReservationQuery::default())
      .await
      .unwrap_err(),
    f.visits
      .admin_update_status(&caller, id, StatusUpdate::default())
      .await
      .unwrap_err(),
    f.visits
      .admin_bulk_update_status(&caller, vec![id], ReservationStatus::Confirmed)
      .await
      .unwrap_err(),
    f.visits.admin_purge(&caller, id).await.unwrap_err(),
    f.visits
      .admin_put_config(&caller, CapacityConfig::new(slot(), 1))
      .await
      .unwrap_err(),
    f.visits.admin_list_configs(&caller).await.unwrap_err(),
    f.visits.admin_counts(&caller).await.unwrap_err(),
  ];
  assert!(errors.iter().all(|e| matches!(e, Error::Forbidden(_))));
}

#[tokio::test]
async fn list_mine_is_newest_first_and_private() {
  let f = Fixture::new().await;
  let a = f.activity(10).await;
  let b = f.activity(10).await;
  let me = Uuid::new_v4();

  let first = f.seats.reserve(me, a, 1, None).await.unwrap();
  f.clock.advance(chrono::Duration::minutes(1));
  let second = f.seats.reserve(me, b, 1, None).await.unwrap();
  f.seats.reserve(Uuid::new_v4(), a, 1, None).await.unwrap();

  let mine = f.seats.list_mine(me).await.unwrap();
  assert_eq!(
    mine.iter().map(|r| r.id).collect::<Vec<_>>(),
    [second.id, first.id]
  );
  assert!(f.visits.list_mine(me).await.unwrap().is_empty());
}

// ─── Administration ──────────────────────────────────────────────────────────

#[tokio::test]
async fn admin_transitions_follow_the_visit_lifecycle() {
  let f = Fixture::new().await;
  f.slot_with(CapacityConfig::new(slot(), 30)).await;
  let r = f
    .visits
    .reserve(Uuid::new_v4(), key("2024-06-01"), 1, contact())
    .await
    .unwrap();
  let to = |status| StatusUpdate { status: Some(status), notes: None };

  let err = f
    .visits
    .admin_update_status(&admin(), r.id, to(ReservationStatus::Completed))
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    Error::IllegalTransition {
      from: ReservationStatus::Pending,
      to:   ReservationStatus::Completed,
    }
  ));

  for status in [ReservationStatus::Confirmed, ReservationStatus::Completed] {
    let updated = f
      .visits
      .admin_update_status(&admin(), r.id, to(status))
      .await
      .unwrap();
    assert_eq!(updated.status, status);
  }

  let err = f
    .visits
    .admin_update_status(&admin(), r.id, to(ReservationStatus::Cancelled))
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::StateTransition);

  let noted = f
    .visits
    .admin_update_status(
      &admin(),
      r.id,
      StatusUpdate { status: None, notes: Some("arrived early".into()) },
    )
    .await
    .unwrap();
  assert_eq!(noted.status, ReservationStatus::Completed);
  assert_eq!(noted.notes.as_deref(), Some("arrived early"));
}

#[tokio::test]
async fn bulk_update_reports_each_row() {
  let f = Fixture::new().await;
  f.slot_with(CapacityConfig::new(slot(), 30)).await;
  let k = key("2024-06-01");
  let a = f.visits.reserve(Uuid::new_v4(), k, 1, contact()).await.unwrap();
  let b = f.visits.reserve(Uuid::new_v4(), k, 1, contact()).await.unwrap();
  let owner = Uuid::new_v4();
  let c = f.visits.reserve(owner, k, 1, contact()).await.unwrap();
  f.visits.cancel(owner, c.id).await.unwrap();
  let missing = Uuid::new_v4();

  let items = f
    .visits
    .admin_bulk_update_status(
      &admin(),
      vec![a.id, missing, c.id, b.id, a.id],
      ReservationStatus::Confirmed,
    )
    .await
    .unwrap();

  let outcome = items
    .iter()
    .map(|item| (item.id, item.result.as_ref().map(|r| r.status).map_err(Error::kind)))
    .collect::<Vec<_>>();
  assert_eq!(
    outcome,
    [
      (a.id, Ok(ReservationStatus::Confirmed)),
      (missing, Err(ErrorKind::NotFound)),
      (c.id, Err(ErrorKind::StateTransition)),
      (b.id, Ok(ReservationStatus::Confirmed)),
    ]
  );
}

#[tokio::test]
async fn purge_deletes_and_frees_capacity() {
  let f = Fixture::new().await;
  let activity = f.activity(1).await;
  let r = f.seats.reserve(Uuid::new_v4(), activity, 1, None).await.unwrap();

  f.seats.admin_purge(&admin(), r.id).await.unwrap();
  assert_eq!(f.seats.available_units(activity).await.unwrap(), 1);

  let err = f.seats.admin_purge(&admin(), r.id).await.unwrap_err();
  assert!(matches!(err, Error::ReservationNotFound(_)));
}

#[tokio::test]
async fn config_ceiling_cannot_drop_below_reservations() {
  let f = Fixture::new().await;
  let activity = f.activity(10).await;
  f.seats.reserve(Uuid::new_v4(), activity, 4, None).await.unwrap();

  let err = f
    .seats
    .admin_put_config(&admin(), CapacityConfig::new(activity, 3))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Validation(_)));

  let err = f
    .seats
    .admin_put_config(&admin(), CapacityConfig::new(activity, 0))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Validation(_)));

  let saved = f
    .seats
    .admin_put_config(
      &admin(),
      CapacityConfig::new(activity, 4).with_label("  Tea ceremony "),
    )
    .await
    .unwrap();
  assert_eq!(saved.label.as_deref(), Some("Tea ceremony"));
  assert_eq!(saved.updated_at, friday_noon().with_timezone(&Utc));
  assert_eq!(f.seats.available_units(activity).await.unwrap(), 0);
}

#[tokio::test]
async fn counts_and_config_listing() {
  let f = Fixture::new().await;
  let a = f.activity(10).await;
  let b = f.activity(10).await;
  let owner = Uuid::new_v4();
  let r = f.seats.reserve(owner, a, 1, None).await.unwrap();
  f.seats.reserve(Uuid::new_v4(), b, 1, None).await.unwrap();
  f.seats.cancel(owner, r.id).await.unwrap();

  let counts = f.seats.admin_counts(&admin()).await.unwrap();
  assert_eq!(
    counts,
    StatusCounts { confirmed: 1, cancelled: 1, ..Default::default() }
  );

  let mut expected = vec![a, b];
  expected.sort();
  let configs = f.seats.admin_list_configs(&admin()).await.unwrap();
  assert_eq!(configs.iter().map(|c| c.key).collect::<Vec<_>>(), expected);
}

// ─── Reconciliation ──────────────────────────────────────────────────────────

#[tokio::test]
async fn removed_subjects_release_capacity_on_next_reserve() {
  let f = Fixture::new().await;
  let directory = f.directory();
  let activity = f.activity(2).await;
  let leaving = Uuid::new_v4();

  let orphan = f.seats.reserve(leaving, activity, 2, None).await.unwrap();
  directory.remove(&Caller::subject(leaving), leaving).await.unwrap();

  // The orphan still holds capacity until the key is reconciled.
  assert_eq!(f.seats.available_units(activity).await.unwrap(), 0);

  f.seats.reserve(Uuid::new_v4(), activity, 1, None).await.unwrap();
  let orphan = f.seats.get(&admin(), orphan.id).await.unwrap();
  assert_eq!(orphan.status, ReservationStatus::Cancelled);
  assert_eq!(f.seats.available_units(activity).await.unwrap(), 1);
}

#[tokio::test]
async fn reconcile_twice_changes_nothing_the_second_time() {
  let f = Fixture::new().await;
  let directory = f.directory();
  let activity = f.activity(5).await;
  let leaving = Uuid::new_v4();
  let staying = Uuid::new_v4();

  let orphan = f.seats.reserve(leaving, activity, 1, None).await.unwrap();
  f.seats.reserve(staying, activity, 1, None).await.unwrap();
  directory.remove(&admin(), leaving).await.unwrap();

  assert_eq!(f.seats.reconcile_orphans(activity).await.unwrap(), [orphan.id]);
  let snapshot = f
    .seats
    .admin_list_all(&admin(), ReservationQuery::default())
    .await
    .unwrap();

  assert!(f.seats.reconcile_orphans(activity).await.unwrap().is_empty());
  let after = f
    .seats
    .admin_list_all(&admin(), ReservationQuery::default())
    .await
    .unwrap();
  assert_eq!(snapshot, after);
}

#[tokio::test]
async fn sweep_reconciles_every_orphaned_key() {
  let f = Fixture::new().await;
  let directory = f.directory();
  let a = f.activity(5).await;
  let b = f.activity(5).await;
  let leaving = Uuid::new_v4();

  f.seats.reserve(leaving, a, 1, None).await.unwrap();
  f.seats.reserve(leaving, b, 1, None).await.unwrap();
  directory.remove(&Caller::subject(leaving), leaving).await.unwrap();

  assert_eq!(f.seats.reconcile_all().await.unwrap().len(), 2);
  assert!(f.seats.reconcile_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn subjects_may_only_remove_themselves() {
  let f = Fixture::new().await;
  let directory = f.directory();
  let someone = Caller::subject(Uuid::new_v4());
  let registered = directory.register(&someone).await.unwrap();
  assert_eq!(registered.subject_id, someone.subject_id);

  let stranger = Caller::subject(Uuid::new_v4());
  let err = directory
    .remove(&stranger, someone.subject_id)
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Authorization);

  directory.remove(&someone, someone.subject_id).await.unwrap();
  let err = directory
    .remove(&someone, someone.subject_id)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::SubjectNotFound(_)));
}

// ─── Contention ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn held_key_makes_reserve_busy() {
  let f = Fixture::new().await;
  let activity = f.activity(5).await;
  let seats = f.seats.clone().with_lock_timeout(Duration::from_millis(20));

  let guard = seats.lock_key(&activity).await.unwrap();
  let err = seats
    .reserve(Uuid::new_v4(), activity, 1, None)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Busy(_)));
  assert!(err.is_retryable());

  drop(guard);
  assert!(seats.reserve(Uuid::new_v4(), activity, 1, None).await.is_ok());
}

// ─── Store conflicts ─────────────────────────────────────────────────────────

/// Fails the next `failures` reserve attempts with a write conflict, then
/// delegates to the wrapped store.
struct FlakyStore {
  inner:    SqliteStore,
  failures: AtomicU32,
}

#[derive(Debug, thiserror::Error)]
enum FlakyError {
  #[error("database is locked")]
  Conflict,
  #[error(transparent)]
  Inner(#[from] venue_store_sqlite::Error),
}

impl StoreError for FlakyError {
  fn is_conflict(&self) -> bool {
    match self {
      Self::Conflict => true,
      Self::Inner(e) => e.is_conflict(),
    }
  }
}

impl BookingStore for FlakyStore {
  type Error = FlakyError;

  async fn put_config<R: Resource>(
    &self,
    config: CapacityConfig<R::ConfigKey>,
  ) -> Result<ConfigOutcome<R::ConfigKey>, FlakyError> {
    Ok(self.inner.put_config::<R>(config).await?)
  }

  async fn get_config<R: Resource>(
    &self,
    key: R::ConfigKey,
  ) -> Result<Option<CapacityConfig<R::ConfigKey>>, FlakyError> {
    Ok(self.inner.get_config::<R>(key).await?)
  }

  async fn list_configs<R: Resource>(
    &self,
  ) -> Result<Vec<CapacityConfig<R::ConfigKey>>, FlakyError> {
    Ok(self.inner.list_configs::<R>().await?)
  }

  async fn consumed_units<R: Resource>(
    &self,
    key: R::Key,
  ) -> Result<u32, FlakyError> {
    Ok(self.inner.consumed_units::<R>(key).await?)
  }

  async fn consumed_units_many<R: Resource>(
    &self,
    keys: Vec<R::Key>,
  ) -> Result<HashMap<R::Key, u32>, FlakyError> {
    Ok(self.inner.consumed_units_many::<R>(keys).await?)
  }

  async fn try_reserve<R: Resource>(
    &self,
    intent: NewReservation<R::Key>,
  ) -> Result<ReserveOutcome<R::Key>, FlakyError> {
    let left = self.failures.load(Ordering::SeqCst);
    if left > 0 {
      self.failures.store(left - 1, Ordering::SeqCst);
      return Err(FlakyError::Conflict);
    }
    Ok(self.inner.try_reserve::<R>(intent).await?)
  }

  async fn release<R: Resource>(
    &self,
    id: Uuid,
    owner: Option<Uuid>,
    at: DateTime<Utc>,
  ) -> Result<ReleaseOutcome<R::Key>, FlakyError> {
    Ok(self.inner.release::<R>(id, owner, at).await?)
  }

  async fn update_status<R: Resource>(
    &self,
    id: Uuid,
    update: StatusUpdate,
    at: DateTime<Utc>,
  ) -> Result<UpdateOutcome<R::Key>, FlakyError> {
    Ok(self.inner.update_status::<R>(id, update, at).await?)
  }

  async fn purge<R: Resource>(&self, id: Uuid) -> Result<bool, FlakyError> {
    Ok(self.inner.purge::<R>(id).await?)
  }

  async fn get_reservation<R: Resource>(
    &self,
    id: Uuid,
  ) -> Result<Option<Reservation<R::Key>>, FlakyError> {
    Ok(self.inner.get_reservation::<R>(id).await?)
  }

  async fn list_reservations<R: Resource>(
    &self,
    query: ReservationQuery,
  ) -> Result<Vec<Reservation<R::Key>>, FlakyError> {
    Ok(self.inner.list_reservations::<R>(query).await?)
  }

  async fn count_by_status<R: Resource>(
    &self,
  ) -> Result<StatusCounts, FlakyError> {
    Ok(self.inner.count_by_status::<R>().await?)
  }

  async fn register_subject(
    &self,
    subject_id: Uuid,
    at: DateTime<Utc>,
  ) -> Result<Subject, FlakyError> {
    Ok(self.inner.register_subject(subject_id, at).await?)
  }

  async fn remove_subject(&self, subject_id: Uuid) -> Result<bool, FlakyError> {
    Ok(self.inner.remove_subject(subject_id).await?)
  }

  async fn cancel_orphans<R: Resource>(
    &self,
    key: R::Key,
    at: DateTime<Utc>,
  ) -> Result<Vec<Uuid>, FlakyError> {
    Ok(self.inner.cancel_orphans::<R>(key, at).await?)
  }

  async fn orphaned_keys<R: Resource>(
    &self,
  ) -> Result<Vec<R::Key>, FlakyError> {
    Ok(self.inner.orphaned_keys::<R>().await?)
  }
}

async fn flaky_seats(
  failures: u32,
) -> (Arc<FlakyStore>, SeatRegistrationService<FlakyStore>, ActivityId) {
  let store = Arc::new(FlakyStore {
    inner:    SqliteStore::open_in_memory().await.unwrap(),
    failures: AtomicU32::new(0),
  });
  let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(friday_noon()));
  let seats = ReservationService::<Activity, _>::new(store.clone(), clock);
  let activity = ActivityId::new();
  seats
    .admin_put_config(&admin(), CapacityConfig::new(activity, 5))
    .await
    .unwrap();
  store.failures.store(failures, Ordering::SeqCst);
  (store, seats, activity)
}

#[tokio::test]
async fn one_conflict_is_retried_transparently() {
  let (store, seats, activity) = flaky_seats(1).await;
  seats.reserve(Uuid::new_v4(), activity, 1, None).await.unwrap();
  assert_eq!(store.failures.load(Ordering::SeqCst), 0);
  assert_eq!(seats.available_units(activity).await.unwrap(), 4);
}

#[tokio::test]
async fn persistent_conflict_surfaces_after_one_retry() {
  let (store, seats, activity) = flaky_seats(3).await;
  let err = seats
    .reserve(Uuid::new_v4(), activity, 1, None)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Conflict(_)));
  assert_eq!(err.kind(), ErrorKind::Conflict);
  assert_eq!(store.failures.load(Ordering::SeqCst), 1, "two attempts in total");
  assert_eq!(seats.available_units(activity).await.unwrap(), 5);
}
