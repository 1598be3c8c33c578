//! Capacity-constrained booking services for the venue.
//!
//! [`ReservationService`] implements the booking algorithm once, generic over
//! a [`venue_core::resource::Resource`] family and a
//! [`venue_core::store::BookingStore`] backend. [`SlotBookingService`] and
//! [`SeatRegistrationService`] are its two instantiations.

mod availability;
mod locks;
mod service;
mod subjects;

pub use availability::{AvailabilityListing, AvailabilityRow};
pub use locks::{KeyGuard, KeyLocks};
pub use service::{
  BulkItem, DEFAULT_LOCK_TIMEOUT, ReservationService, SeatRegistrationService,
  SlotBookingService,
};
pub use subjects::SubjectDirectory;

use std::{sync::Arc, time::Duration};

use venue_core::{clock::Clock, store::BookingStore};

/// Every service of one venue, sharing a store and a clock.
pub struct BookingServices<S> {
  pub visits:   SlotBookingService<S>,
  pub seats:    SeatRegistrationService<S>,
  pub subjects: SubjectDirectory<S>,
}

impl<S> Clone for BookingServices<S> {
  fn clone(&self) -> Self {
    Self {
      visits:   self.visits.clone(),
      seats:    self.seats.clone(),
      subjects: self.subjects.clone(),
    }
  }
}

impl<S: BookingStore> BookingServices<S> {
  pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, lock_timeout: Duration) -> Self {
    Self {
      visits:   ReservationService::new(store.clone(), clock.clone())
        .with_lock_timeout(lock_timeout),
      seats:    ReservationService::new(store.clone(), clock.clone())
        .with_lock_timeout(lock_timeout),
      subjects: SubjectDirectory::new(store, clock),
    }
  }
}

#[cfg(test)]
mod tests;
