//! The live-subject registry, as seen by the identity collaborator.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;
use venue_core::{
  Error, Result, clock::Clock, store::BookingStore, subject::{Caller, Subject},
};

/// Registers and removes subjects. Removing one does not touch its
/// reservations; those are cancelled by reconciliation.
pub struct SubjectDirectory<S> {
  store: Arc<S>,
  clock: Arc<dyn Clock>,
}

impl<S> Clone for SubjectDirectory<S> {
  fn clone(&self) -> Self {
    Self { store: Arc::clone(&self.store), clock: Arc::clone(&self.clock) }
  }
}

impl<S: BookingStore> SubjectDirectory<S> {
  pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
    Self { store, clock }
  }

  /// Record the caller as a live subject. Idempotent.
  pub async fn register(&self, caller: &Caller) -> Result<Subject> {
    let at = self.clock.now().with_timezone(&Utc);
    let subject = self
      .store
      .register_subject(caller.subject_id, at)
      .await
      .map_err(|e| Error::Store(Box::new(e)))?;
    tracing::debug!(subject_id = %subject.subject_id, "subject registered");
    Ok(subject)
  }

  /// Remove `subject_id`. Subjects may remove themselves; administrators
  /// may remove anyone.
  pub async fn remove(&self, caller: &Caller, subject_id: Uuid) -> Result<()> {
    if !caller.may_access(subject_id) {
      return Err(Error::Forbidden(
        "only administrators may remove other subjects".into(),
      ));
    }
    let removed = self
      .store
      .remove_subject(subject_id)
      .await
      .map_err(|e| Error::Store(Box::new(e)))?;
    if !removed {
      return Err(Error::SubjectNotFound(subject_id));
    }
    tracing::info!(%subject_id, "subject removed");
    Ok(())
  }
}
