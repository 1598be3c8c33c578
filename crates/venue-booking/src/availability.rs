//! Availability listings.

use std::collections::HashMap;

use serde::Serialize;

/// One key's capacity at the moment the listing was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilityRow<K> {
  pub key:       K,
  pub max_units: u32,
  pub consumed:  u32,
  pub available: u32,
}

/// A snapshot of open keys, ascending by key.
///
/// Rows are computed as they are iterated, and [`AvailabilityListing::iter`]
/// may be called any number of times over the same snapshot.
#[derive(Debug, Clone)]
pub struct AvailabilityListing<K> {
  open:     Vec<(K, u32)>,
  consumed: HashMap<K, u32>,
}

impl<K> AvailabilityListing<K>
where
  K: Clone + Ord + std::hash::Hash,
{
  /// `open` pairs each key with its ceiling; `consumed` omits idle keys.
  pub fn new(mut open: Vec<(K, u32)>, consumed: HashMap<K, u32>) -> Self {
    open.sort_by(|a, b| a.0.cmp(&b.0));
    Self { open, consumed }
  }

  pub fn iter(&self) -> impl Iterator<Item = AvailabilityRow<K>> + '_ {
    self.open.iter().map(|(key, max_units)| {
      let consumed = self.consumed.get(key).copied().unwrap_or(0);
      AvailabilityRow {
        key: key.clone(),
        max_units: *max_units,
        consumed,
        available: max_units.saturating_sub(consumed),
      }
    })
  }

  pub fn len(&self) -> usize { self.open.len() }

  pub fn is_empty(&self) -> bool { self.open.is_empty() }
}

impl<K> Default for AvailabilityListing<K> {
  fn default() -> Self {
    Self { open: Vec::new(), consumed: HashMap::new() }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rows_are_sorted_and_restartable() {
    let listing = AvailabilityListing::new(
      vec![("b", 10), ("a", 5), ("c", 2)],
      HashMap::from([("a", 5), ("c", 3)]),
    );

    let first: Vec<_> = listing.iter().collect();
    let second: Vec<_> = listing.iter().collect();
    assert_eq!(first, second);

    let summary = first
      .iter()
      .map(|r| (r.key, r.consumed, r.available))
      .collect::<Vec<_>>();
    // An over-committed key reports zero, never a negative count.
    assert_eq!(summary, [("a", 5, 0), ("b", 0, 10), ("c", 3, 0)]);
  }
}
