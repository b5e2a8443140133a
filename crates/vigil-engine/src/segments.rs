//! Interval-partition algebra for the erase-and-replace strategy.
//!
//! The incoming source's validity window is partitioned into sub-intervals at
//! every validity boundary of the sources competing inside it. Each
//! sub-interval is won by the source with the highest generation time among
//! the events overlapping it; losers are trimmed, split or removed. This
//! module is pure — it decides, the resolver applies.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

// ─── Inputs ──────────────────────────────────────────────────────────────────

/// The slice of an event the walk needs.
#[derive(Debug, Clone)]
pub struct TimedEvent {
  pub event_uuid:      Uuid,
  pub start:           DateTime<Utc>,
  pub stop:            DateTime<Utc>,
  pub source_id:       Uuid,
  pub generation_time: DateTime<Utc>,
}

/// A surviving piece of a trimmed or fragmented loser event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
  pub original: Uuid,
  pub start:    DateTime<Utc>,
  pub stop:     DateTime<Utc>,
}

/// The walk's verdict over one gauge and one incoming window.
#[derive(Debug, Default)]
pub struct WalkOutcome {
  /// Original events that won at least one sub-interval and survive whole.
  pub mark_visible: BTreeSet<Uuid>,
  /// Original events replaced by fragments or removed outright.
  pub remove: BTreeSet<Uuid>,
  /// Surviving pieces, in the order they were decided. Fragments of one
  /// original are its aliases for link re-pointing.
  pub fragments: Vec<Fragment>,
}

// ─── Boundaries ──────────────────────────────────────────────────────────────

/// Distinct validity boundaries of the competing sources, clamped to the
/// incoming window and sorted ascending.
pub fn boundaries(
  validity_periods: impl IntoIterator<Item = (DateTime<Utc>, DateTime<Utc>)>,
  window_start: DateTime<Utc>,
  window_stop: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
  let mut set: BTreeSet<DateTime<Utc>> = BTreeSet::new();
  for (start, stop) in validity_periods {
    if start >= window_start && start <= window_stop {
      set.insert(start);
    }
    if stop >= window_start && stop <= window_stop {
      set.insert(stop);
    }
  }
  set.into_iter().collect()
}

// ─── Walk ────────────────────────────────────────────────────────────────────

/// The extent an event currently competes with: its carried remainder if it
/// has one, its full span otherwise.
fn extent_of(
  event: &TimedEvent,
  pending: &BTreeMap<Uuid, (DateTime<Utc>, DateTime<Utc>)>,
) -> (DateTime<Utc>, DateTime<Utc>) {
  pending
    .get(&event.event_uuid)
    .copied()
    .unwrap_or((event.start, event.stop))
}

/// Does `[x, y]` overlap the sub-interval `[a, b)`?
///
/// Strict on the edges so intervals that merely touch do not compete;
/// punctual events (`x == y`) belong to the sub-interval containing their
/// instant.
fn overlaps(
  x: DateTime<Utc>,
  y: DateTime<Utc>,
  a: DateTime<Utc>,
  b: DateTime<Utc>,
) -> bool {
  if x == y { a <= x && x < b } else { x < b && y > a }
}

/// Walk consecutive boundary pairs and decide every event's fate.
///
/// A loser's remainder beyond the current sub-interval is carried as a
/// pending split and re-evaluated against the next sub-interval; whatever is
/// still pending when the walk ends is finalised as a fragment. A
/// sub-interval without any overlapping event ends the walk.
pub fn walk(events: &[TimedEvent], bounds: &[DateTime<Utc>]) -> WalkOutcome {
  let mut outcome = WalkOutcome::default();
  // original uuid → extent of the surviving remainder being carried.
  let mut pending: BTreeMap<Uuid, (DateTime<Utc>, DateTime<Utc>)> =
    BTreeMap::new();

  for pair in bounds.windows(2) {
    let (a, b) = (pair[0], pair[1]);

    let overlapping: Vec<&TimedEvent> = events
      .iter()
      .filter(|event| {
        let (x, y) = extent_of(event, &pending);
        overlaps(x, y, a, b)
      })
      .collect();
    if overlapping.is_empty() {
      break;
    }

    let max_generation = overlapping
      .iter()
      .map(|event| event.generation_time)
      .max()
      .expect("non-empty overlap set");
    let winners: BTreeSet<Uuid> = overlapping
      .iter()
      .filter(|event| event.generation_time == max_generation)
      .map(|event| event.source_id)
      .collect();

    for event in overlapping {
      let (x, y) = extent_of(event, &pending);
      if winners.contains(&event.source_id) {
        // Pending remainders of earlier losses keep carrying; whole events
        // are simply made visible.
        if !pending.contains_key(&event.event_uuid) {
          outcome.mark_visible.insert(event.event_uuid);
        }
        continue;
      }

      outcome.mark_visible.remove(&event.event_uuid);
      outcome.remove.insert(event.event_uuid);
      pending.remove(&event.event_uuid);

      // The piece before the sub-interval lies in already-decided territory
      // and survives as a fragment.
      if x < a {
        outcome.fragments.push(Fragment {
          original: event.event_uuid,
          start:    x,
          stop:     a,
        });
      }
      // The piece after the sub-interval is contested by what follows.
      if y > b {
        pending.insert(event.event_uuid, (b, y));
      }
    }
  }

  // Remainders that out-lived the walk survive whole.
  for (original, (start, stop)) in pending {
    outcome.remove.insert(original);
    outcome.fragments.push(Fragment { original, start, stop });
  }

  outcome
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn ts(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 6, 5, hour, 0, 0).unwrap()
  }

  fn timed(
    start: u32,
    stop: u32,
    source_id: Uuid,
    generation: u32,
  ) -> TimedEvent {
    TimedEvent {
      event_uuid: Uuid::new_v4(),
      start: ts(start),
      stop: ts(stop),
      source_id,
      generation_time: ts(generation),
    }
  }

  #[test]
  fn boundaries_are_clamped_and_sorted() {
    let bounds = boundaries(
      vec![(ts(0), ts(10)), (ts(5), ts(9)), (ts(8), ts(12))],
      ts(5),
      ts(9),
    );
    assert_eq!(bounds, vec![ts(5), ts(8), ts(9)]);
  }

  #[test]
  fn newer_window_trims_older_event() {
    let older_source = Uuid::new_v4();
    let newer_source = Uuid::new_v4();
    let older = timed(2, 8, older_source, 1);
    let newer = timed(5, 9, newer_source, 3);

    let bounds = vec![ts(5), ts(8), ts(9)];
    let outcome = walk(&[older.clone(), newer.clone()], &bounds);

    assert!(outcome.mark_visible.contains(&newer.event_uuid));
    assert!(outcome.remove.contains(&older.event_uuid));
    assert_eq!(outcome.fragments, vec![Fragment {
      original: older.event_uuid,
      start:    ts(2),
      stop:     ts(5),
    }]);
  }

  #[test]
  fn touching_intervals_do_not_compete() {
    let left_source = Uuid::new_v4();
    let right_source = Uuid::new_v4();
    let left = timed(0, 5, left_source, 9);
    let right = timed(5, 8, right_source, 1);

    let outcome = walk(&[left.clone(), right.clone()], &[ts(5), ts(8)]);

    // The older right event still wins its own segment: the newer one only
    // touches the boundary.
    assert!(outcome.mark_visible.contains(&right.event_uuid));
    assert!(outcome.remove.is_empty());
  }

  #[test]
  fn loser_spanning_the_whole_window_is_split_around_the_winner() {
    let old_source = Uuid::new_v4();
    let new_source = Uuid::new_v4();
    let old = timed(0, 10, old_source, 1);
    let mid = timed(4, 6, new_source, 5);

    // Competing windows: old [0,10], new [4,6] → boundaries inside [4,6].
    let outcome = walk(&[old.clone(), mid.clone()], &[ts(4), ts(6)]);

    assert!(outcome.mark_visible.contains(&mid.event_uuid));
    assert!(outcome.remove.contains(&old.event_uuid));
    assert_eq!(outcome.fragments, vec![
      Fragment { original: old.event_uuid, start: ts(0), stop: ts(4) },
      Fragment { original: old.event_uuid, start: ts(6), stop: ts(10) },
    ]);
  }

  #[test]
  fn pending_remainder_is_recontested_in_later_segments() {
    let s1 = Uuid::new_v4();
    let s2 = Uuid::new_v4();
    let s3 = Uuid::new_v4();
    // s1 spans everything with the lowest generation; s2 wins the first
    // segment, s3 the second.
    let spanning = timed(0, 10, s1, 1);
    let first = timed(0, 4, s2, 5);
    let second = timed(4, 8, s3, 3);

    let outcome = walk(
      &[spanning.clone(), first.clone(), second.clone()],
      &[ts(0), ts(4), ts(8)],
    );

    assert!(outcome.mark_visible.contains(&first.event_uuid));
    assert!(outcome.mark_visible.contains(&second.event_uuid));
    assert!(outcome.remove.contains(&spanning.event_uuid));
    // The spanning loser survives only beyond the walked window.
    assert_eq!(outcome.fragments, vec![Fragment {
      original: spanning.event_uuid,
      start:    ts(8),
      stop:     ts(10),
    }]);
  }

  #[test]
  fn winner_then_loser_is_trimmed_to_its_winning_half() {
    let s1 = Uuid::new_v4();
    let s2 = Uuid::new_v4();
    // s1 wins [0,4) (s2 absent there), loses [4,8).
    let spanning = timed(0, 8, s1, 2);
    let newer = timed(4, 8, s2, 5);

    let outcome =
      walk(&[spanning.clone(), newer.clone()], &[ts(0), ts(4), ts(8)]);

    assert!(outcome.mark_visible.contains(&newer.event_uuid));
    assert!(!outcome.mark_visible.contains(&spanning.event_uuid));
    assert!(outcome.remove.contains(&spanning.event_uuid));
    assert_eq!(outcome.fragments, vec![Fragment {
      original: spanning.event_uuid,
      start:    ts(0),
      stop:     ts(4),
    }]);
  }

  #[test]
  fn generation_ties_keep_both_sources_visible() {
    let s1 = Uuid::new_v4();
    let s2 = Uuid::new_v4();
    let one = timed(0, 4, s1, 3);
    let other = timed(2, 6, s2, 3);

    let outcome = walk(&[one.clone(), other.clone()], &[ts(0), ts(2), ts(4), ts(6)]);

    assert!(outcome.mark_visible.contains(&one.event_uuid));
    assert!(outcome.mark_visible.contains(&other.event_uuid));
    assert!(outcome.remove.is_empty());
  }

  #[test]
  fn punctual_event_belongs_to_its_segment() {
    let s1 = Uuid::new_v4();
    let s2 = Uuid::new_v4();
    let instant = timed(4, 4, s1, 1);
    let newer = timed(4, 6, s2, 5);

    let outcome = walk(&[instant.clone(), newer.clone()], &[ts(4), ts(6)]);

    // Fully contained, no remainder: removed outright.
    assert!(outcome.remove.contains(&instant.event_uuid));
    assert!(outcome.fragments.is_empty());
  }

  #[test]
  fn empty_segment_stops_the_walk() {
    let s1 = Uuid::new_v4();
    let event = timed(0, 2, s1, 1);

    // Nothing overlaps [2,4); the walk must stop without touching anything.
    let outcome = walk(&[event.clone()], &[ts(0), ts(2), ts(4)]);
    assert!(outcome.mark_visible.contains(&event.event_uuid));
    assert!(outcome.remove.is_empty());
  }
}
