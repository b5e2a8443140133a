//! The deprecation resolver.
//!
//! Runs once per operation, after the writer's rows are committed, scoped to
//! the gauges/keys/annotation scopes the operation touched. Strategies run in
//! a fixed order: interval-based event resolution, then key-based event
//! resolution, then annotation resolution.
//!
//! Each strategy is one pass here fed by one pending set in the context;
//! additional insertion types plug in as a new set and a new pass.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use uuid::Uuid;
use vigil_core::{
  model::{Event, EventKey, EventLink, Source},
  values::{self, ValueRow},
};
use vigil_store_sqlite::{
  EventWithSource, OwnedValueRow, ResolutionBatch, VigilStore,
};

use crate::{
  Result,
  context::IngestContext,
  locks::GaugeLocks,
  segments::{self, TimedEvent},
};

/// Resolve every scope the operation touched, in strategy order.
pub async fn resolve_operation(
  store: &VigilStore,
  locks: &GaugeLocks,
  ctx: &IngestContext,
) -> Result<()> {
  for gauge_id in &ctx.pending_erase_gauges {
    let _guard = locks.acquire(*gauge_id).await;
    resolve_erase_and_replace(store, *gauge_id, &ctx.source).await?;
  }
  for key in &ctx.pending_event_keys {
    resolve_event_keys(store, key).await?;
  }
  for (annotation_cnf_id, explicit_ref_id) in &ctx.pending_annotation_scopes {
    resolve_annotations(store, *annotation_cnf_id, *explicit_ref_id).await?;
  }
  Ok(())
}

// ─── Erase and replace ───────────────────────────────────────────────────────

/// Inclusive overlap against the incoming window, used only to select the
/// competing rows; segment overlap itself is strict.
fn in_window(
  event: &Event,
  window_start: DateTime<Utc>,
  window_stop: DateTime<Utc>,
) -> bool {
  event.start <= window_stop && event.stop >= window_start
}

async fn resolve_erase_and_replace(
  store: &VigilStore,
  gauge_id: Uuid,
  incoming: &Source,
) -> Result<()> {
  let rows = store.events_with_sources_for_gauge(gauge_id).await?;
  let competing: Vec<&EventWithSource> = rows
    .iter()
    .filter(|row| {
      in_window(&row.event, incoming.validity_start, incoming.validity_stop)
    })
    .collect();
  if competing.is_empty() {
    return Ok(());
  }

  let bounds = segments::boundaries(
    competing
      .iter()
      .map(|row| (row.source.validity_start, row.source.validity_stop)),
    incoming.validity_start,
    incoming.validity_stop,
  );
  let timed: Vec<TimedEvent> = competing
    .iter()
    .map(|row| TimedEvent {
      event_uuid:      row.event.event_uuid,
      start:           row.event.start,
      stop:            row.event.stop,
      source_id:       row.source.source_id,
      generation_time: row.source.generation_time,
    })
    .collect();

  let outcome = segments::walk(&timed, &bounds);
  if outcome.mark_visible.is_empty()
    && outcome.remove.is_empty()
    && outcome.fragments.is_empty()
  {
    return Ok(());
  }

  let events_by_uuid: HashMap<Uuid, &Event> = competing
    .iter()
    .map(|row| (row.event.event_uuid, &row.event))
    .collect();

  // Everything split fragments need from their originals.
  let fragment_originals: Vec<Uuid> = outcome
    .fragments
    .iter()
    .map(|fragment| fragment.original)
    .collect::<BTreeSet<_>>()
    .into_iter()
    .collect();
  let replicated_values =
    replicate_value_trees(store, &fragment_originals).await?;
  let original_keys = store.keys_for_events(&fragment_originals).await?;

  let removed: Vec<Uuid> = outcome.remove.iter().copied().collect();
  let touched_links = store.links_touching_events(&removed).await?;

  let now = Utc::now();
  let mut batch = ResolutionBatch::default();
  let mut aliases: HashMap<Uuid, Vec<Uuid>> = HashMap::new();

  for fragment in &outcome.fragments {
    let original = events_by_uuid
      .get(&fragment.original)
      .expect("fragments derive from competing events");
    let fragment_uuid = Uuid::new_v4();
    aliases.entry(fragment.original).or_default().push(fragment_uuid);

    batch.new_events.push(Event {
      event_uuid:      fragment_uuid,
      start:           fragment.start,
      stop:            fragment.stop,
      gauge_id,
      explicit_ref_id: original.explicit_ref_id,
      source_id:       original.source_id,
      visible:         true,
      ingestion_time:  now,
    });

    for key in original_keys
      .iter()
      .filter(|key| key.event_uuid == fragment.original)
    {
      batch.new_event_keys.push(EventKey {
        key_id:           Uuid::new_v4(),
        event_key:        key.event_key.clone(),
        dim_signature_id: key.dim_signature_id,
        event_uuid:       fragment_uuid,
        visible:          true,
      });
    }

    if let Some(rows) = replicated_values.get(&fragment.original) {
      for row in rows {
        batch
          .new_event_values
          .push(OwnedValueRow { owner: fragment_uuid, row: row.clone() });
      }
    }
  }

  repoint_links(&mut batch, &touched_links, &aliases, &outcome.remove);

  batch.delete_events = removed;
  batch.set_visible_events = outcome.mark_visible.iter().copied().collect();

  tracing::debug!(
    gauge = %gauge_id,
    visible = batch.set_visible_events.len(),
    removed = batch.delete_events.len(),
    fragments = batch.new_events.len(),
    "erase-and-replace resolution"
  );
  store.apply_resolution(batch).await?;
  Ok(())
}

/// Round-trip each original's value rows through the codec so fragments get
/// a freshly addressed copy of the identical tree.
async fn replicate_value_trees(
  store: &VigilStore,
  originals: &[Uuid],
) -> Result<HashMap<Uuid, Vec<ValueRow>>> {
  let mut grouped: HashMap<Uuid, Vec<ValueRow>> = HashMap::new();
  for owned in store.values_for_events(originals).await? {
    grouped.entry(owned.owner).or_default().push(owned.row);
  }

  let mut replicated = HashMap::new();
  for (owner, rows) in grouped {
    let tree = values::decode(&rows)?;
    let fresh = values::encode(&tree).map_err(|fault| {
      vigil_core::Error::MalformedValueTree(format!(
        "persisted values of {owner} no longer validate: {fault}"
      ))
    })?;
    replicated.insert(owner, fresh);
  }
  Ok(replicated)
}

/// Keep the link graph consistent across fragmentation: links *to* a replaced
/// event are duplicated once per alias, links *from* it are re-pointed to
/// each alias, and the original rows are deleted. A link whose other endpoint
/// is removed without aliases dies with it.
fn repoint_links(
  batch: &mut ResolutionBatch,
  links: &[EventLink],
  aliases: &HashMap<Uuid, Vec<Uuid>>,
  removed: &BTreeSet<Uuid>,
) {
  for link in links {
    let from_replaced = aliases.contains_key(&link.event_uuid_from);
    let to_replaced = aliases.contains_key(&link.event_uuid_to);
    if !from_replaced && !to_replaced {
      // Either both endpoints survive untouched, or a removed endpoint will
      // cascade this row away.
      continue;
    }

    batch.delete_event_links.push(link.link_id);

    let from_targets =
      endpoint_targets(link.event_uuid_from, aliases, removed);
    let to_targets = endpoint_targets(link.event_uuid_to, aliases, removed);
    for from in &from_targets {
      for to in &to_targets {
        batch.new_event_links.push(EventLink {
          link_id:         Uuid::new_v4(),
          event_uuid_from: *from,
          event_uuid_to:   *to,
          name:            link.name.clone(),
        });
      }
    }
  }
}

fn endpoint_targets(
  endpoint: Uuid,
  aliases: &HashMap<Uuid, Vec<Uuid>>,
  removed: &BTreeSet<Uuid>,
) -> Vec<Uuid> {
  match aliases.get(&endpoint) {
    Some(fragment_uuids) => fragment_uuids.clone(),
    None if removed.contains(&endpoint) => Vec::new(),
    None => vec![endpoint],
  }
}

// ─── Event keys ──────────────────────────────────────────────────────────────

/// Latest generation time wins, globally, for this key. Visible losers are
/// erased; never-visible losers (late arrivals with an older generation) are
/// retained but stay hidden.
async fn resolve_event_keys(store: &VigilStore, key: &str) -> Result<()> {
  let rows = store.events_with_sources_for_key(key).await?;
  let Some(max_generation) =
    rows.iter().map(|row| row.source.generation_time).max()
  else {
    return Ok(());
  };

  let mut batch = ResolutionBatch::default();
  for row in &rows {
    if row.source.generation_time == max_generation {
      if !row.event.visible {
        batch.set_visible_events.push(row.event.event_uuid);
      }
    } else if row.event.visible {
      batch.delete_events.push(row.event.event_uuid);
    }
  }

  tracing::debug!(
    key,
    visible = batch.set_visible_events.len(),
    removed = batch.delete_events.len(),
    "event-key resolution"
  );
  store.apply_resolution(batch).await?;
  Ok(())
}

// ─── Annotations ─────────────────────────────────────────────────────────────

/// Latest generation time wins per (configuration, reference) scope; every
/// other annotation in the scope is deleted with its values.
async fn resolve_annotations(
  store: &VigilStore,
  annotation_cnf_id: Uuid,
  explicit_ref_id: Uuid,
) -> Result<()> {
  let rows = store
    .annotations_with_sources_for_scope(annotation_cnf_id, explicit_ref_id)
    .await?;
  let Some(max_generation) =
    rows.iter().map(|(_, source)| source.generation_time).max()
  else {
    return Ok(());
  };

  let mut batch = ResolutionBatch::default();
  for (annotation, source) in &rows {
    if source.generation_time == max_generation {
      if !annotation.visible {
        batch.set_visible_annotations.push(annotation.annotation_uuid);
      }
    } else {
      batch.delete_annotations.push(annotation.annotation_uuid);
    }
  }

  store.apply_resolution(batch).await?;
  Ok(())
}
