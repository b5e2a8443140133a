//! The value tree codec.
//!
//! Events and annotations carry a nested, typed value tree. It is persisted
//! as flat rows addressed by `(level_position, parent_level, parent_position)`
//! so the tree can be rebuilt without a self-referential foreign key.
//! `level_position` is assigned per *level* in document order — not per
//! sibling group — which is what makes `(parent_level, parent_position)`
//! identify a parent unambiguously on decode.
//!
//! Encoding validates every leaf and produces the canonical text payload
//! stored in the database; decoding reassembles the identical nested
//! structure from rows read back.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
  error::{Error, Fault, Result},
  time::{format_ts, parse_ts},
};

// ─── Payload nodes ───────────────────────────────────────────────────────────

/// A node of the nested value specification, as submitted in the payload.
/// Leaf payloads arrive as strings and are validated/canonicalised on encode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum ValueSpec {
  Object { name: String, values: Vec<ValueSpec> },
  Text { name: String, value: String },
  Boolean { name: String, value: String },
  Double { name: String, value: String },
  Timestamp { name: String, value: String },
  Geometry { name: String, value: String },
}

impl ValueSpec {
  pub fn name(&self) -> &str {
    match self {
      Self::Object { name, .. }
      | Self::Text { name, .. }
      | Self::Boolean { name, .. }
      | Self::Double { name, .. }
      | Self::Timestamp { name, .. }
      | Self::Geometry { name, .. } => name,
    }
  }
}

// ─── Flat rows ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
  Object,
  Text,
  Boolean,
  Double,
  Timestamp,
  Geometry,
}

impl ValueKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Object => "object",
      Self::Text => "text",
      Self::Boolean => "boolean",
      Self::Double => "double",
      Self::Timestamp => "timestamp",
      Self::Geometry => "geometry",
    }
  }

  pub fn decode(s: &str) -> Result<Self> {
    match s {
      "object" => Ok(Self::Object),
      "text" => Ok(Self::Text),
      "boolean" => Ok(Self::Boolean),
      "double" => Ok(Self::Double),
      "timestamp" => Ok(Self::Timestamp),
      "geometry" => Ok(Self::Geometry),
      other => {
        Err(Error::MalformedValueTree(format!("unknown kind {other:?}")))
      }
    }
  }
}

/// One flat, address-tagged row. Object rows carry no payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRow {
  pub name:            String,
  pub kind:            ValueKind,
  pub payload:         Option<String>,
  pub level_position:  i64,
  pub parent_level:    i64,
  pub parent_position: i64,
}

// ─── Encode ──────────────────────────────────────────────────────────────────

/// Flatten a nested value specification into address-tagged rows, validating
/// and canonicalising every leaf.
///
/// The walk is depth-first over an explicit stack; position counters are kept
/// per level so sibling order survives the round trip.
pub fn encode(specs: &[ValueSpec]) -> Result<Vec<ValueRow>, Fault> {
  struct Frame<'a> {
    spec:            &'a ValueSpec,
    level:           usize,
    parent_level:    i64,
    parent_position: i64,
  }

  let mut rows: Vec<ValueRow> = Vec::new();
  let mut level_counters: Vec<i64> = Vec::new();
  let mut stack: Vec<Frame> = specs
    .iter()
    .rev()
    .map(|spec| Frame { spec, level: 0, parent_level: -1, parent_position: 0 })
    .collect();

  while let Some(frame) = stack.pop() {
    if level_counters.len() <= frame.level {
      level_counters.resize(frame.level + 1, 0);
    }
    let position = level_counters[frame.level];
    level_counters[frame.level] += 1;

    match frame.spec {
      ValueSpec::Object { name, values } => {
        rows.push(ValueRow {
          name:            name.clone(),
          kind:            ValueKind::Object,
          payload:         None,
          level_position:  position,
          parent_level:    frame.parent_level,
          parent_position: frame.parent_position,
        });
        for child in values.iter().rev() {
          stack.push(Frame {
            spec:            child,
            level:           frame.level + 1,
            parent_level:    frame.level as i64,
            parent_position: position,
          });
        }
      }
      leaf => {
        let (kind, payload) = canonical_leaf(leaf)?;
        rows.push(ValueRow {
          name: leaf.name().to_owned(),
          kind,
          payload: Some(payload),
          level_position: position,
          parent_level: frame.parent_level,
          parent_position: frame.parent_position,
        });
      }
    }
  }

  Ok(rows)
}

/// Validate a leaf and produce its canonical stored form.
fn canonical_leaf(spec: &ValueSpec) -> Result<(ValueKind, String), Fault> {
  match spec {
    ValueSpec::Object { .. } => unreachable!("objects are not leaves"),
    ValueSpec::Text { value, .. } => Ok((ValueKind::Text, value.clone())),
    ValueSpec::Boolean { name, value } => {
      match value.to_ascii_lowercase().as_str() {
        "true" => Ok((ValueKind::Boolean, "true".to_owned())),
        "false" => Ok((ValueKind::Boolean, "false".to_owned())),
        _ => Err(Fault::WrongValue {
          name:  name.clone(),
          value: value.clone(),
        }),
      }
    }
    ValueSpec::Double { name, value } => match value.trim().parse::<f64>() {
      Ok(parsed) if parsed.is_finite() => {
        Ok((ValueKind::Double, format!("{parsed}")))
      }
      _ => Err(Fault::WrongValue { name: name.clone(), value: value.clone() }),
    },
    ValueSpec::Timestamp { name, value } => match parse_ts(value) {
      Ok(parsed) => Ok((ValueKind::Timestamp, format_ts(parsed))),
      Err(_) => {
        Err(Fault::WrongValue { name: name.clone(), value: value.clone() })
      }
    },
    ValueSpec::Geometry { name, value } => {
      Ok((ValueKind::Geometry, build_polygon(name, value)?))
    }
  }
}

/// Assemble a polygon literal from a whitespace-separated coordinate list.
///
/// The ring is closed if the input does not close it. Fewer than three
/// distinct points cannot form a ring.
pub fn build_polygon(name: &str, value: &str) -> Result<String, Fault> {
  let tokens: Vec<&str> = value.split_whitespace().collect();
  if tokens.len() % 2 != 0 {
    return Err(Fault::OddNumberOfCoordinates(name.to_owned()));
  }

  let mut points: Vec<(f64, f64)> = Vec::with_capacity(tokens.len() / 2);
  for pair in tokens.chunks(2) {
    let x = pair[0].parse::<f64>();
    let y = pair[1].parse::<f64>();
    match (x, y) {
      (Ok(x), Ok(y)) if x.is_finite() && y.is_finite() => points.push((x, y)),
      _ => {
        return Err(Fault::WrongValue {
          name:  name.to_owned(),
          value: value.to_owned(),
        });
      }
    }
  }

  let mut distinct: Vec<(u64, u64)> = points
    .iter()
    .map(|(x, y)| (x.to_bits(), y.to_bits()))
    .collect();
  distinct.sort_unstable();
  distinct.dedup();
  if distinct.len() < 3 {
    return Err(Fault::WrongGeometry(name.to_owned()));
  }

  if points.first() != points.last() {
    points.push(points[0]);
  }

  let ring = points
    .iter()
    .map(|(x, y)| format!("{x} {y}"))
    .collect::<Vec<_>>()
    .join(", ");
  Ok(format!("POLYGON(({ring}))"))
}

// ─── Decode ──────────────────────────────────────────────────────────────────

/// Rebuild the nested structure from flat rows.
///
/// Rows are grouped by `(parent_level, parent_position)` and siblings ordered
/// by `level_position`; levels are assembled deepest-first so no recursion is
/// needed.
pub fn decode(rows: &[ValueRow]) -> Result<Vec<ValueSpec>> {
  if rows.is_empty() {
    return Ok(Vec::new());
  }

  let max_level = rows
    .iter()
    .map(|r| r.parent_level + 1)
    .max()
    .unwrap_or(0);

  // (parent_level, parent_position) → assembled children, gathered bottom-up.
  let mut pending: HashMap<(i64, i64), Vec<(i64, ValueSpec)>> = HashMap::new();
  let mut roots: Vec<(i64, ValueSpec)> = Vec::new();

  for level in (0..=max_level).rev() {
    for row in rows.iter().filter(|r| r.parent_level + 1 == level) {
      let spec = assemble_node(row, level, &mut pending)?;
      if level == 0 {
        roots.push((row.level_position, spec));
      } else {
        pending
          .entry((row.parent_level, row.parent_position))
          .or_default()
          .push((row.level_position, spec));
      }
    }
  }

  if !pending.is_empty() {
    return Err(Error::MalformedValueTree(
      "orphan rows without a parent object".to_owned(),
    ));
  }

  roots.sort_by_key(|(position, _)| *position);
  Ok(roots.into_iter().map(|(_, spec)| spec).collect())
}

fn assemble_node(
  row: &ValueRow,
  level: i64,
  pending: &mut HashMap<(i64, i64), Vec<(i64, ValueSpec)>>,
) -> Result<ValueSpec> {
  let name = row.name.clone();
  if row.kind == ValueKind::Object {
    let mut children = pending
      .remove(&(level, row.level_position))
      .unwrap_or_default();
    children.sort_by_key(|(position, _)| *position);
    let values = children.into_iter().map(|(_, spec)| spec).collect();
    return Ok(ValueSpec::Object { name, values });
  }

  let value = row.payload.clone().ok_or_else(|| {
    Error::MalformedValueTree(format!("leaf {name:?} has no payload"))
  })?;
  Ok(match row.kind {
    ValueKind::Object => unreachable!(),
    ValueKind::Text => ValueSpec::Text { name, value },
    ValueKind::Boolean => ValueSpec::Boolean { name, value },
    ValueKind::Double => ValueSpec::Double { name, value },
    ValueKind::Timestamp => ValueSpec::Timestamp { name, value },
    ValueKind::Geometry => ValueSpec::Geometry { name, value },
  })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
