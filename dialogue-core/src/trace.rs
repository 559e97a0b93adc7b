//! Append-only trace log of pipeline state snapshots.
//!
//! One recorder is shared between the turn-processing path (appending) and
//! the viewer endpoint (polling). Both the in-memory event list and the
//! on-disk JSONL append happen inside the same critical section so the two
//! views stay consistent.

use crate::npc::NpcProfile;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// A serialized state snapshot.
///
/// Closed tagged-variant representation so the encoder is total: primitives
/// pass through, collections recurse, and everything else is projected or
/// degraded to a string before it gets here. Serializes transparently (no
/// variant tags in the JSON).
#[derive(Debug, Clone, PartialEq)]
pub enum TraceValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Seq(Vec<TraceValue>),
    Map(Vec<(String, TraceValue)>),
}

impl TraceValue {
    /// Convert a JSON value, preserving structure.
    pub fn from_json(value: serde_json::Value) -> TraceValue {
        match value {
            serde_json::Value::Null => TraceValue::Null,
            serde_json::Value::Bool(b) => TraceValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    TraceValue::Int(i)
                } else if let Some(f) = n.as_f64() {
                    TraceValue::Float(f)
                } else {
                    TraceValue::Text(n.to_string())
                }
            }
            serde_json::Value::String(s) => TraceValue::Text(s),
            serde_json::Value::Array(items) => {
                TraceValue::Seq(items.into_iter().map(TraceValue::from_json).collect())
            }
            serde_json::Value::Object(entries) => TraceValue::Map(
                entries
                    .into_iter()
                    .map(|(key, val)| (key, TraceValue::from_json(val)))
                    .collect(),
            ),
        }
    }
}

impl Serialize for TraceValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TraceValue::Null => serializer.serialize_unit(),
            TraceValue::Bool(b) => serializer.serialize_bool(*b),
            TraceValue::Int(i) => serializer.serialize_i64(*i),
            TraceValue::Float(f) => serializer.serialize_f64(*f),
            TraceValue::Text(s) => serializer.serialize_str(s),
            TraceValue::Seq(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            TraceValue::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, val) in entries {
                    map.serialize_entry(key, val)?;
                }
                map.end()
            }
        }
    }
}

/// Conversion into a [`TraceValue`] snapshot. Must never fail.
pub trait ToTrace {
    fn to_trace(&self) -> TraceValue;
}

/// Encode any serializable value, degrading to its `Debug` string if
/// serialization is impossible.
pub fn trace_value_of<T: Serialize + std::fmt::Debug>(value: &T) -> TraceValue {
    match serde_json::to_value(value) {
        Ok(json) => TraceValue::from_json(json),
        Err(_) => TraceValue::Text(format!("{value:?}")),
    }
}

impl ToTrace for String {
    fn to_trace(&self) -> TraceValue {
        TraceValue::Text(self.clone())
    }
}

impl ToTrace for bool {
    fn to_trace(&self) -> TraceValue {
        TraceValue::Bool(*self)
    }
}

impl ToTrace for i64 {
    fn to_trace(&self) -> TraceValue {
        TraceValue::Int(*self)
    }
}

impl ToTrace for f64 {
    fn to_trace(&self) -> TraceValue {
        TraceValue::Float(*self)
    }
}

impl<T: ToTrace> ToTrace for Vec<T> {
    fn to_trace(&self) -> TraceValue {
        TraceValue::Seq(self.iter().map(ToTrace::to_trace).collect())
    }
}

impl<T: ToTrace> ToTrace for Option<T> {
    fn to_trace(&self) -> TraceValue {
        match self {
            Some(value) => value.to_trace(),
            None => TraceValue::Null,
        }
    }
}

impl ToTrace for NpcProfile {
    /// NPC profiles are projected to a fixed attribute list rather than
    /// dumped wholesale.
    fn to_trace(&self) -> TraceValue {
        TraceValue::Map(vec![
            ("name".to_string(), TraceValue::Text(self.name.clone())),
            ("age".to_string(), TraceValue::Int(i64::from(self.age))),
            (
                "location".to_string(),
                TraceValue::Text(self.location.clone()),
            ),
            (
                "profession".to_string(),
                TraceValue::Text(self.profession.clone()),
            ),
            (
                "traits".to_string(),
                TraceValue::Seq(
                    self.traits
                        .iter()
                        .map(|t| TraceValue::Text(t.clone()))
                        .collect(),
                ),
            ),
        ])
    }
}

/// One observation of pipeline state at a stage boundary.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    pub id: u64,
    pub timestamp: f64,
    pub stage: String,
    pub state: TraceValue,
}

struct TraceLog {
    events: Vec<TraceEvent>,
    next_id: u64,
    sink: Option<File>,
}

/// Process-wide append-only trace log.
pub struct TraceRecorder {
    enabled: bool,
    inner: Mutex<TraceLog>,
}

impl TraceRecorder {
    /// A recorder that ignores every record call.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            inner: Mutex::new(TraceLog {
                events: Vec::new(),
                next_id: 1,
                sink: None,
            }),
        }
    }

    /// An enabled recorder with no on-disk log, for tests.
    pub fn in_memory() -> Self {
        Self {
            enabled: true,
            inner: Mutex::new(TraceLog {
                events: Vec::new(),
                next_id: 1,
                sink: None,
            }),
        }
    }

    /// An enabled recorder appending to `<output_dir>/trace.jsonl`. The file
    /// is truncated at startup.
    pub fn to_dir(output_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        std::fs::create_dir_all(&output_dir)?;
        let sink = File::create(output_dir.as_ref().join("trace.jsonl"))?;
        Ok(Self {
            enabled: true,
            inner: Mutex::new(TraceLog {
                events: Vec::new(),
                next_id: 1,
                sink: Some(sink),
            }),
        })
    }

    /// Whether tracing is active.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Append a snapshot of the given state. No-op when tracing is disabled;
    /// the check happens before any lock is taken.
    pub fn record(&self, stage: &str, state: &impl ToTrace) {
        if !self.enabled {
            return;
        }

        let snapshot = state.to_trace();
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();

        let mut log = self.inner.lock().expect("trace lock poisoned");
        let event = TraceEvent {
            id: log.next_id,
            timestamp,
            stage: stage.to_string(),
            state: snapshot,
        };
        log.next_id += 1;

        if let Some(sink) = log.sink.as_mut() {
            match serde_json::to_string(&event) {
                Ok(line) => {
                    if let Err(e) = writeln!(sink, "{line}") {
                        warn!("failed to append trace event to disk: {e}");
                    }
                }
                Err(e) => warn!("failed to encode trace event: {e}"),
            }
        }

        log.events.push(event);
    }

    /// Events with id greater than `last_id`, in id order, plus the new
    /// high-water mark for the next poll.
    pub fn get_events_since(&self, last_id: u64) -> (Vec<TraceEvent>, u64) {
        let log = self.inner.lock().expect("trace lock poisoned");
        if log.events.is_empty() {
            return (Vec::new(), last_id);
        }
        let events: Vec<TraceEvent> = log
            .events
            .iter()
            .filter(|event| event.id > last_id)
            .cloned()
            .collect();
        let next_id = log.events.last().map(|event| event.id).unwrap_or(last_id);
        (events, next_id)
    }
}
