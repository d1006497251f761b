use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use beacon_common::UnixMillis;
use serde::Deserialize;
use serde::de::{self, DeserializeSeed, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde_json::{Map, Value};

use crate::{
    EventBatch, EventKind, Metadata, MetadataKey, MetadataRejection, MetadataValue, SessionId,
    TelemetryEvent,
};

/// Hard limits applied to incoming payloads.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationLimits {
    /// Maximum size of the raw request body in bytes.
    pub max_payload_bytes: usize,
    /// Maximum number of events in one batch.
    pub max_batch_size: usize,
    /// Maximum length of a raw path in bytes.
    pub max_path_length: usize,
    /// How far in the past an event timestamp may lie.
    pub max_past: Duration,
    /// How far in the future an event timestamp may lie.
    pub max_future: Duration,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_payload_bytes: 64 * 1024,
            max_batch_size: 50,
            max_path_length: 2048,
            max_past: Duration::from_secs(24 * 3600),
            max_future: Duration::from_secs(3600),
        }
    }
}

/// The limit exceeded by a [`ValidationError::TooLarge`] payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SizeLimit {
    /// The body is larger than the byte limit.
    Bytes(usize),
    /// The batch contains more events than allowed.
    Events(usize),
}

impl fmt::Display for SizeLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(limit) => write!(f, "exceeds {limit} bytes"),
            Self::Events(limit) => write!(f, "exceeds {limit} events"),
        }
    }
}

/// A rejected payload.
///
/// Errors only carry structural information, never any part of the payload itself.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// The body is not well-formed JSON.
    #[error("malformed JSON at line {line} column {column}")]
    Malformed {
        /// Line of the syntax error.
        line: usize,
        /// Column of the syntax error.
        column: usize,
    },
    /// The body is JSON, but not an event batch.
    #[error("payload is not an event batch (line {line} column {column})")]
    SchemaViolation {
        /// Line of the offending value.
        line: usize,
        /// Column of the offending value.
        column: usize,
    },
    /// The body or the batch exceeds a hard limit.
    #[error("payload {0}")]
    TooLarge(SizeLimit),
    /// No event survived validation.
    #[error("none of {received} events are valid")]
    EmptyBatch {
        /// Number of events in the batch before filtering.
        received: usize,
    },
}

impl ValidationError {
    /// Returns the machine readable reason code sent to clients.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Malformed { .. } => "MALFORMED",
            Self::SchemaViolation { .. } => "SCHEMA_VIOLATION",
            Self::TooLarge(_) => "TOO_LARGE",
            Self::EmptyBatch { .. } => "EMPTY_BATCH",
        }
    }
}

/// Why a single event was dropped from a batch.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum DropReason {
    /// The element is not a JSON object.
    NotAnObject,
    /// Missing or unknown `kind`.
    InvalidKind,
    /// Missing timestamp, or outside of the accepted window.
    InvalidTimestamp,
    /// Missing session id, or not a random UUID.
    InvalidSessionId,
    /// Missing, empty or overlong path.
    InvalidPath,
    /// Missing, negative or non-finite value.
    InvalidValue,
}

impl DropReason {
    /// Returns the name used in metric tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotAnObject => "not_an_object",
            Self::InvalidKind => "invalid_kind",
            Self::InvalidTimestamp => "invalid_timestamp",
            Self::InvalidSessionId => "invalid_session_id",
            Self::InvalidPath => "invalid_path",
            Self::InvalidValue => "invalid_value",
        }
    }
}

/// Why a metadata field was removed from an otherwise valid event.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum FieldDropReason {
    /// The `metadata` value is not an object.
    NotAnObject,
    /// The key is not allow-listed.
    UnknownKey,
    /// The value is not a short scalar.
    InvalidValue,
    /// The value looks like personal data.
    Pii,
}

impl FieldDropReason {
    /// Returns the name used in metric tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotAnObject => "not_an_object",
            Self::UnknownKey => "unknown_key",
            Self::InvalidValue => "invalid_value",
            Self::Pii => "pii",
        }
    }
}

/// Counts of what validation removed from a batch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValidationReport {
    /// Number of events in the batch before filtering.
    pub received: usize,
    /// Dropped events by reason.
    pub dropped_events: BTreeMap<DropReason, usize>,
    /// Dropped metadata fields by reason.
    pub dropped_fields: BTreeMap<FieldDropReason, usize>,
}

impl ValidationReport {
    /// Total number of dropped events.
    pub fn dropped(&self) -> usize {
        self.dropped_events.values().sum()
    }

    /// Number of events that passed validation.
    pub fn accepted(&self) -> usize {
        self.received.saturating_sub(self.dropped())
    }

    fn drop_event(&mut self, reason: DropReason) {
        *self.dropped_events.entry(reason).or_default() += 1;
    }

    fn drop_field(&mut self, reason: FieldDropReason) {
        *self.dropped_fields.entry(reason).or_default() += 1;
    }
}

/// Validates a raw request body against the current time.
///
/// See [`validate_with_report`].
pub fn validate(body: &[u8], limits: &ValidationLimits) -> Result<EventBatch, ValidationError> {
    validate_with_report(body, limits, UnixMillis::now(), &mut ValidationReport::default())
}

/// Validates a raw request body and records what was dropped in `report`.
///
/// The body is checked against the byte limit before it is parsed, and parsing stops as soon as
/// the batch exceeds the event limit. The body is either a JSON array of events or an object
/// with an `events` array. Invalid events and metadata fields are dropped individually; the
/// batch is only rejected if it is empty afterwards.
pub fn validate_with_report(
    body: &[u8],
    limits: &ValidationLimits,
    now: UnixMillis,
    report: &mut ValidationReport,
) -> Result<EventBatch, ValidationError> {
    if body.len() > limits.max_payload_bytes {
        return Err(ValidationError::TooLarge(SizeLimit::Bytes(
            limits.max_payload_bytes,
        )));
    }

    let elements = parse_elements(body, limits.max_batch_size)?;
    report.received = elements.len();

    let mut events = Vec::with_capacity(elements.len());
    for element in elements {
        match validate_event(element, limits, now, report) {
            Ok(event) => events.push(event),
            Err(reason) => report.drop_event(reason),
        }
    }

    if events.is_empty() {
        return Err(ValidationError::EmptyBatch {
            received: report.received,
        });
    }

    Ok(EventBatch::new(events))
}

fn parse_elements(body: &[u8], max_events: usize) -> Result<Vec<Value>, ValidationError> {
    let overflow = Cell::new(false);
    let visitor = BatchVisitor {
        max_events,
        overflow: &overflow,
    };

    let mut deserializer = serde_json::Deserializer::from_slice(body);
    let result = de::Deserializer::deserialize_any(&mut deserializer, visitor)
        .and_then(|elements| deserializer.end().map(|()| elements));

    result.map_err(|error| {
        if overflow.get() {
            return ValidationError::TooLarge(SizeLimit::Events(max_events));
        }

        let (line, column) = (error.line(), error.column());
        match error.classify() {
            serde_json::error::Category::Data => ValidationError::SchemaViolation { line, column },
            _ => ValidationError::Malformed { line, column },
        }
    })
}

/// Collects batch elements without interpreting them, up to a maximum count.
#[derive(Clone, Copy)]
struct BatchVisitor<'a> {
    max_events: usize,
    overflow: &'a Cell<bool>,
}

impl<'de> Visitor<'de> for BatchVisitor<'_> {
    type Value = Vec<Value>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an array of events or an object with an events array")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let capacity = seq.size_hint().unwrap_or(0).min(self.max_events);
        let mut elements = Vec::with_capacity(capacity);

        while let Some(element) = seq.next_element::<Value>()? {
            if elements.len() == self.max_events {
                self.overflow.set(true);
                return Err(de::Error::custom("too many events"));
            }
            elements.push(element);
        }

        Ok(elements)
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut events = None;

        while let Some(key) = map.next_key::<String>()? {
            if key == "events" && events.is_none() {
                events = Some(map.next_value_seed(EventsSeed(self))?);
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }

        events.ok_or_else(|| de::Error::missing_field("events"))
    }
}

/// The `events` array inside an object body.
struct EventsSeed<'a>(BatchVisitor<'a>);

impl<'de> DeserializeSeed<'de> for EventsSeed<'_> {
    type Value = Vec<Value>;

    fn deserialize<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_seq(self.0)
    }
}

fn validate_event(
    element: Value,
    limits: &ValidationLimits,
    now: UnixMillis,
    report: &mut ValidationReport,
) -> Result<TelemetryEvent, DropReason> {
    let Value::Object(mut object) = element else {
        return Err(DropReason::NotAnObject);
    };

    let kind = object
        .get("kind")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<EventKind>().ok())
        .ok_or(DropReason::InvalidKind)?;

    let timestamp = object
        .get("timestamp")
        .and_then(|v| UnixMillis::deserialize(v).ok())
        .filter(|ts| ts.is_within(now, limits.max_past, limits.max_future))
        .ok_or(DropReason::InvalidTimestamp)?;

    let session_id = object
        .get("sessionId")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<SessionId>().ok())
        .ok_or(DropReason::InvalidSessionId)?;

    let path = match object.remove("path") {
        Some(Value::String(path)) if !path.is_empty() && path.len() <= limits.max_path_length => {
            path
        }
        _ => return Err(DropReason::InvalidPath),
    };

    let value = object
        .get("value")
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite() && *v >= 0.0)
        .ok_or(DropReason::InvalidValue)?;

    let metadata = match object.remove("metadata") {
        None | Some(Value::Null) => Metadata::new(),
        Some(Value::Object(fields)) => validate_metadata(fields, report),
        Some(_) => {
            report.drop_field(FieldDropReason::NotAnObject);
            Metadata::new()
        }
    };

    Ok(TelemetryEvent::new(kind, session_id, path, value)
        .with_timestamp(timestamp)
        .with_metadata(metadata))
}

fn validate_metadata(fields: Map<String, Value>, report: &mut ValidationReport) -> Metadata {
    let mut metadata = Metadata::new();

    for (key, value) in fields {
        let Ok(key) = key.parse::<MetadataKey>() else {
            report.drop_field(FieldDropReason::UnknownKey);
            continue;
        };

        let value = match value {
            Value::Bool(b) => MetadataValue::Bool(b),
            Value::String(s) => MetadataValue::String(s),
            Value::Number(n) => match n.as_f64() {
                Some(n) => MetadataValue::Number(n),
                None => {
                    report.drop_field(FieldDropReason::InvalidValue);
                    continue;
                }
            },
            _ => {
                report.drop_field(FieldDropReason::InvalidValue);
                continue;
            }
        };

        match metadata.insert(key, value) {
            Ok(()) => (),
            Err(MetadataRejection::Pii) => report.drop_field(FieldDropReason::Pii),
            Err(MetadataRejection::Invalid) => report.drop_field(FieldDropReason::InvalidValue),
        }
    }

    metadata
}
