use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use beacon_common::UnixMillis;
use serde::{Deserialize, Serialize};

use crate::{SessionId, detect_pii};

/// Maximum length of a string metadata value in bytes.
pub const MAX_METADATA_STRING_LEN: usize = 64;

/// The kind of a [`TelemetryEvent`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// A Core Web Vitals measurement. The value is the metric magnitude.
    WebVital,
    /// A client-side navigation. The value is the duration in milliseconds.
    RouteTransition,
    /// Uncaught errors. The value is the number of errors.
    RuntimeError,
}

impl EventKind {
    /// All kinds, in declaration order.
    pub const ALL: [EventKind; 3] = [Self::WebVital, Self::RouteTransition, Self::RuntimeError];

    /// Returns the wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebVital => "web-vital",
            Self::RouteTransition => "route-transition",
            Self::RuntimeError => "runtime-error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown [`EventKind`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unknown event kind")]
pub struct ParseEventKindError;

impl FromStr for EventKind {
    type Err = ParseEventKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or(ParseEventKindError)
    }
}

/// The allow-listed metadata keys.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MetadataKey {
    /// Name of a web vital, e.g. `LCP`.
    Name,
    /// Rating reported by the web-vitals library, e.g. `needs-improvement`.
    Rating,
    /// Navigation type, e.g. `back-forward`.
    NavigationType,
    /// Effective connection type, e.g. `4g`.
    ConnectionType,
    /// Error class of a runtime error, e.g. `TypeError`.
    ErrorKind,
    /// Coarse status, e.g. an HTTP status code.
    Status,
    /// What triggered the observation, e.g. `router`.
    Source,
}

impl MetadataKey {
    /// All allow-listed keys.
    pub const ALL: [MetadataKey; 7] = [
        Self::Name,
        Self::Rating,
        Self::NavigationType,
        Self::ConnectionType,
        Self::ErrorKind,
        Self::Status,
        Self::Source,
    ];

    /// Returns the wire name of this key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Rating => "rating",
            Self::NavigationType => "navigationType",
            Self::ConnectionType => "connectionType",
            Self::ErrorKind => "errorKind",
            Self::Status => "status",
            Self::Source => "source",
        }
    }
}

/// Error returned when parsing a key that is not allow-listed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("metadata key is not allowed")]
pub struct ParseMetadataKeyError;

impl FromStr for MetadataKey {
    type Err = ParseMetadataKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or(ParseMetadataKeyError)
    }
}

/// A scalar metadata value.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// A boolean flag.
    Bool(bool),
    /// A finite number.
    Number(f64),
    /// A short string.
    String(String),
}

impl MetadataValue {
    /// Returns the string value, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Why a metadata value was refused.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MetadataRejection {
    /// The value looks like personal data.
    Pii,
    /// The value is too long, not finite, or contains control characters.
    Invalid,
}

/// Checks a metadata value before it enters an event.
pub fn check_metadata_value(value: &MetadataValue) -> Result<(), MetadataRejection> {
    match value {
        MetadataValue::Bool(_) => Ok(()),
        MetadataValue::Number(n) if n.is_finite() => Ok(()),
        MetadataValue::Number(_) => Err(MetadataRejection::Invalid),
        MetadataValue::String(s) => {
            if s.len() > MAX_METADATA_STRING_LEN || s.chars().any(char::is_control) {
                Err(MetadataRejection::Invalid)
            } else if detect_pii(s).is_some() {
                Err(MetadataRejection::Pii)
            } else {
                Ok(())
            }
        }
    }
}

/// Allow-listed metadata attached to an event.
///
/// Values are checked on insertion, so a `Metadata` never holds personal data shaped values.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<MetadataKey, MetadataValue>);

impl Metadata {
    /// Creates empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value if it passes [`check_metadata_value`].
    pub fn insert(
        &mut self,
        key: MetadataKey,
        value: impl Into<MetadataValue>,
    ) -> Result<(), MetadataRejection> {
        let value = value.into();
        check_metadata_value(&value)?;
        self.0.insert(key, value);
        Ok(())
    }

    /// Returns the value of a key.
    pub fn get(&self, key: MetadataKey) -> Option<&MetadataValue> {
        self.0.get(&key)
    }

    /// Returns the string value of a key.
    pub fn get_str(&self, key: MetadataKey) -> Option<&str> {
        self.get(key).and_then(MetadataValue::as_str)
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (MetadataKey, &MetadataValue)> {
        self.0.iter().map(|(k, v)| (*k, v))
    }
}

impl<'de> Deserialize<'de> for Metadata {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let entries = BTreeMap::<MetadataKey, MetadataValue>::deserialize(deserializer)?;
        let mut metadata = Metadata::new();
        for (key, value) in entries {
            metadata
                .insert(key, value)
                .map_err(|_| serde::de::Error::custom("metadata value refused"))?;
        }
        Ok(metadata)
    }
}

/// A single client observation.
///
/// Events are immutable once created. The path is whatever the client reported; it must pass
/// through the path normalizer before it is used as a metric label.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    kind: EventKind,
    timestamp: UnixMillis,
    session_id: SessionId,
    path: String,
    value: f64,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    metadata: Metadata,
}

impl TelemetryEvent {
    /// Creates an event observed now.
    pub fn new(kind: EventKind, session_id: SessionId, path: impl Into<String>, value: f64) -> Self {
        Self {
            kind,
            timestamp: UnixMillis::now(),
            session_id,
            path: path.into(),
            value,
            metadata: Metadata::new(),
        }
    }

    /// Sets the observation time.
    pub fn with_timestamp(mut self, timestamp: UnixMillis) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Replaces the path, for example with its route template.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Attaches metadata.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// The kind of observation.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// When the observation was made.
    pub fn timestamp(&self) -> UnixMillis {
        self.timestamp
    }

    /// The anonymous session this event belongs to.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// The path as reported by the client.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The kind dependent magnitude: vital value, duration or error count.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Allow-listed metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

/// An ordered sequence of events, the unit of transport.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventBatch(Vec<TelemetryEvent>);

impl EventBatch {
    /// Creates a batch from events.
    pub fn new(events: Vec<TelemetryEvent>) -> Self {
        Self(events)
    }

    /// Returns the number of events.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the batch contains no events.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the events in order.
    pub fn iter(&self) -> std::slice::Iter<'_, TelemetryEvent> {
        self.0.iter()
    }

    /// Returns the events.
    pub fn into_events(self) -> Vec<TelemetryEvent> {
        self.0
    }
}

impl<'a> IntoIterator for &'a EventBatch {
    type Item = &'a TelemetryEvent;
    type IntoIter = std::slice::Iter<'a, TelemetryEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for EventBatch {
    type Item = TelemetryEvent;
    type IntoIter = std::vec::IntoIter<TelemetryEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_names() {
        for kind in EventKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            assert_eq!(kind.as_str().parse::<EventKind>(), Ok(kind));
        }
        assert!("page-view".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_metadata_key_wire_names() {
        for key in MetadataKey::ALL {
            let json = serde_json::to_string(&key).unwrap();
            assert_eq!(json, format!("\"{}\"", key.as_str()));
        }
    }

    #[test]
    fn test_metadata_refuses_pii() {
        let mut metadata = Metadata::new();
        assert_eq!(metadata.insert(MetadataKey::Name, "LCP"), Ok(()));
        assert_eq!(
            metadata.insert(MetadataKey::Source, "jane@example.com"),
            Err(MetadataRejection::Pii)
        );
        assert_eq!(
            metadata.insert(MetadataKey::Status, f64::NAN),
            Err(MetadataRejection::Invalid)
        );
        assert_eq!(
            metadata.insert(MetadataKey::Source, "x".repeat(65).as_str()),
            Err(MetadataRejection::Invalid)
        );
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata.get_str(MetadataKey::Name), Some("LCP"));
    }

    #[test]
    fn test_serialize_event() {
        let session_id = "5f0c7b6e2a6d4b5c9f8e7d6c5b4a3f2e".parse().unwrap();
        let mut metadata = Metadata::new();
        metadata.insert(MetadataKey::Name, "LCP").unwrap();
        metadata.insert(MetadataKey::Rating, "good").unwrap();

        let event = TelemetryEvent::new(EventKind::WebVital, session_id, "/event/:id", 1830.5)
            .with_timestamp(UnixMillis::from_millis(1_700_000_000_000))
            .with_metadata(metadata);

        insta::assert_json_snapshot!(EventBatch::new(vec![event]), @r#"
        [
          {
            "kind": "web-vital",
            "timestamp": 1700000000000,
            "sessionId": "5f0c7b6e2a6d4b5c9f8e7d6c5b4a3f2e",
            "path": "/event/:id",
            "value": 1830.5,
            "metadata": {
              "name": "LCP",
              "rating": "good"
            }
          }
        ]
        "#);
    }
}
