use std::fmt;

use beacon_normalization::PathTemplate;
use beacon_protocol::{EventKind, MetadataKey, TelemetryEvent};
use serde::Serialize;

/// Names of all labels a [`MetricLabelSet`] may carry.
pub const LABEL_NAMES: [&str; 4] = ["kind", "path", "bucket", "name"];

/// A Core Web Vital, taken from the `name` metadata of web-vital events.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VitalName {
    /// Largest Contentful Paint, in milliseconds.
    Lcp,
    /// First Contentful Paint, in milliseconds.
    Fcp,
    /// Cumulative Layout Shift, unitless.
    Cls,
    /// Interaction to Next Paint, in milliseconds.
    Inp,
    /// Time to First Byte, in milliseconds.
    Ttfb,
    /// First Input Delay, in milliseconds.
    Fid,
    /// Any other or missing name.
    Other,
}

impl VitalName {
    /// All vital names.
    pub const ALL: [Self; 7] = [
        Self::Lcp,
        Self::Fcp,
        Self::Cls,
        Self::Inp,
        Self::Ttfb,
        Self::Fid,
        Self::Other,
    ];

    /// Parses a reported name case-insensitively. Unknown names map to [`VitalName::Other`].
    pub fn parse(name: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|vital| vital.as_str().eq_ignore_ascii_case(name))
            .unwrap_or(Self::Other)
    }

    /// Returns the label value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lcp => "lcp",
            Self::Fcp => "fcp",
            Self::Cls => "cls",
            Self::Inp => "inp",
            Self::Ttfb => "ttfb",
            Self::Fid => "fid",
            Self::Other => "other",
        }
    }

    /// Upper bounds of the `good` and `needs_improvement` ratings.
    fn thresholds(self) -> Option<(f64, f64)> {
        match self {
            Self::Lcp => Some((2500.0, 4000.0)),
            Self::Fcp => Some((1800.0, 3000.0)),
            Self::Cls => Some((0.1, 0.25)),
            Self::Inp => Some((200.0, 500.0)),
            Self::Ttfb => Some((800.0, 1800.0)),
            Self::Fid => Some((100.0, 300.0)),
            Self::Other => None,
        }
    }
}

/// A coarse classification of an event value.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueBucket {
    /// Web vital within the recommended threshold.
    Good,
    /// Web vital between the recommended and the poor threshold.
    NeedsImprovement,
    /// Web vital beyond the poor threshold.
    Poor,
    /// Route transition under 300 ms.
    Fast,
    /// Route transition under one second.
    Moderate,
    /// Route transition under three seconds.
    Slow,
    /// Route transition of three seconds or more.
    VerySlow,
}

impl ValueBucket {
    /// Classifies a web vital. Values equal to a threshold fall into the better bucket.
    pub fn for_vital(name: VitalName, value: f64) -> Option<Self> {
        let (good, poor) = name.thresholds()?;
        Some(if value <= good {
            Self::Good
        } else if value <= poor {
            Self::NeedsImprovement
        } else {
            Self::Poor
        })
    }

    /// Classifies a route transition duration in milliseconds.
    pub fn for_transition(millis: f64) -> Self {
        if millis < 300.0 {
            Self::Fast
        } else if millis < 1000.0 {
            Self::Moderate
        } else if millis < 3000.0 {
            Self::Slow
        } else {
            Self::VerySlow
        }
    }

    /// Returns the label value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::NeedsImprovement => "needs_improvement",
            Self::Poor => "poor",
            Self::Fast => "fast",
            Self::Moderate => "moderate",
            Self::Slow => "slow",
            Self::VerySlow => "very_slow",
        }
    }
}

/// Labels attached to an exported metric.
///
/// Every label takes values from a set fixed at startup: event kinds, the configured route
/// templates, and the enumerations in this module. Raw paths and session ids cannot be stored.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetricLabelSet {
    kind: EventKind,
    path: PathTemplate,
    #[serde(skip_serializing_if = "Option::is_none")]
    bucket: Option<ValueBucket>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<VitalName>,
}

impl MetricLabelSet {
    /// Builds the labels of an event whose path has already been normalized.
    pub fn new(event: &TelemetryEvent, path: PathTemplate) -> Self {
        let (bucket, name) = match event.kind() {
            EventKind::WebVital => {
                let name = event
                    .metadata()
                    .get_str(MetadataKey::Name)
                    .map_or(VitalName::Other, VitalName::parse);
                (ValueBucket::for_vital(name, event.value()), Some(name))
            }
            EventKind::RouteTransition => (Some(ValueBucket::for_transition(event.value())), None),
            EventKind::RuntimeError => (None, None),
        };

        Self {
            kind: event.kind(),
            path,
            bucket,
            name,
        }
    }

    /// The event kind.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// The normalized route template.
    pub fn path(&self) -> &PathTemplate {
        &self.path
    }

    /// The coarse value bucket, if the kind has one.
    pub fn bucket(&self) -> Option<ValueBucket> {
        self.bucket
    }

    /// The vital name of web-vital events.
    pub fn name(&self) -> Option<VitalName> {
        self.name
    }

    /// Iterates over all present labels as name/value pairs, in the order of [`LABEL_NAMES`].
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            Some(("kind", self.kind.as_str())),
            Some(("path", self.path.as_str())),
            self.bucket.map(|bucket| ("bucket", bucket.as_str())),
            self.name.map(|name| ("name", name.as_str())),
        ]
        .into_iter()
        .flatten()
    }
}

impl fmt::Display for MetricLabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (name, value)) in self.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            write!(f, "{name}:{value}")?;
        }
        Ok(())
    }
}
