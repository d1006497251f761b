use serde::{Deserialize, Serialize};

/// Default route templates of the web application.
const DEFAULT_ROUTES: &[&str] = &[
    "/",
    "/events",
    "/events/create",
    "/events/:id",
    "/event/:id",
    "/event/:id/manage",
    "/event/:id/tickets",
    "/event/:id/sponsors",
    "/event/:id/checkout",
    "/create",
    "/search",
    "/account",
    "/account/settings",
    "/account/tickets",
    "/billing",
    "/login",
    "/signup",
    "/org/:id",
    "/org/:id/events",
    "/sponsor/:id",
];

/// A rule deciding whether a path segment is an identifier.
///
/// Identifiers are only replaced in parameter positions of a route template. Rules are evaluated
/// in order; the first matching rule wins.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdRule {
    /// A UUID, with or without hyphens.
    Uuid,
    /// A segment consisting of ASCII digits only.
    Numeric,
    /// A hexadecimal string of at least `min_length` characters, such as a SHA1 or MD5 digest.
    Hex {
        /// The minimum length of the segment.
        min_length: usize,
    },
    /// An opaque slug-like identifier: alphanumerics, `-` and `_`, containing at least one digit.
    Opaque {
        /// The minimum length of the segment.
        min_length: usize,
    },
    /// A custom regular expression that must match the entire segment.
    Pattern {
        /// The regular expression, matched against the lowercased and decoded segment.
        pattern: String,
    },
}

/// Configuration of the [`PathNormalizer`](crate::PathNormalizer).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct NormalizationConfig {
    /// Ordered route templates. The first template matching a path wins.
    ///
    /// Parameter segments start with a colon, for example `/event/:id/manage`.
    pub routes: Vec<String>,

    /// Ordered rules that decide whether a segment may fill a parameter position.
    pub id_rules: Vec<IdRule>,

    /// Paths with more segments map to the unknown template without matching.
    pub max_segments: usize,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            routes: DEFAULT_ROUTES.iter().map(|&route| route.to_owned()).collect(),
            id_rules: vec![
                IdRule::Uuid,
                IdRule::Numeric,
                IdRule::Hex { min_length: 12 },
                IdRule::Opaque { min_length: 4 },
            ],
            max_segments: 16,
        }
    }
}
