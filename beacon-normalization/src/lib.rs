//! Normalization of raw URL paths into route templates.
//!
//! Paths reported by clients are unbounded: they contain event ids, organization slugs and
//! whatever else a user types into the address bar. Before a path may become a metric label it is
//! mapped onto one of a fixed set of route templates by the [`PathNormalizer`]:
//!
//! ```
//! use beacon_normalization::{NormalizationConfig, PathNormalizer};
//!
//! let normalizer = PathNormalizer::new(&NormalizationConfig::default()).unwrap();
//!
//! assert_eq!(normalizer.normalize("/event/42/manage?tab=1").as_str(), "/event/:id/manage");
//! assert_eq!(normalizer.normalize("/wp-admin/setup.php").as_str(), "/:unknown");
//! ```
//!
//! The result is a [`PathTemplate`], which can only be produced by a normalizer. Every template is
//! either one of the configured routes or [`PathTemplate::unknown`], so the set of possible label
//! values is known when the normalizer is constructed.
#![warn(missing_docs)]

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

mod config;
mod normalizer;
mod rules;

pub use config::*;
pub use normalizer::*;

/// The template all unmatched paths normalize to.
pub const UNKNOWN_TEMPLATE: &str = "/:unknown";

/// Errors raised while building a [`PathNormalizer`].
#[derive(Debug, thiserror::Error)]
pub enum NormalizerError {
    /// A configured route template is not valid.
    #[error("invalid route template {template:?}: {reason}")]
    InvalidTemplate {
        /// The template as configured.
        template: String,
        /// Description of the defect.
        reason: &'static str,
    },

    /// A custom identifier pattern failed to compile.
    #[error("invalid id rule pattern {pattern:?}")]
    InvalidRule {
        /// The pattern as configured.
        pattern: String,
        /// The regex compilation error.
        #[source]
        source: regex::Error,
    },
}

/// A low-cardinality route template, such as `/event/:id/manage`.
///
/// Instances are only created by the [`PathNormalizer`], which guarantees that the value is
/// one of its configured routes or the unknown template.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathTemplate(Arc<str>);

impl PathTemplate {
    pub(crate) fn new(template: String) -> Self {
        Self(template.into())
    }

    /// Returns the template all unmatched paths map to.
    pub fn unknown() -> Self {
        Self(UNKNOWN_TEMPLATE.into())
    }

    /// Returns `true` if this is the unknown template.
    pub fn is_unknown(&self) -> bool {
        &*self.0 == UNKNOWN_TEMPLATE
    }

    /// Returns the template string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathTemplate({:?})", self.as_str())
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for PathTemplate {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Serialize for PathTemplate {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}
