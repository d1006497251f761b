use std::sync::LazyLock;

use regex::Regex;

use crate::{IdRule, NormalizerError};

/// A UUID in its hyphenated or simple form. Segments are lowercased before matching.
static UUID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-f]{8}-?[0-9a-f]{4}-?[0-9a-f]{4}-?[0-9a-f]{4}-?[0-9a-f]{12}$").unwrap()
});

pub(crate) fn is_uuid(segment: &str) -> bool {
    UUID_REGEX.is_match(segment)
}

pub(crate) fn is_numeric(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

fn is_hex(segment: &str, min_length: usize) -> bool {
    segment.len() >= min_length && segment.bytes().all(|b| b.is_ascii_hexdigit())
}

fn is_opaque(segment: &str, min_length: usize) -> bool {
    segment.len() >= min_length
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        && segment.bytes().any(|b| b.is_ascii_digit())
}

/// A compiled [`IdRule`].
#[derive(Debug)]
pub(crate) enum IdMatcher {
    Uuid,
    Numeric,
    Hex(usize),
    Opaque(usize),
    Pattern(Regex),
}

impl IdMatcher {
    pub fn compile(rule: &IdRule) -> Result<Self, NormalizerError> {
        Ok(match rule {
            IdRule::Uuid => Self::Uuid,
            IdRule::Numeric => Self::Numeric,
            IdRule::Hex { min_length } => Self::Hex((*min_length).max(1)),
            IdRule::Opaque { min_length } => Self::Opaque((*min_length).max(1)),
            IdRule::Pattern { pattern } => {
                let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|source| {
                    NormalizerError::InvalidRule {
                        pattern: pattern.clone(),
                        source,
                    }
                })?;
                Self::Pattern(regex)
            }
        })
    }

    pub fn matches(&self, segment: &str) -> bool {
        match self {
            Self::Uuid => is_uuid(segment),
            Self::Numeric => is_numeric(segment),
            Self::Hex(min_length) => is_hex(segment, *min_length),
            Self::Opaque(min_length) => is_opaque(segment, *min_length),
            Self::Pattern(regex) => regex.is_match(segment),
        }
    }
}
