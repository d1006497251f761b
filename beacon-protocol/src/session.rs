use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::{Uuid, Version};

/// Error parsing a [`SessionId`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ParseSessionIdError {
    /// The value is not a UUID.
    #[error("session id is not a uuid")]
    Malformed,
    /// The value is a UUID, but not a random (version 4) one.
    ///
    /// Time and name based UUIDs can embed hardware addresses or be derived from user identity.
    #[error("session id is not a random uuid")]
    NotRandom,
}

/// An anonymous identifier grouping the events of one browser or process instance.
///
/// Session ids are random version 4 UUIDs. They are never derived from user identity and carry
/// no information beyond grouping. They are serialized in the simple form, e.g.
/// `5f0c7b6e2a6d4b5c9f8e7d6c5b4a3f2e`.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a new random session id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0.simple())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.simple().fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = ParseSessionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::try_parse(s).map_err(|_| ParseSessionIdError::Malformed)?;
        match uuid.get_version() {
            Some(Version::Random) => Ok(Self(uuid)),
            _ => Err(ParseSessionIdError::NotRandom),
        }
    }
}

impl Serialize for SessionId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <std::borrow::Cow<'_, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
