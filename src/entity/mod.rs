use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;


/// Entity identifier in `domain.object_id` form (e.g. "light.kitchen")
///
/// Validated on construction: exactly one dot, both parts non-empty,
/// lowercase alphanumeric plus underscores.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

/// Entity ID parsing errors
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Empty entity ID
    Empty,
    /// Missing or repeated '.' separator
    InvalidFormat(String),
    /// A part contains characters outside [a-z0-9_]
    InvalidCharacters(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => write!(f, "entity ID cannot be empty"),
            ParseError::InvalidFormat(s) => {
                write!(f, "invalid entity ID '{}': expected 'domain.object_id'", s)
            }
            ParseError::InvalidCharacters(s) => {
                write!(
                    f,
                    "invalid entity ID '{}': parts must be lowercase alphanumeric or underscore",
                    s
                )
            }
        }
    }
}

impl std::error::Error for ParseError {}

impl EntityId {
    /// Parse and validate an entity ID
    ///
    /// # Examples
    ///
    /// ```
    /// use hearth::entity::EntityId;
    ///
    /// let id = EntityId::parse("light.kitchen").unwrap();
    /// assert_eq!(id.domain(), "light");
    /// assert_eq!(id.object_id(), "kitchen");
    /// ```
    pub fn parse(entity_id: &str) -> Result<Self, ParseError> {
        if entity_id.is_empty() {
            return Err(ParseError::Empty);
        }

        let parts: Vec<&str> = entity_id.split('.').collect();
        if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
            return Err(ParseError::InvalidFormat(entity_id.to_string()));
        }

        let valid = parts.iter().all(|part| {
            part.chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        });
        if !valid {
            return Err(ParseError::InvalidCharacters(entity_id.to_string()));
        }

        Ok(EntityId(entity_id.to_string()))
    }

    /// Domain part (e.g. "light" for "light.kitchen")
    pub fn domain(&self) -> &str {
        // The separator is guaranteed present after construction
        self.0.split_once('.').map(|(d, _)| d).unwrap_or(&self.0)
    }

    /// Object part (e.g. "kitchen" for "light.kitchen")
    pub fn object_id(&self) -> &str {
        self.0.split_once('.').map(|(_, o)| o).unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for EntityId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityId::parse(s)
    }
}

impl TryFrom<String> for EntityId {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        EntityId::parse(&value)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

/// Latest known state of a single entity
///
/// Owned exclusively by the entity cache. `last_updated` is stamped at
/// ingestion time, not taken from the hub, so staleness never depends on
/// cross-host clock agreement. `stale` is derived by the staleness monitor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Entity identifier
    pub entity_id: EntityId,

    /// Current state value (e.g. "on", "21.5")
    pub state: String,

    /// Key-value attributes (domain-specific)
    pub attributes: HashMap<String, Value>,

    /// When this record was last ingested
    pub last_updated: DateTime<Utc>,

    /// Whether the record has outlived the freshness threshold
    pub stale: bool,
}
