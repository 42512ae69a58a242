#[cfg(test)]
mod tests;

use amberdb_schema::types::AttributeKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use ulid::Ulid;

///
/// Value
///
/// Runtime representation of one persistent scalar. Totally ordered so
/// identity maps and the reference store can key on it; mixed-kind
/// comparisons fall back to a fixed kind rank.
///

#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Ulid(#[serde(with = "ulid_text")] Ulid),
}

/// Serde shim: ULIDs travel as their canonical text form. The ulid
/// crate's own serde support is feature-gated behind std, which the
/// workspace leaves off.
mod ulid_text {
    use serde::{Deserialize, Deserializer, Serializer, de};
    use ulid::Ulid;

    pub fn serialize<S: Serializer>(ulid: &Ulid, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(ulid)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Ulid, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ulid::from_string(&text).map_err(de::Error::custom)
    }
}

impl Value {
    /// Fixed rank for cross-kind ordering.
    #[must_use]
    const fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::Float(_) => 2,
            Self::Text(_) => 3,
            Self::Timestamp(_) => 4,
            Self::Ulid(_) => 5,
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Total order over all values. Int and Float compare numerically;
    /// otherwise kinds order by rank, then by payload.
    #[must_use]
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Int(a), Self::Float(b)) => (*a as f64).total_cmp(b),
            (Self::Float(a), Self::Int(b)) => a.total_cmp(&(*b as f64)),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (Self::Ulid(a), Self::Ulid(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    /// True when this value can live in a column of the given kind.
    /// `Null` conformance is a nullability question, decided by callers.
    #[must_use]
    pub fn conforms_to(&self, kind: &AttributeKind) -> bool {
        match (self, kind) {
            (Self::Null, _) => true,
            (Self::Bool(_), AttributeKind::Bool)
            | (Self::Int(_), AttributeKind::Int)
            | (Self::Float(_), AttributeKind::Float)
            | (Self::Int(_), AttributeKind::Float)
            | (Self::Text(_), AttributeKind::Text)
            | (Self::Timestamp(_), AttributeKind::Timestamp)
            | (Self::Ulid(_), AttributeKind::Ulid) => true,
            (Self::Text(text), AttributeKind::Enum { variants }) => {
                variants.iter().any(|v| v == text)
            }
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.total_cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            Self::Ulid(u) => write!(f, "{u}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Ulid> for Value {
    fn from(v: Ulid) -> Self {
        Self::Ulid(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}
