use serde::{Deserialize, Serialize};

///
/// AttributeKind
///
/// Semantic type of one persistent scalar attribute. The physical column
/// type is derived from this; the value layer enforces it at runtime.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum AttributeKind {
    Bool,
    Int,
    Float,
    Text,
    Timestamp,
    Ulid,

    /// Closed string set, stored as text.
    Enum { variants: Vec<String> },
}

impl AttributeKind {
    /// True when two kinds map to the same physical column type.
    #[must_use]
    pub fn column_compatible(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Enum { .. }, Self::Enum { .. } | Self::Text)
            | (Self::Text, Self::Enum { .. }) => true,
            _ => self == other,
        }
    }
}

///
/// IdentityStrategy
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum IdentityStrategy {
    /// The store allocates an `i64` key at insert; identity is absent
    /// until flush.
    Allocated,

    /// The client assigns a ULID when the instance is persisted.
    Ulid,
}

impl IdentityStrategy {
    /// Column kind backing an identity of this strategy.
    #[must_use]
    pub const fn column_kind(self) -> AttributeKind {
        match self {
            Self::Allocated => AttributeKind::Int,
            Self::Ulid => AttributeKind::Ulid,
        }
    }
}

///
/// InheritanceStrategy
///
/// Physical layout for an entity with concrete variants. Variants are a
/// closed set declared on the root; layout is a mapping decision, never
/// language-level subclassing.
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum InheritanceStrategy {
    /// No variants.
    #[default]
    None,

    /// All variants share one table; a tag column distinguishes them and
    /// variant-specific columns are nullable.
    SingleTable { discriminator: String },

    /// One table per variant, base attributes duplicated into each.
    TablePerSubtype,
}

///
/// RelationKind
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum RelationKind {
    ManyToOne,
    OneToOne,
    OneToMany,
}

impl RelationKind {
    /// True when the relation resolves to a single target instance.
    #[must_use]
    pub const fn is_single_valued(self) -> bool {
        matches!(self, Self::ManyToOne | Self::OneToOne)
    }
}

///
/// Cascade
///
/// Operations propagated from an owner across a relation.
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Cascade {
    Persist,
    Delete,
}

///
/// FetchMode
///

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum FetchMode {
    /// Association slot stays unresolved until fetched explicitly or via
    /// `join fetch`.
    #[default]
    Lazy,

    /// Association is materialized in the same unit of work as its owner.
    Eager,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_columns_are_text_compatible() {
        let status = AttributeKind::Enum {
            variants: vec!["READY".to_string(), "DELIVERED".to_string()],
        };

        assert!(status.column_compatible(&AttributeKind::Text));
        assert!(AttributeKind::Text.column_compatible(&status));
        assert!(!status.column_compatible(&AttributeKind::Int));
    }

    #[test]
    fn identity_column_kinds() {
        assert_eq!(
            IdentityStrategy::Allocated.column_kind(),
            AttributeKind::Int
        );
        assert_eq!(IdentityStrategy::Ulid.column_kind(), AttributeKind::Ulid);
    }
}
