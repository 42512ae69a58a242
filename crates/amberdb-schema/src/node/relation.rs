use crate::types::{Cascade, FetchMode, RelationKind};
use serde::Serialize;

///
/// RelationSide
///
/// Whether this side carries the foreign key or mirrors a relation owned
/// by the target. Mirrored sides are derived and read-only: the session
/// keeps them consistent, the registry never maps a column for them.
///

#[derive(Clone, Debug, Serialize)]
pub enum RelationSide {
    Owning {
        /// Foreign-key column; defaults to `<relation>_id`.
        fk_column: Option<String>,
    },

    Mirrored {
        /// Name of the owning relation on the target entity.
        mapped_by: String,
    },
}

///
/// RelationDef
///

#[derive(Clone, Debug, Serialize)]
pub struct RelationDef {
    pub name: String,
    pub kind: RelationKind,

    /// Target entity name.
    pub target: String,

    pub side: RelationSide,
    pub cascade: Vec<Cascade>,

    /// Delete a child evicted from this collection. Only meaningful on
    /// collection relations.
    pub orphan_removal: bool,

    pub fetch: FetchMode,
}

impl RelationDef {
    /// An owning many-to-one with the default foreign-key column.
    #[must_use]
    pub fn many_to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: RelationKind::ManyToOne,
            target: target.into(),
            side: RelationSide::Owning { fk_column: None },
            cascade: Vec::new(),
            orphan_removal: false,
            fetch: FetchMode::Lazy,
        }
    }

    /// An owning one-to-one with the default foreign-key column.
    #[must_use]
    pub fn one_to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: RelationKind::OneToOne,
            target: target.into(),
            side: RelationSide::Owning { fk_column: None },
            cascade: Vec::new(),
            orphan_removal: false,
            fetch: FetchMode::Lazy,
        }
    }

    /// A collection mirroring an owning relation on the target.
    #[must_use]
    pub fn one_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        mapped_by: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: RelationKind::OneToMany,
            target: target.into(),
            side: RelationSide::Mirrored {
                mapped_by: mapped_by.into(),
            },
            cascade: Vec::new(),
            orphan_removal: false,
            fetch: FetchMode::Lazy,
        }
    }

    #[must_use]
    pub fn mirrored(mut self, mapped_by: impl Into<String>) -> Self {
        self.side = RelationSide::Mirrored {
            mapped_by: mapped_by.into(),
        };
        self
    }

    #[must_use]
    pub fn fk_column(mut self, column: impl Into<String>) -> Self {
        self.side = RelationSide::Owning {
            fk_column: Some(column.into()),
        };
        self
    }

    #[must_use]
    pub fn cascade(mut self, cascade: Cascade) -> Self {
        self.cascade.push(cascade);
        self
    }

    #[must_use]
    pub const fn orphan_removal(mut self) -> Self {
        self.orphan_removal = true;
        self
    }

    #[must_use]
    pub const fn eager(mut self) -> Self {
        self.fetch = FetchMode::Eager;
        self
    }

    #[must_use]
    pub const fn is_owning(&self) -> bool {
        matches!(self.side, RelationSide::Owning { .. })
    }

    #[must_use]
    pub fn cascades(&self, cascade: Cascade) -> bool {
        self.cascade.contains(&cascade)
    }

    /// Resolve the foreign-key column for an owning side.
    #[must_use]
    pub fn resolved_fk_column(&self) -> Option<String> {
        match &self.side {
            RelationSide::Owning { fk_column } => Some(
                fk_column
                    .clone()
                    .unwrap_or_else(|| format!("{}_id", self.name)),
            ),
            RelationSide::Mirrored { .. } => None,
        }
    }
}
