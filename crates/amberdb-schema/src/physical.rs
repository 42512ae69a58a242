//! Resolved physical mapping.
//!
//! The builder turns declarative entity descriptors into this model:
//! concrete tables, columns, foreign keys, and collection tables. All
//! lookups the query translator and session need at runtime resolve
//! against these structs, never against the raw descriptors.

use crate::types::AttributeKind;
use serde::Serialize;

///
/// ColumnSource
///
/// What a physical column stores.
///

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum ColumnSource {
    /// A scalar attribute, addressed by its logical path
    /// (`"age"`, `"homeAddress.city"`).
    Attribute { path: String },

    /// Foreign key of an owning relation; holds the target's identity.
    ForeignKey { relation: String },
}

///
/// ColumnMapping
///

#[derive(Clone, Debug, Serialize)]
pub struct ColumnMapping {
    pub column: String,
    pub kind: AttributeKind,
    pub nullable: bool,
    pub source: ColumnSource,
}

impl ColumnMapping {
    /// Logical attribute path, if this column stores an attribute.
    #[must_use]
    pub fn attribute_path(&self) -> Option<&str> {
        match &self.source {
            ColumnSource::Attribute { path } => Some(path),
            ColumnSource::ForeignKey { .. } => None,
        }
    }
}

///
/// TableLayout
///
/// How an entity's rows are laid out physically.
///

#[derive(Clone, Debug, Serialize)]
pub enum TableLayout {
    /// One table. Entities without variants, and `SingleTable` roots
    /// where variant columns are folded in as nullable columns next to a
    /// discriminator tag.
    Single {
        table: String,

        #[serde(skip_serializing_if = "Option::is_none")]
        discriminator: Option<String>,

        /// `(variant name, column)` for every variant-specific column.
        variant_columns: Vec<(String, ColumnMapping)>,
    },

    /// One table per variant, base columns duplicated into each.
    PerVariant(Vec<VariantTable>),
}

///
/// VariantTable
///

#[derive(Clone, Debug, Serialize)]
pub struct VariantTable {
    pub variant: String,
    pub discriminator_value: String,
    pub table: String,
    pub extra_columns: Vec<ColumnMapping>,
}

///
/// CollectionTable
///
/// Secondary table holding one element collection, keyed by the owner's
/// identity. Rows here are never shared across owners.
///

#[derive(Clone, Debug, Serialize)]
pub struct CollectionTable {
    pub collection: String,
    pub table: String,
    pub owner_column: String,

    /// `(column, kind, embedded member)` per element column; the member
    /// is `None` for scalar elements.
    pub columns: Vec<(String, AttributeKind, Option<String>)>,
}

///
/// ResolvedColumn
///
/// Outcome of a logical-path lookup.
///

#[derive(Clone, Debug)]
pub struct ResolvedColumn {
    pub column: String,
    pub kind: AttributeKind,
    pub nullable: bool,

    /// Set when the column belongs to a specific variant.
    pub variant: Option<String>,
}

///
/// EntityMapping
///

#[derive(Clone, Debug, Serialize)]
pub struct EntityMapping {
    pub key_column: String,
    pub key_kind: AttributeKind,

    /// Columns shared by every table of the entity.
    pub base_columns: Vec<ColumnMapping>,

    pub layout: TableLayout,
    pub collections: Vec<CollectionTable>,
}

impl EntityMapping {
    /// Primary table for a non-variant entity or `SingleTable` root.
    ///
    /// `PerVariant` layouts have no single primary table; callers must
    /// iterate [`Self::variant_tables`] instead.
    #[must_use]
    pub fn single_table(&self) -> Option<&str> {
        match &self.layout {
            TableLayout::Single { table, .. } => Some(table),
            TableLayout::PerVariant(_) => None,
        }
    }

    #[must_use]
    pub fn variant_tables(&self) -> &[VariantTable] {
        match &self.layout {
            TableLayout::PerVariant(tables) => tables,
            TableLayout::Single { .. } => &[],
        }
    }

    /// Table holding rows for the given variant context.
    #[must_use]
    pub fn table_for(&self, variant: Option<&str>) -> Option<&str> {
        match &self.layout {
            TableLayout::Single { table, .. } => Some(table.as_str()),
            TableLayout::PerVariant(tables) => {
                let variant = variant?;
                tables
                    .iter()
                    .find(|t| t.variant == variant)
                    .map(|t| t.table.as_str())
            }
        }
    }

    /// Resolve a logical attribute path to its physical column.
    #[must_use]
    pub fn resolve_path(&self, path: &str) -> Option<ResolvedColumn> {
        for column in &self.base_columns {
            if column.attribute_path() == Some(path) {
                return Some(ResolvedColumn {
                    column: column.column.clone(),
                    kind: column.kind.clone(),
                    nullable: column.nullable,
                    variant: None,
                });
            }
        }

        match &self.layout {
            TableLayout::Single {
                variant_columns, ..
            } => variant_columns.iter().find_map(|(variant, column)| {
                (column.attribute_path() == Some(path)).then(|| ResolvedColumn {
                    column: column.column.clone(),
                    kind: column.kind.clone(),
                    nullable: column.nullable,
                    variant: Some(variant.clone()),
                })
            }),
            TableLayout::PerVariant(tables) => tables.iter().find_map(|table| {
                table.extra_columns.iter().find_map(|column| {
                    (column.attribute_path() == Some(path)).then(|| ResolvedColumn {
                        column: column.column.clone(),
                        kind: column.kind.clone(),
                        nullable: column.nullable,
                        variant: Some(table.variant.clone()),
                    })
                })
            }),
        }
    }

    /// Foreign-key column for an owning relation.
    #[must_use]
    pub fn fk_column(&self, relation: &str) -> Option<&ColumnMapping> {
        self.base_columns.iter().find(|column| {
            matches!(&column.source, ColumnSource::ForeignKey { relation: r } if r == relation)
        })
    }

    #[must_use]
    pub fn collection_table(&self, collection: &str) -> Option<&CollectionTable> {
        self.collections.iter().find(|c| c.collection == collection)
    }
}
