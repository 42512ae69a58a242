use crate::{node::EmbeddedDef, types::AttributeKind};
use serde::Serialize;

///
/// ElementKind
///
/// What one element of the collection is: a scalar value or an embedded
/// value group.
///

#[derive(Clone, Debug, Serialize)]
pub enum ElementKind {
    Scalar(AttributeKind),
    Embedded(EmbeddedDef),
}

///
/// ElementCollectionDef
///
/// A set/list of values exclusively owned by one entity instance, stored
/// in a secondary table keyed by the owner's identity. Lifecycle is tied
/// to the owner: deleting the owner removes every element row.
///

#[derive(Clone, Debug, Serialize)]
pub struct ElementCollectionDef {
    pub name: String,
    pub element: ElementKind,

    /// Secondary table; defaults to `<entity_table>_<name>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,

    /// Column holding a scalar element; defaults to the collection name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_column: Option<String>,
}

impl ElementCollectionDef {
    #[must_use]
    pub fn scalar(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            element: ElementKind::Scalar(kind),
            table: None,
            element_column: None,
        }
    }

    #[must_use]
    pub fn embedded(name: impl Into<String>, group: EmbeddedDef) -> Self {
        Self {
            name: name.into(),
            element: ElementKind::Embedded(group),
            table: None,
            element_column: None,
        }
    }

    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Resolve the secondary table name for an owner table.
    #[must_use]
    pub fn resolved_table(&self, owner_table: &str) -> String {
        self.table
            .clone()
            .unwrap_or_else(|| format!("{owner_table}_{}", self.name))
    }

    /// Columns holding element data, in declaration order.
    #[must_use]
    pub fn element_columns(&self) -> Vec<(String, AttributeKind, Option<String>)> {
        match &self.element {
            ElementKind::Scalar(kind) => {
                let column = self
                    .element_column
                    .clone()
                    .unwrap_or_else(|| self.name.clone());
                vec![(column, kind.clone(), None)]
            }
            ElementKind::Embedded(group) => group
                .attributes
                .iter()
                .map(|attr| {
                    (
                        attr.resolved_column().to_string(),
                        attr.kind.clone(),
                        Some(attr.name.clone()),
                    )
                })
                .collect(),
        }
    }
}
