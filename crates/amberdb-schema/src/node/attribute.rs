use crate::types::AttributeKind;
use serde::Serialize;

///
/// AttributeDef
///
/// One persistent scalar attribute.
///

#[derive(Clone, Debug, Serialize)]
pub struct AttributeDef {
    pub name: String,
    pub kind: AttributeKind,

    /// Physical column name; defaults to the attribute name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,

    pub nullable: bool,
}

impl AttributeDef {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            column: None,
            nullable: false,
        }
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    #[must_use]
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    /// Resolve the physical column name.
    #[must_use]
    pub fn resolved_column(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.name)
    }
}

///
/// EmbeddedDef
///
/// A value-object attribute group with no identity of its own. Its
/// attributes flatten into the owner's table, each column prefixed with
/// the group name unless an explicit column override is given.
///

#[derive(Clone, Debug, Serialize)]
pub struct EmbeddedDef {
    pub name: String,
    pub attributes: Vec<AttributeDef>,
}

impl EmbeddedDef {
    #[must_use]
    pub fn new(name: impl Into<String>, attributes: Vec<AttributeDef>) -> Self {
        Self {
            name: name.into(),
            attributes,
        }
    }

    /// Physical column for one member attribute: `<group>_<column>`.
    #[must_use]
    pub fn member_column(&self, attribute: &AttributeDef) -> String {
        match &attribute.column {
            Some(column) => column.clone(),
            None => format!("{}_{}", self.name, attribute.name),
        }
    }
}
