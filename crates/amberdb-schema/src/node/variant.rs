use crate::node::AttributeDef;
use serde::Serialize;

///
/// VariantDef
///
/// One concrete variant of an entity with inheritance. Variants extend
/// the root's attribute set; the inheritance strategy on the root decides
/// whether they share its table or get their own.
///

#[derive(Clone, Debug, Serialize)]
pub struct VariantDef {
    pub name: String,

    /// Tag value under a discriminator strategy; defaults to the name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discriminator_value: Option<String>,

    pub attributes: Vec<AttributeDef>,

    /// Table under `TablePerSubtype`; defaults to the lowercased name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

impl VariantDef {
    #[must_use]
    pub fn new(name: impl Into<String>, attributes: Vec<AttributeDef>) -> Self {
        Self {
            name: name.into(),
            discriminator_value: None,
            attributes,
            table: None,
        }
    }

    #[must_use]
    pub fn discriminator_value(mut self, value: impl Into<String>) -> Self {
        self.discriminator_value = Some(value.into());
        self
    }

    #[must_use]
    pub fn resolved_discriminator(&self) -> &str {
        self.discriminator_value.as_deref().unwrap_or(&self.name)
    }

    #[must_use]
    pub fn resolved_table(&self) -> String {
        self.table
            .clone()
            .unwrap_or_else(|| self.name.to_lowercase())
    }
}
