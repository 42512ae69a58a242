use crate::{
    node::{AttributeDef, ElementCollectionDef, EmbeddedDef, RelationDef, VariantDef},
    types::{IdentityStrategy, InheritanceStrategy},
};
use serde::Serialize;

///
/// IdentityDef
///

#[derive(Clone, Debug, Serialize)]
pub struct IdentityDef {
    /// Attribute holding the identity value.
    pub attribute: String,
    pub strategy: IdentityStrategy,

    /// Physical key column; defaults to the attribute name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
}

impl IdentityDef {
    #[must_use]
    pub fn allocated(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            strategy: IdentityStrategy::Allocated,
            column: None,
        }
    }

    #[must_use]
    pub fn ulid(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            strategy: IdentityStrategy::Ulid,
            column: None,
        }
    }

    #[must_use]
    pub fn resolved_column(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.attribute)
    }
}

///
/// EntityDef
///
/// Declarative descriptor for one entity type. Registered on a
/// `SchemaBuilder`; meaningless until the builder validates the full set
/// and resolves the physical mapping.
///

#[derive(Clone, Debug, Serialize)]
pub struct EntityDef {
    pub name: String,
    pub identity: IdentityDef,

    /// Base table; defaults to the lowercased entity name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,

    pub attributes: Vec<AttributeDef>,
    pub embeddeds: Vec<EmbeddedDef>,
    pub relations: Vec<RelationDef>,
    pub collections: Vec<ElementCollectionDef>,

    pub inheritance: InheritanceStrategy,
    pub variants: Vec<VariantDef>,
}

impl EntityDef {
    #[must_use]
    pub fn new(name: impl Into<String>, identity: IdentityDef) -> Self {
        Self {
            name: name.into(),
            identity,
            table: None,
            attributes: Vec::new(),
            embeddeds: Vec::new(),
            relations: Vec::new(),
            collections: Vec::new(),
            inheritance: InheritanceStrategy::None,
            variants: Vec::new(),
        }
    }

    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    #[must_use]
    pub fn attribute(mut self, attribute: AttributeDef) -> Self {
        self.attributes.push(attribute);
        self
    }

    #[must_use]
    pub fn embedded(mut self, embedded: EmbeddedDef) -> Self {
        self.embeddeds.push(embedded);
        self
    }

    #[must_use]
    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    #[must_use]
    pub fn collection(mut self, collection: ElementCollectionDef) -> Self {
        self.collections.push(collection);
        self
    }

    #[must_use]
    pub fn inheritance(mut self, strategy: InheritanceStrategy) -> Self {
        self.inheritance = strategy;
        self
    }

    #[must_use]
    pub fn variant(mut self, variant: VariantDef) -> Self {
        self.variants.push(variant);
        self
    }

    #[must_use]
    pub fn resolved_table(&self) -> String {
        self.table
            .clone()
            .unwrap_or_else(|| self.name.to_lowercase())
    }

    #[must_use]
    pub fn get_attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }

    #[must_use]
    pub fn get_embedded(&self, name: &str) -> Option<&EmbeddedDef> {
        self.embeddeds.iter().find(|e| e.name == name)
    }

    #[must_use]
    pub fn get_relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    #[must_use]
    pub fn get_collection(&self, name: &str) -> Option<&ElementCollectionDef> {
        self.collections.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn get_variant(&self, name: &str) -> Option<&VariantDef> {
        self.variants.iter().find(|v| v.name == name)
    }

    /// All member names that must be unique on this entity: identity
    /// attribute, attributes, embeddeds, relations, collections.
    pub(crate) fn member_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.identity.attribute.as_str())
            .chain(self.attributes.iter().map(|a| a.name.as_str()))
            .chain(self.embeddeds.iter().map(|e| e.name.as_str()))
            .chain(self.relations.iter().map(|r| r.name.as_str()))
            .chain(self.collections.iter().map(|c| c.name.as_str()))
    }

    #[must_use]
    pub const fn has_variants(&self) -> bool {
        !matches!(self.inheritance, InheritanceStrategy::None)
    }
}
