//! Schema builder and registry.
//!
//! Contract:
//! - `SchemaBuilder` accepts descriptors in any order; nothing is
//!   resolved until `build()`.
//! - `build()` validates the whole set, collecting every error before
//!   reporting, then resolves the physical mapping per entity.
//! - The returned `Schema` is immutable; every downstream layer reads
//!   mapping facts from it and nothing else.

#[cfg(test)]
mod tests;

use crate::{
    node::{EntityDef, RelationSide},
    physical::{
        CollectionTable, ColumnMapping, ColumnSource, EntityMapping, TableLayout, VariantTable,
    },
    types::{AttributeKind, InheritanceStrategy, RelationKind},
    validate::{validate_entity_name, validate_member_name},
};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error as ThisError;

///
/// MappingError
///
/// Registry misconfiguration, detected at build time. Nothing downstream
/// runs against an unvalidated schema.
///

#[derive(Clone, Debug, Eq, PartialEq, Serialize, ThisError)]
pub enum MappingError {
    #[error("entity '{entity}': {detail}")]
    InvalidName { entity: String, detail: String },

    #[error("entity '{entity}' is registered twice")]
    DuplicateEntity { entity: String },

    #[error("entity '{entity}' declares member '{member}' more than once")]
    DuplicateMember { entity: String, member: String },

    #[error("entity '{entity}' relation '{relation}' references unregistered entity '{target}'")]
    UnknownTarget {
        entity: String,
        relation: String,
        target: String,
    },

    #[error(
        "entity '{entity}' relation '{relation}' mirrors '{mapped_by}' which does not exist on '{target}'"
    )]
    MappedByMissing {
        entity: String,
        relation: String,
        target: String,
        mapped_by: String,
    },

    #[error(
        "entity '{entity}' relation '{relation}' mirrors '{mapped_by}' on '{target}' which is not an owning side"
    )]
    MappedByNotOwning {
        entity: String,
        relation: String,
        target: String,
        mapped_by: String,
    },

    #[error(
        "entity '{entity}' relation '{relation}' mirrors '{mapped_by}' on '{target}' which targets '{actual}' instead"
    )]
    MappedByTargetMismatch {
        entity: String,
        relation: String,
        target: String,
        mapped_by: String,
        actual: String,
    },

    #[error("entity '{entity}' one-to-many relation '{relation}' must declare mapped_by")]
    OneToManyMustMirror { entity: String, relation: String },

    #[error("entity '{entity}' relation '{relation}' declares orphan removal but is not a collection")]
    OrphanRemovalNotCollection { entity: String, relation: String },

    #[error("entity '{entity}' maps column '{column}' more than once with conflicting types")]
    ColumnConflict { entity: String, column: String },

    #[error("entity '{entity}' discriminator column '{column}' collides with a mapped column")]
    DiscriminatorConflict { entity: String, column: String },

    #[error("entity '{entity}' declares discriminator value '{value}' on more than one variant")]
    DuplicateDiscriminatorValue { entity: String, value: String },

    #[error("entity '{entity}' declares variants without an inheritance strategy")]
    VariantsWithoutStrategy { entity: String },

    #[error("entity '{entity}' declares an inheritance strategy but no variants")]
    StrategyWithoutVariants { entity: String },

    #[error("entity '{entity}' variant '{variant}' redeclares member '{member}'")]
    VariantMemberCollision {
        entity: String,
        variant: String,
        member: String,
    },

    #[error("table '{table}' is mapped by both '{first}' and '{second}'")]
    TableConflict {
        table: String,
        first: String,
        second: String,
    },

    #[error("entity '{entity}' is not registered")]
    UnknownEntity { entity: String },
}

///
/// MappingErrors
///
/// Every error found in one build pass.
///

#[derive(Clone, Debug, ThisError)]
pub struct MappingErrors(pub Vec<MappingError>);

impl std::fmt::Display for MappingErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} mapping error(s): ", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{err}")?;
        }

        Ok(())
    }
}

///
/// EntityModel
///
/// One registered entity: its descriptor plus the resolved mapping.
///

#[derive(Clone, Debug, Serialize)]
pub struct EntityModel {
    pub def: EntityDef,
    pub mapping: EntityMapping,
}

impl EntityModel {
    /// Column kind of the identity value.
    #[must_use]
    pub const fn identity_kind(&self) -> AttributeKind {
        self.def.identity.strategy.column_kind()
    }
}

///
/// Schema
///

#[derive(Clone, Debug, Default, Serialize)]
pub struct Schema {
    entities: BTreeMap<String, EntityModel>,
}

impl Schema {
    #[must_use]
    pub fn get(&self, entity: &str) -> Option<&EntityModel> {
        self.entities.get(entity)
    }

    /// Lookup that surfaces a `MappingError` for unregistered names.
    pub fn expect(&self, entity: &str) -> Result<&EntityModel, MappingError> {
        self.get(entity).ok_or_else(|| MappingError::UnknownEntity {
            entity: entity.to_string(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EntityModel)> {
        self.entities.iter().map(|(name, model)| (name.as_str(), model))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

///
/// SchemaBuilder
///

#[derive(Debug, Default)]
pub struct SchemaBuilder {
    defs: Vec<EntityDef>,
}

impl SchemaBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entity(mut self, def: EntityDef) -> Self {
        self.defs.push(def);
        self
    }

    /// Validate the full descriptor set and resolve the physical mapping.
    pub fn build(self) -> Result<Schema, MappingErrors> {
        let mut errs = Vec::new();

        // Pass 1: names, uniqueness, and local shape.
        let mut by_name: BTreeMap<&str, &EntityDef> = BTreeMap::new();
        for def in &self.defs {
            validate_local(def, &mut errs);
            if by_name.insert(def.name.as_str(), def).is_some() {
                errs.push(MappingError::DuplicateEntity {
                    entity: def.name.clone(),
                });
            }
        }

        // Pass 2: cross-entity relation checks.
        for def in &self.defs {
            validate_relations(def, &by_name, &mut errs);
        }

        if !errs.is_empty() {
            return Err(MappingErrors(errs));
        }

        // Pass 3: physical resolution, then table-uniqueness over the set.
        let mut entities = BTreeMap::new();
        let mut table_owners: BTreeMap<String, String> = BTreeMap::new();
        for def in &self.defs {
            let mapping = resolve_mapping(def, &by_name, &mut errs);
            claim_tables(def, &mapping, &mut table_owners, &mut errs);
            entities.insert(
                def.name.clone(),
                EntityModel {
                    def: def.clone(),
                    mapping,
                },
            );
        }

        if errs.is_empty() {
            Ok(Schema { entities })
        } else {
            Err(MappingErrors(errs))
        }
    }
}

fn validate_local(def: &EntityDef, errs: &mut Vec<MappingError>) {
    if let Err(detail) = validate_entity_name(&def.name) {
        errs.push(MappingError::InvalidName {
            entity: def.name.clone(),
            detail,
        });
    }

    let mut seen = std::collections::BTreeSet::new();
    for member in def.member_names() {
        if let Err(detail) = validate_member_name(member) {
            errs.push(MappingError::InvalidName {
                entity: def.name.clone(),
                detail,
            });
        }
        if !seen.insert(member) {
            errs.push(MappingError::DuplicateMember {
                entity: def.name.clone(),
                member: member.to_string(),
            });
        }
    }

    // variants vs strategy
    match (&def.inheritance, def.variants.is_empty()) {
        (InheritanceStrategy::None, false) => {
            errs.push(MappingError::VariantsWithoutStrategy {
                entity: def.name.clone(),
            });
        }
        (InheritanceStrategy::SingleTable { .. } | InheritanceStrategy::TablePerSubtype, true) => {
            errs.push(MappingError::StrategyWithoutVariants {
                entity: def.name.clone(),
            });
        }
        _ => {}
    }

    let mut discriminators = std::collections::BTreeSet::new();
    for variant in &def.variants {
        if let Err(detail) = validate_member_name(&variant.name) {
            errs.push(MappingError::InvalidName {
                entity: def.name.clone(),
                detail,
            });
        }
        if !discriminators.insert(variant.resolved_discriminator().to_string()) {
            errs.push(MappingError::DuplicateDiscriminatorValue {
                entity: def.name.clone(),
                value: variant.resolved_discriminator().to_string(),
            });
        }
        for attr in &variant.attributes {
            if seen.contains(attr.name.as_str()) {
                errs.push(MappingError::VariantMemberCollision {
                    entity: def.name.clone(),
                    variant: variant.name.clone(),
                    member: attr.name.clone(),
                });
            }
        }
    }
}

fn validate_relations(
    def: &EntityDef,
    by_name: &BTreeMap<&str, &EntityDef>,
    errs: &mut Vec<MappingError>,
) {
    for relation in &def.relations {
        let Some(target) = by_name.get(relation.target.as_str()) else {
            errs.push(MappingError::UnknownTarget {
                entity: def.name.clone(),
                relation: relation.name.clone(),
                target: relation.target.clone(),
            });
            continue;
        };

        if relation.kind == RelationKind::OneToMany && relation.is_owning() {
            errs.push(MappingError::OneToManyMustMirror {
                entity: def.name.clone(),
                relation: relation.name.clone(),
            });
        }

        if relation.orphan_removal && relation.kind != RelationKind::OneToMany {
            errs.push(MappingError::OrphanRemovalNotCollection {
                entity: def.name.clone(),
                relation: relation.name.clone(),
            });
        }

        if let RelationSide::Mirrored { mapped_by } = &relation.side {
            let Some(owning) = target.get_relation(mapped_by) else {
                errs.push(MappingError::MappedByMissing {
                    entity: def.name.clone(),
                    relation: relation.name.clone(),
                    target: relation.target.clone(),
                    mapped_by: mapped_by.clone(),
                });
                continue;
            };

            if !owning.is_owning() {
                errs.push(MappingError::MappedByNotOwning {
                    entity: def.name.clone(),
                    relation: relation.name.clone(),
                    target: relation.target.clone(),
                    mapped_by: mapped_by.clone(),
                });
            }
            if owning.target != def.name {
                errs.push(MappingError::MappedByTargetMismatch {
                    entity: def.name.clone(),
                    relation: relation.name.clone(),
                    target: relation.target.clone(),
                    mapped_by: mapped_by.clone(),
                    actual: owning.target.clone(),
                });
            }
        }
    }

}

/// Resolve one entity's physical mapping. Assumes passes 1 and 2 ran.
fn resolve_mapping(
    def: &EntityDef,
    by_name: &BTreeMap<&str, &EntityDef>,
    errs: &mut Vec<MappingError>,
) -> EntityMapping {
    let mut base_columns = Vec::new();

    for attr in &def.attributes {
        base_columns.push(ColumnMapping {
            column: attr.resolved_column().to_string(),
            kind: attr.kind.clone(),
            nullable: attr.nullable,
            source: ColumnSource::Attribute {
                path: attr.name.clone(),
            },
        });
    }

    for group in &def.embeddeds {
        for attr in &group.attributes {
            base_columns.push(ColumnMapping {
                column: group.member_column(attr),
                kind: attr.kind.clone(),
                nullable: true,
                source: ColumnSource::Attribute {
                    path: format!("{}.{}", group.name, attr.name),
                },
            });
        }
    }

    for relation in &def.relations {
        let Some(fk_column) = relation.resolved_fk_column() else {
            continue;
        };
        let key_kind = by_name
            .get(relation.target.as_str())
            .map_or(AttributeKind::Int, |target| {
                target.identity.strategy.column_kind()
            });
        base_columns.push(ColumnMapping {
            column: fk_column,
            kind: key_kind,
            nullable: true,
            source: ColumnSource::ForeignKey {
                relation: relation.name.clone(),
            },
        });
    }

    let key_column = def.identity.resolved_column().to_string();
    check_column_conflicts(def, &key_column, &base_columns, errs);

    let layout = resolve_layout(def, &key_column, &base_columns, errs);

    let owner_table = def.resolved_table();
    let collections = def
        .collections
        .iter()
        .map(|collection| {
            let owner_column = format!("{owner_table}_{key_column}");
            let columns = collection.element_columns();
            if columns.iter().any(|(column, _, _)| *column == owner_column) {
                errs.push(MappingError::ColumnConflict {
                    entity: def.name.clone(),
                    column: owner_column.clone(),
                });
            }
            CollectionTable {
                collection: collection.name.clone(),
                table: collection.resolved_table(&owner_table),
                owner_column,
                columns,
            }
        })
        .collect();

    EntityMapping {
        key_column,
        key_kind: def.identity.strategy.column_kind(),
        base_columns,
        layout,
        collections,
    }
}

fn check_column_conflicts(
    def: &EntityDef,
    key_column: &str,
    base_columns: &[ColumnMapping],
    errs: &mut Vec<MappingError>,
) {
    let mut seen: BTreeMap<&str, &AttributeKind> = BTreeMap::new();
    for column in base_columns {
        if column.column == key_column {
            errs.push(MappingError::ColumnConflict {
                entity: def.name.clone(),
                column: column.column.clone(),
            });
        }
        if seen.insert(column.column.as_str(), &column.kind).is_some() {
            errs.push(MappingError::ColumnConflict {
                entity: def.name.clone(),
                column: column.column.clone(),
            });
        }
    }
}

fn resolve_layout(
    def: &EntityDef,
    key_column: &str,
    base_columns: &[ColumnMapping],
    errs: &mut Vec<MappingError>,
) -> TableLayout {
    match &def.inheritance {
        InheritanceStrategy::None => TableLayout::Single {
            table: def.resolved_table(),
            discriminator: None,
            variant_columns: Vec::new(),
        },

        InheritanceStrategy::SingleTable { discriminator } => {
            if key_column == discriminator
                || base_columns.iter().any(|c| c.column == *discriminator)
            {
                errs.push(MappingError::DiscriminatorConflict {
                    entity: def.name.clone(),
                    column: discriminator.clone(),
                });
            }

            // Variant columns fold into the shared table as nullable.
            // Same column from two variants is fine when the kinds agree;
            // conflicting kinds are a mapping error.
            let mut variant_columns: Vec<(String, ColumnMapping)> = Vec::new();
            for variant in &def.variants {
                for attr in &variant.attributes {
                    let column = attr.resolved_column().to_string();
                    let clash = base_columns.iter().any(|c| c.column == column)
                        || column == key_column
                        || column == *discriminator;
                    let conflicting = variant_columns.iter().any(|(_, existing)| {
                        existing.column == column && !existing.kind.column_compatible(&attr.kind)
                    });
                    if clash || conflicting {
                        errs.push(MappingError::ColumnConflict {
                            entity: def.name.clone(),
                            column,
                        });
                        continue;
                    }
                    variant_columns.push((
                        variant.name.clone(),
                        ColumnMapping {
                            column,
                            kind: attr.kind.clone(),
                            nullable: true,
                            source: ColumnSource::Attribute {
                                path: attr.name.clone(),
                            },
                        },
                    ));
                }
            }

            TableLayout::Single {
                table: def.resolved_table(),
                discriminator: Some(discriminator.clone()),
                variant_columns,
            }
        }

        InheritanceStrategy::TablePerSubtype => {
            let tables = def
                .variants
                .iter()
                .map(|variant| {
                    let mut extra_columns = Vec::new();
                    for attr in &variant.attributes {
                        let column = attr.resolved_column().to_string();
                        if column == key_column || base_columns.iter().any(|c| c.column == column)
                        {
                            errs.push(MappingError::ColumnConflict {
                                entity: def.name.clone(),
                                column,
                            });
                            continue;
                        }
                        extra_columns.push(ColumnMapping {
                            column,
                            kind: attr.kind.clone(),
                            nullable: attr.nullable,
                            source: ColumnSource::Attribute {
                                path: attr.name.clone(),
                            },
                        });
                    }
                    VariantTable {
                        variant: variant.name.clone(),
                        discriminator_value: variant.resolved_discriminator().to_string(),
                        table: variant.resolved_table(),
                        extra_columns,
                    }
                })
                .collect();

            TableLayout::PerVariant(tables)
        }
    }
}

fn claim_tables(
    def: &EntityDef,
    mapping: &EntityMapping,
    table_owners: &mut BTreeMap<String, String>,
    errs: &mut Vec<MappingError>,
) {
    let mut claim = |table: &str| {
        if let Some(first) = table_owners.get(table) {
            errs.push(MappingError::TableConflict {
                table: table.to_string(),
                first: first.clone(),
                second: def.name.clone(),
            });
        } else {
            table_owners.insert(table.to_string(), def.name.clone());
        }
    };

    match &mapping.layout {
        TableLayout::Single { table, .. } => claim(table),
        TableLayout::PerVariant(tables) => {
            for variant in tables {
                claim(&variant.table);
            }
        }
    }
    for collection in &mapping.collections {
        claim(&collection.table);
    }
}
