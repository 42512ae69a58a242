//! Semantic resolution.
//!
//! Checks a parsed query against the registry and pins down everything
//! lowering needs: alias bindings, join mechanics, resolved columns.
//! Queries that pass never fail name lookups later.

use crate::query::ast::{
    DeleteAst, ExprAst, PathExpr, PredicateAst, QueryAst, SelectAst, UpdateAst,
};
use amberdb_schema::{
    build::{EntityModel, Schema},
    node::RelationSide,
    physical::TableLayout,
    types::{AttributeKind, RelationKind},
};
use std::collections::BTreeMap;
use thiserror::Error as ThisError;

///
/// QuerySemanticError
///
/// Well-formed text referencing things the registry does not know, or
/// combining them in unsupported ways. Rejected before execution.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum QuerySemanticError {
    #[error("unknown entity '{entity}'")]
    UnknownEntity { entity: String },

    #[error("unknown alias '{alias}'")]
    UnknownAlias { alias: String },

    #[error("alias '{alias}' is bound twice")]
    DuplicateAlias { alias: String },

    #[error("'{name}' is not an association of entity '{entity}'")]
    NotAnAssociation { entity: String, name: String },

    #[error("entity '{entity}' has no attribute '{path}'")]
    UnknownAttribute { entity: String, path: String },

    #[error(
        "attribute '{path}' is variant-specific and cannot be used across the '{entity}' hierarchy"
    )]
    AttributeNotShared { entity: String, path: String },

    #[error("'join fetch {relation}' cannot carry an on-condition")]
    FetchWithCondition { relation: String },

    #[error("join fetch requires an entity projection")]
    FetchRequiresEntityProjection,

    #[error("'join fetch' through alias '{alias}' requires that alias to be fetched too")]
    FetchChainBroken { alias: String },

    #[error("cannot join across the variant tables of entity '{entity}'")]
    PolymorphicJoin { entity: String },

    #[error("projection mixes entity aliases and attribute paths")]
    MixedProjection,

    #[error("identity of entity '{entity}' is immutable")]
    IdentityAssignment { entity: String },

    #[error("'{path}' is an association of entity '{entity}' and cannot be assigned directly")]
    AssignmentToAssociation { entity: String, path: String },

    #[error("comparison needs at least one attribute path")]
    UnsupportedComparison,

    #[error("value does not fit attribute '{path}'")]
    TypeMismatch { path: String },

    #[error("parameter {param} is not bound")]
    UnboundParameter { param: String },
}

///
/// ResolvedColumnRef
///
/// One attribute-or-relation path pinned to a physical column.
///

#[derive(Clone, Debug)]
pub struct ResolvedColumnRef {
    pub column: String,
    pub kind: AttributeKind,
}

///
/// JoinMechanics
///

#[derive(Clone, Debug)]
pub enum JoinMechanics {
    /// Source row holds the foreign key (owning many-to-one/one-to-one).
    SourceFk { fk_column: String },

    /// Target row holds the foreign key (mirrored sides).
    TargetFk { fk_column: String },
}

///
/// ResolvedJoin
///

#[derive(Clone, Debug)]
pub struct ResolvedJoin {
    pub fetch: bool,
    pub source_alias: String,
    pub relation: String,
    pub kind: RelationKind,
    pub mechanics: JoinMechanics,
    pub target_entity: String,
    pub alias: String,
    pub on: Option<PredicateAst>,
}

///
/// ResolvedProjection
///

#[derive(Clone, Debug)]
pub enum ResolvedProjection {
    Entity { alias: String },
    Scalars(Vec<ScalarItem>),
}

///
/// ScalarItem
///

#[derive(Clone, Debug)]
pub struct ScalarItem {
    pub alias: String,
    pub column: String,

    /// Original dotted text, used as the output label.
    pub label: String,
}

///
/// ResolvedSelect
///

#[derive(Clone, Debug)]
pub struct ResolvedSelect {
    pub root_alias: String,
    pub root_entity: String,
    pub joins: Vec<ResolvedJoin>,
    pub projection: ResolvedProjection,
    pub predicate: Option<PredicateAst>,

    /// Alias to entity name, root included.
    pub aliases: BTreeMap<String, String>,
}

///
/// ResolvedAssignment
///

#[derive(Clone, Debug)]
pub struct ResolvedAssignment {
    pub path: String,
    pub column: String,
    pub kind: AttributeKind,
    pub value: ExprAst,
}

///
/// ResolvedUpdate
///

#[derive(Clone, Debug)]
pub struct ResolvedUpdate {
    pub entity: String,
    pub alias: String,
    pub assignments: Vec<ResolvedAssignment>,
    pub predicate: Option<PredicateAst>,
}

///
/// ResolvedDelete
///

#[derive(Clone, Debug)]
pub struct ResolvedDelete {
    pub entity: String,
    pub alias: String,
    pub predicate: Option<PredicateAst>,
}

///
/// ResolvedQuery
///

#[derive(Clone, Debug)]
pub enum ResolvedQuery {
    Select(ResolvedSelect),
    Update(ResolvedUpdate),
    Delete(ResolvedDelete),
}

/// Resolve a parsed query against the registry.
pub fn resolve(schema: &Schema, ast: &QueryAst) -> Result<ResolvedQuery, QuerySemanticError> {
    match ast {
        QueryAst::Select(select) => resolve_select(schema, select).map(ResolvedQuery::Select),
        QueryAst::Update(update) => resolve_update(schema, update).map(ResolvedQuery::Update),
        QueryAst::Delete(delete) => resolve_delete(schema, delete).map(ResolvedQuery::Delete),
    }
}

fn lookup<'a>(schema: &'a Schema, entity: &str) -> Result<&'a EntityModel, QuerySemanticError> {
    schema.get(entity).ok_or_else(|| QuerySemanticError::UnknownEntity {
        entity: entity.to_string(),
    })
}

fn resolve_select(
    schema: &Schema,
    select: &SelectAst,
) -> Result<ResolvedSelect, QuerySemanticError> {
    lookup(schema, &select.entity)?;

    let mut aliases = BTreeMap::new();
    aliases.insert(select.alias.clone(), select.entity.clone());

    let mut joins = Vec::with_capacity(select.joins.len());
    for join in &select.joins {
        let Some(source_entity) = aliases.get(&join.path.root) else {
            return Err(QuerySemanticError::UnknownAlias {
                alias: join.path.root.clone(),
            });
        };
        let source = lookup(schema, source_entity)?;

        let [relation_name] = join.path.segments.as_slice() else {
            return Err(QuerySemanticError::NotAnAssociation {
                entity: source_entity.clone(),
                name: join.path.tail().unwrap_or_default(),
            });
        };
        let Some(relation) = source.def.get_relation(relation_name) else {
            return Err(QuerySemanticError::NotAnAssociation {
                entity: source_entity.clone(),
                name: relation_name.clone(),
            });
        };

        if join.fetch && join.on.is_some() {
            return Err(QuerySemanticError::FetchWithCondition {
                relation: relation.name.clone(),
            });
        }

        let target = lookup(schema, &relation.target)?;
        if matches!(target.mapping.layout, TableLayout::PerVariant(_)) {
            return Err(QuerySemanticError::PolymorphicJoin {
                entity: relation.target.clone(),
            });
        }

        let mechanics = match &relation.side {
            RelationSide::Owning { .. } => {
                let fk_column = relation
                    .resolved_fk_column()
                    .unwrap_or_else(|| format!("{}_id", relation.name));
                JoinMechanics::SourceFk { fk_column }
            }
            RelationSide::Mirrored { mapped_by } => {
                // mirrored side: the owning relation on the target holds
                // the key; the registry validated it exists and owns
                let fk_column = target
                    .def
                    .get_relation(mapped_by)
                    .and_then(amberdb_schema::node::RelationDef::resolved_fk_column)
                    .ok_or_else(|| QuerySemanticError::NotAnAssociation {
                        entity: relation.target.clone(),
                        name: mapped_by.clone(),
                    })?;
                JoinMechanics::TargetFk { fk_column }
            }
        };

        if aliases
            .insert(join.alias.clone(), relation.target.clone())
            .is_some()
        {
            return Err(QuerySemanticError::DuplicateAlias {
                alias: join.alias.clone(),
            });
        }

        joins.push(ResolvedJoin {
            fetch: join.fetch,
            source_alias: join.path.root.clone(),
            relation: relation.name.clone(),
            kind: relation.kind,
            mechanics,
            target_entity: relation.target.clone(),
            alias: join.alias.clone(),
            on: join.on.clone(),
        });
    }

    let projection = resolve_projection(schema, &select.projection, &aliases)?;
    if joins.iter().any(|j| j.fetch)
        && !matches!(projection, ResolvedProjection::Entity { .. })
    {
        return Err(QuerySemanticError::FetchRequiresEntityProjection);
    }

    // fetched rows attach to their owner, so the owner itself must be
    // materialized: the root, or another fetched alias
    for join in &joins {
        if join.fetch
            && join.source_alias != select.alias
            && !joins
                .iter()
                .any(|j| j.fetch && j.alias == join.source_alias)
        {
            return Err(QuerySemanticError::FetchChainBroken {
                alias: join.source_alias.clone(),
            });
        }
    }

    if let Some(predicate) = &select.predicate {
        check_predicate(schema, predicate, &aliases)?;
    }
    for join in &joins {
        if let Some(on) = &join.on {
            check_predicate(schema, on, &aliases)?;
        }
    }

    Ok(ResolvedSelect {
        root_alias: select.alias.clone(),
        root_entity: select.entity.clone(),
        joins,
        projection,
        predicate: select.predicate.clone(),
        aliases,
    })
}

fn resolve_projection(
    schema: &Schema,
    projection: &[PathExpr],
    aliases: &BTreeMap<String, String>,
) -> Result<ResolvedProjection, QuerySemanticError> {
    if let [single] = projection
        && single.segments.is_empty()
    {
        if !aliases.contains_key(&single.root) {
            return Err(QuerySemanticError::UnknownAlias {
                alias: single.root.clone(),
            });
        }
        return Ok(ResolvedProjection::Entity {
            alias: single.root.clone(),
        });
    }

    let mut items = Vec::with_capacity(projection.len());
    for path in projection {
        if path.segments.is_empty() {
            return Err(QuerySemanticError::MixedProjection);
        }
        let entity = aliases
            .get(&path.root)
            .ok_or_else(|| QuerySemanticError::UnknownAlias {
                alias: path.root.clone(),
            })?;
        let model = lookup(schema, entity)?;
        let tail = path.tail().unwrap_or_default();
        let resolved = resolve_expr_path(model, &tail)?;
        items.push(ScalarItem {
            alias: path.root.clone(),
            column: resolved.column,
            label: format!("{}.{tail}", path.root),
        });
    }

    Ok(ResolvedProjection::Scalars(items))
}

fn resolve_update(
    schema: &Schema,
    update: &UpdateAst,
) -> Result<ResolvedUpdate, QuerySemanticError> {
    let model = lookup(schema, &update.entity)?;
    let mut aliases = BTreeMap::new();
    aliases.insert(update.alias.clone(), update.entity.clone());

    let mut assignments = Vec::with_capacity(update.assignments.len());
    for (path, value) in &update.assignments {
        if path.root != update.alias {
            return Err(QuerySemanticError::UnknownAlias {
                alias: path.root.clone(),
            });
        }
        let tail = path
            .tail()
            .ok_or_else(|| QuerySemanticError::UnknownAttribute {
                entity: update.entity.clone(),
                path: path.root.clone(),
            })?;

        if tail == model.def.identity.attribute {
            return Err(QuerySemanticError::IdentityAssignment {
                entity: update.entity.clone(),
            });
        }
        if model.def.get_relation(&tail).is_some() {
            return Err(QuerySemanticError::AssignmentToAssociation {
                entity: update.entity.clone(),
                path: tail,
            });
        }

        let resolved = resolve_attribute_only(model, &tail)?;
        match value {
            ExprAst::Literal(literal) => {
                if !literal.conforms_to(&resolved.kind) {
                    return Err(QuerySemanticError::TypeMismatch { path: tail });
                }
            }
            ExprAst::Param(_) => {}
            ExprAst::Path(_) => {
                return Err(QuerySemanticError::UnsupportedComparison);
            }
        }

        assignments.push(ResolvedAssignment {
            path: tail,
            column: resolved.column,
            kind: resolved.kind,
            value: value.clone(),
        });
    }

    if let Some(predicate) = &update.predicate {
        check_predicate(schema, predicate, &aliases)?;
    }

    Ok(ResolvedUpdate {
        entity: update.entity.clone(),
        alias: update.alias.clone(),
        assignments,
        predicate: update.predicate.clone(),
    })
}

fn resolve_delete(
    schema: &Schema,
    delete: &DeleteAst,
) -> Result<ResolvedDelete, QuerySemanticError> {
    lookup(schema, &delete.entity)?;
    let mut aliases = BTreeMap::new();
    aliases.insert(delete.alias.clone(), delete.entity.clone());

    if let Some(predicate) = &delete.predicate {
        check_predicate(schema, predicate, &aliases)?;
    }

    Ok(ResolvedDelete {
        entity: delete.entity.clone(),
        alias: delete.alias.clone(),
        predicate: delete.predicate.clone(),
    })
}

/// Resolve an expression path: identity attribute, scalar attribute
/// (embedded paths included), or an owning single-valued relation
/// (which compares by foreign key).
pub(crate) fn resolve_expr_path(
    model: &EntityModel,
    tail: &str,
) -> Result<ResolvedColumnRef, QuerySemanticError> {
    if tail == model.def.identity.attribute {
        return Ok(ResolvedColumnRef {
            column: model.mapping.key_column.clone(),
            kind: model.mapping.key_kind.clone(),
        });
    }

    if let Some(resolved) = model.mapping.resolve_path(tail) {
        // a variant-specific column is only addressable when every table
        // of the hierarchy carries it, which holds for single-table
        // layouts only
        if resolved.variant.is_some()
            && matches!(model.mapping.layout, TableLayout::PerVariant(_))
        {
            return Err(QuerySemanticError::AttributeNotShared {
                entity: model.def.name.clone(),
                path: tail.to_string(),
            });
        }
        return Ok(ResolvedColumnRef {
            column: resolved.column,
            kind: resolved.kind,
        });
    }

    if model.def.get_relation(tail).is_some()
        && let Some(fk) = model.mapping.fk_column(tail)
    {
        return Ok(ResolvedColumnRef {
            column: fk.column.clone(),
            kind: fk.kind.clone(),
        });
    }

    Err(QuerySemanticError::UnknownAttribute {
        entity: model.def.name.clone(),
        path: tail.to_string(),
    })
}

/// Like [`resolve_expr_path`] but rejects relation paths; used for
/// update assignment targets.
fn resolve_attribute_only(
    model: &EntityModel,
    tail: &str,
) -> Result<ResolvedColumnRef, QuerySemanticError> {
    if model.def.get_relation(tail).is_some() {
        return Err(QuerySemanticError::AssignmentToAssociation {
            entity: model.def.name.clone(),
            path: tail.to_string(),
        });
    }

    resolve_expr_path(model, tail)
}

/// Walk a predicate, checking every path and literal against the
/// registry. Parameter values are checked at bind time.
fn check_predicate(
    schema: &Schema,
    predicate: &PredicateAst,
    aliases: &BTreeMap<String, String>,
) -> Result<(), QuerySemanticError> {
    match predicate {
        PredicateAst::Cmp { lhs, op: _, rhs } => {
            let lhs_col = check_expr(schema, lhs, aliases)?;
            let rhs_col = check_expr(schema, rhs, aliases)?;

            match (lhs_col, rhs_col) {
                (None, None) => Err(QuerySemanticError::UnsupportedComparison),
                (Some(column), None) => check_literal_against(lhs_path_label(lhs), rhs, &column),
                (None, Some(column)) => check_literal_against(lhs_path_label(rhs), lhs, &column),
                (Some(_), Some(_)) => Ok(()),
            }
        }
        PredicateAst::IsNull { path, .. } => {
            resolve_path_ref(schema, path, aliases).map(|_| ())
        }
        PredicateAst::And(a, b) | PredicateAst::Or(a, b) => {
            check_predicate(schema, a, aliases)?;
            check_predicate(schema, b, aliases)
        }
        PredicateAst::Not(inner) => check_predicate(schema, inner, aliases),
    }
}

fn lhs_path_label(expr: &ExprAst) -> String {
    match expr {
        ExprAst::Path(path) => path.tail().unwrap_or_else(|| path.root.clone()),
        _ => String::new(),
    }
}

fn check_literal_against(
    path: String,
    expr: &ExprAst,
    column: &ResolvedColumnRef,
) -> Result<(), QuerySemanticError> {
    if let ExprAst::Literal(literal) = expr
        && !literal.conforms_to(&column.kind)
    {
        return Err(QuerySemanticError::TypeMismatch { path });
    }

    Ok(())
}

/// Check one comparison operand. Returns the resolved column for paths,
/// `None` for literals and parameters.
fn check_expr(
    schema: &Schema,
    expr: &ExprAst,
    aliases: &BTreeMap<String, String>,
) -> Result<Option<ResolvedColumnRef>, QuerySemanticError> {
    match expr {
        ExprAst::Literal(_) | ExprAst::Param(_) => Ok(None),
        ExprAst::Path(path) => resolve_path_ref(schema, path, aliases).map(Some),
    }
}

pub(crate) fn resolve_path_ref(
    schema: &Schema,
    path: &PathExpr,
    aliases: &BTreeMap<String, String>,
) -> Result<ResolvedColumnRef, QuerySemanticError> {
    let entity = aliases
        .get(&path.root)
        .ok_or_else(|| QuerySemanticError::UnknownAlias {
            alias: path.root.clone(),
        })?;
    let model = lookup(schema, entity)?;
    let tail = path
        .tail()
        .ok_or_else(|| QuerySemanticError::UnknownAttribute {
            entity: entity.clone(),
            path: path.root.clone(),
        })?;

    resolve_expr_path(model, &tail)
}
