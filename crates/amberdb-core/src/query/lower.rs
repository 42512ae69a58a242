//! Lowering: resolved queries plus parameter bindings become statements.
//!
//! Select lowering also produces decode specs (how result labels map
//! back onto entity fields) and fetch edges (which joined aliases the
//! session materializes into association slots). Polymorphic roots over
//! per-variant tables lower to one select per variant; the session
//! concatenates the unit results.

use crate::{
    query::{
        ast::{ExprAst, ParamRef, PathExpr, PredicateAst},
        resolve::{
            JoinMechanics, QuerySemanticError, ResolvedDelete, ResolvedProjection, ResolvedQuery,
            ResolvedSelect, ResolvedUpdate, resolve_path_ref,
        },
    },
    sql::{ColumnRef, Filter, Join, SelectColumn, SelectStatement, Statement},
    value::Value,
};
use amberdb_schema::{
    build::{EntityModel, Schema},
    physical::{ColumnSource, TableLayout},
    types::{AttributeKind, RelationKind},
};
use std::collections::BTreeMap;

///
/// Bindings
///
/// Named and positional parameter values for one execution.
///

#[derive(Clone, Debug, Default)]
pub struct Bindings {
    named: BTreeMap<String, Value>,
    positional: BTreeMap<u32, Value>,
}

impl Bindings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn bind_positional(mut self, index: u32, value: impl Into<Value>) -> Self {
        self.positional.insert(index, value.into());
        self
    }

    pub(crate) fn get(&self, param: &ParamRef) -> Result<&Value, QuerySemanticError> {
        let value = match param {
            ParamRef::Named(name) => self.named.get(name),
            ParamRef::Positional(index) => self.positional.get(index),
        };

        value.ok_or_else(|| QuerySemanticError::UnboundParameter {
            param: param.to_string(),
        })
    }
}

///
/// AttrDecode
///

#[derive(Clone, Debug)]
pub struct AttrDecode {
    pub path: String,
    pub label: String,

    /// Set when the attribute belongs to one variant only; decode skips
    /// it for rows of other variants.
    pub variant: Option<String>,
}

///
/// DecodeSpec
///
/// How one alias's labels in a result row map back onto entity fields.
///

#[derive(Clone, Debug)]
pub struct DecodeSpec {
    pub entity: String,

    /// Fixed variant context (per-variant select units).
    pub variant: Option<String>,

    pub key_label: String,
    pub discriminator_label: Option<String>,
    pub attrs: Vec<AttrDecode>,

    /// `(relation, label)` for owning foreign keys.
    pub fks: Vec<(String, String)>,
}

///
/// FetchEdge
///
/// One `join fetch` to materialize: rows for `target_alias` populate the
/// named relation slot on instances of `owner_alias`.
///

#[derive(Clone, Debug)]
pub struct FetchEdge {
    pub owner_alias: String,
    pub relation: String,
    pub kind: RelationKind,
    pub target_alias: String,
}

///
/// SelectUnit
///

#[derive(Clone, Debug)]
pub struct SelectUnit {
    pub statement: SelectStatement,
    pub decode: BTreeMap<String, DecodeSpec>,
}

///
/// LoweredSelect
///

#[derive(Clone, Debug)]
pub struct LoweredSelect {
    pub units: Vec<SelectUnit>,
    pub projection: ResolvedProjection,
    pub fetch: Vec<FetchEdge>,
    pub root_alias: String,
}

///
/// LoweredBulk
///

#[derive(Clone, Debug)]
pub struct LoweredBulk {
    pub statements: Vec<Statement>,

    /// Entity whose cached instances the session detaches after
    /// executing the bulk statement.
    pub entity: String,
}

///
/// Lowered
///

#[derive(Clone, Debug)]
pub enum Lowered {
    Select(LoweredSelect),
    Bulk(LoweredBulk),
}

/// Lower a resolved query with concrete parameter bindings.
pub fn lower(
    schema: &Schema,
    resolved: &ResolvedQuery,
    bindings: &Bindings,
) -> Result<Lowered, QuerySemanticError> {
    match resolved {
        ResolvedQuery::Select(select) => lower_select(schema, select, bindings).map(Lowered::Select),
        ResolvedQuery::Update(update) => lower_update(schema, update, bindings).map(Lowered::Bulk),
        ResolvedQuery::Delete(delete) => lower_delete(schema, delete, bindings).map(Lowered::Bulk),
    }
}

fn lower_select(
    schema: &Schema,
    select: &ResolvedSelect,
    bindings: &Bindings,
) -> Result<LoweredSelect, QuerySemanticError> {
    let root = expect_model(schema, &select.root_entity)?;

    // (variant, table) pairs the root select spans
    let root_tables: Vec<(Option<String>, String)> = match &root.mapping.layout {
        TableLayout::Single { table, .. } => vec![(None, table.clone())],
        TableLayout::PerVariant(tables) => tables
            .iter()
            .map(|t| (Some(t.variant.clone()), t.table.clone()))
            .collect(),
    };

    let filter = match &select.predicate {
        Some(predicate) => lower_predicate(schema, predicate, &select.aliases, bindings)?,
        None => Filter::True,
    };

    let fetch: Vec<FetchEdge> = select
        .joins
        .iter()
        .filter(|join| join.fetch)
        .map(|join| FetchEdge {
            owner_alias: join.source_alias.clone(),
            relation: join.relation.clone(),
            kind: join.kind,
            target_alias: join.alias.clone(),
        })
        .collect();

    let wants_entities = matches!(select.projection, ResolvedProjection::Entity { .. });

    let mut units = Vec::with_capacity(root_tables.len());
    for (variant, table) in root_tables {
        let mut decode = BTreeMap::new();
        let mut columns: Vec<SelectColumn> = Vec::new();

        if wants_entities {
            let spec = decode_spec(&select.root_alias, root, variant.as_deref());
            push_spec_columns(&mut columns, &select.root_alias, &spec);
            decode.insert(select.root_alias.clone(), spec);
        }

        let mut joins = Vec::with_capacity(select.joins.len());
        for join in &select.joins {
            let target = expect_model(schema, &join.target_entity)?;
            let target_table =
                target
                    .mapping
                    .single_table()
                    .ok_or_else(|| QuerySemanticError::PolymorphicJoin {
                        entity: join.target_entity.clone(),
                    })?;

            let source_entity = select.aliases.get(&join.source_alias).ok_or_else(|| {
                QuerySemanticError::UnknownAlias {
                    alias: join.source_alias.clone(),
                }
            })?;
            let source = expect_model(schema, source_entity)?;

            let mut on = match &join.mechanics {
                JoinMechanics::SourceFk { fk_column } => Filter::ColumnCmp {
                    left: ColumnRef::new(join.source_alias.clone(), fk_column.clone()),
                    op: crate::sql::Cmp::Eq,
                    right: ColumnRef::new(join.alias.clone(), target.mapping.key_column.clone()),
                },
                JoinMechanics::TargetFk { fk_column } => Filter::ColumnCmp {
                    left: ColumnRef::new(join.alias.clone(), fk_column.clone()),
                    op: crate::sql::Cmp::Eq,
                    right: ColumnRef::new(
                        join.source_alias.clone(),
                        source.mapping.key_column.clone(),
                    ),
                },
            };
            if let Some(extra) = &join.on {
                on = on.and(lower_predicate(schema, extra, &select.aliases, bindings)?);
            }

            joins.push(Join {
                table: target_table.to_string(),
                alias: join.alias.clone(),
                on,
            });

            if join.fetch {
                let spec = decode_spec(&join.alias, target, None);
                push_spec_columns(&mut columns, &join.alias, &spec);
                decode.insert(join.alias.clone(), spec);
            }
        }

        if let ResolvedProjection::Scalars(items) = &select.projection {
            for item in items {
                if columns.iter().all(|c| c.label != item.label) {
                    columns.push(SelectColumn {
                        source: ColumnRef::new(item.alias.clone(), item.column.clone()),
                        label: item.label.clone(),
                    });
                }
            }
        }

        units.push(SelectUnit {
            statement: SelectStatement {
                table,
                alias: select.root_alias.clone(),
                joins,
                columns,
                filter: filter.clone(),
            },
            decode,
        });
    }

    Ok(LoweredSelect {
        units,
        projection: select.projection.clone(),
        fetch,
        root_alias: select.root_alias.clone(),
    })
}

fn lower_update(
    schema: &Schema,
    update: &ResolvedUpdate,
    bindings: &Bindings,
) -> Result<LoweredBulk, QuerySemanticError> {
    let model = expect_model(schema, &update.entity)?;
    let mut aliases = BTreeMap::new();
    aliases.insert(update.alias.clone(), update.entity.clone());

    let mut assignments = Vec::with_capacity(update.assignments.len());
    for assignment in &update.assignments {
        let value = match &assignment.value {
            ExprAst::Literal(value) => value.clone(),
            ExprAst::Param(param) => {
                let value = bindings.get(param)?.clone();
                if !value.conforms_to(&assignment.kind) {
                    return Err(QuerySemanticError::TypeMismatch {
                        path: assignment.path.clone(),
                    });
                }
                value
            }
            ExprAst::Path(_) => return Err(QuerySemanticError::UnsupportedComparison),
        };
        assignments.push((assignment.column.clone(), value));
    }

    let filter = match &update.predicate {
        Some(predicate) => lower_predicate(schema, predicate, &aliases, bindings)?,
        None => Filter::True,
    };

    let statements = target_tables(model)
        .into_iter()
        .map(|table| Statement::Update {
            table,
            assignments: assignments.clone(),
            filter: filter.clone(),
        })
        .collect();

    Ok(LoweredBulk {
        statements,
        entity: update.entity.clone(),
    })
}

fn lower_delete(
    schema: &Schema,
    delete: &ResolvedDelete,
    bindings: &Bindings,
) -> Result<LoweredBulk, QuerySemanticError> {
    let model = expect_model(schema, &delete.entity)?;
    let mut aliases = BTreeMap::new();
    aliases.insert(delete.alias.clone(), delete.entity.clone());

    let filter = match &delete.predicate {
        Some(predicate) => lower_predicate(schema, predicate, &aliases, bindings)?,
        None => Filter::True,
    };

    let statements = target_tables(model)
        .into_iter()
        .map(|table| Statement::Delete {
            table,
            filter: filter.clone(),
        })
        .collect();

    Ok(LoweredBulk {
        statements,
        entity: delete.entity.clone(),
    })
}

/// Every entity table a bulk statement spans.
fn target_tables(model: &EntityModel) -> Vec<String> {
    match &model.mapping.layout {
        TableLayout::Single { table, .. } => vec![table.clone()],
        TableLayout::PerVariant(tables) => tables.iter().map(|t| t.table.clone()).collect(),
    }
}

fn expect_model<'a>(schema: &'a Schema, entity: &str) -> Result<&'a EntityModel, QuerySemanticError> {
    schema.get(entity).ok_or_else(|| QuerySemanticError::UnknownEntity {
        entity: entity.to_string(),
    })
}

/// Full decode spec for one alias in one unit context.
pub(crate) fn decode_spec(alias: &str, model: &EntityModel, unit_variant: Option<&str>) -> DecodeSpec {
    let mapping = &model.mapping;
    let mut attrs = Vec::new();
    let mut fks = Vec::new();

    for column in &mapping.base_columns {
        let label = format!("{alias}.{}", column.column);
        match &column.source {
            ColumnSource::Attribute { path } => attrs.push(AttrDecode {
                path: path.clone(),
                label,
                variant: None,
            }),
            ColumnSource::ForeignKey { relation } => fks.push((relation.clone(), label)),
        }
    }

    let mut discriminator_label = None;
    match &mapping.layout {
        TableLayout::Single {
            discriminator,
            variant_columns,
            ..
        } => {
            if let Some(discriminator) = discriminator {
                discriminator_label = Some(format!("{alias}.{discriminator}"));
            }
            for (variant, column) in variant_columns {
                if let ColumnSource::Attribute { path } = &column.source {
                    attrs.push(AttrDecode {
                        path: path.clone(),
                        label: format!("{alias}.{}", column.column),
                        variant: Some(variant.clone()),
                    });
                }
            }
        }
        TableLayout::PerVariant(tables) => {
            if let Some(unit_variant) = unit_variant
                && let Some(table) = tables.iter().find(|t| t.variant == unit_variant)
            {
                for column in &table.extra_columns {
                    if let ColumnSource::Attribute { path } = &column.source {
                        attrs.push(AttrDecode {
                            path: path.clone(),
                            label: format!("{alias}.{}", column.column),
                            variant: Some(table.variant.clone()),
                        });
                    }
                }
            }
        }
    }

    DecodeSpec {
        entity: model.def.name.clone(),
        variant: unit_variant.map(ToString::to_string),
        key_label: format!("{alias}.{}", mapping.key_column),
        discriminator_label,
        attrs,
        fks,
    }
}

/// Project every label a decode spec reads.
pub(crate) fn push_spec_columns(columns: &mut Vec<SelectColumn>, alias: &str, spec: &DecodeSpec) {
    let mut push = |label: &str| {
        let column = label
            .strip_prefix(&format!("{alias}."))
            .unwrap_or(label)
            .to_string();
        if columns.iter().all(|c| c.label != label) {
            columns.push(SelectColumn {
                source: ColumnRef::new(alias.to_string(), column),
                label: label.to_string(),
            });
        }
    };

    push(&spec.key_label);
    if let Some(label) = &spec.discriminator_label {
        push(label);
    }
    for attr in &spec.attrs {
        push(&attr.label);
    }
    for (_, label) in &spec.fks {
        push(label);
    }
}

/// Lower a predicate AST to a filter, resolving paths through the alias
/// map and parameters through the bindings.
pub(crate) fn lower_predicate(
    schema: &Schema,
    predicate: &PredicateAst,
    aliases: &BTreeMap<String, String>,
    bindings: &Bindings,
) -> Result<Filter, QuerySemanticError> {
    match predicate {
        PredicateAst::Cmp { lhs, op, rhs } => {
            let lhs_operand = lower_operand(schema, lhs, aliases, bindings)?;
            let rhs_operand = lower_operand(schema, rhs, aliases, bindings)?;

            match (lhs_operand, rhs_operand) {
                (Operand::Column(column, kind), Operand::Value(value)) => {
                    check_conforms(&value, &kind, lhs)?;
                    Ok(Filter::Cmp {
                        column,
                        op: *op,
                        value,
                    })
                }
                (Operand::Value(value), Operand::Column(column, kind)) => {
                    check_conforms(&value, &kind, rhs)?;
                    Ok(Filter::Cmp {
                        column,
                        op: op.flipped(),
                        value,
                    })
                }
                (Operand::Column(left, _), Operand::Column(right, _)) => Ok(Filter::ColumnCmp {
                    left,
                    op: *op,
                    right,
                }),
                (Operand::Value(_), Operand::Value(_)) => {
                    Err(QuerySemanticError::UnsupportedComparison)
                }
            }
        }

        PredicateAst::IsNull { path, negated } => {
            let resolved = resolve_path_ref(schema, path, aliases)?;
            Ok(Filter::IsNull {
                column: ColumnRef::new(path.root.clone(), resolved.column),
                negated: *negated,
            })
        }

        PredicateAst::And(a, b) => Ok(Filter::And(vec![
            lower_predicate(schema, a, aliases, bindings)?,
            lower_predicate(schema, b, aliases, bindings)?,
        ])),
        PredicateAst::Or(a, b) => Ok(Filter::Or(vec![
            lower_predicate(schema, a, aliases, bindings)?,
            lower_predicate(schema, b, aliases, bindings)?,
        ])),
        PredicateAst::Not(inner) => Ok(Filter::Not(Box::new(lower_predicate(
            schema, inner, aliases, bindings,
        )?))),
    }
}

enum Operand {
    Column(ColumnRef, AttributeKind),
    Value(Value),
}

fn lower_operand(
    schema: &Schema,
    expr: &ExprAst,
    aliases: &BTreeMap<String, String>,
    bindings: &Bindings,
) -> Result<Operand, QuerySemanticError> {
    match expr {
        ExprAst::Literal(value) => Ok(Operand::Value(value.clone())),
        ExprAst::Param(param) => Ok(Operand::Value(bindings.get(param)?.clone())),
        ExprAst::Path(path) => {
            let resolved = resolve_path_ref(schema, path, aliases)?;
            Ok(Operand::Column(
                ColumnRef::new(path.root.clone(), resolved.column),
                resolved.kind,
            ))
        }
    }
}

fn check_conforms(
    value: &Value,
    kind: &AttributeKind,
    path_expr: &ExprAst,
) -> Result<(), QuerySemanticError> {
    if value.conforms_to(kind) {
        return Ok(());
    }

    let path = match path_expr {
        ExprAst::Path(PathExpr { root, segments, .. }) => {
            let mut label = root.clone();
            for segment in segments {
                label.push('.');
                label.push_str(segment);
            }
            label
        }
        _ => String::new(),
    };

    Err(QuerySemanticError::TypeMismatch { path })
}
