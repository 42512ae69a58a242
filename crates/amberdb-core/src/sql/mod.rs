//! Relational statement IR.
//!
//! Everything the session and query translator emit is one of these
//! statements. A store consumes the IR directly; the text renderer in
//! `render` exists for debug logging and diagnostics, not execution.

pub mod render;

#[cfg(test)]
mod tests;

use crate::value::Value;
use amberdb_schema::{build::Schema, physical::TableLayout, types::AttributeKind};
use serde::Serialize;

///
/// ColumnSpec
///
/// One column in a table definition.
///

#[derive(Clone, Debug, Serialize)]
pub struct ColumnSpec {
    pub column: String,
    pub kind: AttributeKind,
    pub nullable: bool,
}

///
/// KeyMode
///
/// How an insert obtains its key.
///

#[derive(Clone, Debug, Serialize)]
pub enum KeyMode {
    /// Caller supplies the key value.
    Provided(Value),

    /// The store allocates the next key and reports it in the outcome.
    Allocate,
}

///
/// Statement
///

#[derive(Clone, Debug, Serialize)]
pub enum Statement {
    CreateTable {
        table: String,
        key_column: String,
        key_kind: AttributeKind,
        columns: Vec<ColumnSpec>,
    },

    Insert {
        table: String,
        key: KeyMode,
        columns: Vec<(String, Value)>,
    },

    Update {
        table: String,
        assignments: Vec<(String, Value)>,
        filter: Filter,
    },

    Delete {
        table: String,
        filter: Filter,
    },

    Select(SelectStatement),
}

///
/// SelectStatement
///

#[derive(Clone, Debug, Serialize)]
pub struct SelectStatement {
    pub table: String,
    pub alias: String,
    pub joins: Vec<Join>,

    /// Projected columns with their output labels.
    pub columns: Vec<SelectColumn>,

    pub filter: Filter,
}

///
/// SelectColumn
///

#[derive(Clone, Debug, Serialize)]
pub struct SelectColumn {
    pub source: ColumnRef,

    /// Output label, unique within the statement.
    pub label: String,
}

///
/// Join
///
/// Inner join against another table under an alias.
///

#[derive(Clone, Debug, Serialize)]
pub struct Join {
    pub table: String,
    pub alias: String,
    pub on: Filter,
}

///
/// ColumnRef
///

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ColumnRef {
    pub alias: String,
    pub column: String,
}

impl ColumnRef {
    #[must_use]
    pub fn new(alias: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            column: column.into(),
        }
    }
}

///
/// Cmp
///

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum Cmp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Cmp {
    /// Mirror the operator for swapped operands: `a < b` ≡ `b > a`.
    #[must_use]
    pub const fn flipped(self) -> Self {
        match self {
            Self::Eq => Self::Eq,
            Self::Ne => Self::Ne,
            Self::Lt => Self::Gt,
            Self::Lte => Self::Gte,
            Self::Gt => Self::Lt,
            Self::Gte => Self::Lte,
        }
    }

    /// Evaluate the operator over a total-order comparison result.
    #[must_use]
    pub fn eval(self, ordering: std::cmp::Ordering) -> bool {
        match self {
            Self::Eq => ordering.is_eq(),
            Self::Ne => !ordering.is_eq(),
            Self::Lt => ordering.is_lt(),
            Self::Lte => ordering.is_le(),
            Self::Gt => ordering.is_gt(),
            Self::Gte => ordering.is_ge(),
        }
    }
}

///
/// Filter
///
/// Predicate tree over aliased columns.
///

#[derive(Clone, Debug, Serialize)]
pub enum Filter {
    True,

    Cmp {
        column: ColumnRef,
        op: Cmp,
        value: Value,
    },

    /// `left <op> right` across two columns (join conditions).
    ColumnCmp {
        left: ColumnRef,
        op: Cmp,
        right: ColumnRef,
    },

    IsNull {
        column: ColumnRef,
        negated: bool,
    },

    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    /// Conjoin two filters, flattening `True` away.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::True, f) | (f, Self::True) => f,
            (Self::And(mut list), f) => {
                list.push(f);
                Self::And(list)
            }
            (a, b) => Self::And(vec![a, b]),
        }
    }

    /// Equality against a single column.
    #[must_use]
    pub fn key_eq(alias: impl Into<String>, column: impl Into<String>, value: Value) -> Self {
        Self::Cmp {
            column: ColumnRef::new(alias, column),
            op: Cmp::Eq,
            value,
        }
    }
}

/// Table-definition statements for every table a schema maps.
///
/// Used to bootstrap a fresh store; ordering is deterministic
/// (registry iteration order, entity tables before collection tables).
#[must_use]
pub fn bootstrap_statements(schema: &Schema) -> Vec<Statement> {
    let mut statements = Vec::new();

    for (_, model) in schema.iter() {
        let mapping = &model.mapping;
        match &mapping.layout {
            TableLayout::Single {
                table,
                discriminator,
                variant_columns,
            } => {
                let mut columns: Vec<ColumnSpec> = mapping
                    .base_columns
                    .iter()
                    .map(|c| ColumnSpec {
                        column: c.column.clone(),
                        kind: c.kind.clone(),
                        nullable: c.nullable,
                    })
                    .collect();
                if let Some(discriminator) = discriminator {
                    columns.push(ColumnSpec {
                        column: discriminator.clone(),
                        kind: AttributeKind::Text,
                        nullable: false,
                    });
                }
                for (_, c) in variant_columns {
                    // shared variant columns appear once per physical column
                    if columns.iter().all(|existing| existing.column != c.column) {
                        columns.push(ColumnSpec {
                            column: c.column.clone(),
                            kind: c.kind.clone(),
                            nullable: true,
                        });
                    }
                }
                statements.push(Statement::CreateTable {
                    table: table.clone(),
                    key_column: mapping.key_column.clone(),
                    key_kind: mapping.key_kind.clone(),
                    columns,
                });
            }

            TableLayout::PerVariant(tables) => {
                for variant in tables {
                    let mut columns: Vec<ColumnSpec> = mapping
                        .base_columns
                        .iter()
                        .map(|c| ColumnSpec {
                            column: c.column.clone(),
                            kind: c.kind.clone(),
                            nullable: c.nullable,
                        })
                        .collect();
                    columns.extend(variant.extra_columns.iter().map(|c| ColumnSpec {
                        column: c.column.clone(),
                        kind: c.kind.clone(),
                        nullable: c.nullable,
                    }));
                    statements.push(Statement::CreateTable {
                        table: variant.table.clone(),
                        key_column: mapping.key_column.clone(),
                        key_kind: mapping.key_kind.clone(),
                        columns,
                    });
                }
            }
        }

        for collection in &mapping.collections {
            let mut columns = vec![ColumnSpec {
                column: collection.owner_column.clone(),
                kind: mapping.key_kind.clone(),
                nullable: false,
            }];
            columns.extend(collection.columns.iter().map(|(column, kind, _)| ColumnSpec {
                column: column.clone(),
                kind: kind.clone(),
                nullable: true,
            }));
            statements.push(Statement::CreateTable {
                table: collection.table.clone(),
                key_column: format!("{}_row", collection.table),
                key_kind: AttributeKind::Int,
                columns,
            });
        }
    }

    statements
}
