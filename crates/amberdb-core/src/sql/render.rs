//! Deterministic SQL text for statements.
//!
//! Rendered text feeds debug logging and diagnostics only; stores
//! execute the IR, never this text.

use crate::{
    sql::{Cmp, ColumnRef, Filter, KeyMode, SelectStatement, Statement},
    value::Value,
};
use std::fmt::Write;

/// Render one statement as a single-line SQL string.
#[must_use]
pub fn render(statement: &Statement) -> String {
    match statement {
        Statement::CreateTable {
            table,
            key_column,
            columns,
            ..
        } => {
            let mut out = format!("create table {table} ({key_column} primary key");
            for spec in columns {
                let _ = write!(out, ", {}", spec.column);
                if !spec.nullable {
                    out.push_str(" not null");
                }
            }
            out.push(')');
            out
        }

        Statement::Insert {
            table,
            key,
            columns,
        } => {
            let names: Vec<&str> = columns.iter().map(|(c, _)| c.as_str()).collect();
            let values: Vec<String> = columns.iter().map(|(_, v)| literal(v)).collect();
            let key_note = match key {
                KeyMode::Provided(value) => format!(" /* key = {} */", literal(value)),
                KeyMode::Allocate => " /* key allocated */".to_string(),
            };
            format!(
                "insert into {table} ({}) values ({}){key_note}",
                names.join(", "),
                values.join(", ")
            )
        }

        Statement::Update {
            table,
            assignments,
            filter,
        } => {
            let sets: Vec<String> = assignments
                .iter()
                .map(|(column, value)| format!("{column} = {}", literal(value)))
                .collect();
            format!(
                "update {table} set {}{}",
                sets.join(", "),
                where_clause(filter)
            )
        }

        Statement::Delete { table, filter } => {
            format!("delete from {table}{}", where_clause(filter))
        }

        Statement::Select(select) => render_select(select),
    }
}

fn render_select(select: &SelectStatement) -> String {
    let columns: Vec<String> = select
        .columns
        .iter()
        .map(|c| format!("{} as \"{}\"", column_ref(&c.source), c.label))
        .collect();

    let mut out = format!(
        "select {} from {} {}",
        columns.join(", "),
        select.table,
        select.alias
    );
    for join in &select.joins {
        let _ = write!(
            out,
            " join {} {} on {}",
            join.table,
            join.alias,
            predicate(&join.on)
        );
    }
    out.push_str(&where_clause(&select.filter));
    out
}

fn where_clause(filter: &Filter) -> String {
    match filter {
        Filter::True => String::new(),
        other => format!(" where {}", predicate(other)),
    }
}

fn predicate(filter: &Filter) -> String {
    match filter {
        Filter::True => "true".to_string(),
        Filter::Cmp { column, op, value } => {
            format!("{} {} {}", column_ref(column), cmp(*op), literal(value))
        }
        Filter::ColumnCmp { left, op, right } => {
            format!("{} {} {}", column_ref(left), cmp(*op), column_ref(right))
        }
        Filter::IsNull { column, negated } => {
            let tail = if *negated { "is not null" } else { "is null" };
            format!("{} {tail}", column_ref(column))
        }
        Filter::And(list) => group(list, " and "),
        Filter::Or(list) => group(list, " or "),
        Filter::Not(inner) => format!("not ({})", predicate(inner)),
    }
}

fn group(list: &[Filter], sep: &str) -> String {
    let parts: Vec<String> = list.iter().map(predicate).collect();
    format!("({})", parts.join(sep))
}

fn column_ref(column: &ColumnRef) -> String {
    format!("{}.{}", column.alias, column.column)
}

const fn cmp(op: Cmp) -> &'static str {
    match op {
        Cmp::Eq => "=",
        Cmp::Ne => "<>",
        Cmp::Lt => "<",
        Cmp::Lte => "<=",
        Cmp::Gt => ">",
        Cmp::Gte => ">=",
    }
}

/// Render a value as a SQL literal. Text quotes double up embedded
/// quotes so the output stays unambiguous in logs.
#[must_use]
pub fn literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(x) => x.to_string(),
        Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Timestamp(ts) => format!("'{}'", ts.to_rfc3339()),
        Value::Ulid(u) => format!("'{u}'"),
    }
}
