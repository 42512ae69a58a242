//! In-memory reference store.
//!
//! Tables are ordered maps keyed by the row key; joins are nested loops;
//! transactions snapshot the whole table set and restore it on rollback.
//! Exists to exercise the full stack in tests and small tools, not to
//! compete with a real backend.

use crate::{
    sql::{ColumnRef, ColumnSpec, Filter, KeyMode, SelectStatement, Statement},
    store::{Outcome, RelationalStore, Row, StoreError},
    value::Value,
};
use amberdb_schema::types::AttributeKind;
use derive_more::{Deref, DerefMut};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

///
/// Table
///

#[derive(Clone, Debug)]
struct Table {
    key_column: String,
    key_kind: AttributeKind,
    columns: Vec<ColumnSpec>,
    next_key: i64,

    /// Key value to full row (key column included).
    rows: BTreeMap<Value, BTreeMap<String, Value>>,
}

impl Table {
    fn column(&self, column: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|spec| spec.column == column)
    }
}

///
/// MemoryStore
///

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    tables: BTreeMap<String, Table>,
    snapshot: Option<BTreeMap<String, Table>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Row count of one table; `None` when the table does not exist.
    #[must_use]
    pub fn row_count(&self, table: &str) -> Option<usize> {
        self.tables.get(table).map(|t| t.rows.len())
    }

    fn table(&self, name: &str) -> Result<&Table, StoreError> {
        self.tables.get(name).ok_or_else(|| StoreError::UnknownTable {
            table: name.to_string(),
        })
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table, StoreError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownTable {
                table: name.to_string(),
            })
    }

    fn create_table(
        &mut self,
        table: &str,
        key_column: &str,
        key_kind: &AttributeKind,
        columns: &[ColumnSpec],
    ) -> Result<Outcome, StoreError> {
        if self.tables.contains_key(table) {
            return Err(StoreError::Backend(format!(
                "table '{table}' already exists"
            )));
        }

        self.tables.insert(
            table.to_string(),
            Table {
                key_column: key_column.to_string(),
                key_kind: key_kind.clone(),
                columns: columns.to_vec(),
                next_key: 1,
                rows: BTreeMap::new(),
            },
        );

        Ok(Outcome::Unit)
    }

    fn insert(
        &mut self,
        table_name: &str,
        key: &KeyMode,
        columns: &[(String, Value)],
    ) -> Result<Outcome, StoreError> {
        let table = self.table_mut(table_name)?;

        // validate provided columns against the definition
        for (column, value) in columns {
            let Some(spec) = table.column(column) else {
                return Err(StoreError::UnknownColumn {
                    table: table_name.to_string(),
                    column: column.clone(),
                });
            };
            if value.is_null() {
                if !spec.nullable {
                    return Err(StoreError::NullViolation {
                        table: table_name.to_string(),
                        column: column.clone(),
                    });
                }
            } else if !value.conforms_to(&spec.kind) {
                return Err(StoreError::TypeViolation {
                    table: table_name.to_string(),
                    column: column.clone(),
                });
            }
        }

        let (key_value, allocated) = match key {
            KeyMode::Provided(value) => {
                if !value.conforms_to(&table.key_kind) {
                    return Err(StoreError::TypeViolation {
                        table: table_name.to_string(),
                        column: table.key_column.clone(),
                    });
                }
                (value.clone(), false)
            }
            KeyMode::Allocate => {
                if table.key_kind != AttributeKind::Int {
                    return Err(StoreError::CannotAllocateKey {
                        table: table_name.to_string(),
                    });
                }
                let value = Value::Int(table.next_key);
                table.next_key += 1;
                (value, true)
            }
        };

        if table.rows.contains_key(&key_value) {
            return Err(StoreError::DuplicateKey {
                table: table_name.to_string(),
                key: key_value.to_string(),
            });
        }

        // absent nullable columns store as explicit nulls so every row
        // carries the full column set
        let mut row = BTreeMap::new();
        row.insert(table.key_column.clone(), key_value.clone());
        for spec in &table.columns {
            let value = columns
                .iter()
                .find_map(|(c, v)| (c == &spec.column).then(|| v.clone()))
                .unwrap_or(Value::Null);
            if value.is_null() && !spec.nullable {
                return Err(StoreError::NullViolation {
                    table: table_name.to_string(),
                    column: spec.column.clone(),
                });
            }
            row.insert(spec.column.clone(), value);
        }
        table.rows.insert(key_value.clone(), row);

        if allocated {
            Ok(Outcome::AllocatedKey(key_value))
        } else {
            Ok(Outcome::Affected(1))
        }
    }

    fn update(
        &mut self,
        table_name: &str,
        assignments: &[(String, Value)],
        filter: &Filter,
    ) -> Result<Outcome, StoreError> {
        let table = self.table(table_name)?;
        for (column, _) in assignments {
            if table.column(column).is_none() && *column != table.key_column {
                return Err(StoreError::UnknownColumn {
                    table: table_name.to_string(),
                    column: column.clone(),
                });
            }
        }

        let matching: Vec<Value> = table
            .rows
            .iter()
            .filter(|(_, row)| eval_row(filter, row))
            .map(|(key, _)| key.clone())
            .collect();

        let table = self.table_mut(table_name)?;
        for key in &matching {
            if let Some(row) = table.rows.get_mut(key) {
                for (column, value) in assignments {
                    row.insert(column.clone(), value.clone());
                }
            }
        }

        Ok(Outcome::Affected(matching.len() as u64))
    }

    fn delete(&mut self, table_name: &str, filter: &Filter) -> Result<Outcome, StoreError> {
        let table = self.table_mut(table_name)?;
        let matching: Vec<Value> = table
            .rows
            .iter()
            .filter(|(_, row)| eval_row(filter, row))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &matching {
            table.rows.remove(key);
        }

        Ok(Outcome::Affected(matching.len() as u64))
    }

    fn select(&self, select: &SelectStatement) -> Result<Outcome, StoreError> {
        let base = self.table(&select.table)?;

        // seed tuples with the base alias, then expand joins nested-loop
        let mut tuples: Vec<BTreeMap<&str, &BTreeMap<String, Value>>> = base
            .rows
            .values()
            .map(|row| {
                let mut env = BTreeMap::new();
                env.insert(select.alias.as_str(), row);
                env
            })
            .collect();

        for join in &select.joins {
            let joined = self.table(&join.table)?;
            let mut expanded = Vec::new();
            for env in &tuples {
                for row in joined.rows.values() {
                    let mut candidate = env.clone();
                    candidate.insert(join.alias.as_str(), row);
                    if eval_env(&join.on, &candidate)? {
                        expanded.push(candidate);
                    }
                }
            }
            tuples = expanded;
        }

        let mut rows = Vec::new();
        for env in &tuples {
            if !eval_env(&select.filter, env)? {
                continue;
            }
            let mut columns = Vec::with_capacity(select.columns.len());
            for projected in &select.columns {
                let value = resolve(env, &projected.source)?;
                columns.push((projected.label.clone(), value.clone()));
            }
            rows.push(Row::new(columns));
        }

        Ok(Outcome::Rows(rows))
    }
}

impl RelationalStore for MemoryStore {
    fn begin(&mut self) -> Result<(), StoreError> {
        if self.snapshot.is_some() {
            return Err(StoreError::NestedTransaction);
        }
        self.snapshot = Some(self.tables.clone());

        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if self.snapshot.take().is_none() {
            return Err(StoreError::NoActiveTransaction);
        }

        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        match self.snapshot.take() {
            Some(snapshot) => {
                self.tables = snapshot;
                Ok(())
            }
            None => Err(StoreError::NoActiveTransaction),
        }
    }

    fn execute(&mut self, statement: &Statement) -> Result<Outcome, StoreError> {
        match statement {
            Statement::CreateTable {
                table,
                key_column,
                key_kind,
                columns,
            } => self.create_table(table, key_column, key_kind, columns),
            Statement::Insert {
                table,
                key,
                columns,
            } => self.insert(table, key, columns),
            Statement::Update {
                table,
                assignments,
                filter,
            } => self.update(table, assignments, filter),
            Statement::Delete { table, filter } => self.delete(table, filter),
            Statement::Select(select) => self.select(select),
        }
    }
}

///
/// SharedMemoryStore
///
/// Cloneable handle over one memory store, so several sequential
/// sessions in one process observe the same data. Connections from a
/// session factory are clones of one of these.
///

#[derive(Clone, Debug, Default, Deref, DerefMut)]
pub struct SharedMemoryStore(Rc<RefCell<MemoryStore>>);

impl SharedMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn row_count(&self, table: &str) -> Option<usize> {
        self.0.borrow().row_count(table)
    }
}

impl RelationalStore for SharedMemoryStore {
    fn begin(&mut self) -> Result<(), StoreError> {
        self.0.borrow_mut().begin()
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.0.borrow_mut().commit()
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.0.borrow_mut().rollback()
    }

    fn execute(&mut self, statement: &Statement) -> Result<Outcome, StoreError> {
        self.0.borrow_mut().execute(statement)
    }
}

/// Evaluate a filter against a single-table row, ignoring aliases.
fn eval_row(filter: &Filter, row: &BTreeMap<String, Value>) -> bool {
    match filter {
        Filter::True => true,
        Filter::Cmp { column, op, value } => row
            .get(&column.column)
            .is_some_and(|stored| op.eval(stored.total_cmp(value))),
        Filter::ColumnCmp { left, op, right } => match (row.get(&left.column), row.get(&right.column)) {
            (Some(a), Some(b)) => op.eval(a.total_cmp(b)),
            _ => false,
        },
        Filter::IsNull { column, negated } => {
            let is_null = row.get(&column.column).is_none_or(Value::is_null);
            is_null != *negated
        }
        Filter::And(list) => list.iter().all(|f| eval_row(f, row)),
        Filter::Or(list) => list.iter().any(|f| eval_row(f, row)),
        Filter::Not(inner) => !eval_row(inner, row),
    }
}

/// Evaluate a filter against an aliased tuple environment.
fn eval_env(
    filter: &Filter,
    env: &BTreeMap<&str, &BTreeMap<String, Value>>,
) -> Result<bool, StoreError> {
    match filter {
        Filter::True => Ok(true),
        Filter::Cmp { column, op, value } => {
            let stored = resolve(env, column)?;
            Ok(op.eval(stored.total_cmp(value)))
        }
        Filter::ColumnCmp { left, op, right } => {
            let a = resolve(env, left)?;
            let b = resolve(env, right)?;
            Ok(op.eval(a.total_cmp(b)))
        }
        Filter::IsNull { column, negated } => {
            let is_null = resolve(env, column)?.is_null();
            Ok(is_null != *negated)
        }
        Filter::And(list) => {
            for f in list {
                if !eval_env(f, env)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Filter::Or(list) => {
            for f in list {
                if eval_env(f, env)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Filter::Not(inner) => Ok(!eval_env(inner, env)?),
    }
}

fn resolve<'env>(
    env: &'env BTreeMap<&str, &BTreeMap<String, Value>>,
    column: &ColumnRef,
) -> Result<&'env Value, StoreError> {
    let row = env
        .get(column.alias.as_str())
        .ok_or_else(|| StoreError::Backend(format!("unbound alias '{}'", column.alias)))?;

    row.get(&column.column).ok_or_else(|| StoreError::UnknownColumn {
        table: column.alias.clone(),
        column: column.column.clone(),
    })
}
