//! Store boundary.
//!
//! The core translates entity operations into statements and hands them
//! to a [`RelationalStore`]; it never implements storage itself. The
//! one backend shipped here, [`memory::MemoryStore`], exists so the
//! stack can be exercised end to end without an external database.

pub mod memory;

#[cfg(test)]
mod tests;

use crate::{sql::Statement, value::Value};
use thiserror::Error as ThisError;

///
/// StoreError
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum StoreError {
    #[error("unknown table '{table}'")]
    UnknownTable { table: String },

    #[error("unknown column '{column}' on table '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("duplicate key {key} on table '{table}'")]
    DuplicateKey { table: String, key: String },

    #[error("null in non-nullable column '{column}' on table '{table}'")]
    NullViolation { table: String, column: String },

    #[error("value does not fit column '{column}' on table '{table}'")]
    TypeViolation { table: String, column: String },

    #[error("transaction already active")]
    NestedTransaction,

    #[error("no active transaction")]
    NoActiveTransaction,

    #[error("key allocation requested on table '{table}' with a non-integer key")]
    CannotAllocateKey { table: String },

    #[error("store backend failure: {0}")]
    Backend(String),
}

///
/// Row
///
/// One result row: labeled values in projection order.
///

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    #[must_use]
    pub fn new(columns: Vec<(String, Value)>) -> Self {
        Self { columns }
    }

    #[must_use]
    pub fn get(&self, label: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find_map(|(l, v)| (l == label).then_some(v))
    }

    #[must_use]
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.columns.iter().map(|(_, v)| v)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

///
/// Outcome
///
/// What one executed statement produced.
///

#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// Definition statements.
    Unit,

    /// Select results.
    Rows(Vec<Row>),

    /// Update/delete row count.
    Affected(u64),

    /// Insert with an allocated key.
    AllocatedKey(Value),
}

impl Outcome {
    /// Rows, or an error description for mismatched outcomes.
    pub fn into_rows(self) -> Result<Vec<Row>, StoreError> {
        match self {
            Self::Rows(rows) => Ok(rows),
            other => Err(StoreError::Backend(format!(
                "expected rows, store returned {other:?}"
            ))),
        }
    }

    /// Affected count, or an error description for mismatched outcomes.
    pub fn into_affected(self) -> Result<u64, StoreError> {
        match self {
            Self::Affected(count) => Ok(count),
            other => Err(StoreError::Backend(format!(
                "expected affected count, store returned {other:?}"
            ))),
        }
    }
}

///
/// RelationalStore
///
/// One connection to a relational store. A session owns exactly one for
/// its whole lifetime; transactions bracket statement batches.
///

pub trait RelationalStore {
    /// Begin a transaction. Statements executed outside one apply
    /// immediately.
    fn begin(&mut self) -> Result<(), StoreError>;

    /// Commit the active transaction.
    fn commit(&mut self) -> Result<(), StoreError>;

    /// Roll back the active transaction, discarding its writes.
    fn rollback(&mut self) -> Result<(), StoreError>;

    /// Execute one statement.
    fn execute(&mut self, statement: &Statement) -> Result<Outcome, StoreError>;
}
