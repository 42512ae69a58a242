//! Query translation.
//!
//! Pipeline: tokenize → parse (`QuerySyntaxError`) → resolve against the
//! registry (`QuerySemanticError`) → lower to statements with concrete
//! parameter bindings. The first three stages run once per query text;
//! lowering runs per execution.

pub mod ast;
pub mod lower;
pub mod parse;
pub mod resolve;
pub mod token;

#[cfg(test)]
mod tests;

use amberdb_schema::build::Schema;
use std::collections::BTreeMap;
use thiserror::Error as ThisError;

// re-exports
pub use lower::{Bindings, Lowered, LoweredSelect, SelectUnit};
pub use resolve::{QuerySemanticError, ResolvedProjection, ResolvedQuery};
pub use token::QuerySyntaxError;

///
/// QueryError
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum QueryError {
    #[error(transparent)]
    Syntax(#[from] QuerySyntaxError),

    #[error(transparent)]
    Semantic(#[from] QuerySemanticError),
}

///
/// Query
///
/// A parsed and resolved query, reusable across executions with fresh
/// bindings.
///

#[derive(Clone, Debug)]
pub struct Query {
    text: String,
    resolved: ResolvedQuery,
}

impl Query {
    /// Parse and resolve query text against a schema.
    pub fn parse(schema: &Schema, text: &str) -> Result<Self, QueryError> {
        let ast = parse::parse(text)?;
        let resolved = resolve::resolve(schema, &ast)?;

        Ok(Self {
            text: text.to_string(),
            resolved,
        })
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub const fn resolved(&self) -> &ResolvedQuery {
        &self.resolved
    }

    /// True for bulk update/delete statements.
    #[must_use]
    pub const fn is_bulk(&self) -> bool {
        matches!(
            self.resolved,
            ResolvedQuery::Update(_) | ResolvedQuery::Delete(_)
        )
    }
}

///
/// NamedQueries
///
/// Queries registered once at startup and invoked by name with fresh
/// bindings. Registration validates eagerly; execution cannot hit a
/// name or shape error.
///

#[derive(Clone, Debug, Default)]
pub struct NamedQueries {
    queries: BTreeMap<String, Query>,
}

impl NamedQueries {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse, resolve, and store a query under a name. Re-registering a
    /// name replaces the previous query.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        schema: &Schema,
        text: &str,
    ) -> Result<(), QueryError> {
        let query = Query::parse(schema, text)?;
        self.queries.insert(name.into(), query);

        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Query> {
        self.queries.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}
