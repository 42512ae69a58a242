//! Session factory.
//!
//! A [`Db`] is constructed explicitly from a validated schema, a config,
//! and a store provider, and disposed by dropping it — there is no
//! process-wide registry. Named queries register here, once, and are
//! validated eagerly.

pub mod session;

#[cfg(test)]
mod tests;

use crate::error::Error;
use amberdb_config::{Config, DataSource};
use amberdb_core::{
    context::DbContext,
    query::NamedQueries,
    session::{Session, SessionOptions},
    sql::bootstrap_statements,
    store::{RelationalStore, StoreError, memory::SharedMemoryStore},
};
use amberdb_schema::build::Schema;
use std::sync::Arc;

// re-exports
pub use session::{DbSession, SessionQuery};

///
/// StoreProvider
///
/// Hands out one connection per session. Implementations own pooling
/// and backend specifics; the core never sees them.
///

pub trait StoreProvider {
    fn connect(&self, datasource: &DataSource) -> Result<Box<dyn RelationalStore>, StoreError>;
}

///
/// MemoryProvider
///
/// Provider over one shared in-memory store. Every connection observes
/// the same data, so sequential sessions interoperate the way they
/// would against an external store.
///

#[derive(Clone, Default)]
pub struct MemoryProvider {
    store: SharedMemoryStore,
}

impl MemoryProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn store(&self) -> &SharedMemoryStore {
        &self.store
    }
}

impl StoreProvider for MemoryProvider {
    fn connect(&self, _datasource: &DataSource) -> Result<Box<dyn RelationalStore>, StoreError> {
        Ok(Box::new(self.store.clone()))
    }
}

///
/// Db
///
/// Session factory: validated schema + config + store provider.
///

pub struct Db {
    schema: Arc<Schema>,
    config: Config,
    named: NamedQueries,
    provider: Box<dyn StoreProvider>,
}

impl Db {
    #[must_use]
    pub fn new(schema: Schema, config: Config, provider: impl StoreProvider + 'static) -> Self {
        Self {
            schema: Arc::new(schema),
            config,
            named: NamedQueries::new(),
            provider: Box::new(provider),
        }
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Register a named query, validating it eagerly.
    pub fn register_query(
        &mut self,
        name: impl Into<String>,
        text: &str,
    ) -> Result<(), Error> {
        self.named
            .register(name, &self.schema, text)
            .map_err(Into::into)
    }

    /// Create every mapped table on a fresh store.
    pub fn initialize_store(&self) -> Result<(), Error> {
        let mut connection = self.provider.connect(&self.config.datasource)?;
        let statements = bootstrap_statements(&self.schema);
        for statement in &statements {
            connection.execute(statement)?;
        }
        tracing::debug!(tables = statements.len(), "store initialized");

        Ok(())
    }

    /// Open a session over a fresh connection.
    pub fn open(&self) -> Result<DbSession, Error> {
        let connection = self.provider.connect(&self.config.datasource)?;
        let options = SessionOptions {
            debug: self.config.session.debug,
            flush_before_query: self.config.session.flush_before_query,
        };
        let session = Session::with_options(Arc::clone(&self.schema), connection, options);

        Ok(DbSession::new(
            DbContext::new(session),
            self.named.clone(),
        ))
    }
}
