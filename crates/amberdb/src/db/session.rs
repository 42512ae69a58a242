use crate::error::Error;
use amberdb_core::{
    context::{DbContext, TxState},
    query::{Bindings, NamedQueries, Query},
    session::{QueryResult, SharedInstance},
    value::Value,
};

///
/// DbSession
///
/// Public facade for one unit of work and its transaction lifecycle.
/// Wraps the core context and converts core errors into [`Error`].
///

pub struct DbSession {
    ctx: DbContext,
    named: NamedQueries,
}

impl DbSession {
    #[must_use]
    pub(crate) const fn new(ctx: DbContext, named: NamedQueries) -> Self {
        Self { ctx, named }
    }

    #[must_use]
    pub const fn tx_state(&self) -> TxState {
        self.ctx.state()
    }

    // ------------------------------------------------------------------
    // Transaction lifecycle
    // ------------------------------------------------------------------

    pub fn begin(&mut self) -> Result<(), Error> {
        self.ctx.begin().map_err(Into::into)
    }

    pub fn commit(&mut self) -> Result<(), Error> {
        self.ctx.commit().map_err(Into::into)
    }

    pub fn rollback(&mut self) -> Result<(), Error> {
        self.ctx.rollback().map_err(Into::into)
    }

    /// Release the session. An active transaction rolls back first.
    pub fn close(&mut self) {
        self.ctx.close();
    }

    // ------------------------------------------------------------------
    // Unit-of-work operations
    // ------------------------------------------------------------------

    pub fn persist(&mut self, instance: &SharedInstance) -> Result<(), Error> {
        self.ctx.session().persist(instance).map_err(Into::into)
    }

    pub fn find(&mut self, entity: &str, id: &Value) -> Result<Option<SharedInstance>, Error> {
        self.ctx.session().find(entity, id).map_err(Into::into)
    }

    pub fn remove(&mut self, instance: &SharedInstance) -> Result<(), Error> {
        self.ctx.session().remove(instance).map_err(Into::into)
    }

    pub fn flush(&mut self) -> Result<(), Error> {
        self.ctx.session().flush().map_err(Into::into)
    }

    pub fn clear(&mut self) -> Result<(), Error> {
        self.ctx.session().clear().map_err(Into::into)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Parse and resolve ad-hoc query text.
    pub fn query(&mut self, text: &str) -> Result<SessionQuery<'_>, Error> {
        let query = Query::parse(self.ctx.session().schema(), text)?;

        Ok(SessionQuery {
            session: self,
            query,
            bindings: Bindings::new(),
        })
    }

    /// Invoke a query registered on the factory.
    pub fn named(&mut self, name: &str) -> Result<SessionQuery<'_>, Error> {
        let query = self
            .named
            .get(name)
            .cloned()
            .ok_or_else(|| Error::unknown_named_query(name))?;

        Ok(SessionQuery {
            session: self,
            query,
            bindings: Bindings::new(),
        })
    }

    fn run(&mut self, query: &Query, bindings: &Bindings) -> Result<QueryResult, Error> {
        self.ctx
            .session()
            .execute(query, bindings)
            .map_err(Into::into)
    }
}

///
/// SessionQuery
///
/// One execution of a query against one session, with its bindings.
///

pub struct SessionQuery<'a> {
    session: &'a mut DbSession,
    query: Query,
    bindings: Bindings,
}

impl std::fmt::Debug for SessionQuery<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionQuery")
            .field("query", &self.query)
            .field("bindings", &self.bindings)
            .finish_non_exhaustive()
    }
}

impl SessionQuery<'_> {
    #[must_use]
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bindings = self.bindings.bind(name, value);
        self
    }

    #[must_use]
    pub fn bind_positional(mut self, index: u32, value: impl Into<Value>) -> Self {
        self.bindings = self.bindings.bind_positional(index, value);
        self
    }

    /// Entity projection results.
    pub fn list(self) -> Result<Vec<SharedInstance>, Error> {
        match self.session.run(&self.query, &self.bindings)? {
            QueryResult::Entities(entities) => Ok(entities),
            other => Err(shape_error("entities", &other)),
        }
    }

    /// The single entity result, or `None` for an empty result set.
    pub fn single(self) -> Result<Option<SharedInstance>, Error> {
        let mut entities = self.list()?;

        Ok((!entities.is_empty()).then(|| entities.remove(0)))
    }

    /// Scalar projection rows.
    pub fn scalars(self) -> Result<Vec<Vec<Value>>, Error> {
        match self.session.run(&self.query, &self.bindings)? {
            QueryResult::Scalars(rows) => Ok(rows),
            other => Err(shape_error("scalar rows", &other)),
        }
    }

    /// Execute a bulk update/delete; returns the affected-row count.
    pub fn execute(self) -> Result<u64, Error> {
        match self.session.run(&self.query, &self.bindings)? {
            QueryResult::Affected(count) => Ok(count),
            other => Err(shape_error("an affected count", &other)),
        }
    }
}

fn shape_error(wanted: &str, got: &QueryResult) -> Error {
    Error::new(
        crate::error::ErrorKind::Query(crate::error::QueryErrorKind::Semantic),
        crate::error::ErrorOrigin::Query,
        format!("query does not produce {wanted}: got {got:?}"),
    )
}
