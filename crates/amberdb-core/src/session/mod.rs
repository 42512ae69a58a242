//! Unit-of-work session.
//!
//! Contract:
//! - At most one live handle per (entity, identity): `find` returns the
//!   cached handle for the session's lifetime, `clear` detaches all.
//! - All writes buffer until `flush`, which diffs shadow snapshots and
//!   issues statements in dependency order.
//! - A flush failure poisons the session; every later operation fails
//!   until the caller discards it.
//! - The session is single-threaded by construction (`Rc` handles) and
//!   additionally rejects re-entrant use instead of corrupting state.

mod fetch;
mod flush;
mod instance;


use crate::{
    error::InternalError,
    obs::sink::{Event, MetricsSink, NOOP_SINK},
    query::{Bindings, Lowered, Query, QueryError, QuerySemanticError, lower::lower},
    sql::{Statement, render::render},
    store::{Outcome, RelationalStore, StoreError},
    value::Value,
};
use amberdb_schema::build::{EntityModel, Schema};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error as ThisError;
use ulid::Ulid;

// re-exports
pub use flush::FlushError;
pub use instance::{AssocValue, CollectionValue, Element, EntityInstance, SharedInstance};

///
/// SessionError
///

#[derive(Debug, ThisError)]
pub enum SessionError {
    #[error("session is closed")]
    Closed,

    #[error("session is already executing an operation")]
    ConcurrentAccess,

    #[error("session is poisoned by an earlier flush failure and must be discarded")]
    Poisoned,

    #[error("entity '{entity}' is not registered")]
    UnknownEntity { entity: String },

    #[error("instance of '{entity}' must name one of its variants")]
    VariantRequired { entity: String },

    #[error("'{variant}' is not a variant of entity '{entity}'")]
    UnknownVariant { entity: String, variant: String },

    #[error("instance is not managed by this session")]
    NotManaged,

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Flush(FlushError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl From<QuerySemanticError> for SessionError {
    fn from(err: QuerySemanticError) -> Self {
        Self::Query(QueryError::Semantic(err))
    }
}

impl From<FlushError> for SessionError {
    fn from(err: FlushError) -> Self {
        Self::Flush(err)
    }
}

///
/// SessionOptions
///

#[derive(Clone, Copy, Debug)]
pub struct SessionOptions {
    /// Emit rendered statements and flush plans at debug level.
    pub debug: bool,

    /// Flush pending changes before every query so reads observe the
    /// session's own writes.
    pub flush_before_query: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            debug: false,
            flush_before_query: true,
        }
    }
}

///
/// QueryResult
///

#[derive(Debug)]
pub enum QueryResult {
    /// Entity projection: materialized instances, identity-map deduped.
    Entities(Vec<SharedInstance>),

    /// Scalar projection: raw rows in projection order.
    Scalars(Vec<Vec<Value>>),

    /// Bulk update/delete: affected row count.
    Affected(u64),
}

impl QueryResult {
    /// Entity list, or an invariant error for other shapes.
    pub fn into_entities(self) -> Result<Vec<SharedInstance>, SessionError> {
        match self {
            Self::Entities(entities) => Ok(entities),
            other => Err(InternalError::session_invariant(format!(
                "expected entity results, got {other:?}"
            ))
            .into()),
        }
    }

    /// Affected count, or an invariant error for other shapes.
    pub fn into_affected(self) -> Result<u64, SessionError> {
        match self {
            Self::Affected(count) => Ok(count),
            other => Err(InternalError::session_invariant(format!(
                "expected affected count, got {other:?}"
            ))
            .into()),
        }
    }
}

///
/// ManagedEntry
///

struct ManagedEntry {
    handle: SharedInstance,
    snapshot: flush::Snapshot,
}

///
/// Session
///
/// One unit of work over one store connection.
///

pub struct Session {
    schema: Arc<Schema>,
    store: Box<dyn RelationalStore>,

    /// Identity map plus shadow snapshots.
    managed: BTreeMap<(String, Value), ManagedEntry>,

    /// Scheduled inserts in registration order.
    pending: Vec<SharedInstance>,

    /// Scheduled deletes.
    removed: Vec<SharedInstance>,

    options: SessionOptions,
    sink: &'static dyn MetricsSink,

    poisoned: bool,
    closed: bool,

    /// Re-entrancy flag, shared with the operation guard so `&mut self`
    /// methods can run while a guard is live.
    busy: Rc<Cell<bool>>,

    ulid_seq: u128,
}

impl Session {
    #[must_use]
    pub fn new(schema: Arc<Schema>, store: Box<dyn RelationalStore>) -> Self {
        Self::with_options(schema, store, SessionOptions::default())
    }

    #[must_use]
    pub fn with_options(
        schema: Arc<Schema>,
        store: Box<dyn RelationalStore>,
        options: SessionOptions,
    ) -> Self {
        Self {
            schema,
            store,
            managed: BTreeMap::new(),
            pending: Vec::new(),
            removed: Vec::new(),
            options,
            sink: NOOP_SINK,
            poisoned: false,
            closed: false,
            busy: Rc::new(Cell::new(false)),
            ulid_seq: 0,
        }
    }

    /// Enable debug logging for this session.
    #[must_use]
    pub const fn debug(mut self) -> Self {
        self.options.debug = true;
        self
    }

    /// Override the metrics sink.
    #[must_use]
    pub fn metrics_sink(mut self, sink: &'static dyn MetricsSink) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    // ------------------------------------------------------------------
    // Unit-of-work operations
    // ------------------------------------------------------------------

    /// Schedule an insert. Idempotent for a handle already scheduled or
    /// managed. Client-assigned identities are set here; store-allocated
    /// identities stay absent until flush.
    pub fn persist(&mut self, handle: &SharedInstance) -> Result<(), SessionError> {
        let _guard = self.guard()?;
        self.persist_inner(handle)
    }

    /// Identity-map lookup, then a store read on miss. Repeated calls
    /// with the same identity return the identical handle.
    pub fn find(
        &mut self,
        entity: &str,
        id: &Value,
    ) -> Result<Option<SharedInstance>, SessionError> {
        let _guard = self.guard()?;
        self.find_inner(entity, id)
    }

    /// Schedule a delete for a managed instance, or unschedule a pending
    /// insert.
    pub fn remove(&mut self, handle: &SharedInstance) -> Result<(), SessionError> {
        let _guard = self.guard()?;
        self.remove_inner(handle)
    }

    /// Write out every buffered change: dirty diffs, scheduled inserts
    /// and deletes, cascades, and orphan removal, in dependency order.
    pub fn flush(&mut self) -> Result<(), SessionError> {
        let _guard = self.guard()?;
        self.flush_inner().map_err(|err| {
            // the session no longer matches storage; force a discard
            self.poisoned = true;
            SessionError::Flush(err)
        })
    }

    /// Detach every cached instance and drop all buffered work.
    pub fn clear(&mut self) -> Result<(), SessionError> {
        let _guard = self.guard()?;
        self.clear_inner();

        Ok(())
    }

    /// Execute a parsed query with bindings.
    pub fn execute(
        &mut self,
        query: &Query,
        bindings: &Bindings,
    ) -> Result<QueryResult, SessionError> {
        let _guard = self.guard()?;

        if self.options.flush_before_query && self.has_pending_work() {
            self.flush_inner().map_err(|err| {
                self.poisoned = true;
                SessionError::Flush(err)
            })?;
        }

        let lowered = lower(&self.schema, query.resolved(), bindings)?;
        self.sink.record(&Event::Query);

        match lowered {
            Lowered::Select(select) => self.run_select(&select),
            Lowered::Bulk(bulk) => {
                let mut affected = 0;
                for statement in &bulk.statements {
                    affected += self.run_statement(statement)?.into_affected()?;
                }

                // cached instances of the target entity may now disagree
                // with storage; detach them so later reads re-read
                let detached = self.detach_entity(&bulk.entity);
                if detached > 0 {
                    tracing::debug!(
                        entity = %bulk.entity,
                        detached,
                        "detached cached instances after bulk statement"
                    );
                }

                Ok(QueryResult::Affected(affected))
            }
        }
    }

    /// Parse, resolve, and execute query text in one step.
    pub fn execute_text(
        &mut self,
        text: &str,
        bindings: &Bindings,
    ) -> Result<QueryResult, SessionError> {
        let query = Query::parse(&self.schema, text)?;
        self.execute(&query, bindings)
    }

    // ------------------------------------------------------------------
    // Lifecycle plumbing (driven by `context`)
    // ------------------------------------------------------------------

    pub(crate) fn store_begin(&mut self) -> Result<(), StoreError> {
        self.store.begin()
    }

    pub(crate) fn store_commit(&mut self) -> Result<(), StoreError> {
        self.store.commit()
    }

    pub(crate) fn store_rollback(&mut self) -> Result<(), StoreError> {
        self.store.rollback()
    }

    pub(crate) fn mark_closed(&mut self) {
        self.closed = true;
    }

    pub(crate) fn discard_buffered(&mut self) {
        self.clear_inner();
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn guard(&self) -> Result<OpGuard, SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        if self.poisoned {
            return Err(SessionError::Poisoned);
        }
        if self.busy.replace(true) {
            return Err(SessionError::ConcurrentAccess);
        }

        Ok(OpGuard(Rc::clone(&self.busy)))
    }

    fn model(&self, entity: &str) -> Result<&EntityModel, SessionError> {
        self.schema
            .get(entity)
            .ok_or_else(|| SessionError::UnknownEntity {
                entity: entity.to_string(),
            })
    }

    /// Validate an instance's entity and variant against the registry.
    fn check_shape(&self, handle: &SharedInstance) -> Result<(), SessionError> {
        let instance = handle.borrow();
        let model = self.model(instance.entity())?;

        match (instance.variant(), model.def.has_variants()) {
            (None, true) => Err(SessionError::VariantRequired {
                entity: instance.entity().to_string(),
            }),
            (Some(variant), _) if model.def.get_variant(variant).is_none() => {
                Err(SessionError::UnknownVariant {
                    entity: instance.entity().to_string(),
                    variant: variant.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    fn persist_inner(&mut self, handle: &SharedInstance) -> Result<(), SessionError> {
        self.check_shape(handle)?;

        let (entity, identity) = {
            let instance = handle.borrow();
            (instance.entity().to_string(), instance.identity().cloned())
        };
        let strategy = self.model(&entity)?.def.identity.strategy;

        // already managed or already scheduled: persist is idempotent
        if let Some(identity) = &identity
            && let Some(entry) = self.managed.get(&(entity.clone(), identity.clone()))
            && Rc::ptr_eq(&entry.handle, handle)
        {
            return Ok(());
        }
        if self.pending.iter().any(|p| Rc::ptr_eq(p, handle)) {
            return Ok(());
        }

        if identity.is_none() && strategy == amberdb_schema::types::IdentityStrategy::Ulid {
            let ulid = self.next_ulid();
            handle.borrow_mut().set_identity(Value::Ulid(ulid));
        }

        self.pending.push(handle.clone());

        // cascade persists over loaded association targets
        let cascades: Vec<SharedInstance> = {
            let instance = handle.borrow();
            let model = self
                .schema
                .get(instance.entity())
                .ok_or_else(|| SessionError::UnknownEntity {
                    entity: instance.entity().to_string(),
                })?;
            let mut targets = Vec::new();
            for relation in &model.def.relations {
                if !relation.cascades(amberdb_schema::types::Cascade::Persist) {
                    continue;
                }
                if relation.kind.is_single_valued() {
                    if let AssocValue::Loaded(target) = instance.assoc(&relation.name) {
                        targets.push(target);
                    }
                } else if let CollectionValue::Loaded(children) =
                    instance.collection(&relation.name)
                {
                    targets.extend(children);
                }
            }
            targets
        };
        for target in cascades {
            self.persist_inner(&target)?;
        }

        Ok(())
    }

    fn remove_inner(&mut self, handle: &SharedInstance) -> Result<(), SessionError> {
        // a pending insert is simply unscheduled
        if let Some(pos) = self.pending.iter().position(|p| Rc::ptr_eq(p, handle)) {
            self.pending.remove(pos);
            return Ok(());
        }

        let key = {
            let instance = handle.borrow();
            let identity = instance.identity().cloned().ok_or(SessionError::NotManaged)?;
            (instance.entity().to_string(), identity)
        };
        match self.managed.get(&key) {
            Some(entry) if Rc::ptr_eq(&entry.handle, handle) => {}
            _ => return Err(SessionError::NotManaged),
        }

        if !self.removed.iter().any(|r| Rc::ptr_eq(r, handle)) {
            self.removed.push(handle.clone());
        }

        Ok(())
    }

    fn clear_inner(&mut self) {
        self.managed.clear();
        self.pending.clear();
        self.removed.clear();
    }

    /// Detach cached instances of one entity. Returns how many were
    /// dropped from the identity map.
    fn detach_entity(&mut self, entity: &str) -> usize {
        let before = self.managed.len();
        self.managed.retain(|(name, _), _| name != entity);

        before - self.managed.len()
    }

    fn has_pending_work(&self) -> bool {
        if !self.pending.is_empty() || !self.removed.is_empty() {
            return true;
        }

        self.managed.iter().any(|((entity, _), entry)| {
            self.schema
                .get(entity)
                .is_some_and(|model| flush::is_dirty(model, entry))
        })
    }

    /// Execute one statement with logging and metrics.
    fn run_statement(&mut self, statement: &Statement) -> Result<Outcome, StoreError> {
        if self.options.debug {
            tracing::debug!(sql = %render(statement), "executing statement");
        }
        self.sink.record(&Event::Statement);

        self.store.execute(statement)
    }

    fn next_ulid(&mut self) -> Ulid {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(0));
        self.ulid_seq += 1;

        Ulid::from_parts(millis, self.ulid_seq)
    }
}

///
/// OpGuard
///
/// Clears the busy flag when the operation unwinds.
///

struct OpGuard(Rc<Cell<bool>>);

impl Drop for OpGuard {
    fn drop(&mut self) {
        self.0.set(false);
    }
}
