//! Flush: shadow-copy diffing and ordered write-out.
//!
//! Contract:
//! - A snapshot is captured when an instance enters the session (load or
//!   insert) and refreshed after every successful flush; dirtiness is
//!   the diff between snapshot and current state, never a mark.
//! - Write order: inserts (referenced new rows first), element-collection
//!   rows, updates, then deletes (foreign-key holders before their
//!   targets).
//! - Mirrored association sides are never written; the owning side is
//!   adopted from collection membership before planning.
//! - Any failure leaves the session poisoned; the caller discards it.

use crate::{
    error::InternalError,
    obs::sink::Event,
    session::{
        AssocValue, CollectionValue, Element, EntityInstance, ManagedEntry, Session, SessionError,
        SharedInstance,
    },
    sql::{Filter, KeyMode, Statement},
    store::{Outcome, StoreError},
    value::Value,
};
use amberdb_schema::{
    build::{EntityModel, Schema},
    node::RelationSide,
    physical::{ColumnSource, TableLayout},
    types::{Cascade, RelationKind},
};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::sync::Arc;
use thiserror::Error as ThisError;

///
/// FlushError
///
/// A failed flush. The session's in-memory state no longer matches
/// storage; it is poisoned and must be discarded.
///

#[derive(Debug, ThisError)]
pub enum FlushError {
    #[error("store failure during flush: {0}")]
    Store(#[from] StoreError),

    #[error("entity '{entity}' references an unpersisted target through '{relation}'")]
    TransientReference { entity: String, relation: String },

    #[error("value does not fit attribute '{path}' of entity '{entity}'")]
    TypeMismatch { entity: String, path: String },

    #[error("insert ordering cycle involving entity '{entity}'")]
    CyclicReference { entity: String },

    #[error(transparent)]
    Internal(#[from] InternalError),
}

/// Demote a session error raised while loading cascade targets.
fn from_session(err: SessionError) -> FlushError {
    match err {
        SessionError::Store(err) => FlushError::Store(err),
        SessionError::Internal(err) => FlushError::Internal(err),
        other => FlushError::Internal(InternalError::session_invariant(format!(
            "unexpected error during flush: {other}"
        ))),
    }
}

///
/// Snapshot
///
/// Shadow copy of everything dirty checking compares: attribute values,
/// implied foreign keys, element collections, and loaded collection
/// membership.
///

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Snapshot {
    pub(super) attributes: BTreeMap<String, Value>,
    pub(super) fks: BTreeMap<String, Value>,
    pub(super) elements: BTreeMap<String, Vec<Element>>,
    pub(super) members: BTreeMap<String, Vec<Value>>,
}

/// Capture the dirty-check snapshot of one instance.
pub(crate) fn capture(model: &EntityModel, instance: &EntityInstance) -> Snapshot {
    let mut fks = BTreeMap::new();
    let mut members = BTreeMap::new();

    for relation in &model.def.relations {
        if relation.kind.is_single_valued() {
            if let Some(key) = instance.assoc_key(&relation.name) {
                fks.insert(relation.name.clone(), key);
            }
        } else if let CollectionValue::Loaded(children) = instance.collection(&relation.name) {
            let ids = children
                .iter()
                .filter_map(|child| child.borrow().identity().cloned())
                .collect();
            members.insert(relation.name.clone(), ids);
        }
    }

    Snapshot {
        attributes: instance.attributes().clone(),
        fks,
        elements: instance.element_map().clone(),
        members,
    }
}

/// True when an instance diverged from its snapshot.
pub(crate) fn is_dirty(model: &EntityModel, entry: &ManagedEntry) -> bool {
    capture(model, &entry.handle.borrow()) != entry.snapshot
}

///
/// DeleteTarget
///
/// One row scheduled for deletion, with or without a live handle.
///

#[derive(Clone, Debug)]
struct DeleteTarget {
    entity: String,
    variant: Option<String>,
    id: Value,
}

impl Session {
    pub(crate) fn flush_inner(&mut self) -> Result<(), FlushError> {
        let schema = Arc::clone(&self.schema);

        // adopt owning sides from mirrored collections, collect orphans
        let orphan_seeds = self.reconcile_collections(&schema)?;

        let inserts = self.plan_inserts(&schema)?;
        let mut insert_count = 0u64;
        for handle in &inserts {
            insert_count += self.execute_insert(&schema, handle)?;
        }
        self.pending.clear();

        let update_skip = self.scheduled_delete_keys(&orphan_seeds);
        let update_count = self.execute_updates(&schema, &update_skip)?;

        let delete_count = self.execute_deletes(&schema, orphan_seeds)?;
        self.removed.clear();

        self.refresh_snapshots(&schema);

        self.sink.record(&Event::Flush {
            inserts: insert_count,
            updates: update_count,
            deletes: delete_count,
        });
        if self.options.debug {
            tracing::debug!(
                inserts = insert_count,
                updates = update_count,
                deletes = delete_count,
                "flush complete"
            );
        }

        Ok(())
    }

    /// Make owning sides agree with loaded mirrored collections, and
    /// collect orphan-removal candidates from membership diffs.
    fn reconcile_collections(&mut self, schema: &Schema) -> Result<Vec<DeleteTarget>, FlushError> {
        let owners: Vec<SharedInstance> = self
            .managed
            .values()
            .map(|entry| entry.handle.clone())
            .chain(self.pending.iter().cloned())
            .collect();

        let mut orphans = Vec::new();
        for owner in owners {
            let (entity, owner_id) = {
                let instance = owner.borrow();
                (instance.entity().to_string(), instance.identity().cloned())
            };
            let Some(model) = schema.get(&entity) else {
                continue;
            };

            for relation in &model.def.relations {
                if relation.kind != RelationKind::OneToMany {
                    continue;
                }
                let RelationSide::Mirrored { mapped_by } = &relation.side else {
                    continue;
                };

                let children: Vec<SharedInstance> = match owner.borrow().collection(&relation.name)
                {
                    CollectionValue::Loaded(children) => children,
                    CollectionValue::Unloaded => continue,
                };

                // additions adopt the owning side
                for child in &children {
                    let adopt = match child.borrow().assoc(mapped_by) {
                        AssocValue::Loaded(target) => !Rc::ptr_eq(&target, &owner),
                        _ => true,
                    };
                    if adopt {
                        child
                            .borrow_mut()
                            .set_assoc_state(mapped_by.clone(), AssocValue::Loaded(owner.clone()));
                    }
                }

                // membership removals become deletes under orphan removal
                if !relation.orphan_removal {
                    continue;
                }
                let Some(owner_id) = &owner_id else {
                    continue;
                };
                let entry_key = (entity.clone(), owner_id.clone());
                let Some(entry) = self.managed.get(&entry_key) else {
                    continue;
                };
                let current: BTreeSet<Value> = children
                    .iter()
                    .filter_map(|child| child.borrow().identity().cloned())
                    .collect();
                for former in entry.snapshot.members.get(&relation.name).into_iter().flatten() {
                    if !current.contains(former) {
                        orphans.push(DeleteTarget {
                            entity: relation.target.clone(),
                            variant: None,
                            id: former.clone(),
                        });
                    }
                }
            }
        }

        Ok(orphans)
    }

    /// Order pending inserts so referenced new rows insert first.
    fn plan_inserts(&self, schema: &Schema) -> Result<Vec<SharedInstance>, FlushError> {
        let index_of: BTreeMap<usize, usize> = self
            .pending
            .iter()
            .enumerate()
            .map(|(i, handle)| (Rc::as_ptr(handle).cast::<u8>() as usize, i))
            .collect();

        // edges[i] holds the pending indices i references and therefore
        // must follow
        let mut edges: Vec<Vec<usize>> = vec![Vec::new(); self.pending.len()];
        for (i, handle) in self.pending.iter().enumerate() {
            let instance = handle.borrow();
            let Some(model) = schema.get(instance.entity()) else {
                continue;
            };
            for relation in &model.def.relations {
                if !relation.is_owning() || !relation.kind.is_single_valued() {
                    continue;
                }
                if let AssocValue::Loaded(target) = instance.assoc(&relation.name)
                    && let Some(&j) = index_of.get(&(Rc::as_ptr(&target).cast::<u8>() as usize))
                {
                    edges[i].push(j);
                }
            }
        }

        // Kahn over the dependency edges; in_degree[i] counts handles
        // that must insert before i
        let mut in_degree = vec![0usize; self.pending.len()];
        for (i, deps) in edges.iter().enumerate() {
            in_degree[i] = deps.len();
        }

        let mut ready: Vec<usize> = in_degree
            .iter()
            .enumerate()
            .filter_map(|(i, &d)| (d == 0).then_some(i))
            .collect();
        let mut ordered = Vec::with_capacity(self.pending.len());
        let mut emitted = vec![false; self.pending.len()];

        while let Some(i) = ready.pop() {
            emitted[i] = true;
            ordered.push(self.pending[i].clone());
            for (k, deps) in edges.iter().enumerate() {
                if !emitted[k] && deps.contains(&i) {
                    in_degree[k] -= 1;
                    if in_degree[k] == 0 {
                        ready.push(k);
                    }
                }
            }
        }

        if ordered.len() != self.pending.len() {
            let stuck = emitted
                .iter()
                .position(|&done| !done)
                .map_or_else(String::new, |i| {
                    self.pending[i].borrow().entity().to_string()
                });
            return Err(FlushError::CyclicReference { entity: stuck });
        }

        Ok(ordered)
    }

    /// Insert one instance plus its element-collection rows. Returns the
    /// number of statements issued.
    fn execute_insert(
        &mut self,
        schema: &Schema,
        handle: &SharedInstance,
    ) -> Result<u64, FlushError> {
        let (entity, table, key, columns) = {
            let instance = handle.borrow();
            let model = schema.get(instance.entity()).ok_or_else(|| {
                InternalError::session_invariant(format!(
                    "entity '{}' vanished from the registry",
                    instance.entity()
                ))
            })?;

            let table = model
                .mapping
                .table_for(instance.variant())
                .ok_or_else(|| {
                    InternalError::session_invariant(format!(
                        "no table for '{}' variant {:?}",
                        instance.entity(),
                        instance.variant()
                    ))
                })?
                .to_string();

            let key = match instance.identity() {
                Some(id) => KeyMode::Provided(id.clone()),
                None => KeyMode::Allocate,
            };

            let columns = insert_columns(model, &instance)?;
            (instance.entity().to_string(), table, key, columns)
        };

        let mut statements = 1u64;
        let outcome = self.run_statement(&Statement::Insert {
            table,
            key,
            columns,
        })?;
        if let Outcome::AllocatedKey(id) = outcome {
            handle.borrow_mut().set_identity(id);
        }

        let id = handle
            .borrow()
            .identity()
            .cloned()
            .ok_or_else(|| InternalError::session_invariant("insert left no identity"))?;

        statements += self.write_elements(schema, &entity, &id, handle)?;

        // enter the identity map with a fresh shadow copy
        let model = schema.get(&entity).ok_or_else(|| {
            InternalError::session_invariant(format!("entity '{entity}' vanished from the registry"))
        })?;
        let snapshot = capture(model, &handle.borrow());
        self.managed.insert(
            (entity, id),
            ManagedEntry {
                handle: handle.clone(),
                snapshot,
            },
        );

        Ok(statements)
    }

    /// Replace the stored element rows of every collection of one owner.
    fn write_elements(
        &mut self,
        schema: &Schema,
        entity: &str,
        id: &Value,
        handle: &SharedInstance,
    ) -> Result<u64, FlushError> {
        let row_batches = {
            let instance = handle.borrow();
            let model = schema.get(entity).ok_or_else(|| {
                InternalError::session_invariant(format!(
                    "entity '{entity}' vanished from the registry"
                ))
            })?;
            element_rows(model, &instance, id)
        };

        let mut statements = 0u64;
        for (table, rows) in row_batches {
            for columns in rows {
                self.run_statement(&Statement::Insert {
                    table: table.clone(),
                    key: KeyMode::Allocate,
                    columns,
                })?;
                statements += 1;
            }
        }

        Ok(statements)
    }

    /// Identity-map keys already scheduled for deletion; their updates
    /// are pointless work.
    fn scheduled_delete_keys(&self, orphans: &[DeleteTarget]) -> BTreeSet<(String, Value)> {
        let mut keys = BTreeSet::new();
        for handle in &self.removed {
            let instance = handle.borrow();
            if let Some(id) = instance.identity() {
                keys.insert((instance.entity().to_string(), id.clone()));
            }
        }
        for orphan in orphans {
            keys.insert((orphan.entity.clone(), orphan.id.clone()));
        }

        keys
    }

    /// Issue updates for every dirty managed instance. Returns the
    /// number of statements issued.
    fn execute_updates(
        &mut self,
        schema: &Schema,
        skip: &BTreeSet<(String, Value)>,
    ) -> Result<u64, FlushError> {
        // plan first: the managed map cannot stay borrowed while
        // statements run
        struct UpdatePlan {
            statement: Option<Statement>,
            element_sync: Vec<(String, Filter, Vec<Vec<(String, Value)>>)>,
        }

        let mut plans = Vec::new();
        for ((entity, id), entry) in &self.managed {
            if skip.contains(&(entity.clone(), id.clone())) {
                continue;
            }
            let Some(model) = schema.get(entity) else {
                continue;
            };

            let instance = entry.handle.borrow();
            let assignments = update_assignments(model, &instance, &entry.snapshot)?;
            let statement = if assignments.is_empty() {
                None
            } else {
                let table = model.mapping.table_for(instance.variant()).ok_or_else(|| {
                    InternalError::session_invariant(format!(
                        "no table for '{entity}' variant {:?}",
                        instance.variant()
                    ))
                })?;
                Some(Statement::Update {
                    table: table.to_string(),
                    assignments,
                    filter: Filter::key_eq(
                        table.to_string(),
                        model.mapping.key_column.clone(),
                        id.clone(),
                    ),
                })
            };

            // changed element collections rewrite wholesale
            let mut element_sync = Vec::new();
            if instance.element_map() != &entry.snapshot.elements {
                let changed: BTreeSet<&String> = instance
                    .element_map()
                    .keys()
                    .chain(entry.snapshot.elements.keys())
                    .filter(|name| {
                        instance.element_map().get(*name) != entry.snapshot.elements.get(*name)
                    })
                    .collect();
                let rows = element_rows(model, &instance, id);
                for collection in changed {
                    let Some(ct) = model.mapping.collection_table(collection) else {
                        continue;
                    };
                    let filter = Filter::key_eq(
                        ct.table.clone(),
                        ct.owner_column.clone(),
                        id.clone(),
                    );
                    let batch = rows
                        .iter()
                        .find_map(|(table, batch)| (*table == ct.table).then(|| batch.clone()))
                        .unwrap_or_default();
                    element_sync.push((ct.table.clone(), filter, batch));
                }
            }

            if statement.is_some() || !element_sync.is_empty() {
                plans.push(UpdatePlan {
                    statement,
                    element_sync,
                });
            }
        }

        let mut statements = 0u64;
        for plan in plans {
            if let Some(statement) = plan.statement {
                self.run_statement(&statement)?;
                statements += 1;
            }
            for (table, filter, rows) in plan.element_sync {
                self.run_statement(&Statement::Delete {
                    table: table.clone(),
                    filter,
                })?;
                statements += 1;
                for columns in rows {
                    self.run_statement(&Statement::Insert {
                        table: table.clone(),
                        key: KeyMode::Allocate,
                        columns,
                    })?;
                    statements += 1;
                }
            }
        }

        Ok(statements)
    }

    /// Expand cascades from scheduled removals, order child rows first,
    /// and execute. Returns the number of statements issued.
    fn execute_deletes(
        &mut self,
        schema: &Schema,
        orphan_seeds: Vec<DeleteTarget>,
    ) -> Result<u64, FlushError> {
        let mut visited = BTreeSet::new();
        let mut targets = Vec::new();

        let seeds: Vec<SharedInstance> = self.removed.clone();
        for seed in seeds {
            self.expand_delete(schema, &seed, &mut visited, &mut targets)?;
        }
        for orphan in orphan_seeds {
            self.expand_delete_raw(schema, orphan, &mut visited, &mut targets)?;
        }

        // foreign-key holders delete before the rows they reference
        let rank = delete_rank(schema);
        targets.sort_by_key(|t| rank.get(&t.entity).copied().unwrap_or(usize::MAX));

        let mut statements = 0u64;
        for target in &targets {
            let Some(model) = schema.get(&target.entity) else {
                continue;
            };

            for ct in &model.mapping.collections {
                self.run_statement(&Statement::Delete {
                    table: ct.table.clone(),
                    filter: Filter::key_eq(
                        ct.table.clone(),
                        ct.owner_column.clone(),
                        target.id.clone(),
                    ),
                })?;
                statements += 1;
            }

            let tables: Vec<String> = match (&model.mapping.layout, &target.variant) {
                (TableLayout::Single { table, .. }, _) => vec![table.clone()],
                (TableLayout::PerVariant(_), Some(variant)) => model
                    .mapping
                    .table_for(Some(variant))
                    .map(ToString::to_string)
                    .into_iter()
                    .collect(),
                (TableLayout::PerVariant(tables), None) => {
                    tables.iter().map(|t| t.table.clone()).collect()
                }
            };
            for table in tables {
                self.run_statement(&Statement::Delete {
                    table: table.clone(),
                    filter: Filter::key_eq(
                        table,
                        model.mapping.key_column.clone(),
                        target.id.clone(),
                    ),
                })?;
                statements += 1;
            }

            self.managed.remove(&(target.entity.clone(), target.id.clone()));
        }

        Ok(statements)
    }

    fn expand_delete(
        &mut self,
        schema: &Schema,
        handle: &SharedInstance,
        visited: &mut BTreeSet<(String, Value)>,
        targets: &mut Vec<DeleteTarget>,
    ) -> Result<(), FlushError> {
        let (entity, variant, id) = {
            let instance = handle.borrow();
            let Some(id) = instance.identity().cloned() else {
                // never persisted, nothing to delete
                return Ok(());
            };
            (
                instance.entity().to_string(),
                instance.variant().map(ToString::to_string),
                id,
            )
        };
        if !visited.insert((entity.clone(), id.clone())) {
            return Ok(());
        }

        let Some(model) = schema.get(&entity) else {
            return Ok(());
        };

        // cascade expansion may need store reads for unloaded children
        for relation in &model.def.relations {
            let cascades = relation.cascades(Cascade::Delete) || relation.orphan_removal;
            if !cascades {
                continue;
            }

            if relation.kind.is_single_valued() {
                let state = handle.borrow().assoc(&relation.name);
                let child = match state {
                    AssocValue::Loaded(child) => Some(child),
                    AssocValue::Unloaded(fk) => self
                        .find_inner(&relation.target, &fk)
                        .map_err(from_session)?,
                    AssocValue::Null => None,
                };
                if let Some(child) = child {
                    self.expand_delete(schema, &child, visited, targets)?;
                }
            } else {
                let state = handle.borrow().collection(&relation.name);
                let children = match state {
                    CollectionValue::Loaded(children) => children,
                    CollectionValue::Unloaded => self
                        .load_children_of(&entity, &relation.name, &id)
                        .map_err(from_session)?,
                };
                for child in children {
                    self.expand_delete(schema, &child, visited, targets)?;
                }
            }
        }

        targets.push(DeleteTarget {
            entity,
            variant,
            id,
        });

        Ok(())
    }

    /// Expand a delete known only by identity: load the row so its own
    /// cascades apply, fall back to a bare row delete when it is gone.
    fn expand_delete_raw(
        &mut self,
        schema: &Schema,
        target: DeleteTarget,
        visited: &mut BTreeSet<(String, Value)>,
        targets: &mut Vec<DeleteTarget>,
    ) -> Result<(), FlushError> {
        if visited.contains(&(target.entity.clone(), target.id.clone())) {
            return Ok(());
        }

        match self
            .find_inner(&target.entity, &target.id)
            .map_err(from_session)?
        {
            Some(handle) => self.expand_delete(schema, &handle, visited, targets),
            None => {
                if visited.insert((target.entity.clone(), target.id.clone())) {
                    targets.push(target);
                }
                Ok(())
            }
        }
    }

    fn refresh_snapshots(&mut self, schema: &Schema) {
        for ((entity, _), entry) in &mut self.managed {
            if let Some(model) = schema.get(entity) {
                entry.snapshot = capture(model, &entry.handle.borrow());
            }
        }
    }
}

/// Full column list for inserting one instance.
fn insert_columns(
    model: &EntityModel,
    instance: &EntityInstance,
) -> Result<Vec<(String, Value)>, FlushError> {
    let entity = model.def.name.clone();
    let mut columns = Vec::new();

    for column in &model.mapping.base_columns {
        match &column.source {
            ColumnSource::Attribute { path } => {
                let value = instance.get(path).cloned().unwrap_or(Value::Null);
                if !value.is_null() && !value.conforms_to(&column.kind) {
                    return Err(FlushError::TypeMismatch {
                        entity,
                        path: path.clone(),
                    });
                }
                columns.push((column.column.clone(), value));
            }
            ColumnSource::ForeignKey { relation } => {
                let value =
                    instance
                        .assoc_key(relation)
                        .ok_or_else(|| FlushError::TransientReference {
                            entity: entity.clone(),
                            relation: relation.clone(),
                        })?;
                columns.push((column.column.clone(), value));
            }
        }
    }

    match &model.mapping.layout {
        TableLayout::Single {
            discriminator,
            variant_columns,
            ..
        } => {
            if let (Some(discriminator), Some(variant)) = (discriminator, instance.variant()) {
                let tag = model
                    .def
                    .get_variant(variant)
                    .map_or_else(|| variant.to_string(), |v| v.resolved_discriminator().to_string());
                columns.push((discriminator.clone(), Value::Text(tag)));
            }
            for (owner, column) in variant_columns {
                if Some(owner.as_str()) != instance.variant() {
                    continue;
                }
                if let ColumnSource::Attribute { path } = &column.source {
                    let value = instance.get(path).cloned().unwrap_or(Value::Null);
                    if !value.is_null() && !value.conforms_to(&column.kind) {
                        return Err(FlushError::TypeMismatch {
                            entity: entity.clone(),
                            path: path.clone(),
                        });
                    }
                    // shared columns may already be present from a sibling
                    if columns.iter().all(|(c, _)| c != &column.column) {
                        columns.push((column.column.clone(), value));
                    }
                }
            }
        }
        TableLayout::PerVariant(tables) => {
            if let Some(table) = tables
                .iter()
                .find(|t| Some(t.variant.as_str()) == instance.variant())
            {
                for column in &table.extra_columns {
                    if let ColumnSource::Attribute { path } = &column.source {
                        let value = instance.get(path).cloned().unwrap_or(Value::Null);
                        if !value.is_null() && !value.conforms_to(&column.kind) {
                            return Err(FlushError::TypeMismatch {
                                entity: entity.clone(),
                                path: path.clone(),
                            });
                        }
                        columns.push((column.column.clone(), value));
                    }
                }
            }
        }
    }

    Ok(columns)
}

/// Changed columns for one managed instance, diffed against its
/// snapshot.
fn update_assignments(
    model: &EntityModel,
    instance: &EntityInstance,
    snapshot: &Snapshot,
) -> Result<Vec<(String, Value)>, FlushError> {
    let entity = model.def.name.clone();
    let mut assignments = Vec::new();

    let mut diff_attr = |path: &str, column: &str, kind: &amberdb_schema::types::AttributeKind|
     -> Result<(), FlushError> {
        let current = instance.get(path).cloned().unwrap_or(Value::Null);
        let previous = snapshot.attributes.get(path).cloned().unwrap_or(Value::Null);
        if current != previous {
            if !current.is_null() && !current.conforms_to(kind) {
                return Err(FlushError::TypeMismatch {
                    entity: entity.clone(),
                    path: path.to_string(),
                });
            }
            assignments.push((column.to_string(), current));
        }
        Ok(())
    };

    for column in &model.mapping.base_columns {
        if let ColumnSource::Attribute { path } = &column.source {
            diff_attr(path, &column.column, &column.kind)?;
        }
    }
    match &model.mapping.layout {
        TableLayout::Single {
            variant_columns, ..
        } => {
            for (owner, column) in variant_columns {
                if Some(owner.as_str()) == instance.variant()
                    && let ColumnSource::Attribute { path } = &column.source
                {
                    diff_attr(path, &column.column, &column.kind)?;
                }
            }
        }
        TableLayout::PerVariant(tables) => {
            if let Some(table) = tables
                .iter()
                .find(|t| Some(t.variant.as_str()) == instance.variant())
            {
                for column in &table.extra_columns {
                    if let ColumnSource::Attribute { path } = &column.source {
                        diff_attr(path, &column.column, &column.kind)?;
                    }
                }
            }
        }
    }
    drop(diff_attr);

    // foreign keys diff against the snapshot's implied values
    for column in &model.mapping.base_columns {
        if let ColumnSource::ForeignKey { relation } = &column.source {
            let current =
                instance
                    .assoc_key(relation)
                    .ok_or_else(|| FlushError::TransientReference {
                        entity: model.def.name.clone(),
                        relation: relation.clone(),
                    })?;
            let previous = snapshot.fks.get(relation).cloned().unwrap_or(Value::Null);
            if current != previous {
                assignments.push((column.column.clone(), current));
            }
        }
    }

    Ok(assignments)
}

/// Element rows per collection table for one owner.
fn element_rows(
    model: &EntityModel,
    instance: &EntityInstance,
    id: &Value,
) -> Vec<(String, Vec<Vec<(String, Value)>>)> {
    let mut batches = Vec::new();

    for ct in &model.mapping.collections {
        let mut rows = Vec::new();
        for element in instance.elements(&ct.collection) {
            let mut columns = vec![(ct.owner_column.clone(), id.clone())];
            match element {
                Element::Scalar(value) => {
                    if let Some((column, _, _)) = ct.columns.first() {
                        columns.push((column.clone(), value.clone()));
                    }
                }
                Element::Embedded(members) => {
                    for (column, _, member) in &ct.columns {
                        let value = member
                            .as_ref()
                            .and_then(|m| members.get(m))
                            .cloned()
                            .unwrap_or(Value::Null);
                        columns.push((column.clone(), value));
                    }
                }
            }
            rows.push(columns);
        }
        batches.push((ct.table.clone(), rows));
    }

    batches
}

/// Entity deletion rank: foreign-key holders rank before their targets.
fn delete_rank(schema: &Schema) -> BTreeMap<String, usize> {
    // edges: owner entity → referenced entity (owner deletes first)
    let mut referenced_by: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut entities: Vec<&str> = Vec::new();
    for (name, model) in schema.iter() {
        entities.push(name);
        for relation in &model.def.relations {
            if relation.is_owning() && relation.kind.is_single_valued() {
                referenced_by
                    .entry(relation.target.as_str())
                    .or_default()
                    .push(name);
            }
        }
    }

    // peel entities nobody references anymore; holders get lower ranks
    let mut rank = BTreeMap::new();
    let mut remaining: BTreeSet<&str> = entities.iter().copied().collect();
    let mut next_rank = 0usize;
    while !remaining.is_empty() {
        let layer: Vec<&str> = remaining
            .iter()
            .filter(|entity| {
                // an entity is deletable once no remaining entity holds a
                // key into something still remaining through it; holders
                // first means: pick entities whose holders are all gone
                referenced_by
                    .get(*entity)
                    .is_none_or(|holders| holders.iter().all(|h| !remaining.contains(h)))
            })
            .copied()
            .collect();

        if layer.is_empty() {
            // reference cycle: stable order for what is left
            for entity in &remaining {
                rank.insert((*entity).to_string(), next_rank);
                next_rank += 1;
            }
            break;
        }
        for entity in layer {
            remaining.remove(entity);
            rank.insert(entity.to_string(), next_rank);
            next_rank += 1;
        }
    }

    rank
}
