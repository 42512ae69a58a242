//! Reads and materialization.
//!
//! Rows decode into instances through the identity map: a (entity, id)
//! already cached keeps its handle and its in-memory state; only unseen
//! rows build new instances. Join-fetch edges populate association
//! slots in the same round trip; element collections load with their
//! owner.

use crate::{
    error::InternalError,
    query::{
        LoweredSelect,
        lower::{DecodeSpec, FetchEdge, decode_spec, push_spec_columns},
        resolve::ResolvedProjection,
    },
    session::{
        AssocValue, CollectionValue, Element, EntityInstance, ManagedEntry, QueryResult, Session,
        SessionError, SharedInstance, flush,
    },
    sql::{Filter, SelectColumn, SelectStatement, Statement},
    store::Row,
    value::Value,
};
use amberdb_schema::{
    build::{EntityModel, Schema},
    node::RelationSide,
    physical::{CollectionTable, TableLayout},
    types::{FetchMode, RelationKind},
};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::sync::Arc;

impl Session {
    pub(crate) fn find_inner(
        &mut self,
        entity: &str,
        id: &Value,
    ) -> Result<Option<SharedInstance>, SessionError> {
        let schema = Arc::clone(&self.schema);
        let model = schema
            .get(entity)
            .ok_or_else(|| SessionError::UnknownEntity {
                entity: entity.to_string(),
            })?;

        if let Some(entry) = self.managed.get(&(entity.to_string(), id.clone())) {
            // scheduled removals read as already gone
            let scheduled = self
                .removed
                .iter()
                .any(|handle| Rc::ptr_eq(handle, &entry.handle));
            return Ok((!scheduled).then(|| entry.handle.clone()));
        }

        // pending inserts with a client-assigned identity are visible
        // before they flush
        for handle in &self.pending {
            let instance = handle.borrow();
            if instance.entity() == entity && instance.identity() == Some(id) {
                return Ok(Some(handle.clone()));
            }
        }

        for (statement, spec) in find_units(model, id) {
            let rows = self
                .run_statement(&Statement::Select(statement))?
                .into_rows()?;
            if let Some(row) = rows.first() {
                return self.materialize_from_row(&schema, row, &spec);
            }
        }

        Ok(None)
    }

    /// Execute a lowered select and materialize its results.
    pub(crate) fn run_select(
        &mut self,
        lowered: &LoweredSelect,
    ) -> Result<QueryResult, SessionError> {
        let schema = Arc::clone(&self.schema);

        match &lowered.projection {
            ResolvedProjection::Entity { alias } => {
                self.run_entity_select(&schema, lowered, alias)
            }

            ResolvedProjection::Scalars(items) => {
                let mut results = Vec::new();
                for unit in &lowered.units {
                    let rows = self
                        .run_statement(&Statement::Select(unit.statement.clone()))?
                        .into_rows()?;
                    for row in rows {
                        let values = items
                            .iter()
                            .map(|item| row.get(&item.label).cloned().unwrap_or(Value::Null))
                            .collect();
                        results.push(values);
                    }
                }

                Ok(QueryResult::Scalars(results))
            }
        }
    }

    fn run_entity_select(
        &mut self,
        schema: &Arc<Schema>,
        lowered: &LoweredSelect,
        root_alias: &str,
    ) -> Result<QueryResult, SessionError> {
        let mut roots: Vec<SharedInstance> = Vec::new();
        let mut seen_roots: BTreeSet<usize> = BTreeSet::new();

        // collection fetches accumulate across rows before they apply
        let mut collections: BTreeMap<(usize, String), (SharedInstance, Vec<SharedInstance>)> =
            BTreeMap::new();

        for unit in &lowered.units {
            let rows = self
                .run_statement(&Statement::Select(unit.statement.clone()))?
                .into_rows()?;

            for row in rows {
                let root_spec = unit.decode.get(root_alias).ok_or_else(|| {
                    InternalError::query_invariant("entity projection without a root decode spec")
                })?;
                let Some(root) = self.materialize_from_row(schema, &row, root_spec)? else {
                    continue;
                };

                let mut handles: BTreeMap<&str, SharedInstance> = BTreeMap::new();
                handles.insert(root_alias, root.clone());

                for edge in &lowered.fetch {
                    let spec = unit.decode.get(&edge.target_alias).ok_or_else(|| {
                        InternalError::query_invariant("fetch alias without a decode spec")
                    })?;
                    let target = self.materialize_from_row(schema, &row, spec)?;
                    if let Some(target) = &target {
                        handles.insert(edge.target_alias.as_str(), target.clone());
                    }

                    let Some(owner) = handles.get(edge.owner_alias.as_str()).cloned() else {
                        continue;
                    };
                    apply_fetch_edge(edge, &owner, target, &mut collections);
                }

                if seen_roots.insert(handle_addr(&root)) {
                    roots.push(root);
                }
            }
        }

        // loaded collections land on their owners, snapshots follow so
        // the fetch itself never reads as a dirty change
        for ((_, relation), (owner, children)) in collections {
            let ids: Vec<Value> = children
                .iter()
                .filter_map(|child| child.borrow().identity().cloned())
                .collect();
            owner
                .borrow_mut()
                .set_collection(relation.clone(), CollectionValue::Loaded(children));

            let key = {
                let instance = owner.borrow();
                instance
                    .identity()
                    .cloned()
                    .map(|id| (instance.entity().to_string(), id))
            };
            if let Some(key) = key
                && let Some(entry) = self.managed.get_mut(&key)
            {
                entry.snapshot.members.insert(relation, ids);
            }
        }

        Ok(QueryResult::Entities(roots))
    }

    /// Decode one alias of one row. Identity-map hits return the cached
    /// handle untouched; misses build, register, and finish loading the
    /// instance.
    pub(crate) fn materialize_from_row(
        &mut self,
        schema: &Arc<Schema>,
        row: &Row,
        spec: &DecodeSpec,
    ) -> Result<Option<SharedInstance>, SessionError> {
        let Some(key) = row.get(&spec.key_label) else {
            return Ok(None);
        };
        if key.is_null() {
            return Ok(None);
        }
        let key = key.clone();

        let map_key = (spec.entity.clone(), key.clone());
        if let Some(entry) = self.managed.get(&map_key) {
            return Ok(Some(entry.handle.clone()));
        }

        let model = schema.get(&spec.entity).ok_or_else(|| {
            InternalError::query_invariant(format!(
                "entity '{}' vanished from the registry",
                spec.entity
            ))
        })?;

        let variant = match &spec.variant {
            Some(variant) => Some(variant.clone()),
            None => decode_variant(model, row, spec)?,
        };

        let mut instance = match &variant {
            Some(variant) => EntityInstance::new_variant(&spec.entity, variant.clone()),
            None => EntityInstance::new(&spec.entity),
        };
        instance.set_identity(key.clone());

        for attr in &spec.attrs {
            if attr.variant.is_some() && attr.variant.as_deref() != variant.as_deref() {
                continue;
            }
            if let Some(value) = row.get(&attr.label)
                && !value.is_null()
            {
                instance.set(attr.path.clone(), value.clone());
            }
        }

        for (relation, label) in &spec.fks {
            let state = match row.get(label) {
                Some(value) if !value.is_null() => AssocValue::Unloaded(value.clone()),
                _ => AssocValue::Null,
            };
            instance.set_assoc_state(relation.clone(), state);
        }

        let handle = instance.into_shared();

        // register first so cyclic eager graphs terminate
        let snapshot = flush::capture(model, &handle.borrow());
        self.managed.insert(
            map_key.clone(),
            ManagedEntry {
                handle: handle.clone(),
                snapshot,
            },
        );

        self.load_elements(model, &key, &handle)?;
        self.load_eager(model, &handle)?;

        if let Some(entry) = self.managed.get_mut(&map_key) {
            entry.snapshot = flush::capture(model, &handle.borrow());
        }

        Ok(Some(handle))
    }

    /// Load every element collection of one owner.
    fn load_elements(
        &mut self,
        model: &EntityModel,
        id: &Value,
        handle: &SharedInstance,
    ) -> Result<(), SessionError> {
        for ct in &model.mapping.collections {
            let columns = ct
                .columns
                .iter()
                .map(|(column, _, _)| SelectColumn {
                    source: crate::sql::ColumnRef::new(ct.table.clone(), column.clone()),
                    label: column.clone(),
                })
                .collect();

            let rows = self
                .run_statement(&Statement::Select(SelectStatement {
                    table: ct.table.clone(),
                    alias: ct.table.clone(),
                    joins: Vec::new(),
                    columns,
                    filter: Filter::key_eq(ct.table.clone(), ct.owner_column.clone(), id.clone()),
                }))?
                .into_rows()?;

            let elements: Vec<Element> = rows
                .iter()
                .map(|row| decode_element(ct, row))
                .collect();
            handle.borrow_mut().set_elements(ct.collection.clone(), elements);
        }

        Ok(())
    }

    /// Resolve eagerly-fetched single-valued associations.
    fn load_eager(
        &mut self,
        model: &EntityModel,
        handle: &SharedInstance,
    ) -> Result<(), SessionError> {
        let eager: Vec<(String, String, Value)> = {
            let instance = handle.borrow();
            model
                .def
                .relations
                .iter()
                .filter(|r| r.fetch == FetchMode::Eager && r.kind.is_single_valued())
                .filter_map(|r| match instance.assoc(&r.name) {
                    AssocValue::Unloaded(fk) => Some((r.name.clone(), r.target.clone(), fk)),
                    _ => None,
                })
                .collect()
        };

        for (relation, target_entity, fk) in eager {
            let target = self.find_inner(&target_entity, &fk)?;
            let state = target.map_or(AssocValue::Null, AssocValue::Loaded);
            handle.borrow_mut().set_assoc_state(relation, state);
        }

        Ok(())
    }

    /// Materialize the children of one mirrored collection by foreign
    /// key.
    pub(crate) fn load_children_of(
        &mut self,
        owner_entity: &str,
        relation_name: &str,
        owner_id: &Value,
    ) -> Result<Vec<SharedInstance>, SessionError> {
        let schema = Arc::clone(&self.schema);
        let owner = schema
            .get(owner_entity)
            .ok_or_else(|| SessionError::UnknownEntity {
                entity: owner_entity.to_string(),
            })?;
        let relation = owner
            .def
            .get_relation(relation_name)
            .ok_or_else(|| InternalError::session_invariant(format!(
                "relation '{relation_name}' vanished from entity '{owner_entity}'"
            )))?;

        let RelationSide::Mirrored { mapped_by } = &relation.side else {
            return Err(InternalError::session_invariant(format!(
                "collection '{relation_name}' on '{owner_entity}' is not mirrored"
            ))
            .into());
        };
        let target = schema
            .get(&relation.target)
            .ok_or_else(|| SessionError::UnknownEntity {
                entity: relation.target.clone(),
            })?;
        let fk_column = target
            .mapping
            .fk_column(mapped_by)
            .ok_or_else(|| InternalError::session_invariant(format!(
                "no foreign key for '{mapped_by}' on '{}'",
                relation.target
            )))?
            .column
            .clone();

        let mut children = Vec::new();
        for (mut statement, spec) in find_units(target, owner_id) {
            statement.filter = Filter::key_eq("e", fk_column.clone(), owner_id.clone());
            let rows = self
                .run_statement(&Statement::Select(statement))?
                .into_rows()?;
            for row in &rows {
                if let Some(child) = self.materialize_from_row(&schema, row, &spec)? {
                    children.push(child);
                }
            }
        }

        Ok(children)
    }
}

/// Apply one fetch edge for one row: single-valued slots load directly,
/// collection members accumulate until every row is decoded.
fn apply_fetch_edge(
    edge: &FetchEdge,
    owner: &SharedInstance,
    target: Option<SharedInstance>,
    collections: &mut BTreeMap<(usize, String), (SharedInstance, Vec<SharedInstance>)>,
) {
    match edge.kind {
        RelationKind::ManyToOne | RelationKind::OneToOne => {
            let state = target.map_or(AssocValue::Null, AssocValue::Loaded);
            owner
                .borrow_mut()
                .set_assoc_state(edge.relation.clone(), state);
        }
        RelationKind::OneToMany => {
            let slot = collections
                .entry((handle_addr(owner), edge.relation.clone()))
                .or_insert_with(|| (owner.clone(), Vec::new()));
            if let Some(target) = target
                && !slot.1.iter().any(|c| Rc::ptr_eq(c, &target))
            {
                slot.1.push(target);
            }
        }
    }
}

/// Stable address of a shared handle, for pointer-identity sets.
fn handle_addr(handle: &SharedInstance) -> usize {
    Rc::as_ptr(handle).cast::<u8>() as usize
}

/// Variant of a decoded row, read from the discriminator tag.
fn decode_variant(
    model: &EntityModel,
    row: &Row,
    spec: &DecodeSpec,
) -> Result<Option<String>, SessionError> {
    let Some(label) = &spec.discriminator_label else {
        return Ok(None);
    };

    let Some(Value::Text(tag)) = row.get(label) else {
        return Err(InternalError::store_corruption(format!(
            "row of entity '{}' carries no discriminator tag",
            model.def.name
        ))
        .into());
    };

    model
        .def
        .variants
        .iter()
        .find(|v| v.resolved_discriminator() == tag)
        .map(|v| Some(v.name.clone()))
        .ok_or_else(|| {
            InternalError::store_corruption(format!(
                "unknown discriminator tag '{tag}' for entity '{}'",
                model.def.name
            ))
            .into()
        })
}

/// Per-table select units for loading one entity by key.
fn find_units(model: &EntityModel, id: &Value) -> Vec<(SelectStatement, DecodeSpec)> {
    let alias = "e";
    let contexts: Vec<Option<String>> = match &model.mapping.layout {
        TableLayout::Single { .. } => vec![None],
        TableLayout::PerVariant(tables) => {
            tables.iter().map(|t| Some(t.variant.clone())).collect()
        }
    };

    contexts
        .into_iter()
        .filter_map(|variant| {
            let table = model.mapping.table_for(variant.as_deref())?.to_string();
            let spec = decode_spec(alias, model, variant.as_deref());
            let mut columns = Vec::new();
            push_spec_columns(&mut columns, alias, &spec);

            Some((
                SelectStatement {
                    table,
                    alias: alias.to_string(),
                    joins: Vec::new(),
                    columns,
                    filter: Filter::key_eq(alias, model.mapping.key_column.clone(), id.clone()),
                },
                spec,
            ))
        })
        .collect()
}

/// Decode one element-collection row.
fn decode_element(ct: &CollectionTable, row: &Row) -> Element {
    let embedded = ct.columns.iter().any(|(_, _, member)| member.is_some());
    if embedded {
        let mut members = BTreeMap::new();
        for (column, _, member) in &ct.columns {
            if let Some(member) = member
                && let Some(value) = row.get(column)
                && !value.is_null()
            {
                members.insert(member.clone(), value.clone());
            }
        }
        Element::Embedded(members)
    } else {
        let value = ct
            .columns
            .first()
            .and_then(|(column, _, _)| row.get(column))
            .cloned()
            .unwrap_or(Value::Null);
        Element::Scalar(value)
    }
}
