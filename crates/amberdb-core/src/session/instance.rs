use crate::value::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Shared handle to one entity instance. The session's identity map
/// guarantees at most one live handle per (entity, identity), so handle
/// equality (`Rc::ptr_eq`) is instance identity within a session.
pub type SharedInstance = Rc<RefCell<EntityInstance>>;

///
/// AssocValue
///
/// State of one single-valued association slot.
///

#[derive(Clone, Debug, Default)]
pub enum AssocValue {
    /// No target.
    #[default]
    Null,

    /// Target exists in storage but was not materialized; the foreign
    /// key is known.
    Unloaded(Value),

    /// Target materialized in this session.
    Loaded(SharedInstance),
}

impl AssocValue {
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }
}

///
/// CollectionValue
///
/// State of one to-many association slot.
///

#[derive(Clone, Debug, Default)]
pub enum CollectionValue {
    /// Not fetched; membership unknown.
    #[default]
    Unloaded,

    Loaded(Vec<SharedInstance>),
}

impl CollectionValue {
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }
}

///
/// Element
///
/// One member of an element collection: a bare value or an embedded
/// value group. Elements carry no identity and are owned exclusively by
/// their instance.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Element {
    Scalar(Value),
    Embedded(BTreeMap<String, Value>),
}

///
/// EntityInstance
///
/// A dynamic entity record. Attributes are addressed by logical path
/// (`"age"`, `"homeAddress.city"`); the registry decides what the paths
/// mean and where they live physically.
///

#[derive(Debug, Default)]
pub struct EntityInstance {
    entity: String,
    variant: Option<String>,
    identity: Option<Value>,
    attributes: BTreeMap<String, Value>,
    associations: BTreeMap<String, AssocValue>,
    collections: BTreeMap<String, CollectionValue>,
    elements: BTreeMap<String, Vec<Element>>,
}

impl EntityInstance {
    #[must_use]
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            ..Self::default()
        }
    }

    /// An instance of one concrete variant of a polymorphic entity.
    #[must_use]
    pub fn new_variant(entity: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            variant: Some(variant.into()),
            ..Self::default()
        }
    }

    /// Wrap into the shared handle form the session works with.
    #[must_use]
    pub fn into_shared(self) -> SharedInstance {
        Rc::new(RefCell::new(self))
    }

    // ------------------------------------------------------------------
    // Identity and shape
    // ------------------------------------------------------------------

    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }

    #[must_use]
    pub fn variant(&self) -> Option<&str> {
        self.variant.as_deref()
    }

    #[must_use]
    pub const fn identity(&self) -> Option<&Value> {
        self.identity.as_ref()
    }

    pub(crate) fn set_identity(&mut self, identity: Value) {
        self.identity = Some(identity);
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.attributes.get(path)
    }

    pub fn set(&mut self, path: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(path.into(), value.into());
    }

    pub(crate) fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    // ------------------------------------------------------------------
    // Associations
    // ------------------------------------------------------------------

    /// Current association state; a never-touched slot reads as `Null`.
    /// Returns a clone: states are cheap handles.
    #[must_use]
    pub fn assoc(&self, relation: &str) -> AssocValue {
        self.associations.get(relation).cloned().unwrap_or_default()
    }

    /// Point a single-valued association at a target (or clear it).
    pub fn set_assoc(&mut self, relation: impl Into<String>, target: Option<SharedInstance>) {
        let state = target.map_or(AssocValue::Null, AssocValue::Loaded);
        self.associations.insert(relation.into(), state);
    }

    pub(crate) fn set_assoc_state(&mut self, relation: impl Into<String>, state: AssocValue) {
        self.associations.insert(relation.into(), state);
    }

    /// Foreign-key value this association currently implies. `None`
    /// when a loaded target has no identity yet.
    pub(crate) fn assoc_key(&self, relation: &str) -> Option<Value> {
        match self.assoc(relation) {
            AssocValue::Null => Some(Value::Null),
            AssocValue::Unloaded(key) => Some(key),
            AssocValue::Loaded(target) => target.borrow().identity.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Collections (to-many associations)
    // ------------------------------------------------------------------

    /// Current collection state; a never-touched slot reads as
    /// `Unloaded`. Returns a clone: members are cheap handles.
    #[must_use]
    pub fn collection(&self, relation: &str) -> CollectionValue {
        self.collections.get(relation).cloned().unwrap_or_default()
    }

    pub(crate) fn set_collection(&mut self, relation: impl Into<String>, state: CollectionValue) {
        self.collections.insert(relation.into(), state);
    }

    /// Add a child to a loaded collection; loads an empty collection on
    /// first use for new instances.
    pub fn collection_add(&mut self, relation: impl Into<String>, child: SharedInstance) {
        let slot = self
            .collections
            .entry(relation.into())
            .or_insert_with(|| CollectionValue::Loaded(Vec::new()));
        match slot {
            CollectionValue::Loaded(children) => {
                if !children.iter().any(|c| Rc::ptr_eq(c, &child)) {
                    children.push(child);
                }
            }
            CollectionValue::Unloaded => {
                *slot = CollectionValue::Loaded(vec![child]);
            }
        }
    }

    /// Remove a child from a loaded collection. Returns true when the
    /// child was present.
    pub fn collection_remove(&mut self, relation: &str, child: &SharedInstance) -> bool {
        match self.collections.get_mut(relation) {
            Some(CollectionValue::Loaded(children)) => {
                let before = children.len();
                children.retain(|c| !Rc::ptr_eq(c, child));
                children.len() != before
            }
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // Element collections
    // ------------------------------------------------------------------

    #[must_use]
    pub fn elements(&self, collection: &str) -> &[Element] {
        self.elements.get(collection).map_or(&[], Vec::as_slice)
    }

    pub fn set_elements(&mut self, collection: impl Into<String>, elements: Vec<Element>) {
        self.elements.insert(collection.into(), elements);
    }

    pub fn element_add(&mut self, collection: impl Into<String>, element: Element) {
        self.elements.entry(collection.into()).or_default().push(element);
    }

    pub fn element_remove(&mut self, collection: &str, element: &Element) -> bool {
        match self.elements.get_mut(collection) {
            Some(elements) => {
                let before = elements.len();
                if let Some(pos) = elements.iter().position(|e| e == element) {
                    elements.remove(pos);
                }
                elements.len() != before
            }
            None => false,
        }
    }

    pub(crate) fn element_map(&self) -> &BTreeMap<String, Vec<Element>> {
        &self.elements
    }
}
