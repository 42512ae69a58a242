//! Entity registry for AmberDB.
//!
//! Declarative entity descriptors (`node`) are registered on a
//! [`build::SchemaBuilder`], validated as a set, and resolved into an
//! immutable [`build::Schema`] carrying the physical mapping
//! (`physical`) every other layer reads from. Nothing here touches
//! storage; the registry is pure metadata.

pub mod build;
pub mod node;
pub mod physical;
pub mod types;

pub(crate) mod validate;

/// Maximum length for entity schema identifiers.
pub const MAX_ENTITY_NAME_LEN: usize = 64;

/// Maximum length for attribute/relation schema identifiers.
pub const MAX_MEMBER_NAME_LEN: usize = 64;

///
/// Prelude
///

pub mod prelude {
    pub use crate::{
        build::{MappingError, MappingErrors, Schema, SchemaBuilder},
        node::*,
        types::{
            AttributeKind, Cascade, FetchMode, IdentityStrategy, InheritanceStrategy, RelationKind,
        },
    };
    pub use serde::{Deserialize, Serialize};
}
