mod attribute;
mod collection;
mod entity;
mod relation;
mod variant;

pub use attribute::{AttributeDef, EmbeddedDef};
pub use collection::{ElementCollectionDef, ElementKind};
pub use entity::{EntityDef, IdentityDef};
pub use relation::{RelationDef, RelationSide};
pub use variant::VariantDef;
