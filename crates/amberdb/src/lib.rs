//! AmberDB — a single-node object/relational session and mapping layer.
//!
//! ## Crate layout
//! - `config`: connection and session configuration (TOML).
//! - `core`: runtime — values, statements, store boundary, query
//!   translation, the unit-of-work session, and the lifecycle machine.
//! - `schema`: entity registry, builder, and physical mapping.
//!
//! This crate is the public surface: the session factory ([`Db`]), the
//! session facade ([`db::DbSession`]), and a stable error taxonomy.

pub use amberdb_config as config;
pub use amberdb_core as core;
pub use amberdb_schema as schema;

pub mod db;
pub mod error;

/// Workspace version re-export for downstream tooling/tests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use db::Db;
pub use error::Error;

///
/// Prelude
///

pub mod prelude {
    pub use crate::{
        Db, Error,
        db::{DbSession, MemoryProvider, SessionQuery, StoreProvider},
    };
    pub use amberdb_config::Config;
    pub use amberdb_core::{
        session::{AssocValue, CollectionValue, Element, EntityInstance, SharedInstance},
        value::Value,
    };
    pub use amberdb_schema::prelude::*;
}
