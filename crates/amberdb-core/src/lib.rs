//! Core runtime for AmberDB: values, the relational statement IR, the
//! store boundary, the query translator, the unit-of-work session, and
//! the persistence lifecycle.

pub mod context;
pub mod error;
pub mod obs;
pub mod query;
pub mod session;
pub mod sql;
pub mod store;
pub mod value;

// test
#[cfg(test)]
pub(crate) mod test_fixtures;

///
/// Prelude
///
/// Domain vocabulary only. No errors, stores, or executors.
///

pub mod prelude {
    pub use crate::{
        query::Bindings,
        session::{EntityInstance, Session, SharedInstance},
        value::Value,
    };
    pub use amberdb_schema::build::Schema;
}
