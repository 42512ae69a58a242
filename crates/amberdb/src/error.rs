use amberdb_config::ConfigError;
use amberdb_core::{
    context::LifecycleError,
    error::InternalError,
    query::{QueryError, QuerySemanticError, QuerySyntaxError},
    session::{FlushError, SessionError},
    store::StoreError,
};
use amberdb_schema::build::{MappingError, MappingErrors};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

///
/// Error
///
/// Public error type with a stable kind + origin taxonomy. Every core
/// error folds into this at the facade boundary.
///

#[derive(Clone, Debug, Deserialize, Serialize, ThisError)]
#[error("{message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub origin: ErrorOrigin,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            kind,
            origin,
            message: message.into(),
        }
    }

    /// A query invoked by a name nothing was registered under.
    pub(crate) fn unknown_named_query(name: &str) -> Self {
        Self::new(
            ErrorKind::Query(QueryErrorKind::UnknownName),
            ErrorOrigin::Query,
            format!("no query registered under '{name}'"),
        )
    }
}

///
/// ErrorKind
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ErrorKind {
    Config,
    Mapping,
    Query(QueryErrorKind),
    Session(SessionErrorKind),

    /// Flush failed; the session is unusable and must be discarded.
    Flush,

    Lifecycle,
    Store,

    /// The caller cannot remediate this.
    Internal,
}

///
/// QueryErrorKind
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum QueryErrorKind {
    /// Malformed text, rejected by the tokenizer or parser.
    Syntax,

    /// Well-formed text referencing unknown entities, attributes, or
    /// parameters, or combining them in unsupported ways.
    Semantic,

    /// Named-query invocation with an unregistered name.
    UnknownName,
}

///
/// SessionErrorKind
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum SessionErrorKind {
    /// Use after close.
    Closed,

    /// Re-entrant use of one session.
    ConcurrentAccess,

    /// Use after a failed flush.
    Poisoned,

    /// The instance is unknown to this session.
    NotManaged,

    /// The instance does not match any registered entity shape.
    InvalidInstance,
}

///
/// ErrorOrigin
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ErrorOrigin {
    Config,
    Schema,
    Query,
    Session,
    Store,
    Lifecycle,
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::new(ErrorKind::Config, ErrorOrigin::Config, err.to_string())
    }
}

impl From<MappingError> for Error {
    fn from(err: MappingError) -> Self {
        Self::new(ErrorKind::Mapping, ErrorOrigin::Schema, err.to_string())
    }
}

impl From<MappingErrors> for Error {
    fn from(err: MappingErrors) -> Self {
        Self::new(ErrorKind::Mapping, ErrorOrigin::Schema, err.to_string())
    }
}

impl From<QuerySyntaxError> for Error {
    fn from(err: QuerySyntaxError) -> Self {
        Self::new(
            ErrorKind::Query(QueryErrorKind::Syntax),
            ErrorOrigin::Query,
            err.to_string(),
        )
    }
}

impl From<QuerySemanticError> for Error {
    fn from(err: QuerySemanticError) -> Self {
        Self::new(
            ErrorKind::Query(QueryErrorKind::Semantic),
            ErrorOrigin::Query,
            err.to_string(),
        )
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::Syntax(err) => err.into(),
            QueryError::Semantic(err) => err.into(),
        }
    }
}

impl From<FlushError> for Error {
    fn from(err: FlushError) -> Self {
        Self::new(ErrorKind::Flush, ErrorOrigin::Session, err.to_string())
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Self::new(ErrorKind::Store, ErrorOrigin::Store, err.to_string())
    }
}

impl From<InternalError> for Error {
    fn from(err: InternalError) -> Self {
        Self::new(ErrorKind::Internal, ErrorOrigin::Session, err.to_string())
    }
}

impl From<SessionError> for Error {
    fn from(err: SessionError) -> Self {
        let message = err.to_string();
        match err {
            SessionError::Closed => Self::new(
                ErrorKind::Session(SessionErrorKind::Closed),
                ErrorOrigin::Session,
                message,
            ),
            SessionError::ConcurrentAccess => Self::new(
                ErrorKind::Session(SessionErrorKind::ConcurrentAccess),
                ErrorOrigin::Session,
                message,
            ),
            SessionError::Poisoned => Self::new(
                ErrorKind::Session(SessionErrorKind::Poisoned),
                ErrorOrigin::Session,
                message,
            ),
            SessionError::NotManaged => Self::new(
                ErrorKind::Session(SessionErrorKind::NotManaged),
                ErrorOrigin::Session,
                message,
            ),
            SessionError::UnknownEntity { .. }
            | SessionError::VariantRequired { .. }
            | SessionError::UnknownVariant { .. } => Self::new(
                ErrorKind::Session(SessionErrorKind::InvalidInstance),
                ErrorOrigin::Session,
                message,
            ),
            SessionError::Query(err) => err.into(),
            SessionError::Flush(err) => err.into(),
            SessionError::Store(err) => err.into(),
            SessionError::Internal(err) => err.into(),
        }
    }
}

impl From<LifecycleError> for Error {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::InvalidTransition { .. } => Self::new(
                ErrorKind::Lifecycle,
                ErrorOrigin::Lifecycle,
                err.to_string(),
            ),
            LifecycleError::Store(err) => err.into(),
            LifecycleError::Session(err) => err.into(),
        }
    }
}
