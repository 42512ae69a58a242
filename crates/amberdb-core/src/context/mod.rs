//! Persistence lifecycle.
//!
//! Contract:
//! - `Inactive → (begin) → Active → (commit | rollback) → {Committed,
//!   RolledBack} → (close) → Closed`; `close` is valid from any state.
//! - `commit` flushes first; a flush or store failure rolls back fully
//!   and the *original* error surfaces — the rollback's own outcome is
//!   logged, never returned in its place.
//! - `rollback` discards every buffered write and detaches all cached
//!   state.
//! - Operations after `close` fail with the session's closed error.

#[cfg(test)]
mod tests;

use crate::{
    session::{Session, SessionError},
    store::StoreError,
};
use derive_more::Display;
use thiserror::Error as ThisError;

///
/// TxState
///

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum TxState {
    Inactive,
    Active,
    Committed,
    RolledBack,
    Closed,
}

///
/// LifecycleError
///

#[derive(Debug, ThisError)]
pub enum LifecycleError {
    #[error("'{op}' is not valid in transaction state {state}")]
    InvalidTransition { state: TxState, op: &'static str },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

///
/// DbContext
///
/// One session plus its transaction state machine. Owns the session for
/// its whole lifetime; dropping the context releases the connection.
///

pub struct DbContext {
    session: Session,
    state: TxState,
}

impl DbContext {
    #[must_use]
    pub const fn new(session: Session) -> Self {
        Self {
            session,
            state: TxState::Inactive,
        }
    }

    #[must_use]
    pub const fn state(&self) -> TxState {
        self.state
    }

    /// The underlying unit of work. Operations on it fail once the
    /// context is closed.
    pub const fn session(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Begin the transaction. Valid only while inactive.
    pub fn begin(&mut self) -> Result<(), LifecycleError> {
        if self.state != TxState::Inactive {
            return Err(LifecycleError::InvalidTransition {
                state: self.state,
                op: "begin",
            });
        }

        self.session.store_begin()?;
        self.state = TxState::Active;

        Ok(())
    }

    /// Flush and commit. On any failure the transaction rolls back and
    /// the original cause is returned.
    pub fn commit(&mut self) -> Result<(), LifecycleError> {
        if self.state != TxState::Active {
            return Err(LifecycleError::InvalidTransition {
                state: self.state,
                op: "commit",
            });
        }

        if let Err(flush_err) = self.session.flush() {
            self.abort_after_failure();
            return Err(flush_err.into());
        }

        if let Err(commit_err) = self.session.store_commit() {
            self.abort_after_failure();
            return Err(commit_err.into());
        }

        self.state = TxState::Committed;

        Ok(())
    }

    /// Discard every buffered write and roll the store back.
    pub fn rollback(&mut self) -> Result<(), LifecycleError> {
        if self.state != TxState::Active {
            return Err(LifecycleError::InvalidTransition {
                state: self.state,
                op: "rollback",
            });
        }

        self.session.discard_buffered();
        let outcome = self.session.store_rollback();
        self.state = TxState::RolledBack;

        outcome.map_err(Into::into)
    }

    /// Release the session. An active transaction rolls back first.
    /// Idempotent.
    pub fn close(&mut self) {
        if self.state == TxState::Closed {
            return;
        }

        if self.state == TxState::Active {
            self.session.discard_buffered();
            if let Err(err) = self.session.store_rollback() {
                tracing::warn!(error = %err, "rollback on close failed");
            }
        }

        self.session.mark_closed();
        self.state = TxState::Closed;
    }

    /// Roll back after a failed flush/commit, preserving the original
    /// error for the caller.
    fn abort_after_failure(&mut self) {
        self.session.discard_buffered();
        if let Err(rollback_err) = self.session.store_rollback() {
            tracing::warn!(error = %rollback_err, "rollback after failed commit also failed");
        }
        self.state = TxState::RolledBack;
    }
}
