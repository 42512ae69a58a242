use crate::{
    context::{DbContext, LifecycleError, TxState},
    query::Bindings,
    session::{Session, SessionError},
    sql::Statement,
    store::{Outcome, RelationalStore, StoreError, memory::MemoryStore},
    test_fixtures::{bootstrapped_store, member, shop_schema},
    value::Value,
};
use std::sync::Arc;

fn context() -> DbContext {
    let schema = Arc::new(shop_schema());
    let store = bootstrapped_store(&schema);

    DbContext::new(Session::new(schema, Box::new(store)))
}

#[test]
fn follows_the_happy_path_state_machine() {
    let mut ctx = context();
    assert_eq!(ctx.state(), TxState::Inactive);

    ctx.begin().unwrap();
    assert_eq!(ctx.state(), TxState::Active);

    ctx.session().persist(&member("member1", 20)).unwrap();
    ctx.commit().unwrap();
    assert_eq!(ctx.state(), TxState::Committed);

    ctx.close();
    assert_eq!(ctx.state(), TxState::Closed);
}

#[test]
fn commit_implies_flush() {
    let mut ctx = context();
    ctx.begin().unwrap();
    let m = member("member1", 20);
    ctx.session().persist(&m).unwrap();
    ctx.commit().unwrap();

    assert!(
        m.borrow().identity().is_some(),
        "commit must flush buffered inserts"
    );
}

#[test]
fn begin_is_only_valid_while_inactive() {
    let mut ctx = context();
    ctx.begin().unwrap();

    let err = ctx.begin().unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::InvalidTransition { op: "begin", .. }
    ));
}

#[test]
fn commit_and_rollback_require_an_active_transaction() {
    let mut ctx = context();

    assert!(matches!(
        ctx.commit().unwrap_err(),
        LifecycleError::InvalidTransition { op: "commit", .. }
    ));
    assert!(matches!(
        ctx.rollback().unwrap_err(),
        LifecycleError::InvalidTransition { op: "rollback", .. }
    ));

    ctx.begin().unwrap();
    ctx.commit().unwrap();
    assert!(matches!(
        ctx.commit().unwrap_err(),
        LifecycleError::InvalidTransition { .. }
    ));
}

#[test]
fn rollback_discards_buffered_writes() {
    let mut ctx = context();
    ctx.begin().unwrap();

    ctx.session().persist(&member("member1", 20)).unwrap();
    ctx.session().flush().unwrap();
    ctx.rollback().unwrap();
    assert_eq!(ctx.state(), TxState::RolledBack);

    // nothing persisted survives; a fresh read sees an empty table
    let members = ctx
        .session()
        .execute_text("select m from Member m", &Bindings::new())
        .unwrap()
        .into_entities()
        .unwrap();
    assert!(members.is_empty());
}

#[test]
fn operations_after_close_fail_with_the_closed_error() {
    let mut ctx = context();
    ctx.begin().unwrap();
    ctx.close();

    let err = ctx.session().persist(&member("member1", 20)).unwrap_err();
    assert!(matches!(err, SessionError::Closed));

    let err = ctx
        .session()
        .execute_text("select m from Member m", &Bindings::new())
        .unwrap_err();
    assert!(matches!(err, SessionError::Closed));

    // close is idempotent
    ctx.close();
    assert_eq!(ctx.state(), TxState::Closed);
}

///
/// CommitFailStore
///
/// Commits fail once; everything else delegates.
///

struct CommitFailStore {
    inner: MemoryStore,
    fail_commit: bool,
}

impl RelationalStore for CommitFailStore {
    fn begin(&mut self) -> Result<(), StoreError> {
        self.inner.begin()
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if self.fail_commit {
            self.fail_commit = false;
            return Err(StoreError::Backend("connection dropped".to_string()));
        }
        self.inner.commit()
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.inner.rollback()
    }

    fn execute(&mut self, statement: &Statement) -> Result<Outcome, StoreError> {
        self.inner.execute(statement)
    }
}

#[test]
fn a_failed_commit_rolls_back_and_surfaces_the_original_cause() {
    let schema = Arc::new(shop_schema());
    let store = CommitFailStore {
        inner: bootstrapped_store(&schema),
        fail_commit: true,
    };
    let mut ctx = DbContext::new(Session::new(schema, Box::new(store)));

    ctx.begin().unwrap();
    ctx.session().persist(&member("member1", 20)).unwrap();

    let err = ctx.commit().unwrap_err();
    assert!(
        matches!(
            &err,
            LifecycleError::Store(StoreError::Backend(msg)) if msg == "connection dropped"
        ),
        "the original failure must surface, got {err:?}"
    );
    assert_eq!(ctx.state(), TxState::RolledBack);

    // no partial write is visible afterwards
    let members = ctx
        .session()
        .execute_text("select m from Member m", &Bindings::new())
        .unwrap()
        .into_entities()
        .unwrap();
    assert!(members.is_empty());
}

#[test]
fn close_during_active_transaction_rolls_back() {
    let mut ctx = context();
    ctx.begin().unwrap();
    ctx.session().persist(&member("member1", 20)).unwrap();
    ctx.session().flush().unwrap();

    ctx.close();
    assert_eq!(ctx.state(), TxState::Closed);
}

#[test]
fn find_after_rollback_rereads_storage() {
    let mut ctx = context();
    ctx.begin().unwrap();

    let m = member("member1", 20);
    ctx.session().persist(&m).unwrap();
    ctx.session().flush().unwrap();
    let id = m.borrow().identity().cloned().unwrap();

    ctx.rollback().unwrap();

    assert!(
        ctx.session().find("Member", &id).unwrap().is_none(),
        "rolled-back inserts must not be found"
    );
    assert_eq!(id, Value::Int(1));
}