use crate::{
    sql::{Cmp, ColumnRef, ColumnSpec, Filter, Join, KeyMode, SelectColumn, SelectStatement,
        Statement},
    store::{Outcome, RelationalStore, StoreError, memory::MemoryStore},
    value::Value,
};
use amberdb_schema::types::AttributeKind;

fn member_table() -> Statement {
    Statement::CreateTable {
        table: "member".to_string(),
        key_column: "id".to_string(),
        key_kind: AttributeKind::Int,
        columns: vec![
            ColumnSpec {
                column: "name".to_string(),
                kind: AttributeKind::Text,
                nullable: false,
            },
            ColumnSpec {
                column: "age".to_string(),
                kind: AttributeKind::Int,
                nullable: true,
            },
            ColumnSpec {
                column: "team_id".to_string(),
                kind: AttributeKind::Int,
                nullable: true,
            },
        ],
    }
}

fn team_table() -> Statement {
    Statement::CreateTable {
        table: "team".to_string(),
        key_column: "id".to_string(),
        key_kind: AttributeKind::Int,
        columns: vec![ColumnSpec {
            column: "name".to_string(),
            kind: AttributeKind::Text,
            nullable: false,
        }],
    }
}

fn insert_member(store: &mut MemoryStore, name: &str, age: i64, team: Option<i64>) -> Value {
    let outcome = store
        .execute(&Statement::Insert {
            table: "member".to_string(),
            key: KeyMode::Allocate,
            columns: vec![
                ("name".to_string(), Value::Text(name.to_string())),
                ("age".to_string(), Value::Int(age)),
                (
                    "team_id".to_string(),
                    team.map_or(Value::Null, Value::Int),
                ),
            ],
        })
        .unwrap();

    match outcome {
        Outcome::AllocatedKey(key) => key,
        other => panic!("expected allocated key, got {other:?}"),
    }
}

#[test]
fn allocates_sequential_keys() {
    let mut store = MemoryStore::new();
    store.execute(&member_table()).unwrap();

    assert_eq!(insert_member(&mut store, "a", 20, None), Value::Int(1));
    assert_eq!(insert_member(&mut store, "b", 20, None), Value::Int(2));
}

#[test]
fn rejects_duplicate_provided_keys() {
    let mut store = MemoryStore::new();
    store.execute(&team_table()).unwrap();

    let insert = Statement::Insert {
        table: "team".to_string(),
        key: KeyMode::Provided(Value::Int(7)),
        columns: vec![("name".to_string(), Value::Text("TeamA".to_string()))],
    };
    store.execute(&insert).unwrap();

    assert!(matches!(
        store.execute(&insert),
        Err(StoreError::DuplicateKey { .. })
    ));
}

#[test]
fn rejects_null_in_required_column() {
    let mut store = MemoryStore::new();
    store.execute(&team_table()).unwrap();

    let err = store
        .execute(&Statement::Insert {
            table: "team".to_string(),
            key: KeyMode::Allocate,
            columns: vec![("name".to_string(), Value::Null)],
        })
        .unwrap_err();

    assert!(matches!(err, StoreError::NullViolation { .. }));
}

#[test]
fn update_counts_only_matching_rows() {
    let mut store = MemoryStore::new();
    store.execute(&member_table()).unwrap();
    insert_member(&mut store, "a", 20, None);
    insert_member(&mut store, "b", 20, None);
    insert_member(&mut store, "c", 45, None);

    let update = Statement::Update {
        table: "member".to_string(),
        assignments: vec![("age".to_string(), Value::Int(30))],
        filter: Filter::Cmp {
            column: ColumnRef::new("m", "age"),
            op: Cmp::Eq,
            value: Value::Int(20),
        },
    };

    assert_eq!(
        store.execute(&update).unwrap(),
        Outcome::Affected(2),
        "first pass updates both twenty-year-olds"
    );
    assert_eq!(
        store.execute(&update).unwrap(),
        Outcome::Affected(0),
        "second pass finds nothing left to update"
    );
}

#[test]
fn select_joins_rows_across_tables() {
    let mut store = MemoryStore::new();
    store.execute(&member_table()).unwrap();
    store.execute(&team_table()).unwrap();

    store
        .execute(&Statement::Insert {
            table: "team".to_string(),
            key: KeyMode::Provided(Value::Int(1)),
            columns: vec![("name".to_string(), Value::Text("TeamA".to_string()))],
        })
        .unwrap();
    insert_member(&mut store, "in_team", 20, Some(1));
    insert_member(&mut store, "no_team", 20, None);

    let select = Statement::Select(SelectStatement {
        table: "member".to_string(),
        alias: "m".to_string(),
        joins: vec![Join {
            table: "team".to_string(),
            alias: "t".to_string(),
            on: Filter::ColumnCmp {
                left: ColumnRef::new("m", "team_id"),
                op: Cmp::Eq,
                right: ColumnRef::new("t", "id"),
            },
        }],
        columns: vec![
            SelectColumn {
                source: ColumnRef::new("m", "name"),
                label: "m.name".to_string(),
            },
            SelectColumn {
                source: ColumnRef::new("t", "name"),
                label: "t.name".to_string(),
            },
        ],
        filter: Filter::True,
    });

    let rows = store.execute(&select).unwrap().into_rows().unwrap();
    assert_eq!(rows.len(), 1, "inner join drops the memberless row");
    assert_eq!(
        rows[0].get("t.name"),
        Some(&Value::Text("TeamA".to_string()))
    );
}

#[test]
fn rollback_restores_pre_transaction_state() {
    let mut store = MemoryStore::new();
    store.execute(&member_table()).unwrap();
    insert_member(&mut store, "kept", 20, None);

    store.begin().unwrap();
    insert_member(&mut store, "discarded", 30, None);
    assert_eq!(store.row_count("member"), Some(2));

    store.rollback().unwrap();
    assert_eq!(store.row_count("member"), Some(1));
}

#[test]
fn commit_keeps_transaction_writes() {
    let mut store = MemoryStore::new();
    store.execute(&member_table()).unwrap();

    store.begin().unwrap();
    insert_member(&mut store, "kept", 20, None);
    store.commit().unwrap();

    assert_eq!(store.row_count("member"), Some(1));
}

#[test]
fn transaction_misuse_is_rejected() {
    let mut store = MemoryStore::new();

    assert_eq!(store.commit(), Err(StoreError::NoActiveTransaction));
    assert_eq!(store.rollback(), Err(StoreError::NoActiveTransaction));

    store.begin().unwrap();
    assert_eq!(store.begin(), Err(StoreError::NestedTransaction));
}

#[test]
fn key_allocation_requires_integer_keys() {
    let mut store = MemoryStore::new();
    store
        .execute(&Statement::CreateTable {
            table: "tagged".to_string(),
            key_column: "id".to_string(),
            key_kind: AttributeKind::Ulid,
            columns: vec![],
        })
        .unwrap();

    let err = store
        .execute(&Statement::Insert {
            table: "tagged".to_string(),
            key: KeyMode::Allocate,
            columns: vec![],
        })
        .unwrap_err();

    assert!(matches!(err, StoreError::CannotAllocateKey { .. }));
}
