use crate::{
    db::{Db, MemoryProvider},
    error::{ErrorKind, QueryErrorKind, SessionErrorKind},
};
use amberdb_config::Config;
use amberdb_core::{session::EntityInstance, value::Value};
use amberdb_schema::{
    build::{Schema, SchemaBuilder},
    node::{AttributeDef, EntityDef, IdentityDef, RelationDef},
    types::AttributeKind,
};

fn schema() -> Schema {
    SchemaBuilder::new()
        .entity(
            EntityDef::new("Member", IdentityDef::allocated("id"))
                .attribute(AttributeDef::new("name", AttributeKind::Text))
                .attribute(AttributeDef::new("age", AttributeKind::Int).nullable())
                .relation(RelationDef::many_to_one("team", "Team")),
        )
        .entity(
            EntityDef::new("Team", IdentityDef::allocated("id"))
                .attribute(AttributeDef::new("name", AttributeKind::Text))
                .relation(RelationDef::one_to_many("members", "Member", "team")),
        )
        .build()
        .unwrap()
}

fn config() -> Config {
    Config::from_toml(
        r#"
        [datasource]
        address = "mem://local"
        schema = "shop"
        "#,
    )
    .unwrap()
}

fn db() -> Db {
    let db = Db::new(schema(), config(), MemoryProvider::new());
    db.initialize_store().unwrap();

    db
}

fn member(name: &str, age: i64) -> amberdb_core::session::SharedInstance {
    let mut m = EntityInstance::new("Member");
    m.set("name", name);
    m.set("age", age);

    m.into_shared()
}

#[test]
fn data_survives_across_sessions() {
    let db = db();

    let id = {
        let mut session = db.open().unwrap();
        session.begin().unwrap();
        let m = member("member1", 20);
        session.persist(&m).unwrap();
        session.commit().unwrap();
        let id = m.borrow().identity().cloned().unwrap();
        session.close();
        id
    };

    let mut session = db.open().unwrap();
    let reread = session.find("Member", &id).unwrap().unwrap();
    assert_eq!(
        reread.borrow().get("name"),
        Some(&Value::Text("member1".to_string()))
    );
    session.close();
}

#[test]
fn query_builder_binds_and_lists() {
    let db = db();
    let mut session = db.open().unwrap();
    session.begin().unwrap();
    for (name, age) in [("a", 20i64), ("b", 30)] {
        session.persist(&member(name, age)).unwrap();
    }
    session.flush().unwrap();

    let young = session
        .query("select m from Member m where m.age < :cutoff")
        .unwrap()
        .bind("cutoff", 25i64)
        .list()
        .unwrap();
    assert_eq!(young.len(), 1);

    let names = session
        .query("select m.name, m.age from Member m")
        .unwrap()
        .scalars()
        .unwrap();
    assert_eq!(names.len(), 2);
    assert_eq!(names[0].len(), 2);

    session.rollback().unwrap();
    session.close();
}

#[test]
fn named_queries_register_and_run() {
    let mut db = Db::new(schema(), config(), MemoryProvider::new());
    db.initialize_store().unwrap();
    db.register_query(
        "Member.byAge",
        "select m from Member m where m.age = :age",
    )
    .unwrap();

    let err = db
        .register_query("Member.bad", "select m from Member m where m.nope = 1")
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Query(QueryErrorKind::Semantic));

    let mut session = db.open().unwrap();
    session.begin().unwrap();
    session.persist(&member("a", 20)).unwrap();
    session.flush().unwrap();

    let matched = session
        .named("Member.byAge")
        .unwrap()
        .bind("age", 20i64)
        .list()
        .unwrap();
    assert_eq!(matched.len(), 1);

    let err = session.named("Member.missing").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Query(QueryErrorKind::UnknownName));

    session.rollback().unwrap();
    session.close();
}

#[test]
fn bulk_update_returns_affected_count() {
    let db = db();
    let mut session = db.open().unwrap();
    session.begin().unwrap();
    for name in ["a", "b", "c"] {
        session.persist(&member(name, 20)).unwrap();
    }
    session.flush().unwrap();

    let affected = session
        .query("update Member m set m.age = 30 where m.age = 20")
        .unwrap()
        .execute()
        .unwrap();
    assert_eq!(affected, 3);

    session.commit().unwrap();
    session.close();
}

#[test]
fn syntax_errors_map_to_the_public_taxonomy() {
    let db = db();
    let mut session = db.open().unwrap();

    let err = session.query("selec m from Member m").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Query(QueryErrorKind::Syntax));

    let err = session.query("select m from Ghost m").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Query(QueryErrorKind::Semantic));

    session.close();
}

#[test]
fn closed_sessions_reject_operations() {
    let db = db();
    let mut session = db.open().unwrap();
    session.close();

    let err = session.persist(&member("a", 20)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Session(SessionErrorKind::Closed));
}

#[test]
fn public_errors_serialize_round_trip() {
    let db = db();
    let mut session = db.open().unwrap();
    let err = session.query("selec").unwrap_err();
    session.close();

    let json = serde_json::to_string(&err).unwrap();
    let back: crate::error::Error = serde_json::from_str(&json).unwrap();
    assert_eq!(back.kind, err.kind);
    assert_eq!(back.message, err.message);
}

#[test]
fn mapping_errors_surface_at_build_time() {
    let err = SchemaBuilder::new()
        .entity(
            EntityDef::new("Member", IdentityDef::allocated("id"))
                .relation(RelationDef::many_to_one("team", "Ghost")),
        )
        .build()
        .unwrap_err();

    let err: crate::error::Error = err.into();
    assert_eq!(err.kind, ErrorKind::Mapping);
}

#[test]
fn lifecycle_misuse_maps_to_lifecycle_kind() {
    let db = db();
    let mut session = db.open().unwrap();

    let err = session.commit().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Lifecycle);

    session.begin().unwrap();
    let err = session.begin().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Lifecycle);

    session.rollback().unwrap();
    session.close();
}

#[test]
fn debug_sessions_render_statements() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::level_filters::LevelFilter::DEBUG)
        .try_init()
        .ok();

    let config = Config::from_toml(
        r#"
        [datasource]
        address = "mem://local"
        schema = "shop"

        [session]
        debug = true
        "#,
    )
    .unwrap();
    let db = Db::new(schema(), config, MemoryProvider::new());
    db.initialize_store().unwrap();

    let mut session = db.open().unwrap();
    session.begin().unwrap();
    session.persist(&member("member1", 20)).unwrap();
    session.commit().unwrap();
    session.close();
}

#[test]
fn single_returns_first_or_none() {
    let db = db();
    let mut session = db.open().unwrap();
    session.begin().unwrap();

    let none = session
        .query("select m from Member m")
        .unwrap()
        .single()
        .unwrap();
    assert!(none.is_none());

    session.persist(&member("a", 20)).unwrap();
    let one = session
        .query("select m from Member m")
        .unwrap()
        .single()
        .unwrap();
    assert!(one.is_some());

    session.rollback().unwrap();
    session.close();
}
