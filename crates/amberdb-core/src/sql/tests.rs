use crate::{
    sql::{
        Cmp, ColumnRef, Filter, Join, KeyMode, SelectColumn, SelectStatement, Statement,
        bootstrap_statements, render::render,
    },
    value::Value,
};
use amberdb_schema::{
    build::SchemaBuilder,
    node::{AttributeDef, EntityDef, IdentityDef, RelationDef},
    types::AttributeKind,
};

#[test]
fn renders_update_with_filter() {
    let statement = Statement::Update {
        table: "member".to_string(),
        assignments: vec![("age".to_string(), Value::Int(30))],
        filter: Filter::Cmp {
            column: ColumnRef::new("m", "age"),
            op: Cmp::Eq,
            value: Value::Int(20),
        },
    };

    assert_eq!(
        render(&statement),
        "update member set age = 30 where m.age = 20"
    );
}

#[test]
fn renders_select_with_join() {
    let statement = Statement::Select(SelectStatement {
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
        columns: vec![SelectColumn {
            source: ColumnRef::new("m", "id"),
            label: "m.id".to_string(),
        }],
        filter: Filter::True,
    });

    assert_eq!(
        render(&statement),
        "select m.id as \"m.id\" from member m join team t on m.team_id = t.id"
    );
}

#[test]
fn renders_text_literals_with_doubled_quotes() {
    let statement = Statement::Insert {
        table: "team".to_string(),
        key: KeyMode::Allocate,
        columns: vec![("name".to_string(), Value::Text("O'Brien".to_string()))],
    };

    assert!(render(&statement).contains("'O''Brien'"));
}

#[test]
fn cmp_eval_covers_all_operators() {
    use std::cmp::Ordering;

    assert!(Cmp::Eq.eval(Ordering::Equal));
    assert!(Cmp::Ne.eval(Ordering::Less));
    assert!(Cmp::Lt.eval(Ordering::Less));
    assert!(Cmp::Lte.eval(Ordering::Equal));
    assert!(Cmp::Gt.eval(Ordering::Greater));
    assert!(!Cmp::Gte.eval(Ordering::Less));
}

#[test]
fn filter_and_flattens_true() {
    let filter = Filter::True.and(Filter::key_eq("m", "id", Value::Int(1)));
    assert!(matches!(filter, Filter::Cmp { .. }));

    let filter = filter.and(Filter::True);
    assert!(matches!(filter, Filter::Cmp { .. }));
}

#[test]
fn statement_ir_serializes_for_diagnostics() {
    let statement = Statement::Update {
        table: "member".to_string(),
        assignments: vec![("age".to_string(), Value::Int(30))],
        filter: Filter::True,
    };

    let json = serde_json::to_value(&statement).unwrap();
    assert!(json.get("Update").is_some());
}

#[test]
fn bootstrap_emits_entity_and_collection_tables() {
    let schema = SchemaBuilder::new()
        .entity(
            EntityDef::new("Member", IdentityDef::allocated("id"))
                .attribute(AttributeDef::new("name", AttributeKind::Text))
                .relation(RelationDef::many_to_one("team", "Team"))
                .collection(amberdb_schema::node::ElementCollectionDef::scalar(
                    "favoriteFoods",
                    AttributeKind::Text,
                )),
        )
        .entity(
            EntityDef::new("Team", IdentityDef::allocated("id"))
                .attribute(AttributeDef::new("name", AttributeKind::Text))
                .relation(RelationDef::one_to_many("members", "Member", "team")),
        )
        .build()
        .unwrap();

    let statements = bootstrap_statements(&schema);
    let tables: Vec<&str> = statements
        .iter()
        .map(|s| match s {
            Statement::CreateTable { table, .. } => table.as_str(),
            _ => panic!("bootstrap must only emit create table"),
        })
        .collect();

    assert_eq!(tables, vec!["member", "member_favoriteFoods", "team"]);
}
