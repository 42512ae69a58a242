use crate::{
    query::{
        Bindings, Lowered, NamedQueries, Query, QueryError, QuerySemanticError,
        lower::lower,
        parse::parse,
        resolve::{ResolvedProjection, ResolvedQuery},
    },
    sql::{Filter, Statement, render::render},
    test_fixtures::shop_schema,
    value::Value,
};
use amberdb_schema::{
    build::SchemaBuilder,
    node::{AttributeDef, EntityDef, IdentityDef, VariantDef},
    types::{AttributeKind, InheritanceStrategy},
};
use proptest::prelude::*;

fn parse_and_resolve(text: &str) -> Result<Query, QueryError> {
    Query::parse(&shop_schema(), text)
}

// ------------------------------------------------------------------
// Syntax
// ------------------------------------------------------------------

#[test]
fn rejects_malformed_text_with_offsets() {
    let schema = shop_schema();

    for text in [
        "selec m from Member m",
        "select m from",
        "select m from Member m where",
        "select m from Member m where m.age ==",
        "select m from Member m where m.age = 'unterminated",
        "update Member m age = 3",
        "select m from Member m extra",
    ] {
        let err = Query::parse(&schema, text).unwrap_err();
        assert!(
            matches!(err, QueryError::Syntax(_)),
            "expected syntax error for {text:?}, got {err:?}"
        );
    }
}

#[test]
fn parses_quoted_strings_with_escapes() {
    let ast = parse("select m from Member m where m.name = 'O''Brien'").unwrap();
    let crate::query::ast::QueryAst::Select(select) = ast else {
        panic!("expected select");
    };
    let Some(crate::query::ast::PredicateAst::Cmp { rhs, .. }) = select.predicate else {
        panic!("expected comparison");
    };
    assert_eq!(
        rhs,
        crate::query::ast::ExprAst::Literal(Value::Text("O'Brien".to_string()))
    );
}

#[test]
fn keywords_are_case_insensitive() {
    assert!(parse_and_resolve("SELECT m FROM Member AS m WHERE m.age >= 20 AND NOT (m.name = 'x')").is_ok());
}

// ------------------------------------------------------------------
// Semantics
// ------------------------------------------------------------------

#[test]
fn rejects_unknown_entity_and_attribute() {
    let err = parse_and_resolve("select g from Ghost g").unwrap_err();
    assert!(matches!(
        err,
        QueryError::Semantic(QuerySemanticError::UnknownEntity { .. })
    ));

    let err = parse_and_resolve("select m from Member m where m.height = 3").unwrap_err();
    assert!(matches!(
        err,
        QueryError::Semantic(QuerySemanticError::UnknownAttribute { .. })
    ));
}

#[test]
fn rejects_join_over_non_association() {
    let err = parse_and_resolve("select m from Member m join m.name n").unwrap_err();
    assert!(matches!(
        err,
        QueryError::Semantic(QuerySemanticError::NotAnAssociation { .. })
    ));
}

#[test]
fn rejects_fetch_join_with_condition() {
    let err =
        parse_and_resolve("select m from Member m join fetch m.team t on t.name = 'A'").unwrap_err();
    assert!(matches!(
        err,
        QueryError::Semantic(QuerySemanticError::FetchWithCondition { .. })
    ));
}

#[test]
fn rejects_fetch_with_scalar_projection() {
    let err = parse_and_resolve("select m.name from Member m join fetch m.team t").unwrap_err();
    assert!(matches!(
        err,
        QueryError::Semantic(QuerySemanticError::FetchRequiresEntityProjection)
    ));
}

#[test]
fn rejects_identity_assignment() {
    let err = parse_and_resolve("update Member m set m.id = 9").unwrap_err();
    assert!(matches!(
        err,
        QueryError::Semantic(QuerySemanticError::IdentityAssignment { .. })
    ));
}

#[test]
fn rejects_type_mismatched_literals() {
    let err = parse_and_resolve("select m from Member m where m.age = 'twenty'").unwrap_err();
    assert!(matches!(
        err,
        QueryError::Semantic(QuerySemanticError::TypeMismatch { .. })
    ));
}

#[test]
fn resolves_embedded_paths_and_enum_literals() {
    assert!(parse_and_resolve("select m.workPeriod.startDate from Member m").is_ok());
    assert!(parse_and_resolve("select d from Delivery d where d.status = 'READY'").is_ok());

    let err = parse_and_resolve("select d from Delivery d where d.status = 'LOST'").unwrap_err();
    assert!(matches!(
        err,
        QueryError::Semantic(QuerySemanticError::TypeMismatch { .. })
    ));
}

// ------------------------------------------------------------------
// Lowering
// ------------------------------------------------------------------

#[test]
fn lowers_join_fetch_to_one_statement_with_decode_specs() {
    let schema = shop_schema();
    let query = Query::parse(&schema, "select m from Member m join fetch m.team t").unwrap();
    let Lowered::Select(select) = lower(&schema, query.resolved(), &Bindings::new()).unwrap()
    else {
        panic!("expected select lowering");
    };

    assert_eq!(select.units.len(), 1);
    let unit = &select.units[0];
    assert_eq!(
        render(&Statement::Select(unit.statement.clone()))
            .split(" from ")
            .nth(1)
            .unwrap(),
        "member m join team t on m.team_id = t.id"
    );
    assert!(unit.decode.contains_key("m"));
    assert!(unit.decode.contains_key("t"), "fetched alias must decode");
    assert_eq!(select.fetch.len(), 1);
}

#[test]
fn plain_join_does_not_decode_target() {
    let schema = shop_schema();
    let query = Query::parse(
        &schema,
        "select m from Member m join m.team t on t.name = 'TeamA'",
    )
    .unwrap();
    let Lowered::Select(select) = lower(&schema, query.resolved(), &Bindings::new()).unwrap()
    else {
        panic!("expected select lowering");
    };

    let unit = &select.units[0];
    assert!(unit.decode.contains_key("m"));
    assert!(!unit.decode.contains_key("t"));
    assert!(select.fetch.is_empty());
}

#[test]
fn lowers_named_parameters() {
    let schema = shop_schema();
    let query = Query::parse(&schema, "select m from Member m where m.age = :age").unwrap();

    let err = lower(&schema, query.resolved(), &Bindings::new()).unwrap_err();
    assert!(matches!(err, QuerySemanticError::UnboundParameter { .. }));

    let bindings = Bindings::new().bind("age", 20i64);
    let Lowered::Select(select) = lower(&schema, query.resolved(), &bindings).unwrap() else {
        panic!("expected select lowering");
    };
    assert!(matches!(
        &select.units[0].statement.filter,
        Filter::Cmp { value, .. } if *value == Value::Int(20)
    ));
}

#[test]
fn lowers_positional_parameters() {
    let schema = shop_schema();
    let query = Query::parse(&schema, "select m from Member m where m.name = ?1").unwrap();
    let bindings = Bindings::new().bind_positional(1, "member1");

    assert!(lower(&schema, query.resolved(), &bindings).is_ok());
}

#[test]
fn flips_operator_when_literal_is_on_the_left() {
    let schema = shop_schema();
    let query = Query::parse(&schema, "select m from Member m where 20 < m.age").unwrap();
    let Lowered::Select(select) = lower(&schema, query.resolved(), &Bindings::new()).unwrap()
    else {
        panic!("expected select lowering");
    };

    match &select.units[0].statement.filter {
        Filter::Cmp { op, value, .. } => {
            assert_eq!(*op, crate::sql::Cmp::Gt);
            assert_eq!(*value, Value::Int(20));
        }
        other => panic!("expected comparison filter, got {other:?}"),
    }
}

#[test]
fn lowers_bulk_update_against_single_table() {
    let schema = shop_schema();
    let query =
        Query::parse(&schema, "update Member m set m.age = 30 where m.age = 20").unwrap();
    assert!(query.is_bulk());

    let Lowered::Bulk(bulk) = lower(&schema, query.resolved(), &Bindings::new()).unwrap() else {
        panic!("expected bulk lowering");
    };
    assert_eq!(bulk.entity, "Member");
    assert_eq!(bulk.statements.len(), 1);
    assert_eq!(
        render(&bulk.statements[0]),
        "update member set age = 30 where m.age = 20"
    );
}

#[test]
fn bulk_statements_span_every_variant_table() {
    let schema = SchemaBuilder::new()
        .entity(
            EntityDef::new("Asset", IdentityDef::allocated("id"))
                .attribute(AttributeDef::new("label", AttributeKind::Text))
                .attribute(AttributeDef::new("worth", AttributeKind::Int).nullable())
                .inheritance(InheritanceStrategy::TablePerSubtype)
                .variant(VariantDef::new(
                    "Painting",
                    vec![AttributeDef::new("painter", AttributeKind::Text).nullable()],
                ))
                .variant(VariantDef::new(
                    "Sculpture",
                    vec![AttributeDef::new("material", AttributeKind::Text).nullable()],
                )),
        )
        .build()
        .unwrap();

    let query = Query::parse(&schema, "update Asset a set a.worth = 10").unwrap();
    let Lowered::Bulk(bulk) = lower(&schema, query.resolved(), &Bindings::new()).unwrap() else {
        panic!("expected bulk lowering");
    };
    assert_eq!(bulk.statements.len(), 2, "one update per variant table");

    // selects over the hierarchy also fan out per table
    let query = Query::parse(&schema, "select a from Asset a").unwrap();
    let Lowered::Select(select) = lower(&schema, query.resolved(), &Bindings::new()).unwrap()
    else {
        panic!("expected select lowering");
    };
    assert_eq!(select.units.len(), 2);

    // variant-specific attributes cannot cross the hierarchy
    let err = Query::parse(&schema, "select a from Asset a where a.painter = 'x'").unwrap_err();
    assert!(matches!(
        err,
        QueryError::Semantic(QuerySemanticError::AttributeNotShared { .. })
    ));
}

#[test]
fn scalar_projection_resolves_labels() {
    let schema = shop_schema();
    let query = Query::parse(&schema, "select m.name, m.age from Member m").unwrap();
    let ResolvedQuery::Select(select) = query.resolved() else {
        panic!("expected select");
    };
    let ResolvedProjection::Scalars(items) = &select.projection else {
        panic!("expected scalar projection");
    };

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].label, "m.name");
    assert_eq!(items[1].label, "m.age");
}

// ------------------------------------------------------------------
// Named queries
// ------------------------------------------------------------------

#[test]
fn named_queries_validate_eagerly() {
    let schema = shop_schema();
    let mut named = NamedQueries::new();

    named
        .register(
            "Member.findByAge",
            &schema,
            "select m from Member m where m.age = :age",
        )
        .unwrap();
    assert!(named.get("Member.findByAge").is_some());
    assert_eq!(named.len(), 1);

    let err = named
        .register("Member.broken", &schema, "select m from Member m where m.x = 1")
        .unwrap_err();
    assert!(matches!(err, QueryError::Semantic(_)));
    assert!(named.get("Member.broken").is_none());
}

// ------------------------------------------------------------------
// Properties
// ------------------------------------------------------------------

proptest! {
    /// Any rendered comparison literal must re-tokenize cleanly: text
    /// literals survive quoting round trips.
    #[test]
    fn text_literals_round_trip_through_quotes(raw in "[a-zA-Z' ]{0,16}") {
        let schema = shop_schema();
        let quoted = raw.replace('\'', "''");
        let text = format!("select m from Member m where m.name = '{quoted}'");
        let query = Query::parse(&schema, &text).unwrap();
        let Lowered::Select(select) = lower(&schema, query.resolved(), &Bindings::new()).unwrap()
        else {
            panic!("expected select lowering");
        };

        match &select.units[0].statement.filter {
            Filter::Cmp { value, .. } => prop_assert_eq!(value.clone(), Value::Text(raw)),
            other => panic!("expected comparison, got {other:?}"),
        }
    }
}
