use crate::{
    build::{MappingError, SchemaBuilder},
    node::{
        AttributeDef, ElementCollectionDef, EmbeddedDef, EntityDef, IdentityDef, RelationDef,
        VariantDef,
    },
    types::{AttributeKind, InheritanceStrategy},
};

fn member() -> EntityDef {
    EntityDef::new("Member", IdentityDef::allocated("id"))
        .attribute(AttributeDef::new("name", AttributeKind::Text))
        .attribute(AttributeDef::new("age", AttributeKind::Int))
        .relation(RelationDef::many_to_one("team", "Team"))
}

fn team() -> EntityDef {
    EntityDef::new("Team", IdentityDef::allocated("id"))
        .attribute(AttributeDef::new("name", AttributeKind::Text))
        .relation(RelationDef::one_to_many("members", "Member", "team"))
}

#[test]
fn builds_bidirectional_pair() {
    let schema = SchemaBuilder::new()
        .entity(member())
        .entity(team())
        .build()
        .unwrap();

    let member = schema.get("Member").unwrap();
    let fk = member.mapping.fk_column("team").unwrap();
    assert_eq!(fk.column, "team_id");
    assert_eq!(fk.kind, AttributeKind::Int);

    let team = schema.get("Team").unwrap();
    assert!(
        team.mapping.fk_column("members").is_none(),
        "mirrored sides must not map a column"
    );
}

#[test]
fn embedded_columns_flatten_with_prefix() {
    let schema = SchemaBuilder::new()
        .entity(
            EntityDef::new("Worker", IdentityDef::allocated("id")).embedded(EmbeddedDef::new(
                "homeAddress",
                vec![
                    AttributeDef::new("city", AttributeKind::Text),
                    AttributeDef::new("street", AttributeKind::Text),
                    AttributeDef::new("zipcode", AttributeKind::Text),
                ],
            )),
        )
        .build()
        .unwrap();

    let worker = schema.get("Worker").unwrap();
    let resolved = worker.mapping.resolve_path("homeAddress.city").unwrap();
    assert_eq!(resolved.column, "homeAddress_city");
    assert!(resolved.nullable);
}

#[test]
fn rejects_unregistered_relation_target() {
    let errs = SchemaBuilder::new().entity(member()).build().unwrap_err();

    assert!(errs.0.iter().any(|e| matches!(
        e,
        MappingError::UnknownTarget { target, .. } if target == "Team"
    )));
}

#[test]
fn rejects_mapped_by_pointing_at_nothing() {
    let errs = SchemaBuilder::new()
        .entity(member())
        .entity(
            EntityDef::new("Team", IdentityDef::allocated("id"))
                .relation(RelationDef::one_to_many("members", "Member", "squad")),
        )
        .build()
        .unwrap_err();

    assert!(errs.0.iter().any(|e| matches!(
        e,
        MappingError::MappedByMissing { mapped_by, .. } if mapped_by == "squad"
    )));
}

#[test]
fn rejects_mapped_by_on_non_owning_side() {
    let errs = SchemaBuilder::new()
        .entity(
            EntityDef::new("Parcel", IdentityDef::allocated("id"))
                .relation(RelationDef::one_to_one("shipment", "Shipment").mirrored("parcel")),
        )
        .entity(
            EntityDef::new("Shipment", IdentityDef::allocated("id"))
                .relation(RelationDef::one_to_one("parcel", "Parcel").mirrored("shipment")),
        )
        .build()
        .unwrap_err();

    assert!(
        errs.0
            .iter()
            .any(|e| matches!(e, MappingError::MappedByNotOwning { .. })),
        "two mirrored sides with no owner must be rejected: {errs}"
    );
}

#[test]
fn rejects_conflicting_variant_columns_under_discriminator() {
    let errs = SchemaBuilder::new()
        .entity(
            EntityDef::new("Item", IdentityDef::allocated("id"))
                .attribute(AttributeDef::new("name", AttributeKind::Text))
                .inheritance(InheritanceStrategy::SingleTable {
                    discriminator: "dtype".to_string(),
                })
                .variant(VariantDef::new(
                    "Book",
                    vec![AttributeDef::new("isbn", AttributeKind::Text)],
                ))
                .variant(VariantDef::new(
                    "Movie",
                    vec![AttributeDef::new("isbn", AttributeKind::Int)],
                )),
        )
        .build()
        .unwrap_err();

    assert!(errs.0.iter().any(|e| matches!(
        e,
        MappingError::ColumnConflict { column, .. } if column == "isbn"
    )));
}

#[test]
fn shared_variant_columns_with_agreeing_kinds_are_allowed() {
    let schema = SchemaBuilder::new()
        .entity(
            EntityDef::new("Item", IdentityDef::allocated("id"))
                .inheritance(InheritanceStrategy::SingleTable {
                    discriminator: "dtype".to_string(),
                })
                .variant(VariantDef::new(
                    "Book",
                    vec![AttributeDef::new("author", AttributeKind::Text)],
                ))
                .variant(VariantDef::new(
                    "Movie",
                    vec![AttributeDef::new("director", AttributeKind::Text)],
                )),
        )
        .build()
        .unwrap();

    let item = schema.get("Item").unwrap();
    let author = item.mapping.resolve_path("author").unwrap();
    assert_eq!(author.variant.as_deref(), Some("Book"));
    assert!(author.nullable, "variant columns share the table as nullable");
}

#[test]
fn table_per_subtype_duplicates_base_columns() {
    let schema = SchemaBuilder::new()
        .entity(
            EntityDef::new("Item", IdentityDef::allocated("id"))
                .attribute(AttributeDef::new("name", AttributeKind::Text))
                .attribute(AttributeDef::new("price", AttributeKind::Int))
                .inheritance(InheritanceStrategy::TablePerSubtype)
                .variant(VariantDef::new(
                    "Book",
                    vec![AttributeDef::new("author", AttributeKind::Text)],
                ))
                .variant(VariantDef::new(
                    "Album",
                    vec![AttributeDef::new("artist", AttributeKind::Text)],
                )),
        )
        .build()
        .unwrap();

    let item = schema.get("Item").unwrap();
    assert!(item.mapping.single_table().is_none());
    assert_eq!(item.mapping.variant_tables().len(), 2);
    assert_eq!(item.mapping.table_for(Some("Book")), Some("book"));
    assert_eq!(item.mapping.table_for(None), None);
}

#[test]
fn rejects_duplicate_members_and_entities() {
    let errs = SchemaBuilder::new()
        .entity(
            EntityDef::new("Member", IdentityDef::allocated("id"))
                .attribute(AttributeDef::new("name", AttributeKind::Text))
                .attribute(AttributeDef::new("name", AttributeKind::Text)),
        )
        .entity(EntityDef::new("Member", IdentityDef::allocated("id")))
        .build()
        .unwrap_err();

    assert!(
        errs.0
            .iter()
            .any(|e| matches!(e, MappingError::DuplicateMember { .. }))
    );
    assert!(
        errs.0
            .iter()
            .any(|e| matches!(e, MappingError::DuplicateEntity { .. }))
    );
}

#[test]
fn rejects_reserved_grammar_words_as_names() {
    let errs = SchemaBuilder::new()
        .entity(
            EntityDef::new("Order", IdentityDef::allocated("id"))
                .attribute(AttributeDef::new("select", AttributeKind::Text)),
        )
        .build()
        .unwrap_err();

    assert!(
        errs.0
            .iter()
            .any(|e| matches!(e, MappingError::InvalidName { .. }))
    );
}

#[test]
fn rejects_orphan_removal_on_single_valued_relation() {
    let errs = SchemaBuilder::new()
        .entity(
            EntityDef::new("Shipment", IdentityDef::allocated("id")).relation(
                RelationDef::one_to_one("parcel", "Parcel").orphan_removal(),
            ),
        )
        .entity(EntityDef::new("Parcel", IdentityDef::allocated("id")))
        .build()
        .unwrap_err();

    assert!(
        errs.0
            .iter()
            .any(|e| matches!(e, MappingError::OrphanRemovalNotCollection { .. }))
    );
}

#[test]
fn collection_tables_key_on_owner_identity() {
    let schema = SchemaBuilder::new()
        .entity(
            EntityDef::new("Member", IdentityDef::allocated("id"))
                .collection(ElementCollectionDef::scalar(
                    "favoriteFoods",
                    AttributeKind::Text,
                ))
                .collection(ElementCollectionDef::embedded(
                    "addressHistory",
                    EmbeddedDef::new(
                        "addressHistory",
                        vec![
                            AttributeDef::new("city", AttributeKind::Text),
                            AttributeDef::new("street", AttributeKind::Text),
                        ],
                    ),
                )),
        )
        .build()
        .unwrap();

    let member = schema.get("Member").unwrap();
    let foods = member.mapping.collection_table("favoriteFoods").unwrap();
    assert_eq!(foods.table, "member_favoriteFoods");
    assert_eq!(foods.owner_column, "member_id");
    assert_eq!(foods.columns.len(), 1);

    let history = member.mapping.collection_table("addressHistory").unwrap();
    assert_eq!(history.columns.len(), 2);
    assert_eq!(history.columns[0].2.as_deref(), Some("city"));
}

#[test]
fn resolved_models_serialize_for_diagnostics() {
    let schema = SchemaBuilder::new()
        .entity(member())
        .entity(team())
        .build()
        .unwrap();

    let json = serde_json::to_value(schema.get("Member").unwrap()).unwrap();
    assert_eq!(json["def"]["name"], "Member");
    assert!(json["mapping"]["base_columns"].is_array());
}

#[test]
fn rejects_two_entities_claiming_one_table() {
    let errs = SchemaBuilder::new()
        .entity(EntityDef::new("Member", IdentityDef::allocated("id")).table("people"))
        .entity(EntityDef::new("Person", IdentityDef::allocated("id")).table("people"))
        .build()
        .unwrap_err();

    assert!(
        errs.0
            .iter()
            .any(|e| matches!(e, MappingError::TableConflict { .. }))
    );
}
