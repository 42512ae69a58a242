//! Shared shop-flavoured schema used across module tests: members and
//! teams with a bidirectional association, orders with a cascading
//! one-to-one delivery, an item hierarchy on a discriminator column,
//! embedded value groups, and an element collection.

use crate::{
    session::{Element, EntityInstance, SharedInstance},
    sql::bootstrap_statements,
    store::{RelationalStore, memory::MemoryStore},
    value::Value,
};
use amberdb_schema::{
    build::{Schema, SchemaBuilder},
    node::{
        AttributeDef, ElementCollectionDef, EmbeddedDef, EntityDef, IdentityDef, RelationDef,
        VariantDef,
    },
    types::{AttributeKind, Cascade, InheritanceStrategy},
};

pub(crate) fn shop_schema() -> Schema {
    SchemaBuilder::new()
        .entity(
            EntityDef::new("Member", IdentityDef::allocated("id"))
                .attribute(AttributeDef::new("name", AttributeKind::Text))
                .attribute(AttributeDef::new("age", AttributeKind::Int).nullable())
                .embedded(EmbeddedDef::new(
                    "workPeriod",
                    vec![
                        AttributeDef::new("startDate", AttributeKind::Timestamp),
                        AttributeDef::new("endDate", AttributeKind::Timestamp),
                    ],
                ))
                .collection(ElementCollectionDef::scalar(
                    "favoriteFoods",
                    AttributeKind::Text,
                ))
                .relation(RelationDef::many_to_one("team", "Team")),
        )
        .entity(
            EntityDef::new("Team", IdentityDef::allocated("id"))
                .attribute(AttributeDef::new("name", AttributeKind::Text))
                .relation(
                    RelationDef::one_to_many("members", "Member", "team").orphan_removal(),
                ),
        )
        .entity(
            EntityDef::new("Purchase", IdentityDef::allocated("id"))
                .table("purchase")
                .relation(RelationDef::many_to_one("member", "Member"))
                .relation(
                    RelationDef::one_to_one("delivery", "Delivery")
                        .cascade(Cascade::Persist)
                        .cascade(Cascade::Delete),
                ),
        )
        .entity(
            EntityDef::new("Delivery", IdentityDef::allocated("id"))
                .attribute(AttributeDef::new("city", AttributeKind::Text).nullable())
                .attribute(AttributeDef::new("street", AttributeKind::Text).nullable())
                .attribute(AttributeDef::new("zipcode", AttributeKind::Text).nullable())
                .attribute(
                    AttributeDef::new(
                        "status",
                        AttributeKind::Enum {
                            variants: vec![
                                "READY".to_string(),
                                "DELIVERED".to_string(),
                                "CANCELLED".to_string(),
                            ],
                        },
                    )
                    .nullable(),
                )
                .relation(RelationDef::one_to_one("purchase", "Purchase").mirrored("delivery")),
        )
        .entity(
            EntityDef::new("Item", IdentityDef::allocated("id"))
                .attribute(AttributeDef::new("name", AttributeKind::Text))
                .attribute(AttributeDef::new("price", AttributeKind::Int).nullable())
                .inheritance(InheritanceStrategy::SingleTable {
                    discriminator: "dtype".to_string(),
                })
                .variant(VariantDef::new(
                    "Book",
                    vec![
                        AttributeDef::new("author", AttributeKind::Text).nullable(),
                        AttributeDef::new("isbn", AttributeKind::Text).nullable(),
                    ],
                ))
                .variant(VariantDef::new(
                    "Movie",
                    vec![
                        AttributeDef::new("director", AttributeKind::Text).nullable(),
                        AttributeDef::new("actor", AttributeKind::Text).nullable(),
                    ],
                ))
                .variant(VariantDef::new(
                    "Album",
                    vec![AttributeDef::new("artist", AttributeKind::Text).nullable()],
                )),
        )
        .build()
        .expect("fixture schema must validate")
}

/// Fresh in-memory store with every fixture table created.
pub(crate) fn bootstrapped_store(schema: &Schema) -> MemoryStore {
    let mut store = MemoryStore::new();
    for statement in bootstrap_statements(schema) {
        store
            .execute(&statement)
            .expect("fixture bootstrap must succeed");
    }

    store
}

pub(crate) fn member(name: &str, age: i64) -> SharedInstance {
    let mut instance = EntityInstance::new("Member");
    instance.set("name", name);
    instance.set("age", age);

    instance.into_shared()
}

pub(crate) fn team(name: &str) -> SharedInstance {
    let mut instance = EntityInstance::new("Team");
    instance.set("name", name);

    instance.into_shared()
}

pub(crate) fn book(name: &str, author: &str) -> SharedInstance {
    let mut instance = EntityInstance::new_variant("Item", "Book");
    instance.set("name", name);
    instance.set("author", author);

    instance.into_shared()
}

pub(crate) fn favorite_food(value: &str) -> Element {
    Element::Scalar(Value::Text(value.to_string()))
}
