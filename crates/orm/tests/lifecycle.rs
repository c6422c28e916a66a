//! Record lifecycle: field access, validation, diffing, and persistence

mod common;

use std::sync::Arc;

use atlas_orm::{
    ColumnKind, Label, OrmError, Record, RowStore, StorageSpec, Value,
};

use common::{registered, seeded_store};

#[test]
fn coded_fields_wrap_their_domain_label() {
    let registry = registered(seeded_store());
    let record = registry
        .query("Widget")
        .unwrap()
        .get([("OBJECTID", Value::Int(1))])
        .unwrap();

    let available = record.value("widget_available").unwrap();
    assert_eq!(available, Value::Int(100));
    assert_eq!(available, Label::new("Yes"));
    assert_eq!(record.label_for("widget_available").unwrap().as_deref(), Some("Yes"));
}

#[test]
fn set_label_assigns_the_coded_value() {
    let registry = registered(seeded_store());
    let mut record = registry
        .query("Widget")
        .unwrap()
        .get([("OBJECTID", Value::Int(2))])
        .unwrap();

    record.set_label("widget_available", "Yes").unwrap();
    assert_eq!(record.value("widget_available").unwrap(), Value::Int(100));

    assert!(matches!(
        record.set_label("widget_available", "Maybe"),
        Err(OrmError::Domain(_))
    ));
}

#[test]
fn registration_pulls_domain_choices() {
    let registry = registered(seeded_store());
    let dataset = registry.dataset("Widget").unwrap();
    let field = dataset.schema().field("widget_available").unwrap();
    assert_eq!(field.choices.len(), 3);
    assert!(field.choices.contains(&Value::Int(101)));
}

#[test]
fn validation_collects_messages() {
    let registry = registered(seeded_store());
    let record = registry
        .record(
            "Widget",
            [
                ("widget_name", Value::from("My Widget")),
                ("widget_number", Value::Int(300)),
                ("widget_available", Value::Int(50)),
            ],
        )
        .unwrap();
    assert!(record.validate().is_empty());

    let record = registry
        .record("Widget", [("widget_number", Value::Int(300))])
        .unwrap();
    let messages = record.validate();
    assert!(messages.contains(&"Widget Name is missing".to_string()));
    assert!(messages.contains(&"Is Widget Available? is missing".to_string()));
}

#[test]
fn blank_strings_count_as_missing() {
    let registry = registered(seeded_store());
    let record = registry
        .record(
            "Widget",
            [
                ("widget_name", Value::from("   ")),
                ("widget_number", Value::Int(1)),
                ("widget_available", Value::Int(50)),
            ],
        )
        .unwrap();
    assert!(record
        .validate()
        .contains(&"Widget Name is missing".to_string()));
}

#[test]
fn choice_membership_is_validated() {
    let registry = registered(seeded_store());
    let record = registry
        .record(
            "Widget",
            [
                ("widget_name", Value::from("W")),
                ("widget_number", Value::Int(1)),
                ("widget_available", Value::Int(77)),
            ],
        )
        .unwrap();
    assert!(record
        .validate()
        .contains(&"Is Widget Available? is invalid".to_string()));
}

#[test]
fn conditional_requirement_follows_the_predicate() {
    let registry = registered(seeded_store());
    let mut record = registry
        .query("Widget")
        .unwrap()
        .get([("OBJECTID", Value::Int(2))])
        .unwrap();
    let price_message = "Widget Price is missing".to_string();

    // Not available: the price may stay empty.
    assert!(!record.validate().contains(&price_message));

    record.set_label("widget_available", "Yes").unwrap();
    assert!(record.validate().contains(&price_message));

    record.set("widget_price", Value::Float(20.0)).unwrap();
    assert!(!record.validate().contains(&price_message));
}

#[test]
fn calculated_fields_reject_assignment() {
    let registry = registered(seeded_store());
    let mut record = registry
        .query("Widget")
        .unwrap()
        .get([("OBJECTID", Value::Int(1))])
        .unwrap();
    assert!(matches!(
        record.set("widget_number_score", Value::Float(4.0)),
        Err(OrmError::InvalidField(_))
    ));
}

#[test]
fn scale_fields_recompute_from_their_source() {
    let registry = registered(seeded_store());
    let mut record = registry
        .record(
            "Widget",
            [
                ("widget_name", Value::from("W")),
                ("widget_number", Value::Int(300)),
            ],
        )
        .unwrap();
    assert_eq!(
        record.get("widget_number_score").unwrap(),
        Value::Float(2.0)
    );

    record.set("widget_number", Value::Int(800)).unwrap();
    assert_eq!(
        record.get("widget_number_score").unwrap(),
        Value::Float(3.0)
    );
}

#[test]
fn save_inserts_and_assigns_an_identity() {
    let registry = registered(seeded_store());
    let qs = registry.query("Widget").unwrap();
    let before = qs.count().unwrap();

    let mut record = registry
        .record("Widget", [("widget_name", Value::from("Newest Widget"))])
        .unwrap();
    assert!(!record.is_persisted());
    assert!(record.save().unwrap());
    assert!(record.is_persisted());
    assert_eq!(record.identity(), Value::Int(4));

    assert_eq!(qs.count().unwrap(), before + 1);
    let last = qs.last().unwrap().unwrap();
    assert_eq!(
        last.value("widget_name").unwrap(),
        Value::from("Newest Widget")
    );
}

#[test]
fn save_again_without_changes_is_a_no_op() {
    let registry = registered(seeded_store());
    let mut record = registry
        .record("Widget", [("widget_name", Value::from("Newest Widget"))])
        .unwrap();
    assert!(record.save().unwrap());
    assert!(record.diff().unwrap().is_empty());
    assert!(!record.save().unwrap());
}

#[test]
fn save_updates_only_changed_fields() {
    let registry = registered(seeded_store());
    let mut record = registry
        .query("Widget")
        .unwrap()
        .get([("OBJECTID", Value::Int(1))])
        .unwrap();
    // Persist the calculated score so only the rename shows up below.
    record.save().unwrap();

    record.set("widget_name", Value::from("Some Widget")).unwrap();
    let changes = record.diff().unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].0, "widget_name");
    assert_eq!(
        changes[0].1,
        (
            Value::from("Widget A+ Awesome"),
            Value::from("Some Widget")
        )
    );

    assert!(record.save().unwrap());
    assert!(record.diff().unwrap().is_empty());

    let reloaded = registry
        .query("Widget")
        .unwrap()
        .first()
        .unwrap()
        .unwrap();
    assert_eq!(
        reloaded.value("widget_name").unwrap(),
        Value::from("Some Widget")
    );
}

#[test]
fn repeated_saves_update_nothing() {
    let registry = registered(seeded_store());

    // First pass persists calculated scores; afterwards saves are no-ops.
    let mut records = registry.query("Widget").unwrap().into_records().unwrap();
    for record in &mut records {
        record.save().unwrap();
    }

    let mut records = registry.query("Widget").unwrap().into_records().unwrap();
    let mut updates = 0;
    for record in &mut records {
        updates += usize::from(record.save().unwrap());
    }
    assert_eq!(updates, 0);

    let mut records = registry.query("Widget").unwrap().into_records().unwrap();
    let mut updates = 0;
    for record in &mut records {
        record.set("widget_number", Value::Int(500)).unwrap();
        updates += usize::from(record.save().unwrap());
    }
    assert_eq!(updates, 3);
}

#[test]
fn update_of_a_vanished_row_is_fatal() {
    let store = seeded_store();
    let registry = registered(store.clone());
    let mut record = registry
        .query("Widget")
        .unwrap()
        .get([("OBJECTID", Value::Int(3))])
        .unwrap();

    // Make the row vanish behind the record's back by renumbering it.
    let rows = store
        .iterate(
            "Widget",
            &["OBJECTID".to_string()],
            true,
            Some("OBJECTID = 3"),
            None,
            None,
            None,
        )
        .unwrap();
    assert_eq!(rows.len(), 1);
    store
        .update(
            rows[0].1.as_ref().unwrap(),
            &["OBJECTID".to_string()],
            &[Value::Int(99)],
        )
        .unwrap();

    record.set("widget_name", Value::from("Gone")).unwrap();
    assert!(matches!(record.save(), Err(OrmError::RowVanished(_))));
}

#[test]
fn deferred_geometry_loads_on_first_access() {
    let store = seeded_store();
    let registry = registered(store.clone());
    let mut record = registry
        .query("Widget")
        .unwrap()
        .get([("OBJECTID", Value::Int(1))])
        .unwrap();

    let before = store.read_count();
    let shape = record.get("Shape").unwrap();
    assert_eq!(shape, Value::from("POINT (2.5 3.0)"));
    assert_eq!(store.read_count(), before + 1);

    // Cached after the first load.
    record.get("Shape").unwrap();
    assert_eq!(store.read_count(), before + 1);
}

#[test]
fn storage_scale_suppresses_rounding_noise() {
    let registry = registered(seeded_store());
    let dataset = registry.dataset("Widget").unwrap();
    let field = dataset.schema().field("widget_price").unwrap();
    // No storage scale configured: exact comparison.
    assert!(field.has_changed(&Value::Float(1.001), &Value::Float(1.004)));

    let scaled = atlas_orm::FieldDescriptor::numeric("price", "Price").with_storage_scale(2);
    assert!(!scaled.has_changed(&Value::Float(1.001), &Value::Float(1.004)));
    assert!(scaled.has_changed(&Value::Float(1.001), &Value::Float(1.02)));
}

#[test]
fn sync_fields_creates_missing_columns() {
    let store = seeded_store();

    // A schema with one extra field the table does not have yet.
    let registry = atlas_orm::DatasetRegistry::new();
    let schema = atlas_orm::Schema::builder()
        .field(atlas_orm::FieldDescriptor::object_id("OBJECTID", "OID"))
        .field(atlas_orm::FieldDescriptor::string("warehouse_name", "Warehouse Name"))
        .field(
            atlas_orm::FieldDescriptor::numeric("warehouse_rating", "Warehouse Rating")
                .with_storage(StorageSpec::new(ColumnKind::Double)),
        )
        .build()
        .unwrap();
    registry
        .register(
            atlas_orm::DatasetDef::new("Warehouse").schema(schema),
            store.clone(),
        )
        .unwrap();

    let dataset = registry.dataset("Warehouse").unwrap();
    assert!(!dataset.schema().field("warehouse_rating").unwrap().is_bound());

    let added = registry.sync_fields("Warehouse").unwrap();
    assert_eq!(added, vec!["warehouse_rating".to_string()]);

    let dataset = registry.dataset("Warehouse").unwrap();
    assert!(dataset.schema().field("warehouse_rating").unwrap().is_bound());

    let mut record = registry
        .query("Warehouse")
        .unwrap()
        .get([("OBJECTID", Value::Int(1))])
        .unwrap();
    record.set("warehouse_rating", Value::Float(4.5)).unwrap();
    assert!(record.save().unwrap());
}

#[test]
fn introspection_builds_a_working_dataset() {
    let store = seeded_store();
    let registry = registered(store.clone());
    let def = atlas_orm::Dataset::introspect("WarehouseAuto", "Warehouse", store.as_ref()).unwrap();
    let dataset = registry.register(def, store).unwrap();
    assert_eq!(dataset.schema().identity().name, "OBJECTID");

    let count = registry.query("WarehouseAuto").unwrap().count().unwrap();
    assert_eq!(count, 2);
}

#[test]
fn unknown_construction_field_is_invalid() {
    let registry = registered(seeded_store());
    assert!(matches!(
        registry.record("Widget", [("widget_nam", Value::from("x"))]),
        Err(OrmError::InvalidField(_))
    ));
}

#[test]
fn method_fields_delegate_to_dataset_routines() {
    let store = seeded_store();
    let registry = atlas_orm::DatasetRegistry::new();
    let schema = atlas_orm::Schema::builder()
        .field(atlas_orm::FieldDescriptor::object_id("OBJECTID", "OID"))
        .field(atlas_orm::FieldDescriptor::numeric("widget_number", "Widget Number"))
        .field(atlas_orm::FieldDescriptor::method(
            "double_number",
            "Widget Number Doubled",
            "double",
        ))
        .build()
        .unwrap();
    registry
        .register(
            atlas_orm::DatasetDef::new("Widget")
                .schema(schema)
                .method(
                    "double",
                    Arc::new(|record: &Record| {
                        let number = record.value("widget_number")?;
                        Ok(match number.as_f64() {
                            Some(n) => Value::Float(n * 2.0),
                            None => Value::Null,
                        })
                    }),
                ),
            store,
        )
        .unwrap();

    let record = registry
        .query("Widget")
        .unwrap()
        .get([("OBJECTID", Value::Int(1))])
        .unwrap();
    assert_eq!(record.value("double_number").unwrap(), Value::Float(24690.0));
}
