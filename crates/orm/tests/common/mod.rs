//! Shared fixture: a seeded in-memory store with a Widget dataset, a
//! related Warehouse dataset, and a coded-value domain.

// Not every test binary uses the whole fixture.
#![allow(dead_code)]

use std::sync::Arc;

use atlas_orm::{
    ColumnInfo, ColumnKind, DatasetDef, DatasetRegistry, DomainInfo, FieldDescriptor, Label,
    MemoryStore, Record, Relationship, Scale, Schema, Value,
};

pub const YES_OR_NO: &[(i64, &str)] = &[(50, "No"), (100, "Yes"), (101, "N/A")];

pub fn seeded_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new();

    store.create_domain(DomainInfo {
        name: "YesOrNo".to_string(),
        kind: ColumnKind::Integer,
        coded_values: YES_OR_NO
            .iter()
            .map(|&(code, label)| (Value::Int(code), label.to_string()))
            .collect(),
        range: None,
    });

    store
        .create_table(
            "Widget",
            vec![
                ColumnInfo::new("OBJECTID", ColumnKind::ObjectId),
                ColumnInfo::new("widget_name", ColumnKind::Text),
                ColumnInfo::new("widget_description", ColumnKind::Text),
                ColumnInfo::new("widget_number", ColumnKind::Integer),
                ColumnInfo::new("widget_available", ColumnKind::Integer).with_domain("YesOrNo"),
                ColumnInfo::new("widget_price", ColumnKind::Double),
                ColumnInfo::new("widget_number_score", ColumnKind::Double),
                ColumnInfo::new("warehouse_id", ColumnKind::Integer),
                ColumnInfo::new("Shape", ColumnKind::Geometry),
            ],
        )
        .unwrap();

    store
        .create_table(
            "Warehouse",
            vec![
                ColumnInfo::new("OBJECTID", ColumnKind::ObjectId),
                ColumnInfo::new("warehouse_name", ColumnKind::Text),
                ColumnInfo::new("warehouse_address", ColumnKind::Text),
                ColumnInfo::new("warehouse_zipcode", ColumnKind::Integer),
                ColumnInfo::new("warehouse_open", ColumnKind::Integer).with_domain("YesOrNo"),
                ColumnInfo::new("Shape", ColumnKind::Geometry),
            ],
        )
        .unwrap();

    store
        .load(
            "Widget",
            &[
                "widget_name",
                "widget_description",
                "widget_number",
                "widget_available",
                "widget_price",
                "warehouse_id",
                "Shape",
            ],
            vec![
                vec![
                    Value::from("Widget A+ Awesome"),
                    Value::Null,
                    Value::Int(12345),
                    Value::Int(100),
                    Value::Float(10.50),
                    Value::Int(1),
                    Value::from("POINT (2.5 3.0)"),
                ],
                vec![
                    Value::from("B-Widgety Widget"),
                    Value::Null,
                    Value::Null,
                    Value::Int(50),
                    Value::Null,
                    Value::Int(1),
                    Value::from("POINT (-2.0 5.5)"),
                ],
                vec![
                    Value::from("My Widget C"),
                    Value::from("Best widget"),
                    Value::Null,
                    Value::Null,
                    Value::Null,
                    Value::Int(2),
                    Value::from("POINT (0.0 4.0)"),
                ],
            ],
        )
        .unwrap();

    store
        .load(
            "Warehouse",
            &[
                "warehouse_name",
                "warehouse_address",
                "warehouse_zipcode",
                "warehouse_open",
                "Shape",
            ],
            vec![
                vec![
                    Value::from("Widget Distribution Center"),
                    Value::from("123 Main St"),
                    Value::Int(99999),
                    Value::Int(100),
                    Value::from("POINT (1.0 3.3)"),
                ],
                vec![
                    Value::from("Widgets International"),
                    Value::from("88 Shipping Dr"),
                    Value::Int(11111),
                    Value::Int(100),
                    Value::from("POINT (-6.0 4.2)"),
                ],
            ],
        )
        .unwrap();

    Arc::new(store)
}

pub fn widget_schema() -> Schema {
    Schema::builder()
        .field(FieldDescriptor::object_id("OBJECTID", "OID"))
        .field(FieldDescriptor::string("widget_name", "Widget Name").required())
        .field(FieldDescriptor::string("widget_description", "Widget Description"))
        .field(FieldDescriptor::numeric("widget_number", "Widget Number").required())
        .field(FieldDescriptor::numeric("widget_available", "Is Widget Available?").required())
        .field(
            FieldDescriptor::numeric("widget_price", "Widget Price").required_if(Arc::new(
                |record: &Record| {
                    record
                        .value("widget_available")
                        .map(|value| value == Label::new("Yes"))
                        .unwrap_or(false)
                },
            )),
        )
        .field(FieldDescriptor::scale(
            "widget_number_score",
            "Widget Number Score",
            Scale::breaks(vec![100.0, 500.0, 1000.0], vec![1.0, 2.0, 3.0, 4.0], true).unwrap(),
            "widget_number",
        ))
        .field(FieldDescriptor::foreign_key(
            "warehouse_id",
            "Warehouse ID",
            "Warehouse",
        ))
        .field(FieldDescriptor::geometry("Shape", "Shape"))
        .build()
        .unwrap()
}

pub fn warehouse_schema() -> Schema {
    Schema::builder()
        .field(FieldDescriptor::object_id("OBJECTID", "OID"))
        .field(FieldDescriptor::string("warehouse_name", "Warehouse Name").required())
        .field(FieldDescriptor::string("warehouse_address", "Warehouse Address"))
        .field(FieldDescriptor::numeric("warehouse_zipcode", "Warehouse Zipcode").required())
        .field(FieldDescriptor::numeric("warehouse_open", "Is Warehouse Open?").required())
        .field(FieldDescriptor::geometry("Shape", "Shape"))
        .build()
        .unwrap()
}

/// Register Widget and Warehouse against the store
pub fn registered(store: Arc<MemoryStore>) -> DatasetRegistry {
    let registry = DatasetRegistry::new();
    registry
        .register(
            DatasetDef::new("Widget")
                .schema(widget_schema())
                .relationship(Relationship::belongs_to("warehouse_id", "Warehouse")),
            store.clone(),
        )
        .unwrap();
    registry
        .register(
            DatasetDef::new("Warehouse")
                .schema(warehouse_schema())
                .relationship(Relationship::has_many("widget_set", "Widget", "warehouse_id")),
            store,
        )
        .unwrap();
    registry
}
