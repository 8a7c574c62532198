//! Public contract checks for keys, records and query descriptions.

use std::sync::Arc;

use cqlmap_model::{
    Entity, FieldDescriptor, Fields, Filter, Key, ModelError, Operator, Query, Record, Schema,
    Value, DEFAULT_LIMIT,
};

fn schema() -> Arc<Schema> {
    let attributes = Schema::new().field(FieldDescriptor::reference("imageFormat", "Format"));
    Arc::new(
        Schema::new()
            .field(FieldDescriptor::text("title"))
            .field(FieldDescriptor::reference("owner", "User"))
            .field(FieldDescriptor::composite("attributes", attributes)),
    )
}

#[test]
fn key_urlsafe_round_trip() {
    let key = Key::generate("ImageAsset").unwrap();
    let parsed = Key::from_urlsafe(&key.urlsafe()).unwrap();

    assert_eq!(parsed, key);
    assert_eq!(parsed.kind(), "ImageAsset");
}

#[test]
fn key_serializes_as_urlsafe_string() {
    let key = Key::new("Tag", "summer-2014").unwrap();
    let json = serde_json::to_string(&key).unwrap();

    assert_eq!(json, "\"Tag-summer-2014\"");
    assert_eq!(serde_json::from_str::<Key>(&json).unwrap(), key);
    assert!(serde_json::from_str::<Key>("\"no separator\"").is_err());
}

#[test]
fn record_checks_reference_kinds() {
    let mut record = Record::new("ImageAsset", schema()).unwrap();

    assert!(record.set("owner", Key::generate("User").unwrap()).is_ok());
    assert!(matches!(
        record.set("owner", Key::generate("Tag").unwrap()),
        Err(ModelError::FieldType { .. })
    ));

    let mut attributes = Fields::new();
    attributes.insert("imageFormat".into(), Value::Key(Key::generate("Format").unwrap()));
    assert!(record.set("attributes", attributes).is_ok());
    assert_eq!(record.fields().len(), 2);
}

#[test]
fn query_preserves_filter_order() {
    let query = Query::new("imageasset")
        .with_filter(Filter::eq("title", "Lorem").unwrap())
        .with_filter(Filter::is_in("tags", vec!["a", "b"]))
        .with_limit(0);

    let ops: Vec<Operator> = query.filters().iter().map(Filter::operator).collect();
    assert_eq!(ops, vec![Operator::Eq, Operator::In]);
    assert_eq!(query.limit(), 0);
    assert_eq!(Query::new("t").limit(), DEFAULT_LIMIT);
}
