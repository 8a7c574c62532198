//! Shared fixtures for repository integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use cqlmap::fakes::MemoryTransport;
use cqlmap::{ModelBinding, ModelRegistry, Repository, StorageType, StoreConfig};
use cqlmap_model::{Entity, FieldDescriptor, Fields, Key, Record, Schema, Value};

pub fn asset_schema() -> Arc<Schema> {
    let attributes = Schema::new().field(FieldDescriptor::reference("imageFormat", "Format"));
    Arc::new(
        Schema::new()
            .field(FieldDescriptor::text("title"))
            .field(FieldDescriptor::integer("num"))
            .field(FieldDescriptor::reference("owner", "User"))
            .field(FieldDescriptor::any_reference("tags").repeated())
            .field(FieldDescriptor::composite("attributes", attributes)),
    )
}

pub fn note_schema() -> Arc<Schema> {
    Arc::new(
        Schema::new()
            .field(FieldDescriptor::text("body"))
            .field(FieldDescriptor::datetime("written"))
            .field(FieldDescriptor::any_reference("about")),
    )
}

pub fn registry() -> ModelRegistry {
    ModelRegistry::new()
        .with(ModelBinding::new("ImageAsset", |key| {
            Box::new(Record::with_key(key, asset_schema())) as Box<dyn Entity>
        }))
        .with(
            ModelBinding::new("Note", |key| {
                Box::new(Record::with_key(key, note_schema())) as Box<dyn Entity>
            })
            .with_storage(StorageType::blob()),
        )
}

pub fn config() -> StoreConfig {
    StoreConfig::new("media")
}

pub fn repository(store: &Arc<MemoryTransport>) -> Repository {
    repository_with(store, config(), registry())
}

pub fn repository_with(
    store: &Arc<MemoryTransport>,
    config: StoreConfig,
    registry: ModelRegistry,
) -> Repository {
    let transport: Arc<dyn cqlmap::Transport> = store.clone();
    Repository::new(config, transport, registry).unwrap()
}

pub fn asset() -> Record {
    Record::new("ImageAsset", asset_schema()).unwrap()
}

pub fn tagged(tags: &[&Key]) -> Record {
    asset()
        .with("title", "Lorem Ipsum")
        .unwrap()
        .with(
            "tags",
            tags.iter().map(|k| Value::Key((*k).clone())).collect::<Vec<_>>(),
        )
        .unwrap()
}

pub fn format_attribute(format: &Key) -> Fields {
    let mut attributes = Fields::new();
    attributes.insert("imageFormat".into(), Value::Key(format.clone()));
    attributes
}
