//! Edge index maintenance through the repository.

mod common;

use std::sync::Arc;

use chrono::Utc;
use cqlmap::fakes::{Executed, MemoryTransport};
use cqlmap::{
    Edge, EdgeFallback, EdgeWrite, KeyColumn, StoreError, TransportError, DEFAULT_EDGE_TABLE,
};
use cqlmap_model::{Entity, Key, Value};

use common::*;

fn tags(n: usize) -> Vec<Key> {
    (0..n).map(|_| Key::generate("Tag").unwrap()).collect()
}

fn stored_targets(store: &MemoryTransport) -> Vec<String> {
    store
        .rows(DEFAULT_EDGE_TABLE)
        .iter()
        .map(|row| row["target"].as_text().unwrap_or_default().to_string())
        .collect()
}

// ===========================================================================
// Write path
// ===========================================================================

#[tokio::test]
async fn insert_writes_one_edge_per_reference() {
    let store = Arc::new(MemoryTransport::new());
    let repo = repository(&store);
    let owner = Key::generate("User").unwrap();
    let format = Key::generate("Format").unwrap();
    let record = asset()
        .with("owner", owner.clone())
        .unwrap()
        .with("attributes", format_attribute(&format))
        .unwrap();

    let record = repo.insert(record, false).await.unwrap();

    let edges = repo.edges_for(record.key()).await.unwrap();
    let identities: Vec<(&str, &Key)> = edges.iter().map(Edge::identity).collect();
    assert_eq!(
        identities,
        vec![("owner", &owner), ("attributes.imageFormat", &format)]
    );
    assert!(edges.iter().all(|e| &e.source == record.key()));
    assert_eq!(store.batches().len(), 1);
}

#[tokio::test]
async fn edge_lookup_has_no_limit() {
    let store = Arc::new(MemoryTransport::new());
    let repo = repository(&store);
    let source = Key::generate("ImageAsset").unwrap();

    repo.edges_for(&source).await.unwrap();

    assert_eq!(
        store.statements(),
        vec!["SELECT * FROM edge WHERE source = :source"]
    );
}

#[tokio::test]
async fn update_reconciles_stored_edges() {
    let store = Arc::new(MemoryTransport::new());
    let repo = repository(&store);
    let [a, b, c]: [Key; 3] = tags(3).try_into().unwrap();
    let record = repo.insert(tagged(&[&a, &b]), false).await.unwrap();
    store.clear_log();

    let record = repo
        .update(record.with("tags", vec![b.clone(), c.clone()]).unwrap(), None)
        .await
        .unwrap();

    let mut targets = stored_targets(&store);
    targets.sort();
    let mut expected = vec![b.urlsafe(), c.urlsafe()];
    expected.sort();
    assert_eq!(targets, expected);

    let batches = store.batches();
    assert_eq!(batches.len(), 1);
    let texts: Vec<&str> = batches[0].statements().iter().map(|s| s.text()).collect();
    assert!(texts[0].starts_with("INSERT INTO edge"));
    assert!(texts[1].starts_with("DELETE FROM edge"));
    assert_eq!(repo.edges_for(record.key()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn update_without_reference_changes_writes_no_edges() {
    let store = Arc::new(MemoryTransport::new());
    let repo = repository(&store);
    let [a]: [Key; 1] = tags(1).try_into().unwrap();
    let record = repo.insert(tagged(&[&a]), false).await.unwrap();
    store.clear_log();

    repo.update(record.with("title", "renamed").unwrap(), None)
        .await
        .unwrap();

    let edge_writes = store
        .statements()
        .into_iter()
        .filter(|text| text.contains("INTO edge") || text.starts_with("DELETE FROM edge"))
        .count();
    assert_eq!(edge_writes, 0);
}

#[tokio::test]
async fn update_dropping_every_reference_purges_edges() {
    let store = Arc::new(MemoryTransport::new());
    let repo = repository(&store);
    let record = repo.insert(tagged(&tags(2).iter().collect::<Vec<_>>()), false)
        .await
        .unwrap();
    assert_eq!(store.rows(DEFAULT_EDGE_TABLE).len(), 2);

    let mut cleared = record;
    cleared.remove("tags");
    repo.update(cleared, None).await.unwrap();

    assert!(store.rows(DEFAULT_EDGE_TABLE).is_empty());
}

#[tokio::test]
async fn delete_removes_edges_then_row() {
    let store = Arc::new(MemoryTransport::new());
    let repo = repository(&store);
    let record = repo.insert(tagged(&tags(2).iter().collect::<Vec<_>>()), false)
        .await
        .unwrap();
    store.clear_log();

    repo.delete(&record).await.unwrap();

    let executed = store.executed();
    assert_eq!(executed.len(), 3);
    assert!(matches!(
        &executed[0],
        Executed::Statement { statement, .. } if statement.text().starts_with("SELECT * FROM edge")
    ));
    assert!(matches!(
        &executed[1],
        Executed::Batch(batch) if batch.len() == 2
            && batch.statements().iter().all(|s| s.text().starts_with("DELETE FROM edge"))
    ));
    assert!(matches!(
        &executed[2],
        Executed::Statement { statement, .. }
            if statement.text() == "DELETE FROM imageasset WHERE key = :key"
    ));
    assert!(repo.edges_for(record.key()).await.unwrap().is_empty());
    assert!(store.rows("imageasset").is_empty());
}

#[tokio::test]
async fn duplicate_references_store_one_edge() {
    let store = Arc::new(MemoryTransport::new());
    let repo = repository(&store);
    let [a]: [Key; 1] = tags(1).try_into().unwrap();

    repo.insert(tagged(&[&a, &a]), false).await.unwrap();

    assert_eq!(stored_targets(&store), vec![a.urlsafe()]);
}

#[tokio::test]
async fn references_held_as_text_are_indexed() {
    let store = Arc::new(MemoryTransport::new());
    let repo = repository(&store);
    let about = Key::generate("ImageAsset").unwrap();
    let mut note = cqlmap_model::Record::new("Note", note_schema())
        .unwrap()
        .with("about", about.clone())
        .unwrap();
    if let Some(value) = note.get_mut("about") {
        *value = Value::Text(about.urlsafe());
    }

    repo.insert(note, false).await.unwrap();

    assert_eq!(stored_targets(&store), vec![about.urlsafe()]);
}

#[tokio::test]
async fn custom_edge_table() {
    let store = Arc::new(MemoryTransport::new().with_table(
        "links",
        vec![
            KeyColumn::text("source"),
            KeyColumn::text("label"),
            KeyColumn::text("target"),
        ],
    ));
    let repo = repository_with(&store, config().with_edge_table("links"), registry());
    let [a]: [Key; 1] = tags(1).try_into().unwrap();

    repo.insert(tagged(&[&a]), false).await.unwrap();

    assert_eq!(store.rows("links").len(), 1);
    assert!(store.rows(DEFAULT_EDGE_TABLE).is_empty());
}

#[tokio::test]
async fn set_edges_applies_reconciliation() {
    let store = Arc::new(MemoryTransport::new());
    let repo = repository(&store);
    let source = Key::generate("ImageAsset").unwrap();
    let [a, b]: [Key; 2] = tags(2).try_into().unwrap();
    let now = Utc::now();
    let stored = Edge::new("tags", source.clone(), a.clone(), now);
    repo.apply_edge_writes(&[EdgeWrite::Insert(stored.clone())])
        .await
        .unwrap();

    let desired = [Edge::new("tags", Key::generate("Other").unwrap(), b.clone(), now)];
    let writes = repo.set_edges(&source, &desired, &[stored]).await.unwrap();

    assert_eq!(writes.len(), 2);
    assert_eq!(stored_targets(&store), vec![b.urlsafe()]);
    let edges = repo.edges_for(&source).await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].source, source);

    let err = repo.set_edges(&source, &[], &edges).await.unwrap_err();
    assert!(matches!(err, StoreError::Query(_)));
}

// ===========================================================================
// Batch and fallback
// ===========================================================================

#[tokio::test]
async fn failed_edge_batch_writes_nothing() {
    let store = Arc::new(MemoryTransport::new());
    let repo = repository(&store);
    store.inject_failure("INSERT INTO edge", 1, TransportError::Timeout("batch".into()));

    let err = repo
        .insert(tagged(&tags(3).iter().collect::<Vec<_>>()), false)
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Transport(TransportError::Timeout(_))));
    assert!(store.rows(DEFAULT_EDGE_TABLE).is_empty());
    assert_eq!(store.rows("imageasset").len(), 1);
}

async fn insert_with_second_edge_failing(fallback: EdgeFallback) -> (Arc<MemoryTransport>, StoreError) {
    let store = Arc::new(MemoryTransport::new().with_protocol_version(1));
    let repo = repository_with(
        &store,
        config().with_protocol_version(1).with_edge_fallback(fallback),
        registry(),
    );
    store.inject_failure(
        "INSERT INTO edge",
        1,
        TransportError::Connection("reset".into()),
    );

    let err = repo
        .insert(tagged(&tags(3).iter().collect::<Vec<_>>()), false)
        .await
        .unwrap_err();
    (store, err)
}

#[tokio::test]
async fn fail_fast_stops_at_first_failed_edge() {
    let (store, err) = insert_with_second_edge_failing(EdgeFallback::FailFast).await;

    assert!(matches!(err, StoreError::Transport(TransportError::Connection(_))));
    assert!(store.batches().is_empty());
    assert_eq!(store.rows(DEFAULT_EDGE_TABLE).len(), 1);
}

#[tokio::test]
async fn best_effort_attempts_every_edge() {
    let (store, err) = insert_with_second_edge_failing(EdgeFallback::BestEffort).await;

    assert!(matches!(err, StoreError::Transport(TransportError::Connection(_))));
    assert_eq!(store.rows(DEFAULT_EDGE_TABLE).len(), 2);
}

#[tokio::test]
async fn compensate_undoes_applied_edges() {
    let (store, err) = insert_with_second_edge_failing(EdgeFallback::Compensate).await;

    assert!(matches!(err, StoreError::Transport(TransportError::Connection(_))));
    assert!(store.rows(DEFAULT_EDGE_TABLE).is_empty());
    let last = store.statements().pop().unwrap_or_default();
    assert!(last.starts_with("DELETE FROM edge"));
}

#[tokio::test]
async fn delete_without_batches_removes_edges_individually() {
    let store = Arc::new(MemoryTransport::new().with_protocol_version(1));
    let repo = repository_with(&store, config().with_protocol_version(1), registry());
    let record = repo.insert(tagged(&tags(2).iter().collect::<Vec<_>>()), false)
        .await
        .unwrap();
    store.clear_log();

    repo.delete(&record).await.unwrap();

    let statements = store.statements();
    assert_eq!(statements.len(), 4);
    assert!(statements[1].starts_with("DELETE FROM edge"));
    assert!(statements[2].starts_with("DELETE FROM edge"));
    assert_eq!(statements[3], "DELETE FROM imageasset WHERE key = :key");
    assert!(store.batches().is_empty());
}
