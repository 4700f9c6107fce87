//! Compaction scenarios: view equivalence, generation bookkeeping,
//! WAL-full recovery via compaction, and WAL resizing.

use std::collections::HashMap;

use raydb::core::single_file::{
  close_single_file, open_single_file, CompactOptions, OpenOptions, SingleFileDB,
};
use raydb::util::compression::CompressionOptions;
use raydb::{PropValue, RayError};
use tempfile::tempdir;

fn commit_nodes(db: &SingleFileDB, range: std::ops::RangeInclusive<u32>) {
  for i in range {
    db.begin(false).unwrap();
    let node = db.create_node(Some(&format!("n{i}"))).unwrap();
    db.set_node_prop_by_name(node, "ord", PropValue::I64(i as i64))
      .unwrap();
    db.commit().unwrap();
  }
}

#[test]
fn s5_compaction_idempotence() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("compact.raydb");

  let db = open_single_file(&path, OpenOptions::new()).unwrap();
  commit_nodes(&db, 1..=100);
  db.compact(None).unwrap();

  let stats = db.stats();
  assert_eq!(stats.snapshot_gen, 1);
  assert_eq!(stats.snapshot_nodes, 100);
  assert_eq!(stats.delta_nodes_created, 0);
  assert_eq!(stats.wal_bytes, 0);

  commit_nodes(&db, 101..=150);
  assert_eq!(db.count_nodes(), 150);
  close_single_file(db).unwrap();

  let db = open_single_file(&path, OpenOptions::new()).unwrap();
  assert_eq!(db.count_nodes(), 150);

  db.compact(None).unwrap();
  let stats = db.stats();
  assert_eq!(stats.snapshot_gen, 2, "generation advances by exactly one");
  assert_eq!(stats.snapshot_nodes, 150);
  assert_eq!(db.count_nodes(), 150);
  for i in 1..=150u32 {
    let node = db
      .node_by_key(&format!("n{i}"))
      .unwrap_or_else(|| panic!("node n{i} lost by compaction"));
    assert_eq!(db.node_prop_by_name(node, "ord"), Some(PropValue::I64(i as i64)));
  }
  close_single_file(db).unwrap();
}

/// Capture every observable fact about the graph for equivalence
/// checks around compaction.
fn observe(db: &SingleFileDB) -> ObservedState {
  let mut nodes = Vec::new();
  for node_id in db.list_nodes() {
    nodes.push((
      node_id,
      db.node_key(node_id),
      db.node_labels(node_id),
      db.node_props(node_id).unwrap_or_default(),
      db.out_edges(node_id),
      db.in_edges(node_id),
    ));
  }
  let mut edges = HashMap::new();
  for edge in db.list_edges(None) {
    edges.insert(
      (edge.src, edge.etype, edge.dst),
      db.edge_props(edge.src, edge.etype, edge.dst).unwrap_or_default(),
    );
  }
  ObservedState { nodes, edges }
}

type ObservedNode = (
  u64,
  Option<String>,
  Vec<u32>,
  HashMap<u32, PropValue>,
  Vec<(u32, u64)>,
  Vec<(u32, u64)>,
);

#[derive(PartialEq, Debug)]
struct ObservedState {
  nodes: Vec<ObservedNode>,
  edges: HashMap<(u64, u32, u64), HashMap<u32, PropValue>>,
}

fn build_rich_graph(db: &SingleFileDB) {
  db.begin(false).unwrap();
  let person = db.define_label("Person").unwrap();
  let doc = db.define_label("Document").unwrap();
  let knows = db.define_etype("KNOWS").unwrap();
  let wrote = db.define_etype("WROTE").unwrap();
  let name = db.define_propkey("name").unwrap();
  let weight = db.define_propkey("weight").unwrap();
  let embedding = db.define_propkey("embedding").unwrap();

  let alice = db.create_node(Some("alice")).unwrap();
  let bob = db.create_node(Some("bob")).unwrap();
  let carol = db.create_node(Some("carol")).unwrap();
  let paper = db.create_node(Some("paper")).unwrap();

  for node in [alice, bob, carol] {
    db.add_node_label(node, person).unwrap();
  }
  db.add_node_label(paper, doc).unwrap();

  db.set_node_prop(alice, name, PropValue::String("Alice".into())).unwrap();
  db.set_node_prop(bob, name, PropValue::String("Bob".into())).unwrap();
  db.set_node_vector(alice, embedding, &[0.5, -0.25, 1.0]).unwrap();

  db.add_edge(alice, knows, bob).unwrap();
  db.add_edge(bob, knows, carol).unwrap();
  db.add_edge(alice, wrote, paper).unwrap();
  db.set_edge_prop(alice, knows, bob, weight, PropValue::F64(0.8)).unwrap();
  db.commit().unwrap();

  // A second transaction with deletions and updates, so the delta
  // carries tombstones into compaction.
  db.begin(false).unwrap();
  db.delete_edge(bob, knows, carol).unwrap();
  db.delete_node(carol).unwrap();
  db.set_node_prop(bob, name, PropValue::String("Robert".into())).unwrap();
  db.delete_node_prop(alice, name).unwrap();
  db.remove_node_label(paper, doc).unwrap();
  db.commit().unwrap();
}

#[test]
fn compaction_preserves_every_observable_fact() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("equiv.raydb");

  let db = open_single_file(&path, OpenOptions::new()).unwrap();
  build_rich_graph(&db);

  let before = observe(&db);
  db.compact(None).unwrap();
  let after = observe(&db);
  assert_eq!(before, after);
  close_single_file(db).unwrap();

  // And the compacted state round-trips through a reopen.
  let db = open_single_file(&path, OpenOptions::new()).unwrap();
  let reopened = observe(&db);
  assert_eq!(before, reopened);

  // Deleted entities stay deleted.
  assert_eq!(db.node_by_key("carol"), None);
  let alice = db.node_by_key("alice").unwrap();
  let bob = db.node_by_key("bob").unwrap();
  let knows = db.etype_id("KNOWS").unwrap();
  assert!(db.edge_exists(alice, knows, bob));
  assert!(!db.edge_exists(bob, knows, 3));
  close_single_file(db).unwrap();
}

#[test]
fn compressed_snapshot_round_trips() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("compressed.raydb");

  let db = open_single_file(&path, OpenOptions::new()).unwrap();
  build_rich_graph(&db);
  let before = observe(&db);

  db.compact(Some(CompactOptions {
    compression: Some(CompressionOptions::zstd(3)),
  }))
  .unwrap();
  assert_eq!(observe(&db), before);
  close_single_file(db).unwrap();

  let db = open_single_file(&path, OpenOptions::new()).unwrap();
  assert_eq!(observe(&db), before);
  close_single_file(db).unwrap();
}

#[test]
fn wal_full_commit_fails_then_compaction_unblocks() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("wal-full.raydb");

  // Smallest WAL the format allows, to hit the ceiling quickly.
  let db = open_single_file(&path, OpenOptions::new().wal_size(4096)).unwrap();

  let payload = "x".repeat(512);
  let mut committed = 0u32;
  let full_error = loop {
    db.begin(false).unwrap();
    let node = db.create_node(Some(&format!("bulk{committed}"))).unwrap();
    let result = db
      .set_node_prop_by_name(node, "payload", PropValue::String(payload.clone()))
      .and_then(|_| db.commit());
    match result {
      Ok(()) => committed += 1,
      Err(error) => break error,
    }
    assert!(committed < 1000, "WAL never filled");
  };
  assert!(matches!(full_error, RayError::WalBufferFull { .. }));

  // The failed transaction is fully aborted.
  assert!(!db.has_transaction());
  assert_eq!(db.count_nodes(), committed as usize);

  // Compaction empties the WAL; the same work now commits.
  db.compact(None).unwrap();
  db.begin(false).unwrap();
  let node = db.create_node(Some("retry")).unwrap();
  db.set_node_prop_by_name(node, "payload", PropValue::String(payload))
    .unwrap();
  db.commit().unwrap();

  assert_eq!(db.count_nodes(), committed as usize + 1);
  close_single_file(db).unwrap();
}

#[test]
fn resize_wal_preserves_data() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("resize.raydb");

  let db = open_single_file(&path, OpenOptions::new().wal_size(64 * 1024)).unwrap();
  commit_nodes(&db, 1..=10);

  db.resize_wal(1024 * 1024).unwrap();
  assert_eq!(db.count_nodes(), 10);
  close_single_file(db).unwrap();

  let db = open_single_file(&path, OpenOptions::new()).unwrap();
  assert_eq!(db.count_nodes(), 10);
  assert!(db.node_by_key("n10").is_some());

  // And commits still work against the resized ring.
  commit_nodes(&db, 11..=12);
  assert_eq!(db.count_nodes(), 12);
  close_single_file(db).unwrap();
}

#[test]
fn compact_with_open_transaction_is_rejected() {
  let dir = tempdir().unwrap();
  let db = open_single_file(dir.path().join("busy.raydb"), OpenOptions::new()).unwrap();

  db.begin(false).unwrap();
  db.create_node(None).unwrap();
  assert!(db.compact(None).is_err());
  db.rollback().unwrap();

  db.compact(None).unwrap();
  close_single_file(db).unwrap();
}
