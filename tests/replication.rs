//! Primary → replica round trips over the JSON transport: snapshot
//! seeding, log frame streaming, idempotent re-apply, and epoch
//! reseeds.

use raydb::core::single_file::{
  close_single_file, install_replica_from_snapshot_json, open_single_file, OpenOptions,
  ReplicationRole, SingleFileDB,
};
use raydb::{PropValue, RayError};
use tempfile::tempdir;

fn open_primary(path: &std::path::Path) -> SingleFileDB {
  open_single_file(
    path,
    OpenOptions::new().replication_role(ReplicationRole::Primary),
  )
  .unwrap()
}

fn open_replica(path: &std::path::Path) -> SingleFileDB {
  open_single_file(
    path,
    OpenOptions::new().replication_role(ReplicationRole::Replica),
  )
  .unwrap()
}

fn seed_primary(db: &SingleFileDB, count: u32) {
  db.begin(false).unwrap();
  db.define_label("Person").unwrap();
  db.define_etype("KNOWS").unwrap();
  db.define_propkey("ord").unwrap();
  db.commit().unwrap();

  for i in 1..=count {
    db.begin(false).unwrap();
    let node = db.create_node(Some(&format!("n{i}"))).unwrap();
    db.add_node_label_by_name(node, "Person").unwrap();
    db.set_node_prop_by_name(node, "ord", PropValue::I64(i as i64))
      .unwrap();
    db.commit().unwrap();
  }
}

/// Node-by-node comparison of two databases.
fn assert_same_state(primary: &SingleFileDB, replica: &SingleFileDB) {
  let primary_nodes = primary.list_nodes();
  assert_eq!(primary_nodes, replica.list_nodes());

  for node_id in primary_nodes {
    assert_eq!(primary.node_key(node_id), replica.node_key(node_id), "key of {node_id}");
    assert_eq!(
      primary.node_labels(node_id),
      replica.node_labels(node_id),
      "labels of {node_id}"
    );
    assert_eq!(
      primary.node_props(node_id),
      replica.node_props(node_id),
      "props of {node_id}"
    );
    assert_eq!(
      primary.out_edges(node_id),
      replica.out_edges(node_id),
      "out edges of {node_id}"
    );
  }

  for edge in primary.list_edges(None) {
    assert_eq!(
      primary.edge_props(edge.src, edge.etype, edge.dst),
      replica.edge_props(edge.src, edge.etype, edge.dst)
    );
  }
}

#[test]
fn s6_snapshot_then_log_round_trip() {
  let dir = tempdir().unwrap();
  let primary_path = dir.path().join("primary.raydb");
  let replica_path = dir.path().join("replica.raydb");

  let primary = open_primary(&primary_path);
  seed_primary(&primary, 100);

  // Seed the replica from the snapshot blob.
  let snapshot_json = primary.primary_snapshot_transport_json(true).unwrap();
  install_replica_from_snapshot_json(&replica_path, &snapshot_json).unwrap();
  let replica = open_replica(&replica_path);
  replica
    .replica_anchor_from_snapshot_json(&snapshot_json)
    .unwrap();

  assert_same_state(&primary, &replica);

  // Ten more commits on the primary, including edges.
  let knows = primary.etype_id("KNOWS").unwrap();
  for i in 1..=10u32 {
    primary.begin(false).unwrap();
    let node = primary.create_node(Some(&format!("extra{i}"))).unwrap();
    let earlier = primary.node_by_key(&format!("n{i}")).unwrap();
    primary.add_edge(earlier, knows, node).unwrap();
    let weight = primary.define_propkey("weight").unwrap();
    primary
      .set_edge_prop(earlier, knows, node, weight, PropValue::F64(0.5))
      .unwrap();
    primary.commit().unwrap();
  }

  // Stream the frames after the snapshot's cursor and apply them.
  let snapshot_value: serde_json::Value = serde_json::from_str(&snapshot_json).unwrap();
  let start_cursor = snapshot_value["start_cursor"].as_str().unwrap().to_string();

  let log_json = primary
    .primary_log_transport_json(Some(&start_cursor), 100, 16 * 1024 * 1024, true)
    .unwrap();
  let applied = replica.replica_apply_log_transport_json(&log_json).unwrap();
  assert_eq!(applied, 10);

  assert_same_state(&primary, &replica);

  // Re-applying the same page is a no-op.
  let reapplied = replica.replica_apply_log_transport_json(&log_json).unwrap();
  assert_eq!(reapplied, 0);
  assert_same_state(&primary, &replica);

  // The replica can report progress back for retention.
  let status = replica.replica_replication_status().unwrap();
  primary
    .primary_report_replica_progress("replica-1", status.applied_epoch, status.applied_log_index)
    .unwrap();
  let outcome = primary.primary_run_retention().unwrap();
  assert_eq!(outcome.retained_floor, status.applied_log_index);

  close_single_file(primary).unwrap();
  close_single_file(replica).unwrap();
}

#[test]
fn epoch_bump_forces_reseed() {
  let dir = tempdir().unwrap();
  let primary_path = dir.path().join("primary.raydb");
  let replica_path = dir.path().join("replica.raydb");

  let primary = open_primary(&primary_path);
  seed_primary(&primary, 5);

  let snapshot_json = primary.primary_snapshot_transport_json(true).unwrap();
  install_replica_from_snapshot_json(&replica_path, &snapshot_json).unwrap();
  let replica = open_replica(&replica_path);
  replica
    .replica_anchor_from_snapshot_json(&snapshot_json)
    .unwrap();

  // Promote, then commit under the new epoch.
  let new_epoch = primary.primary_promote_to_next_epoch().unwrap();
  assert_eq!(new_epoch, 1);
  primary.begin(false).unwrap();
  primary.create_node(Some("post-promotion")).unwrap();
  primary.commit().unwrap();

  let log_json = primary
    .primary_log_transport_json(None, 500, 16 * 1024 * 1024, true)
    .unwrap();
  let result = replica.replica_apply_log_transport_json(&log_json);
  assert!(matches!(result, Err(RayError::InvalidReplication(_))));
  assert!(replica.replica_replication_status().unwrap().needs_reseed);

  // A fresh seed under the new epoch repairs the replica.
  close_single_file(replica).unwrap();
  let snapshot_json = primary.primary_snapshot_transport_json(true).unwrap();
  install_replica_from_snapshot_json(&replica_path, &snapshot_json).unwrap();
  let replica = open_replica(&replica_path);
  replica
    .replica_anchor_from_snapshot_json(&snapshot_json)
    .unwrap();
  assert_same_state(&primary, &replica);

  close_single_file(primary).unwrap();
  close_single_file(replica).unwrap();
}

#[test]
fn snapshot_blob_checksum_is_verified() {
  let dir = tempdir().unwrap();
  let primary_path = dir.path().join("primary.raydb");
  let replica_path = dir.path().join("replica.raydb");

  let primary = open_primary(&primary_path);
  seed_primary(&primary, 3);

  let snapshot_json = primary.primary_snapshot_transport_json(true).unwrap();
  let mut value: serde_json::Value = serde_json::from_str(&snapshot_json).unwrap();
  value["checksum_crc32c"] = serde_json::Value::String("deadbeef".to_string());
  let tampered = value.to_string();

  assert!(matches!(
    install_replica_from_snapshot_json(&replica_path, &tampered),
    Err(RayError::InvalidReplication(_))
  ));
  assert!(!replica_path.exists());

  close_single_file(primary).unwrap();
}

#[test]
fn snapshot_export_without_data_has_metadata_only() {
  let dir = tempdir().unwrap();
  let primary = open_primary(&dir.path().join("primary.raydb"));
  seed_primary(&primary, 2);

  let json = primary.primary_snapshot_transport_json(false).unwrap();
  let value: serde_json::Value = serde_json::from_str(&json).unwrap();
  assert_eq!(value["format"], "raydb-file-copy-v1");
  assert!(value["byte_length"].as_u64().unwrap() > 0);
  assert!(value["data_base64"].is_null());
  assert!(value["start_cursor"].as_str().is_some());

  assert!(matches!(
    install_replica_from_snapshot_json(dir.path().join("r.raydb"), &json),
    Err(RayError::InvalidReplication(_))
  ));

  close_single_file(primary).unwrap();
}
