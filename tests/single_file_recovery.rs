//! Durability and crash-recovery scenarios against the single-file
//! engine: commit/reopen round trips, uncommitted work vanishing, WAL
//! truncation, and byte corruption.

use raydb::core::single_file::{close_single_file, open_single_file, OpenOptions};
use raydb::{PropValue, RayError};
use tempfile::tempdir;

#[test]
fn s1_open_insert_reopen() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("X.raydb");

  let db = open_single_file(&path, OpenOptions::new()).unwrap();
  db.begin(false).unwrap();
  let person = db.define_label("Person").unwrap();
  let name = db.define_propkey("name").unwrap();
  let alice = db.create_node(Some("alice")).unwrap();
  db.add_node_label(alice, person).unwrap();
  db.set_node_prop(alice, name, PropValue::String("Alice".to_string()))
    .unwrap();
  db.commit().unwrap();
  close_single_file(db).unwrap();

  let db = open_single_file(&path, OpenOptions::new()).unwrap();
  let found = db.node_by_key("alice").expect("alice survives reopen");
  assert_eq!(found, alice);
  assert_eq!(
    db.node_prop(found, name),
    Some(PropValue::String("Alice".to_string()))
  );
  assert!(db.node_has_label(found, person));
  assert_eq!(db.label_id("Person"), Some(person));
  assert_eq!(db.propkey_id("name"), Some(name));

  let stats = db.stats();
  assert_eq!(stats.delta_nodes_created, 1);
  assert_eq!(db.count_nodes(), 1);
  close_single_file(db).unwrap();
}

#[test]
fn s2_uncommitted_work_survives_as_nothing() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("X.raydb");

  let db = open_single_file(&path, OpenOptions::new()).unwrap();
  db.begin(false).unwrap();
  db.define_propkey("name").unwrap();
  db.create_node(Some("alice")).unwrap();
  // Abandon the handle mid-transaction, as a crash would.
  drop(db);

  let db = open_single_file(&path, OpenOptions::new()).unwrap();
  assert_eq!(db.node_by_key("alice"), None);
  assert_eq!(db.count_nodes(), 0);
  assert_eq!(db.propkey_id("name"), None);
  close_single_file(db).unwrap();
}

/// Byte offset of `wal_head` in the page-0 header layout.
const WAL_HEAD_OFFSET: usize = 88;

fn read_wal_head(path: &std::path::Path) -> u64 {
  let bytes = std::fs::read(path).unwrap();
  let mut field = [0u8; 8];
  field.copy_from_slice(&bytes[WAL_HEAD_OFFSET..WAL_HEAD_OFFSET + 8]);
  u64::from_le_bytes(field)
}

#[test]
fn s3_wal_truncation_keeps_a_clean_prefix() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("X.raydb");

  let db = open_single_file(&path, OpenOptions::new()).unwrap();
  for i in 1..=20 {
    db.begin(false).unwrap();
    db.create_node(Some(&format!("n{i}"))).unwrap();
    db.commit().unwrap();
  }
  close_single_file(db).unwrap();

  // Chop the final 30% of used WAL bytes off the file. The WAL starts
  // at page 1 and nothing was compacted, so used bytes sit right there.
  let wal_head = read_wal_head(&path);
  assert!(wal_head > 0);
  let page_size = 4096u64;
  let keep_wal_bytes = wal_head * 7 / 10;
  let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
  file.set_len(page_size + keep_wal_bytes).unwrap();
  drop(file);

  let db = open_single_file(&path, OpenOptions::new()).unwrap();
  let visible: Vec<bool> = (1..=20)
    .map(|i| db.node_by_key(&format!("n{i}")).is_some())
    .collect();
  let k = visible.iter().filter(|v| **v).count();

  // Some proper prefix survives; no transaction is half-visible.
  assert!(k < 20, "truncation must lose at least one transaction");
  for (i, v) in visible.iter().enumerate() {
    assert_eq!(*v, i < k, "visible transactions must form a prefix");
  }

  // The engine keeps working after the torn tail is discarded.
  db.begin(false).unwrap();
  db.create_node(Some("after-truncation")).unwrap();
  db.commit().unwrap();
  close_single_file(db).unwrap();

  let db = open_single_file(&path, OpenOptions::new()).unwrap();
  assert!(db.node_by_key("after-truncation").is_some());
  assert_eq!(db.count_nodes(), k + 1);
  close_single_file(db).unwrap();
}

#[test]
fn s4_single_byte_corruption_is_all_or_nothing() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("X.raydb");

  let db = open_single_file(&path, OpenOptions::new()).unwrap();
  for i in 1..=50 {
    db.begin(false).unwrap();
    db.create_node(Some(&format!("n{i}"))).unwrap();
    db.commit().unwrap();
  }
  close_single_file(db).unwrap();

  // Flip one byte inside the first WAL record (the txid field of the
  // first transaction's BEGIN record, right after the header page).
  let mut bytes = std::fs::read(&path).unwrap();
  bytes[4096 + 8] ^= 0x01;
  std::fs::write(&path, &bytes).unwrap();

  match open_single_file(&path, OpenOptions::new()) {
    Ok(db) => {
      // The corrupt record kills its transaction and everything after
      // it; nothing from the affected transaction may remain.
      assert_eq!(db.node_by_key("n1"), None);
      let visible: Vec<bool> = (1..=50)
        .map(|i| db.node_by_key(&format!("n{i}")).is_some())
        .collect();
      let k = visible.iter().filter(|v| **v).count();
      for (i, v) in visible.iter().enumerate() {
        assert_eq!(*v, i < k);
      }
      close_single_file(db).unwrap();
    }
    Err(error) => {
      assert!(matches!(
        error,
        RayError::Corrupt(_) | RayError::CrcMismatch { .. }
      ));
    }
  }
}

#[test]
fn header_corruption_refuses_to_open() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("X.raydb");

  let db = open_single_file(&path, OpenOptions::new()).unwrap();
  db.begin(false).unwrap();
  db.create_node(Some("a")).unwrap();
  db.commit().unwrap();
  close_single_file(db).unwrap();

  // Flip a byte in the header body (change_counter field).
  let mut bytes = std::fs::read(&path).unwrap();
  bytes[32] ^= 0xFF;
  std::fs::write(&path, &bytes).unwrap();

  let result = open_single_file(&path, OpenOptions::new());
  assert!(matches!(
    result,
    Err(RayError::Corrupt(_)) | Err(RayError::CrcMismatch { .. })
  ));
}

#[test]
fn ids_stay_monotonic_across_reopen() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("X.raydb");

  let db = open_single_file(&path, OpenOptions::new()).unwrap();
  let tx1 = db.begin(false).unwrap();
  let n1 = db.create_node(None).unwrap();
  let n2 = db.create_node(None).unwrap();
  db.commit().unwrap();
  close_single_file(db).unwrap();

  let db = open_single_file(&path, OpenOptions::new()).unwrap();
  let tx2 = db.begin(false).unwrap();
  let n3 = db.create_node(None).unwrap();
  db.commit().unwrap();

  assert!(tx2 > tx1);
  assert!(n3 > n2);
  assert!(n2 > n1);
  close_single_file(db).unwrap();
}

#[test]
fn read_only_and_missing_file_modes() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("missing.raydb");

  // Missing file without create_if_missing.
  assert!(matches!(
    open_single_file(&path, OpenOptions::new().create_if_missing(false)),
    Err(RayError::NotFound(_))
  ));

  // Missing file in read-only mode.
  assert!(matches!(
    open_single_file(&path, OpenOptions::new().read_only(true)),
    Err(RayError::ReadOnly)
  ));

  // Writes on a read-only handle are rejected.
  let db = open_single_file(&path, OpenOptions::new()).unwrap();
  db.begin(false).unwrap();
  db.create_node(Some("a")).unwrap();
  db.commit().unwrap();
  close_single_file(db).unwrap();

  let db = open_single_file(&path, OpenOptions::new().read_only(true)).unwrap();
  assert!(matches!(db.begin(false), Err(RayError::ReadOnly)));
  db.begin(true).unwrap();
  assert!(db.node_by_key("a").is_some());
  db.commit().unwrap();
  drop(db);
}

#[test]
fn node_keys_stay_unique() {
  let dir = tempdir().unwrap();
  let db = open_single_file(dir.path().join("keys.raydb"), OpenOptions::new()).unwrap();

  db.begin(false).unwrap();
  let first = db.create_node(Some("alice")).unwrap();
  assert!(matches!(
    db.create_node(Some("alice")),
    Err(RayError::AlreadyExists(_))
  ));
  db.commit().unwrap();

  // Still unique against the committed delta.
  db.begin(false).unwrap();
  assert!(matches!(
    db.create_node(Some("alice")),
    Err(RayError::AlreadyExists(_))
  ));

  // Deleting the owner frees the key for a new node.
  db.delete_node(first).unwrap();
  let second = db.create_node(Some("alice")).unwrap();
  assert!(second > first);
  db.commit().unwrap();

  assert_eq!(db.node_by_key("alice"), Some(second));
  close_single_file(db).unwrap();
}

#[test]
fn invalid_page_size_is_rejected() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("bad-page.raydb");
  assert!(matches!(
    open_single_file(&path, OpenOptions::new().page_size(1000)),
    Err(RayError::InvalidArgument(_))
  ));
  assert!(matches!(
    open_single_file(&path, OpenOptions::new().page_size(2048)),
    Err(RayError::InvalidArgument(_))
  ));
}
