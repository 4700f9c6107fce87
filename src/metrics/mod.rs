//! Engine metrics: Prometheus text exposition and an
//! OpenTelemetry-flavored JSON document.

use std::sync::atomic::Ordering;

use serde_json::{json, Value};

use crate::core::single_file::SingleFileDB;

/// One collected view of the engine's counters and gauges.
#[derive(Debug, Clone)]
pub struct EngineMetrics {
  pub wal_bytes_written: u64,
  pub wal_flushes: u64,
  pub commits_total: u64,
  pub compactions_total: u64,
  pub snapshot_bytes: u64,
  pub delta_entries: u64,
  pub cache_hits: u64,
  pub cache_misses: u64,
  pub wal_used_fraction: f64,
  pub epoch: u64,
  pub active_snapshot_gen: u64,
  pub collected_at_ms: u64,
}

/// Collect metrics from an open database.
pub fn collect_metrics(db: &SingleFileDB) -> EngineMetrics {
  let wal = db.wal_stats();
  let delta_entries = db.delta.read().entry_count() as u64;
  let snapshot_bytes = db
    .snapshot
    .read()
    .as_ref()
    .map(|snap| snap.byte_len() as u64)
    .unwrap_or(0);
  let (epoch, active_snapshot_gen) = {
    let header = db.header.read();
    (header.epoch, header.active_snapshot_gen)
  };
  let cache = db.cache_stats().unwrap_or_default();

  EngineMetrics {
    wal_bytes_written: wal.bytes_written,
    wal_flushes: wal.flushes,
    commits_total: db.counters.commits_total.load(Ordering::Relaxed),
    compactions_total: db.counters.compactions_total.load(Ordering::Relaxed),
    snapshot_bytes,
    delta_entries,
    cache_hits: cache.hits,
    cache_misses: cache.misses,
    wal_used_fraction: if wal.capacity == 0 {
      0.0
    } else {
      wal.used as f64 / wal.capacity as f64
    },
    epoch,
    active_snapshot_gen,
    collected_at_ms: std::time::SystemTime::now()
      .duration_since(std::time::UNIX_EPOCH)
      .map(|d| d.as_millis() as u64)
      .unwrap_or(0),
  }
}

// ============================================================================
// Prometheus text exposition
// ============================================================================

fn push_prometheus_help(lines: &mut Vec<String>, name: &str, kind: &str, help: &str) {
  lines.push(format!("# HELP {name} {help}"));
  lines.push(format!("# TYPE {name} {kind}"));
}

fn push_prometheus_sample(lines: &mut Vec<String>, name: &str, value: impl std::fmt::Display) {
  lines.push(format!("{name} {value}"));
}

/// Render collected metrics in Prometheus text format.
pub fn render_prometheus(metrics: &EngineMetrics) -> String {
  let mut lines = Vec::new();

  push_prometheus_help(
    &mut lines,
    "raydb_wal_bytes_written_total",
    "counter",
    "Bytes appended to the WAL ring since open.",
  );
  push_prometheus_sample(&mut lines, "raydb_wal_bytes_written_total", metrics.wal_bytes_written);

  push_prometheus_help(
    &mut lines,
    "raydb_wal_flushes_total",
    "counter",
    "WAL page flushes since open.",
  );
  push_prometheus_sample(&mut lines, "raydb_wal_flushes_total", metrics.wal_flushes);

  push_prometheus_help(
    &mut lines,
    "raydb_commits_total",
    "counter",
    "Committed write transactions since open.",
  );
  push_prometheus_sample(&mut lines, "raydb_commits_total", metrics.commits_total);

  push_prometheus_help(
    &mut lines,
    "raydb_compactions_total",
    "counter",
    "Completed compactions since open.",
  );
  push_prometheus_sample(&mut lines, "raydb_compactions_total", metrics.compactions_total);

  push_prometheus_help(
    &mut lines,
    "raydb_snapshot_bytes",
    "gauge",
    "Byte length of the active snapshot region.",
  );
  push_prometheus_sample(&mut lines, "raydb_snapshot_bytes", metrics.snapshot_bytes);

  push_prometheus_help(
    &mut lines,
    "raydb_delta_entries",
    "gauge",
    "Mutations held in the in-memory delta.",
  );
  push_prometheus_sample(&mut lines, "raydb_delta_entries", metrics.delta_entries);

  push_prometheus_help(
    &mut lines,
    "raydb_cache_hits_total",
    "counter",
    "Read cache hits since open.",
  );
  push_prometheus_sample(&mut lines, "raydb_cache_hits_total", metrics.cache_hits);

  push_prometheus_help(
    &mut lines,
    "raydb_cache_misses_total",
    "counter",
    "Read cache misses since open.",
  );
  push_prometheus_sample(&mut lines, "raydb_cache_misses_total", metrics.cache_misses);

  push_prometheus_help(
    &mut lines,
    "raydb_wal_used_fraction",
    "gauge",
    "Fraction of the WAL ring holding live records.",
  );
  push_prometheus_sample(&mut lines, "raydb_wal_used_fraction", metrics.wal_used_fraction);

  push_prometheus_help(
    &mut lines,
    "raydb_epoch",
    "gauge",
    "Replication epoch from the database header.",
  );
  push_prometheus_sample(&mut lines, "raydb_epoch", metrics.epoch);

  push_prometheus_help(
    &mut lines,
    "raydb_active_snapshot_gen",
    "gauge",
    "Active snapshot generation.",
  );
  push_prometheus_sample(&mut lines, "raydb_active_snapshot_gen", metrics.active_snapshot_gen);

  let mut output = lines.join("\n");
  output.push('\n');
  output
}

// ============================================================================
// OTel-flavored JSON
// ============================================================================

fn sum_metric(name: &str, value: u64, unix_ms: u64) -> Value {
  json!({
    "name": name,
    "sum": {
      "dataPoints": [{ "asInt": value, "timeUnixNano": unix_ms * 1_000_000 }],
      "aggregationTemporality": 2,
      "isMonotonic": true,
    },
  })
}

fn gauge_metric(name: &str, value: Value, unix_ms: u64) -> Value {
  json!({
    "name": name,
    "gauge": {
      "dataPoints": [{ "asDouble": value, "timeUnixNano": unix_ms * 1_000_000 }],
    },
  })
}

/// Render collected metrics as an OTLP-shaped JSON document.
pub fn render_otel_json(metrics: &EngineMetrics) -> String {
  let ms = metrics.collected_at_ms;
  let document = json!({
    "resourceMetrics": [{
      "resource": {
        "attributes": [{
          "key": "service.name",
          "value": { "stringValue": "raydb" },
        }],
      },
      "scopeMetrics": [{
        "scope": { "name": "raydb.engine" },
        "metrics": [
          sum_metric("raydb.wal.bytes_written", metrics.wal_bytes_written, ms),
          sum_metric("raydb.wal.flushes", metrics.wal_flushes, ms),
          sum_metric("raydb.commits", metrics.commits_total, ms),
          sum_metric("raydb.compactions", metrics.compactions_total, ms),
          gauge_metric("raydb.snapshot.bytes", json!(metrics.snapshot_bytes as f64), ms),
          gauge_metric("raydb.delta.entries", json!(metrics.delta_entries as f64), ms),
          sum_metric("raydb.cache.hits", metrics.cache_hits, ms),
          sum_metric("raydb.cache.misses", metrics.cache_misses, ms),
          gauge_metric("raydb.wal.used_fraction", json!(metrics.wal_used_fraction), ms),
          gauge_metric("raydb.epoch", json!(metrics.epoch as f64), ms),
          gauge_metric("raydb.snapshot.generation", json!(metrics.active_snapshot_gen as f64), ms),
        ],
      }],
    }],
  });
  document.to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::core::single_file::{close_single_file, open_single_file, OpenOptions};
  use tempfile::tempdir;

  #[test]
  fn prometheus_exposition_covers_the_metric_set() {
    let dir = tempdir().unwrap();
    let db = open_single_file(
      dir.path().join("metrics.raydb"),
      OpenOptions::new().enable_cache(),
    )
    .unwrap();

    db.begin(false).unwrap();
    db.create_node(Some("m1")).unwrap();
    db.commit().unwrap();

    let metrics = collect_metrics(&db);
    assert_eq!(metrics.commits_total, 1);
    assert!(metrics.wal_bytes_written > 0);
    assert!(metrics.delta_entries > 0);

    let text = render_prometheus(&metrics);
    for name in [
      "raydb_wal_bytes_written_total",
      "raydb_wal_flushes_total",
      "raydb_commits_total",
      "raydb_compactions_total",
      "raydb_snapshot_bytes",
      "raydb_delta_entries",
      "raydb_cache_hits_total",
      "raydb_cache_misses_total",
      "raydb_wal_used_fraction",
      "raydb_epoch",
      "raydb_active_snapshot_gen",
    ] {
      assert!(text.contains(name), "missing metric {name}");
    }

    close_single_file(db).unwrap();
  }

  #[test]
  fn otel_json_parses_back() {
    let dir = tempdir().unwrap();
    let db = open_single_file(dir.path().join("otel.raydb"), OpenOptions::new()).unwrap();

    let rendered = render_otel_json(&collect_metrics(&db));
    let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
    let metrics = &value["resourceMetrics"][0]["scopeMetrics"][0]["metrics"];
    assert!(metrics.as_array().unwrap().len() >= 11);

    close_single_file(db).unwrap();
  }
}
