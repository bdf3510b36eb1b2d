//! Off-thread pivoting of record sets into count matrices.
//!
//! Pivoting a large table is CPU-bound, so it runs on a dedicated OS thread fed by a
//! channel. The worker keeps no state between requests and never touches the store.

use std::collections::BTreeMap;
use std::io;
use std::thread;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{CacheError, Result};

/// Label for records that lack the grouping field.
pub const MISSING_LABEL: &str = "(none)";

/// Record counts grouped by two fields. `counts[r][c]` counts records whose row field
/// is `rows[r]` and column field is `cols[c]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PivotMatrix {
  pub rows: Vec<String>,
  pub cols: Vec<String>,
  pub counts: Vec<Vec<u64>>,
}

impl PivotMatrix {
  pub fn get(&self, row: &str, col: &str) -> u64 {
    let r = self.rows.iter().position(|label| label == row);
    let c = self.cols.iter().position(|label| label == col);
    match (r, c) {
      (Some(r), Some(c)) => self.counts[r][c],
      _ => 0,
    }
  }

  pub fn total(&self) -> u64 {
    self.counts.iter().flatten().sum()
  }
}

fn label(record: &Value, key: &str) -> String {
  match record.get(key) {
    None | Some(Value::Null) => MISSING_LABEL.to_string(),
    Some(Value::String(s)) => s.clone(),
    Some(other) => other.to_string(),
  }
}

/// Count `records` by the values of `row_key` and `col_key`. Labels are sorted.
pub fn pivot(records: &[Value], row_key: &str, col_key: &str) -> PivotMatrix {
  let mut cells: BTreeMap<(String, String), u64> = BTreeMap::new();
  let mut cols: BTreeMap<String, usize> = BTreeMap::new();

  for record in records {
    let col = label(record, col_key);
    cols.entry(col.clone()).or_default();
    *cells.entry((label(record, row_key), col)).or_default() += 1;
  }

  for (index, slot) in cols.values_mut().enumerate() {
    *slot = index;
  }

  let mut matrix = PivotMatrix {
    cols: cols.keys().cloned().collect(),
    ..PivotMatrix::default()
  };
  for ((row, col), count) in cells {
    if matrix.rows.last() != Some(&row) {
      matrix.rows.push(row);
      matrix.counts.push(vec![0; cols.len()]);
    }
    if let Some(counts) = matrix.counts.last_mut() {
      counts[cols[&col]] = count;
    }
  }
  matrix
}

struct PivotJob {
  records: Vec<Value>,
  row_key: String,
  col_key: String,
  reply: oneshot::Sender<PivotMatrix>,
}

/// Handle to the pivot thread. The thread exits once every handle is dropped.
#[derive(Clone)]
pub struct PivotWorker {
  jobs: mpsc::UnboundedSender<PivotJob>,
}

impl PivotWorker {
  pub fn spawn() -> io::Result<Self> {
    let (jobs, mut rx) = mpsc::unbounded_channel::<PivotJob>();

    thread::Builder::new()
      .name("pivot".to_string())
      .spawn(move || {
        while let Some(job) = rx.blocking_recv() {
          let matrix = pivot(&job.records, &job.row_key, &job.col_key);
          debug!(
            records = job.records.len(),
            rows = matrix.rows.len(),
            cols = matrix.cols.len(),
            "Pivoted records"
          );
          // The requester may have given up
          let _ = job.reply.send(matrix);
        }
      })?;

    Ok(Self { jobs })
  }

  pub async fn pivot(
    &self,
    records: Vec<Value>,
    row_key: &str,
    col_key: &str,
  ) -> Result<PivotMatrix> {
    let (reply, response) = oneshot::channel();
    self
      .jobs
      .send(PivotJob {
        records,
        row_key: row_key.to_string(),
        col_key: col_key.to_string(),
        reply,
      })
      .map_err(|_| CacheError::WorkerStopped)?;

    response.await.map_err(|_| CacheError::WorkerStopped)
  }
}
