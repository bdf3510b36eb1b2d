use std::fmt;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{ActionContext, Notice};
use crate::cache::{EntityCache, RecordId};
use crate::error::{CacheError, Result};
use crate::models::Task;

/// Outcome of a batch delete.
///
/// Forbidden items are an expected outcome and are counted apart from failures.
#[derive(Debug)]
pub struct BatchSummary {
  pub succeeded: usize,
  pub forbidden: usize,
  pub failed: usize,
  /// Recreates the deleted tasks, if any were deleted
  pub undo: Option<UndoHandle>,
}

/// Delete several tasks independently, keeping whatever succeeds.
pub struct BatchDeleteAction {
  ctx: ActionContext,
  tasks: EntityCache<Task>,
  undo_window: Duration,
}

impl BatchDeleteAction {
  pub fn new(ctx: ActionContext, tasks: EntityCache<Task>, undo_window: Duration) -> Self {
    Self {
      ctx,
      tasks,
      undo_window,
    }
  }

  pub async fn delete_tasks(&self, ids: &[i64]) -> Result<BatchSummary> {
    let state = self.ctx.state();
    let ids: Vec<RecordId> = ids.iter().copied().map(RecordId::Int).collect();

    // Full copies of each task, for rollback and undo.
    let originals: Vec<Option<Value>> = ids.iter().map(|id| self.original(id)).collect();

    state.apply_optimistic(Task::COLLECTION, |slice| {
      for id in &ids {
        slice.remove(id);
      }
    });

    let results = join_all(ids.iter().map(|id| self.ctx.api.delete_task(id))).await;

    let mut deleted = Vec::new();
    let mut rollback = Vec::new();
    let mut stale = Vec::new();
    let mut succeeded = 0;
    let mut forbidden = 0;
    let mut failed = 0;

    for ((id, original), result) in ids.into_iter().zip(originals).zip(results) {
      match result {
        Ok(()) => {
          succeeded += 1;
          if let Err(e) = self.tasks.delete(&id) {
            warn!(id = %id, error = %e, "Deleted task is still cached");
            stale.push(id.clone());
          }
          match original {
            Some(task) => deleted.push(task),
            None => debug!(id = %id, "Deleted task was not cached and cannot be undone"),
          }
        }
        Err(e) => {
          if e.is_expected() {
            debug!(id = %id, error = %e, "Task delete not permitted");
            forbidden += 1;
          } else {
            warn!(id = %id, error = %e, "Task delete failed");
            failed += 1;
          }
          if let Some(task) = original {
            rollback.push((id, task));
          }
        }
      }
    }

    if !rollback.is_empty() {
      state.apply_optimistic(Task::COLLECTION, |slice| slice.extend(rollback));
    }

    // The server has committed the deletes, so a failed resync must not lose the
    // summary or the undo. The optimistic slice stays as the best view.
    if let Err(e) = self.ctx.registry.sync_table(Task::COLLECTION).await {
      warn!(error = %e, "Task list could not be refreshed after batch delete");
      self.ctx.notifier.notify(Notice::unsaved("Deleting tasks", &e));
    }

    if !stale.is_empty() {
      state.apply_optimistic(Task::COLLECTION, |slice| {
        for id in &stale {
          slice.remove(id);
        }
      });
      self.ctx.notifier.notify(Notice::error(format!(
        "{} deleted tasks could not be removed from the local cache",
        stale.len()
      )));
    }

    if failed > 0 {
      self.ctx.notifier.notify(Notice::error(format!(
        "{} of {} tasks could not be deleted",
        failed,
        succeeded + forbidden + failed
      )));
    }
    if succeeded > 0 {
      self
        .ctx
        .notifier
        .notify(Notice::success(format!("Deleted {} tasks", succeeded)));
    }
    info!(succeeded, forbidden, failed, "Batch delete finished");

    let undo = (!deleted.is_empty()).then(|| UndoHandle {
      ctx: self.ctx.clone(),
      tasks: self.tasks.clone(),
      records: deleted,
      deadline: Instant::now() + self.undo_window,
    });

    Ok(BatchSummary {
      succeeded,
      forbidden,
      failed,
      undo,
    })
  }

  fn original(&self, id: &RecordId) -> Option<Value> {
    match self.tasks.get(id) {
      Ok(Some(task)) => serde_json::to_value(task).ok(),
      Ok(None) => self.ctx.state().record(Task::COLLECTION, id),
      Err(e) => {
        debug!(id = %id, error = %e, "Using state copy of unreadable task");
        self.ctx.state().record(Task::COLLECTION, id)
      }
    }
  }
}

/// Recreates the tasks a batch delete removed, until its window closes.
pub struct UndoHandle {
  ctx: ActionContext,
  tasks: EntityCache<Task>,
  records: Vec<Value>,
  deadline: Instant,
}

impl UndoHandle {
  /// Number of tasks the undo would restore.
  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  /// Time left before the undo expires.
  pub fn remaining(&self) -> Duration {
    self.deadline.saturating_duration_since(Instant::now())
  }

  /// Ask the server to recreate every deleted task and cache the results.
  ///
  /// Tasks are restored independently; the first error is returned once all have
  /// been attempted. A failed resync afterwards is reported but does not fail the undo.
  pub async fn undo(self) -> Result<usize> {
    if Instant::now() >= self.deadline {
      debug!(tasks = self.records.len(), "Undo window closed");
      return Err(CacheError::UndoExpired);
    }

    let results = join_all(self.records.iter().map(|task| self.ctx.api.restore_task(task))).await;

    let mut restored = 0;
    let mut first_error = None;
    for (original, result) in self.records.iter().zip(results) {
      let written = result.and_then(|task| {
        let id = RecordId::from_value(&task)
          .or_else(|| RecordId::from_value(original))
          .ok_or_else(|| CacheError::Serialization("restored task has no id".to_string()))?;
        self.tasks.update(id, task)
      });
      match written {
        Ok(_) => restored += 1,
        Err(e) => {
          warn!(error = %e, "Failed to restore task");
          first_error.get_or_insert(e);
        }
      }
    }

    if let Err(e) = self.ctx.registry.sync_table(Task::COLLECTION).await {
      warn!(error = %e, "Task list could not be refreshed after undo");
      self.ctx.notifier.notify(Notice::unsaved("Undo", &e));
    }

    if let Some(e) = first_error {
      self.ctx.notifier.notify(Notice::reverted("Undo", &e));
      return Err(e);
    }

    info!(restored, "Undid batch delete");
    Ok(restored)
  }
}

impl fmt::Debug for UndoHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("UndoHandle")
      .field("tasks", &self.records.len())
      .field("deadline", &self.deadline)
      .finish()
  }
}
