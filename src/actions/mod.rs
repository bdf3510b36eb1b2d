//! Optimistic action orchestrators.
//!
//! Each action snapshots the state slices it touches, applies the expected result
//! immediately, then calls the API. Confirmed results are written to the caches and
//! synced into the state store; on failure the snapshot is restored and the user is
//! told why. The persistent store is only written after the server agrees, and a
//! confirmed result that cannot be stored is reverted like any other failure.

mod approval;
mod batch_delete;
mod reorder;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::api::RemoteApi;
use crate::cache::CacheRegistry;
use crate::error::CacheError;
use crate::state::{SliceSnapshot, StateStore};

pub use approval::ApprovalAction;
pub use batch_delete::{BatchDeleteAction, BatchSummary, UndoHandle};
pub use reorder::ReorderAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
  Success,
  Error,
}

/// A user-facing message, typically shown as a toast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
  pub level: NoticeLevel,
  pub message: String,
}

impl Notice {
  pub fn success(message: impl Into<String>) -> Self {
    Self {
      level: NoticeLevel::Success,
      message: message.into(),
    }
  }

  pub fn error(message: impl Into<String>) -> Self {
    Self {
      level: NoticeLevel::Error,
      message: message.into(),
    }
  }

  /// Explain a reverted action.
  pub fn reverted(action: &str, error: &CacheError) -> Self {
    Self::error(format!("{} failed and was reverted: {}", action, error))
  }

  /// Explain a server-confirmed action whose result could not be stored locally.
  pub fn unsaved(action: &str, error: &CacheError) -> Self {
    Self::error(format!(
      "{} was accepted by the server but could not be saved locally: {}",
      action, error
    ))
  }
}

/// Where orchestrators send user-facing notices.
pub trait Notifier: Send + Sync {
  fn notify(&self, notice: Notice);
}

/// Writes notices to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
  fn notify(&self, notice: Notice) {
    match notice.level {
      NoticeLevel::Success => info!(notice = %notice.message, "Notice"),
      NoticeLevel::Error => warn!(notice = %notice.message, "Notice"),
    }
  }
}

/// Collaborators every orchestrator needs.
#[derive(Clone)]
pub struct ActionContext {
  pub api: Arc<dyn RemoteApi>,
  pub registry: Arc<CacheRegistry>,
  pub notifier: Arc<dyn Notifier>,
}

impl ActionContext {
  pub fn new(
    api: Arc<dyn RemoteApi>,
    registry: Arc<CacheRegistry>,
    notifier: Arc<dyn Notifier>,
  ) -> Self {
    Self {
      api,
      registry,
      notifier,
    }
  }

  pub fn state(&self) -> &Arc<StateStore> {
    self.registry.state()
  }

  /// Back out an optimistic change whose confirmed result could not be persisted.
  ///
  /// The slice returns to `snapshot` and is then re-read from the store, so it shows
  /// exactly what was saved. If the store cannot be read the snapshot stays.
  pub(crate) async fn revert_unsaved(
    &self,
    action: &str,
    snapshot: SliceSnapshot,
    error: &CacheError,
  ) {
    let table = snapshot.table().to_string();
    self.state().restore(snapshot);
    if let Err(e) = self.registry.sync_table(&table).await {
      debug!(table, error = %e, "Keeping snapshot, store could not be re-read");
    }
    self.notifier.notify(Notice::unsaved(action, error));
  }
}
