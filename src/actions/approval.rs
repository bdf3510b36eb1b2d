use serde_json::json;
use tracing::{debug, warn};

use super::{ActionContext, Notice};
use crate::api::{Decision, DecisionRequest, DecisionResponse};
use crate::cache::{EntityCache, RecordId};
use crate::error::Result;
use crate::models::{Task, TaskInstance};

/// Approve or reject a task.
pub struct ApprovalAction {
  ctx: ActionContext,
  tasks: EntityCache<Task>,
  instances: EntityCache<TaskInstance>,
}

impl ApprovalAction {
  pub fn new(
    ctx: ActionContext,
    tasks: EntityCache<Task>,
    instances: EntityCache<TaskInstance>,
  ) -> Self {
    Self {
      ctx,
      tasks,
      instances,
    }
  }

  /// Record a decision on a task.
  ///
  /// The task shows its new approval status immediately. On failure, including a
  /// confirmed decision that cannot be stored, it reverts and the error is returned
  /// after the user has been notified.
  pub async fn decide(
    &self,
    task_id: i64,
    decision: Decision,
    comment: Option<String>,
  ) -> Result<DecisionResponse> {
    let state = self.ctx.state();
    let key = RecordId::Int(task_id);
    let expected = decision.resulting_status();

    let snapshot = state.snapshot(Task::COLLECTION);
    state.apply_optimistic(Task::COLLECTION, |slice| {
      if let Some(task) = slice.get_mut(&key) {
        task["approval_status"] = json!(expected.as_str());
      }
    });

    let request = DecisionRequest {
      task_id,
      instance_id: None,
      decision,
      comment,
    };

    let response = match self.ctx.api.decide_approval(&request).await {
      Ok(response) => response,
      Err(e) => {
        warn!(task_id, error = %e, "Approval decision failed");
        state.restore(snapshot);
        self.ctx.notifier.notify(Notice::reverted("Approval", &e));
        return Err(e);
      }
    };

    if let Err(e) = self.commit(task_id, decision, &response).await {
      warn!(task_id, error = %e, "Approval decision could not be saved");
      self.ctx.revert_unsaved("Approval", snapshot, &e).await;
      return Err(e);
    }
    debug!(task_id, status = expected.as_str(), "Approval decision recorded");
    Ok(response)
  }

  /// Write the server's answer into the caches and resync the affected tables.
  async fn commit(
    &self,
    task_id: i64,
    decision: Decision,
    response: &DecisionResponse,
  ) -> Result<()> {
    let status = response
      .approval_status
      .unwrap_or_else(|| decision.resulting_status());

    let task_update = match &response.task {
      Some(task) => task.clone(),
      None => json!({ "approval_status": status }),
    };
    self.tasks.update(task_id, task_update)?;

    let instances = response.instances.as_deref().unwrap_or_default();
    for instance in instances {
      match RecordId::from_value(instance) {
        Some(id) => {
          self.instances.update(id, instance.clone())?;
        }
        None => warn!(task_id, "Skipping returned task instance without id"),
      }
    }

    let registry = &self.ctx.registry;
    registry.sync_table(Task::COLLECTION).await?;
    if !instances.is_empty() {
      registry.sync_table(TaskInstance::COLLECTION).await?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::actions::NoticeLevel;
  use crate::error::CacheError;
  use crate::models::ApprovalStatus;
  use crate::testing::{fixture, Fixture};
  use serde_json::Value;
  use std::sync::atomic::Ordering;

  async fn seeded() -> Fixture {
    let fx = fixture();
    fx.tasks
      .update(1i64, json!({"title": "Expense report", "approval_status": "pending"}))
      .unwrap();
    fx.ctx.registry.sync_table("tasks").await.unwrap();
    fx
  }

  fn status_in_state(fx: &Fixture) -> Value {
    fx.state().record("tasks", &RecordId::Int(1)).unwrap()["approval_status"].clone()
  }

  #[tokio::test]
  async fn test_decision_commits_to_cache_and_state() {
    let fx = seeded().await;
    *fx.api.decision.lock().unwrap() = Some(Ok(DecisionResponse {
      task: Some(json!({"id": 1, "approval_status": "approved", "updated_at": "2024-02-01"})),
      instances: Some(vec![json!({"id": 10, "task_id": 1, "approval_status": "approved"})]),
      approval_status: Some(ApprovalStatus::Approved),
    }));

    let action = ApprovalAction::new(fx.ctx.clone(), fx.tasks.clone(), fx.instances.clone());
    action
      .decide(1, Decision::Approve, Some("looks good".to_string()))
      .await
      .unwrap();

    let task = fx.tasks.get(&RecordId::Int(1)).unwrap().unwrap();
    assert_eq!(task.approval_status, Some(ApprovalStatus::Approved));
    assert_eq!(task.title, "Expense report");
    assert_eq!(status_in_state(&fx), json!("approved"));
    assert_eq!(fx.state().slice("task_instances").len(), 1);

    let seen = fx.api.decisions_seen.lock().unwrap();
    assert_eq!(seen[0].comment.as_deref(), Some("looks good"));
  }

  #[tokio::test]
  async fn test_decision_without_task_payload_uses_status() {
    let fx = seeded().await;
    let action = ApprovalAction::new(fx.ctx.clone(), fx.tasks.clone(), fx.instances.clone());
    action.decide(1, Decision::Reject, None).await.unwrap();

    assert_eq!(
      fx.tasks.get(&RecordId::Int(1)).unwrap().unwrap().approval_status,
      Some(ApprovalStatus::Rejected)
    );
    assert_eq!(status_in_state(&fx), json!("rejected"));
  }

  #[tokio::test]
  async fn test_failed_decision_reverts_and_notifies() {
    let fx = seeded().await;
    *fx.api.decision.lock().unwrap() = Some(Err(CacheError::Network("offline".to_string())));

    let action = ApprovalAction::new(fx.ctx.clone(), fx.tasks.clone(), fx.instances.clone());
    let result = action.decide(1, Decision::Approve, None).await;

    assert!(matches!(result, Err(CacheError::Network(_))));
    assert_eq!(status_in_state(&fx), json!("pending"));
    assert_eq!(
      fx.tasks.get(&RecordId::Int(1)).unwrap().unwrap().approval_status,
      Some(ApprovalStatus::Pending)
    );
    assert_eq!(fx.notices.count(NoticeLevel::Error), 1);
  }

  #[tokio::test]
  async fn test_unsaved_decision_is_reverted_and_reported() {
    let fx = seeded().await;
    fx.store.fail_put.store(true, Ordering::SeqCst);

    let action = ApprovalAction::new(fx.ctx.clone(), fx.tasks.clone(), fx.instances.clone());
    let result = action.decide(1, Decision::Approve, None).await;

    assert!(matches!(result, Err(CacheError::Storage(_))));
    assert_eq!(fx.api.decisions_seen.lock().unwrap().len(), 1);
    assert_eq!(status_in_state(&fx), json!("pending"));
    assert_eq!(
      fx.tasks.get(&RecordId::Int(1)).unwrap().unwrap().approval_status,
      Some(ApprovalStatus::Pending)
    );
    assert_eq!(fx.notices.count(NoticeLevel::Error), 1);
  }
}
