use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Approval state of a task or task instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
  Pending,
  Approved,
  Rejected,
}

impl ApprovalStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      ApprovalStatus::Pending => "pending",
      ApprovalStatus::Approved => "approved",
      ApprovalStatus::Rejected => "rejected",
    }
  }
}

/// A task. Fields the client does not model are kept in `extra` so a cached
/// task round-trips to the server unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
  pub id: i64,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub status: Option<String>,
  #[serde(default)]
  pub approval_status: Option<ApprovalStatus>,
  #[serde(default)]
  pub category_id: Option<i64>,
  #[serde(default)]
  pub assignee_id: Option<i64>,
  #[serde(default)]
  pub updated_at: Option<String>,
  /// Soft-delete marker sent on incremental fetches
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub deleted_at: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Task {
  pub const COLLECTION: &'static str = "tasks";
}

/// One occurrence of a recurring task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInstance {
  pub id: i64,
  pub task_id: i64,
  #[serde(default)]
  pub status: Option<String>,
  #[serde(default)]
  pub approval_status: Option<ApprovalStatus>,
  #[serde(default)]
  pub updated_at: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub deleted_at: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl TaskInstance {
  pub const COLLECTION: &'static str = "task_instances";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
  pub id: i64,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub email: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl User {
  pub const COLLECTION: &'static str = "users";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
  pub id: i64,
  #[serde(default)]
  pub name: String,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Category {
  pub const COLLECTION: &'static str = "categories";
}

/// Dashboard KPI card; `position` orders the cards on screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiCard {
  pub id: i64,
  #[serde(default)]
  pub title: String,
  pub position: i64,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl KpiCard {
  pub const COLLECTION: &'static str = "kpi_cards";
  /// REST resource the cards are served from, shared with `kpi-cards/reorder`
  pub const RESOURCE: &'static str = "kpi-cards";
}
