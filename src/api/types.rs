use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::ApprovalStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
  Approve,
  Reject,
}

impl Decision {
  /// Status the task ends up in once the decision is accepted.
  pub fn resulting_status(&self) -> ApprovalStatus {
    match self {
      Decision::Approve => ApprovalStatus::Approved,
      Decision::Reject => ApprovalStatus::Rejected,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionRequest {
  pub task_id: i64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub instance_id: Option<i64>,
  pub decision: Decision,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub comment: Option<String>,
}

/// Authoritative records returned by a decision. Every part is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DecisionResponse {
  #[serde(default)]
  pub task: Option<Value>,
  #[serde(default)]
  pub instances: Option<Vec<Value>>,
  #[serde(default)]
  pub approval_status: Option<ApprovalStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardPosition {
  pub id: i64,
  pub position: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReorderRequest<'a> {
  pub cards: &'a [CardPosition],
}

#[derive(Debug, Deserialize)]
pub struct PublicKeyResponse {
  #[serde(rename = "pub")]
  pub public_key: String,
}

/// Table endpoints answer either with a bare array or wrapped in `{"data": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum TablePayload {
  Rows(Vec<Value>),
  Wrapped { data: Vec<Value> },
}

impl TablePayload {
  pub fn into_rows(self) -> Vec<Value> {
    match self {
      TablePayload::Rows(rows) | TablePayload::Wrapped { data: rows } => rows,
    }
  }
}
