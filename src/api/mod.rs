//! Remote API boundary.
//!
//! [`RemoteApi`] is everything the data layer needs from the server; [`HttpApi`]
//! implements it over REST with bearer-token authentication.

mod client;
mod types;

use async_trait::async_trait;
use serde_json::Value;

use crate::cache::RecordId;
use crate::error::Result;

pub use client::HttpApi;
pub use types::{CardPosition, Decision, DecisionRequest, DecisionResponse, PublicKeyResponse};

#[async_trait]
pub trait RemoteApi: Send + Sync {
  /// `GET /<resource>`, optionally only rows changed after `since`.
  async fn fetch_table(&self, resource: &str, since: Option<&str>) -> Result<Vec<Value>>;

  /// `POST /approvals/decide`
  async fn decide_approval(&self, request: &DecisionRequest) -> Result<DecisionResponse>;

  /// `POST /kpi-cards/reorder`
  async fn reorder_kpi_cards(&self, cards: &[CardPosition]) -> Result<()>;

  /// `DELETE /tasks/<id>`
  async fn delete_task(&self, id: &RecordId) -> Result<()>;

  /// `POST /tasks/restore` with a previously deleted task; returns the stored task.
  async fn restore_task(&self, task: &Value) -> Result<Value>;

  /// `GET /crypto/public-key`, returning the base64 key.
  async fn fetch_public_key(&self) -> Result<String>;
}
