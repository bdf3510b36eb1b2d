use std::collections::HashMap;

use serde_json::json;
use tracing::{debug, warn};

use super::{ActionContext, Notice};
use crate::api::CardPosition;
use crate::cache::{EntityCache, RecordId};
use crate::error::Result;
use crate::models::KpiCard;

/// Reorder dashboard KPI cards.
pub struct ReorderAction {
  ctx: ActionContext,
  cards: EntityCache<KpiCard>,
}

impl ReorderAction {
  pub fn new(ctx: ActionContext, cards: EntityCache<KpiCard>) -> Self {
    Self { ctx, cards }
  }

  /// Move cards to new positions. Cards not listed keep theirs.
  pub async fn reorder(&self, positions: &[CardPosition]) -> Result<()> {
    let state = self.ctx.state();
    let moves: HashMap<RecordId, i64> = positions
      .iter()
      .map(|card| (RecordId::Int(card.id), card.position))
      .collect();

    let snapshot = state.snapshot(KpiCard::COLLECTION);
    state.apply_optimistic(KpiCard::COLLECTION, |slice| {
      for (id, card) in slice.iter_mut() {
        if let Some(position) = moves.get(id) {
          card["position"] = json!(position);
        }
      }
    });

    if let Err(e) = self.ctx.api.reorder_kpi_cards(positions).await {
      warn!(cards = positions.len(), error = %e, "Reorder failed");
      state.restore(snapshot);
      self.ctx.notifier.notify(Notice::reverted("Reordering cards", &e));
      return Err(e);
    }

    if let Err(e) = self.persist(positions).await {
      warn!(cards = positions.len(), error = %e, "Reordered cards could not be saved");
      self
        .ctx
        .revert_unsaved("Reordering cards", snapshot, &e)
        .await;
      return Err(e);
    }

    debug!(cards = positions.len(), "Cards reordered");
    Ok(())
  }

  async fn persist(&self, positions: &[CardPosition]) -> Result<()> {
    for card in positions {
      self
        .cards
        .update(card.id, json!({ "position": card.position }))?;
    }
    self.ctx.registry.sync_table(KpiCard::COLLECTION).await?;
    Ok(())
  }
}
