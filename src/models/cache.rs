//! Record implementations for the mirrored entities.

use crate::cache::{Record, RecordId};

use super::types::{Category, KpiCard, Task, TaskInstance, User};

impl Record for Task {
  fn id(&self) -> RecordId {
    RecordId::Int(self.id)
  }

  fn collection() -> &'static str {
    Self::COLLECTION
  }

  fn updated_at(&self) -> Option<&str> {
    self.updated_at.as_deref()
  }

  fn is_deleted(&self) -> bool {
    self.deleted_at.is_some()
  }
}

impl Record for TaskInstance {
  fn id(&self) -> RecordId {
    RecordId::Int(self.id)
  }

  fn collection() -> &'static str {
    Self::COLLECTION
  }

  fn updated_at(&self) -> Option<&str> {
    self.updated_at.as_deref()
  }

  fn is_deleted(&self) -> bool {
    self.deleted_at.is_some()
  }
}

impl Record for User {
  fn id(&self) -> RecordId {
    RecordId::Int(self.id)
  }

  fn collection() -> &'static str {
    Self::COLLECTION
  }
}

impl Record for Category {
  fn id(&self) -> RecordId {
    RecordId::Int(self.id)
  }

  fn collection() -> &'static str {
    Self::COLLECTION
  }
}

impl Record for KpiCard {
  fn id(&self) -> RecordId {
    RecordId::Int(self.id)
  }

  fn collection() -> &'static str {
    Self::COLLECTION
  }
}
