//! Server entities mirrored by the cache.

mod cache;
mod types;

pub use types::{ApprovalStatus, Category, KpiCard, Task, TaskInstance, User};
