//! Generic caching layer for server tables.
//!
//! This module provides a table-agnostic caching mechanism that:
//! - Stores records of any shape with a unique `id`, one collection per table
//! - Merges local edits and server results through a single last-writer-wins path
//! - De-duplicates concurrent fetches and supports incremental fetching by cursor
//! - Routes table names to caches and mirrors their contents into the state store

mod layer;
mod merge;
mod registry;
mod storage;
mod traits;

pub use layer::{EntityCache, FetchSummary, InitSummary};
pub use merge::merge_record;
pub use registry::{CacheRegistry, TableSync};
pub use storage::{RecordStore, SqliteStore, StoredRecord};
pub use traits::{Record, RecordId};
