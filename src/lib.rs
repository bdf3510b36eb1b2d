//! Local-first data layer for a task-management API.
//!
//! Server tables are mirrored into a persistent, optionally encrypted SQLite store.
//! Reads are served locally and reconciled with the API in the background; mutations
//! are applied optimistically and rolled back when the server refuses them. Signed
//! manifests let a client check cached data against the server's public key.

pub mod actions;
pub mod api;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod manifest;
pub mod models;
pub mod pivot;
pub mod state;

#[cfg(test)]
mod testing;

pub use bootstrap::DataLayer;
pub use error::{CacheError, Result};
