//! # relay-store
//!
//! Durable memory store for the agent runtime.
//!
//! Provides SQLite-backed persistence with WAL mode and mmap for fast
//! reads, task-result/preference/context/learning-pattern storage, and a
//! lock-free hot cache via `moka`.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  CacheLayer (moka, TTL, hot-path reads)  │
//! ├─────────────────────────────────────────┤
//! │  MemoryStore                             │
//! │    task_results / user_preferences       │
//! │    agent_interactions / context_memory   │
//! │    learning_patterns                     │
//! ├─────────────────────────────────────────┤
//! │  Database (rusqlite WAL + mmap)          │
//! │  Migrations (versioned, transactional)   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use relay_store::MemoryStore;
//!
//! let store = MemoryStore::open("data/relay.db").await?;
//! store.record_result("task_1", "research", "success", None, None, None, None).await?;
//! ```

pub mod cache;
pub mod db;
pub mod error;
pub mod memory_store;
pub mod migration;

// ── re-exports ───────────────────────────────────────────────────────

pub use cache::{CacheLayer, CacheLayerBuilder, CacheStats};
pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use memory_store::{
    CollaborationInsights, ContextEntry, LearningPattern, MemoryStore, PreferenceEntry,
    TaskResultRecord,
};
