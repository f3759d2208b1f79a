//! HealthSync Sync Manager - provider adapters, connections and sync.
//!
//! This crate connects users' wearable and health-app accounts, pulls their
//! data through per-provider adapters, and merges it into the canonical
//! record store defined by the `healthsync` crate.
//!
//! # Architecture
//!
//! ```text
//!    Provider API (ring, band, ...)
//!              ↓
//! ┌─────────────────────────────────────────┐
//! │     ProviderAdapter (one per provider)  │
//! │  - fetch_raw: provider-shaped payloads  │
//! │  - normalize: canonical DeviceRecords   │
//! └─────────────────────────────────────────┘
//!              ↓
//! ┌─────────────────────────────────────────┐
//! │     SyncOrchestrator                    │
//! │  - refresh credentials (vault)          │
//! │  - one sync per device at a time        │
//! │  - merge records by natural key         │
//! └─────────────────────────────────────────┘
//!              ↓
//!    Ledger → DataStore (SQLite / memory)
//! ```
//!
//! [`ConnectionRegistry`] owns the device lifecycle (connect, reconnect,
//! disconnect), [`SyncScheduler`] drives periodic passes, and [`api`]
//! exposes both over HTTP.
//!
//! # Core Types
//!
//! - [`ProviderAdapter`] - Trait that all provider integrations implement
//! - [`AdapterRegistry`] - Provider type to adapter lookup
//! - [`RecordContext`] - Ownership stamped onto normalized records
//! - [`SyncReport`] - Per-device outcome of a sync-all pass

mod adapter;
pub mod adapters;
pub mod api;
pub mod connections;
pub mod orchestrator;
pub mod registry;
pub mod scheduler;
mod types;

#[cfg(test)]
mod testing;

// Re-export public types
pub use adapter::ProviderAdapter;
pub use connections::ConnectionRegistry;
pub use orchestrator::{SyncOrchestrator, SyncSettings};
pub use registry::AdapterRegistry;
pub use scheduler::{SchedulerStatus, SyncScheduler};
pub use types::{OAuthConfig, RawPayload, RecordContext, SyncReport, SyncSummary};
