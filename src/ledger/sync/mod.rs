//! Ledger synchronization module.
//!
//! Keeps the local mirror consistent with the remote chain:
//!
//! - `headers`: forward header synchronization with overlap-based
//!   continuity checking, plus fork detection and rollback.
//! - `boxes`: per-address transaction ingestion with adaptive window
//!   splitting and two-phase spend reconciliation.
//! - `events`: event types and dispatcher decoupling sync from listeners.
//! - `service`: per-network orchestration, locking and pass reports.

/// Per-address transaction and box synchronization
pub mod boxes;
/// Event system for decoupled communication during sync
pub mod events;
/// Header synchronization and fork resolution
pub mod headers;
/// Main coordinator for sync passes
pub mod service;

pub use service::*;
