//! # MCP Thought Ledger
//!
//! A tamper-evident store for reasoning chains produced by cooperating
//! agents: ordered sequences of thoughts that can branch into alternative
//! exploration paths, be revised without destroying history, and be
//! authored concurrently within a shared session.
//!
//! ## Features
//!
//! - **Thought Store**: append-mostly tree of immutable nodes, persisted as
//!   a manifest plus one JSON file per node under a time-partitioned layout
//! - **Hash Chain**: per-node SHA-256 digests chained to the logical
//!   parent, making any post-hoc alteration or reordering detectable
//! - **Claim Analysis**: marker-based claim extraction and direct
//!   contradiction detection across agents
//! - **Branch Diff**: fork-point reconciliation of divergent branches with
//!   timeline and split-view rendering
//! - **Migration**: one-shot, dry-runnable upgrader from legacy flat
//!   exports into the store layout
//!
//! ## Architecture
//!
//! ```text
//! Caller (MCP layer, CLI) → ThoughtStore trait → FileThoughtStore
//!                                  ↓
//!                    {partition}/{session}/ on disk
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use mcp_thought_ledger::store::{FileThoughtStore, NewThought, Session, ThoughtStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = FileThoughtStore::new("./data/thoughts").await?;
//!     let session = Session::new(Some("planning run".into()), vec![]);
//!     store.create_session(&session).await?;
//!     store
//!         .save_thought(&session.id, NewThought::new("first step").with_agent("alice"))
//!         .await?;
//!     let report = store.validate_session_integrity(&session.id).await?;
//!     assert!(report.valid);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Claim extraction and contradiction detection.
pub mod analysis;
/// Hash-chain computation and verification.
pub mod chain;
/// Configuration management.
pub mod config;
/// Branch diffing and rendering.
pub mod diff;
/// Error types and result aliases for the application.
pub mod error;
/// Legacy flat-export migration.
pub mod migrate;
/// Thought store: data model, contract, and file-backed implementation.
pub mod store;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use store::{FileThoughtStore, ThoughtStore};
