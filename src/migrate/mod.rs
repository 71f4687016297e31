//! One-shot migration from legacy flat exports into the partitioned store.
//!
//! The legacy format is one `{session, nodes[]}` JSON file per session with
//! no directory partitioning — the same shape [`LinkedExport`] still uses
//! for portable snapshots. Nodes are replayed through the normal
//! `save_thought`/`save_branch_thought` path with their original numbers
//! and timestamps preserved, so hashes are recomputed deterministically and
//! re-running a migration produces identical destination content.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use crate::error::{AppError, AppResult, StoreError};
use crate::store::{LinkedExport, NewThought, Session, ThoughtNode, ThoughtStore};

/// Migration behavior switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrateOptions {
    /// Report what would happen without writing or deleting anything.
    pub dry_run: bool,
    /// Report sessions that already exist as skipped instead of failed.
    pub skip_existing: bool,
    /// Remove each source file after its session fully lands.
    pub delete_source: bool,
}

/// Outcome for one legacy file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum MigrationOutcome {
    /// The session was (or in a dry run, would be) written to the store.
    Migrated { session_id: String, thoughts: u32 },
    /// The file was left alone.
    Skipped { reason: String },
    /// The file could not be migrated.
    Failed { reason: String },
}

/// Per-file outcomes for one migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Whether this was a dry run.
    pub dry_run: bool,
    /// Outcome per source file, in processing order.
    pub files: Vec<FileReport>,
}

/// One source file's outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    /// Source file name.
    pub file: String,
    /// What happened to it.
    #[serde(flatten)]
    pub outcome: MigrationOutcome,
}

impl MigrationReport {
    /// Count of migrated files.
    pub fn migrated(&self) -> usize {
        self.count(|o| matches!(o, MigrationOutcome::Migrated { .. }))
    }

    /// Count of skipped files.
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, MigrationOutcome::Skipped { .. }))
    }

    /// Count of failed files.
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, MigrationOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&MigrationOutcome) -> bool) -> usize {
        self.files.iter().filter(|f| pred(&f.outcome)).count()
    }

    /// One-line human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "{} migrated, {} skipped, {} failed ({} files{})",
            self.migrated(),
            self.skipped(),
            self.failed(),
            self.files.len(),
            if self.dry_run { ", dry run" } else { "" }
        )
    }
}

/// Migrate every `*.json` file in a directory of legacy flat exports.
pub async fn migrate_dir(
    store: &dyn ThoughtStore,
    src_dir: &Path,
    options: MigrateOptions,
) -> AppResult<MigrationReport> {
    let mut names = Vec::new();
    let mut entries = fs::read_dir(src_dir).await.map_err(|e| AppError::Migration {
        message: format!("cannot read {}: {}", src_dir.display(), e),
    })?;
    while let Some(entry) = entries.next_entry().await.map_err(|e| AppError::Migration {
        message: format!("cannot scan {}: {}", src_dir.display(), e),
    })? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".json") {
            names.push(name);
        }
    }
    names.sort();

    let mut files = Vec::with_capacity(names.len());
    for name in names {
        let outcome = migrate_file(store, &src_dir.join(&name), options).await;
        files.push(FileReport {
            file: name,
            outcome,
        });
    }

    let report = MigrationReport {
        dry_run: options.dry_run,
        files,
    };
    info!(summary = %report.summary(), "Migration run complete");
    Ok(report)
}

/// Migrate a single legacy flat export file.
pub async fn migrate_file(
    store: &dyn ThoughtStore,
    path: &Path,
    options: MigrateOptions,
) -> MigrationOutcome {
    let snapshot: LinkedExport = match fs::read(path).await {
        Ok(raw) => match serde_json::from_slice(&raw) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                return MigrationOutcome::Failed {
                    reason: format!("invalid legacy snapshot: {}", e),
                }
            }
        },
        Err(e) => {
            return MigrationOutcome::Failed {
                reason: format!("unreadable: {}", e),
            }
        }
    };

    let session_id = snapshot.session.id.clone();
    match store.get_session(&session_id).await {
        Ok(_) if options.skip_existing => {
            return MigrationOutcome::Skipped {
                reason: format!("session {} already exists", session_id),
            }
        }
        Ok(_) => {
            return MigrationOutcome::Failed {
                reason: format!("session {} already exists", session_id),
            }
        }
        Err(StoreError::SessionNotFound { .. }) => {}
        Err(e) => {
            return MigrationOutcome::Failed {
                reason: format!("cannot probe destination: {}", e),
            }
        }
    }

    let thoughts = snapshot.nodes.len() as u32;
    if options.dry_run {
        return MigrationOutcome::Migrated {
            session_id,
            thoughts,
        };
    }

    if let Err(e) = replay(store, &snapshot).await {
        warn!(session_id = %session_id, error = %e, "Migration replay failed");
        return MigrationOutcome::Failed {
            reason: e.to_string(),
        };
    }

    if options.delete_source {
        if let Err(e) = fs::remove_file(path).await {
            // The session already landed; only the cleanup failed.
            warn!(path = %path.display(), error = %e, "Could not delete migrated source");
        }
    }

    info!(session_id = %session_id, thoughts, "Session migrated");
    MigrationOutcome::Migrated {
        session_id,
        thoughts,
    }
}

/// Replay a legacy snapshot through the normal append path: main-chain
/// nodes first so branch origins exist, then each branch in order.
async fn replay(store: &dyn ThoughtStore, snapshot: &LinkedExport) -> Result<(), StoreError> {
    let legacy = &snapshot.session;
    let session = Session {
        id: legacy.id.clone(),
        title: legacy.title.clone(),
        tags: legacy.tags.clone(),
        // Counters re-accumulate during replay.
        thought_count: 0,
        branch_count: 0,
        open: true,
        created_at: legacy.created_at,
        updated_at: legacy.updated_at,
        last_accessed_at: legacy.last_accessed_at,
    };
    store.create_session(&session).await?;

    for node in snapshot.nodes.iter().filter(|n| n.data.branch_id.is_none()) {
        store.save_thought(&session.id, replay_input(node)).await?;
    }
    for node in snapshot.nodes.iter().filter(|n| n.data.branch_id.is_some()) {
        let branch_id = node.data.branch_id.as_deref().unwrap_or_default();
        store
            .save_branch_thought(&session.id, branch_id, replay_input(node))
            .await?;
    }
    Ok(())
}

fn replay_input(node: &ThoughtNode) -> NewThought {
    NewThought {
        thought: node.data.thought.clone(),
        thought_number: Some(node.data.thought_number),
        total_thoughts: Some(node.data.total_thoughts),
        next_thought_needed: node.data.next_thought_needed,
        is_revision: node.data.is_revision,
        revises_thought: node.data.revises_thought,
        branch_from_thought: node.data.branch_from_thought,
        branch_id: node.data.branch_id.clone(),
        agent_id: node.data.agent_id.clone(),
        timestamp: Some(node.data.timestamp),
    }
}
