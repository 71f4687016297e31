//! Thought store: node model, session lifecycle, and persistence contract.
//!
//! The store owns the tree-shaped, append-mostly log of thoughts. Nodes are
//! immutable once written; revisions create new nodes that back-reference
//! the node they supersede, and branches fork from a specific main-chain
//! thought. Every node carries hash-chain integrity fields (see
//! [`crate::chain`]).

mod fs;

pub use fs::FileThoughtStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chain::ChainVerification;
use crate::error::StoreResult;

/// Current on-disk manifest schema version.
pub const MANIFEST_VERSION: u32 = 1;

/// The authored payload of one thought entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThoughtData {
    /// Free-form thought text.
    pub thought: String,
    /// Logical position in the chain. May be sparse or non-monotonic for
    /// goal-driven reasoning; creation order is tracked separately.
    pub thought_number: u32,
    /// Author's running estimate of chain length, raised when exceeded.
    pub total_thoughts: u32,
    /// Continuation flag; `false` closes the session.
    pub next_thought_needed: bool,
    /// Whether this thought revises an earlier one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_revision: Option<bool>,
    /// Thought number this one revises.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revises_thought: Option<u32>,
    /// Main-chain thought number a branch forks from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_from_thought: Option<u32>,
    /// Branch identifier; requires `branch_from_thought`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    /// Identity of the authoring agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// When the thought was written.
    pub timestamp: DateTime<Utc>,
}

/// One persisted entry in the log: payload plus linkage and integrity fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThoughtNode {
    /// Unique id: `{sessionId}:{thoughtNumber}` on the main chain,
    /// `{sessionId}:{branchId}:{thoughtNumber}` on a branch.
    pub id: String,
    /// The authored payload.
    pub data: ThoughtData,
    /// Node immediately preceding this one by creation order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<String>,
    /// Child nodes; more than one when branches fork here.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next: Vec<String>,
    /// Node this one supersedes in content but not position.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revises_node: Option<String>,
    /// Main-chain node a branch forked from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_origin: Option<String>,
    /// Content hash of the logical parent ([`crate::chain::GENESIS_HASH`]
    /// for chain roots).
    pub parent_hash: String,
    /// SHA-256 over this node's hashed fields.
    pub content_hash: String,
}

/// Append input: [`ThoughtData`] with the store-resolved fields optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewThought {
    /// Free-form thought text.
    pub thought: String,
    /// Explicit logical position; resolved to tail + 1 when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought_number: Option<u32>,
    /// Estimated chain length.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_thoughts: Option<u32>,
    /// Continuation flag; defaults to `true`.
    #[serde(default = "default_next_needed")]
    pub next_thought_needed: bool,
    /// Whether this thought revises an earlier one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_revision: Option<bool>,
    /// Thought number this one revises.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revises_thought: Option<u32>,
    /// Main-chain thought number a branch forks from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_from_thought: Option<u32>,
    /// Branch identifier; requires `branch_from_thought`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    /// Identity of the authoring agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Explicit timestamp; resolved to now when omitted. Migration replay
    /// passes the original timestamp so recomputed hashes are stable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

fn default_next_needed() -> bool {
    true
}

impl NewThought {
    /// Create an append input with the given text
    pub fn new(thought: impl Into<String>) -> Self {
        Self {
            thought: thought.into(),
            thought_number: None,
            total_thoughts: None,
            next_thought_needed: true,
            is_revision: None,
            revises_thought: None,
            branch_from_thought: None,
            branch_id: None,
            agent_id: None,
            timestamp: None,
        }
    }

    /// Set an explicit thought number
    pub fn with_number(mut self, number: u32) -> Self {
        self.thought_number = Some(number);
        self
    }

    /// Set the estimated total thought count
    pub fn with_total(mut self, total: u32) -> Self {
        self.total_thoughts = Some(total);
        self
    }

    /// Set the authoring agent
    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Set an explicit timestamp
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Target a branch forking from the given main-chain thought
    pub fn on_branch(mut self, branch_id: impl Into<String>, from_thought: u32) -> Self {
        self.branch_id = Some(branch_id.into());
        self.branch_from_thought = Some(from_thought);
        self
    }

    /// Mark as a revision of an earlier thought
    pub fn revising(mut self, thought_number: u32) -> Self {
        self.is_revision = Some(true);
        self.revises_thought = Some(thought_number);
        self
    }

    /// Mark as the terminal thought of the session
    pub fn terminal(mut self) -> Self {
        self.next_thought_needed = false;
        self
    }
}

/// A reasoning session grouping one run's thoughts and branches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Unique session identifier.
    pub id: String,
    /// Optional human-readable title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Free-form tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Denormalized count of all thoughts, main and branch.
    pub thought_count: u32,
    /// Denormalized count of distinct branches.
    pub branch_count: u32,
    /// Whether the session still accepts appends. Closed logically, never
    /// deleted, when a terminal thought lands.
    pub open: bool,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session last changed.
    pub updated_at: DateTime<Utc>,
    /// When the session was last read or written.
    pub last_accessed_at: DateTime<Utc>,
}

impl Session {
    /// Create a new open session
    pub fn new(title: Option<String>, tags: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title,
            tags,
            thought_count: 0,
            branch_count: 0,
            open: true,
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
        }
    }
}

/// Per-session on-disk manifest: the authoritative file set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Session id, duplicated from metadata for cheap identification.
    pub id: String,
    /// Manifest schema version.
    pub version: u32,
    /// Main-chain node files in creation order.
    pub thought_files: Vec<String>,
    /// Branch node files in creation order, keyed by branch id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub branch_files: BTreeMap<String, Vec<String>>,
    /// Session metadata.
    pub metadata: Session,
}

impl Manifest {
    /// Create an empty manifest for a fresh session
    pub fn new(session: Session) -> Self {
        Self {
            id: session.id.clone(),
            version: MANIFEST_VERSION,
            thought_files: Vec::new(),
            branch_files: BTreeMap::new(),
            metadata: session,
        }
    }
}

/// Result of a successful append.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOutcome {
    /// The persisted node.
    pub node: ThoughtNode,
    /// Whether this append closed the session.
    pub session_closed: bool,
    /// Set when the session closed but the automatic export failed. The
    /// node is durably persisted and the session stays open for a manual
    /// export retry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_error: Option<String>,
}

/// Result of validating a session's files against its manifest and hashes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    /// Session examined.
    pub session_id: String,
    /// Whether the file set and every hash chain checked out.
    pub valid: bool,
    /// Human-readable discrepancies, empty when valid.
    pub issues: Vec<String>,
    /// Main-chain verification outcome.
    pub main_chain: ChainVerification,
    /// Per-branch verification outcomes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub branches: BTreeMap<String, ChainVerification>,
}

/// Portable snapshot of one session: metadata plus all nodes in creation
/// order. Also the legacy flat-export format the migrator consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedExport {
    /// Session metadata.
    pub session: Session,
    /// All nodes, main and branch, ordered by `(timestamp, id)`.
    pub nodes: Vec<ThoughtNode>,
}

/// Fire-and-forget observer for store writes.
///
/// The store invokes these synchronously after a node is durably persisted
/// and never inspects the outcome; implementations must not block.
pub trait ThoughtEvents: Send + Sync {
    /// A thought was appended to the main chain.
    fn on_append(&self, session_id: &str, node: &ThoughtNode) {
        let _ = (session_id, node);
    }

    /// A revision node was created.
    fn on_revise(&self, session_id: &str, node: &ThoughtNode, revised_id: &str) {
        let _ = (session_id, node, revised_id);
    }

    /// A thought was appended to a branch.
    fn on_branch(&self, session_id: &str, branch_id: &str, node: &ThoughtNode) {
        let _ = (session_id, branch_id, node);
    }
}

/// No-op event sink used when no observer is registered.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvents;

impl ThoughtEvents for NoopEvents {}

/// Persistence contract for thought chains.
///
/// Implementations serialize the read-compute-write append sequence per
/// session; reads may proceed concurrently since nodes are immutable once
/// written. Sessions are fully independent of one another.
#[async_trait]
pub trait ThoughtStore: Send + Sync {
    /// Register a new session. Fails if the id is already taken.
    async fn create_session(&self, session: &Session) -> StoreResult<()>;

    /// Get session metadata by id.
    async fn get_session(&self, session_id: &str) -> StoreResult<Session>;

    /// Append a thought to the main chain. Appends carrying a `branch_id`
    /// are validated and routed to the branch path.
    async fn save_thought(&self, session_id: &str, input: NewThought) -> StoreResult<SaveOutcome>;

    /// Append a thought to a branch, creating the branch on first use.
    async fn save_branch_thought(
        &self,
        session_id: &str,
        branch_id: &str,
        input: NewThought,
    ) -> StoreResult<SaveOutcome>;

    /// Get the main chain in creation order.
    async fn get_thoughts(&self, session_id: &str) -> StoreResult<Vec<ThoughtNode>>;

    /// Get one main-chain thought by its logical number.
    async fn get_thought(&self, session_id: &str, thought_number: u32) -> StoreResult<ThoughtNode>;

    /// Get a branch's thoughts in creation order.
    async fn get_branch(&self, session_id: &str, branch_id: &str) -> StoreResult<Vec<ThoughtNode>>;

    /// List the session's branch ids.
    async fn list_branches(&self, session_id: &str) -> StoreResult<Vec<String>>;

    /// Re-derive the expected file set and hash chains without mutating
    /// anything.
    async fn validate_session_integrity(&self, session_id: &str) -> StoreResult<IntegrityReport>;

    /// Produce the portable `{session, nodes[]}` snapshot in creation order.
    async fn linked_export(&self, session_id: &str) -> StoreResult<LinkedExport>;
}
