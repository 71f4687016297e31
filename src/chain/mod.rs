//! Hash-chain integrity for thought sequences.
//!
//! Every node carries a SHA-256 content hash computed over its authored
//! fields plus the content hash of its logical parent, so any post-hoc
//! alteration or reordering of persisted thoughts is detectable by
//! recomputing the chain.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::store::ThoughtNode;

/// Sentinel parent hash for the first node of any chain, main or branch.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Compute the content hash for one thought.
///
/// The digest covers exactly (`thought`, `thought_number`, `parent_hash`,
/// `agent_id`, `timestamp`) joined into a canonical `|`-separated string,
/// hex-encoded. Changing any of these fields after the fact changes the
/// hash. Timestamps are canonicalized to RFC 3339 with millisecond
/// precision so a serialization round-trip cannot shift the digest.
pub fn compute_hash(
    thought: &str,
    thought_number: u32,
    parent_hash: &str,
    agent_id: Option<&str>,
    timestamp: DateTime<Utc>,
) -> String {
    let canonical = format!(
        "{}|{}|{}|{}|{}",
        thought,
        thought_number,
        parent_hash,
        agent_id.unwrap_or(""),
        timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    );
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Recompute a node's expected content hash from its stored fields.
pub fn node_hash(node: &ThoughtNode) -> String {
    compute_hash(
        &node.data.thought,
        node.data.thought_number,
        &node.parent_hash,
        node.data.agent_id.as_deref(),
        node.data.timestamp,
    )
}

/// Outcome of walking a chain of nodes in creation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainVerification {
    /// Whether every node's parent link and content hash checked out.
    pub valid: bool,
    /// Number of nodes verified before stopping.
    pub verified_count: usize,
    /// Index of the first failing node, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failing_index: Option<usize>,
    /// Human-readable description of the first failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl ChainVerification {
    fn ok(verified_count: usize) -> Self {
        Self {
            valid: true,
            verified_count,
            failing_index: None,
            failure: None,
        }
    }

    fn failed(at: usize, failure: String) -> Self {
        Self {
            valid: false,
            verified_count: at,
            failing_index: Some(at),
            failure: Some(failure),
        }
    }
}

/// Verify a chain of nodes in creation order against [`GENESIS_HASH`].
pub fn verify_chain(nodes: &[ThoughtNode]) -> ChainVerification {
    verify_chain_from(nodes, GENESIS_HASH)
}

/// Verify a chain seeded with an explicit initial parent hash.
///
/// Branch chains seed with the content hash of the main-chain node the
/// branch forked from rather than the genesis sentinel.
///
/// Verification stops at the first mismatch: once one link fails, nothing
/// after it can be trusted, so the remainder is reported unverified rather
/// than silently skipped.
pub fn verify_chain_from(nodes: &[ThoughtNode], initial_parent: &str) -> ChainVerification {
    let mut expected_parent = initial_parent.to_string();

    for (index, node) in nodes.iter().enumerate() {
        if node.parent_hash != expected_parent {
            return ChainVerification::failed(
                index,
                format!(
                    "node {} parent hash {} does not match expected {}",
                    node.id, node.parent_hash, expected_parent
                ),
            );
        }

        let recomputed = node_hash(node);
        if recomputed != node.content_hash {
            return ChainVerification::failed(
                index,
                format!(
                    "node {} content hash mismatch: stored {}, recomputed {}",
                    node.id, node.content_hash, recomputed
                ),
            );
        }

        expected_parent = node.content_hash.clone();
    }

    ChainVerification::ok(nodes.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NewThought, ThoughtData};
    use chrono::TimeZone;

    fn fixed_time(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, secs).unwrap()
    }

    fn make_node(session: &str, number: u32, thought: &str, parent_hash: &str) -> ThoughtNode {
        let data = ThoughtData {
            thought: thought.to_string(),
            thought_number: number,
            total_thoughts: number,
            next_thought_needed: true,
            is_revision: None,
            revises_thought: None,
            branch_from_thought: None,
            branch_id: None,
            agent_id: Some("tester".to_string()),
            timestamp: fixed_time(number),
        };
        let content_hash = compute_hash(
            &data.thought,
            data.thought_number,
            parent_hash,
            data.agent_id.as_deref(),
            data.timestamp,
        );
        ThoughtNode {
            id: format!("{}:{}", session, number),
            data,
            prev: None,
            next: Vec::new(),
            revises_node: None,
            branch_origin: None,
            parent_hash: parent_hash.to_string(),
            content_hash,
        }
    }

    fn make_chain(len: u32) -> Vec<ThoughtNode> {
        let mut nodes = Vec::new();
        let mut parent = GENESIS_HASH.to_string();
        for n in 1..=len {
            let node = make_node("sess", n, &format!("thought {}", n), &parent);
            parent = node.content_hash.clone();
            nodes.push(node);
        }
        nodes
    }

    #[test]
    fn test_compute_hash_deterministic() {
        let ts = fixed_time(0);
        let a = compute_hash("x", 1, GENESIS_HASH, Some("alice"), ts);
        let b = compute_hash("x", 1, GENESIS_HASH, Some("alice"), ts);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_compute_hash_sensitive_to_each_field() {
        let ts = fixed_time(0);
        let base = compute_hash("x", 1, GENESIS_HASH, Some("alice"), ts);

        assert_ne!(base, compute_hash("y", 1, GENESIS_HASH, Some("alice"), ts));
        assert_ne!(base, compute_hash("x", 2, GENESIS_HASH, Some("alice"), ts));
        assert_ne!(base, compute_hash("x", 1, "ff", Some("alice"), ts));
        assert_ne!(base, compute_hash("x", 1, GENESIS_HASH, Some("bob"), ts));
        assert_ne!(
            base,
            compute_hash("x", 1, GENESIS_HASH, Some("alice"), fixed_time(1))
        );
    }

    #[test]
    fn test_missing_agent_hashes_as_empty() {
        let ts = fixed_time(0);
        let anon = compute_hash("x", 1, GENESIS_HASH, None, ts);
        let named = compute_hash("x", 1, GENESIS_HASH, Some("alice"), ts);
        assert_ne!(anon, named);
    }

    #[test]
    fn test_verify_empty_chain() {
        let result = verify_chain(&[]);
        assert!(result.valid);
        assert_eq!(result.verified_count, 0);
        assert!(result.failing_index.is_none());
    }

    #[test]
    fn test_verify_valid_chain() {
        let nodes = make_chain(5);
        let result = verify_chain(&nodes);
        assert!(result.valid);
        assert_eq!(result.verified_count, 5);
    }

    #[test]
    fn test_tampered_thought_detected() {
        let mut nodes = make_chain(4);
        nodes[2].data.thought = "altered after the fact".to_string();

        let result = verify_chain(&nodes);
        assert!(!result.valid);
        assert_eq!(result.failing_index, Some(2));
        assert_eq!(result.verified_count, 2);
    }

    #[test]
    fn test_tampered_timestamp_detected() {
        let mut nodes = make_chain(3);
        nodes[1].data.timestamp = fixed_time(59);

        let result = verify_chain(&nodes);
        assert!(!result.valid);
        assert_eq!(result.failing_index, Some(1));
    }

    #[test]
    fn test_tampered_agent_detected() {
        let mut nodes = make_chain(3);
        nodes[0].data.agent_id = Some("mallory".to_string());

        let result = verify_chain(&nodes);
        assert!(!result.valid);
        assert_eq!(result.failing_index, Some(0));
    }

    #[test]
    fn test_recomputed_hash_cannot_hide_reorder() {
        // An attacker who rewrites a node's content hash to match altered
        // content still breaks the next node's parent link.
        let mut nodes = make_chain(3);
        nodes[1].data.thought = "forged".to_string();
        nodes[1].content_hash = node_hash(&nodes[1]);

        let result = verify_chain(&nodes);
        assert!(!result.valid);
        assert_eq!(result.failing_index, Some(2));
    }

    #[test]
    fn test_branch_chain_seeds_from_fork_hash() {
        let main = make_chain(2);
        let fork_hash = main[1].content_hash.clone();
        let branch_node = make_node("sess:alt", 3, "branch thought", &fork_hash);

        let result = verify_chain_from(std::slice::from_ref(&branch_node), &fork_hash);
        assert!(result.valid);
        assert_eq!(result.verified_count, 1);

        // The same branch node does not verify against genesis.
        let against_genesis = verify_chain(std::slice::from_ref(&branch_node));
        assert!(!against_genesis.valid);
    }

    #[test]
    fn test_new_thought_builder_round_trips_into_hashable_data() {
        let input = NewThought::new("claim something")
            .with_agent("alice")
            .with_number(7)
            .with_timestamp(fixed_time(7));
        assert_eq!(input.thought_number, Some(7));
        assert_eq!(input.agent_id.as_deref(), Some("alice"));
    }
}
