use serde::{Deserialize, Serialize};
use tracing::debug;

use super::claims::{parse_claims, Claim};
use crate::store::ThoughtNode;

/// Kind of detected conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// One agent asserted a statement another agent asserted negated.
    DirectContradiction,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictKind::DirectContradiction => write!(f, "direct_contradiction"),
        }
    }
}

/// A pair of logically incompatible claims from different agents.
///
/// A query result, not a stored entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    /// Kind of incompatibility.
    #[serde(rename = "type")]
    pub kind: ConflictKind,
    /// Agent whose claim appeared first.
    pub agent_a: String,
    /// Agent whose claim appeared second.
    pub agent_b: String,
    /// The first-seen claim.
    pub claim_a: Claim,
    /// The conflicting claim.
    pub claim_b: Claim,
}

/// Find direct contradictions across the given thoughts.
///
/// Claims are re-parsed from each thought's text, then compared pairwise
/// across thoughts from *different* agents: matching normalized statements
/// with opposite polarity are flagged. Matching is exact on normalized text;
/// semantically equivalent rephrasings are not recognized, which is a
/// documented limitation of the marker-based approach.
pub fn detect_conflicts(thoughts: &[ThoughtNode]) -> Vec<Conflict> {
    let claims: Vec<Claim> = thoughts
        .iter()
        .flat_map(|node| {
            parse_claims(&node.data.thought, &node.id, node.data.agent_id.as_deref())
        })
        .collect();

    let mut conflicts = Vec::new();
    for (i, a) in claims.iter().enumerate() {
        for b in claims.iter().skip(i + 1) {
            if a.agent_id == b.agent_id {
                continue;
            }
            if a.statement == b.statement && a.negated != b.negated {
                conflicts.push(Conflict {
                    kind: ConflictKind::DirectContradiction,
                    agent_a: a.agent_id.clone(),
                    agent_b: b.agent_id.clone(),
                    claim_a: a.clone(),
                    claim_b: b.clone(),
                });
            }
        }
    }

    debug!(
        thoughts = thoughts.len(),
        claims = claims.len(),
        conflicts = conflicts.len(),
        "Conflict detection complete"
    );

    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::GENESIS_HASH;
    use crate::store::ThoughtData;
    use chrono::Utc;

    fn thought(id: &str, agent: &str, text: &str) -> ThoughtNode {
        ThoughtNode {
            id: id.to_string(),
            data: ThoughtData {
                thought: text.to_string(),
                thought_number: 1,
                total_thoughts: 1,
                next_thought_needed: true,
                is_revision: None,
                revises_thought: None,
                branch_from_thought: None,
                branch_id: None,
                agent_id: Some(agent.to_string()),
                timestamp: Utc::now(),
            },
            prev: None,
            next: Vec::new(),
            revises_node: None,
            branch_origin: None,
            parent_hash: GENESIS_HASH.to_string(),
            content_hash: String::new(),
        }
    }

    #[test]
    fn test_direct_contradiction_between_agents() {
        let a = thought("s:1", "alice", "CLAIM: X");
        let b = thought("s:2", "bob", "CLAIM: ¬(X)");

        let conflicts = detect_conflicts(&[a, b]);
        assert_eq!(conflicts.len(), 1);
        let conflict = &conflicts[0];
        assert_eq!(conflict.kind, ConflictKind::DirectContradiction);
        assert_eq!(conflict.agent_a, "alice");
        assert_eq!(conflict.agent_b, "bob");
        assert!(!conflict.claim_a.negated);
        assert!(conflict.claim_b.negated);
    }

    #[test]
    fn test_same_agent_never_conflicts_with_itself() {
        let a = thought("s:1", "alice", "CLAIM: X");
        let b = thought("s:2", "alice", "CLAIM: ¬(X)");
        assert!(detect_conflicts(&[a, b]).is_empty());
    }

    #[test]
    fn test_agreeing_claims_do_not_conflict() {
        let a = thought("s:1", "alice", "CLAIM: the index fits in memory");
        let b = thought("s:2", "bob", "CLAIM: the index fits in memory");
        assert!(detect_conflicts(&[a, b]).is_empty());
    }

    #[test]
    fn test_different_statements_do_not_conflict() {
        let a = thought("s:1", "alice", "CLAIM: X");
        let b = thought("s:2", "bob", "CLAIM: ¬(Y)");
        assert!(detect_conflicts(&[a, b]).is_empty());
    }

    #[test]
    fn test_normalization_bridges_formatting() {
        let a = thought("s:1", "alice", "CLAIM: The  Cache is stale.");
        let b = thought("s:2", "bob", "CLAIM: NOT(the cache is stale)");
        let conflicts = detect_conflicts(&[a, b]);
        assert_eq!(conflicts.len(), 1);
    }

    #[test]
    fn test_conflict_serializes_with_type_field() {
        let a = thought("s:1", "alice", "CLAIM: X");
        let b = thought("s:2", "bob", "CLAIM: ¬(X)");
        let conflicts = detect_conflicts(&[a, b]);
        let json = serde_json::to_value(&conflicts[0]).unwrap();
        assert_eq!(json["type"], "direct_contradiction");
        assert_eq!(json["agentA"], "alice");
        assert_eq!(json["agentB"], "bob");
    }

    #[test]
    fn test_thoughts_without_claims_are_ignored() {
        let a = thought("s:1", "alice", "just thinking out loud about X");
        let b = thought("s:2", "bob", "CLAIM: ¬(X)");
        assert!(detect_conflicts(&[a, b]).is_empty());
    }
}
