//! Branch reconciliation: fork-point analysis and divergence reports.
//!
//! Given the main chain and two divergent branch thought lists, locate the
//! common fork point, partition shared from divergent thoughts, and run
//! conflict detection across the divergent sets. The renderers are pure
//! formatting functions over the computed diff.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::{detect_conflicts, Conflict};
use crate::store::ThoughtNode;

/// A computed view reconciling two divergent branches against the main
/// chain. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchDiff {
    /// Highest main-chain thought number that is an ancestor of both
    /// branches.
    pub fork_point: u32,
    /// Main-chain thoughts at or before the fork point.
    pub shared_thoughts: Vec<ThoughtNode>,
    /// First branch's own thoughts.
    pub branch_a: Vec<ThoughtNode>,
    /// Second branch's own thoughts.
    pub branch_b: Vec<ThoughtNode>,
    /// Contradictions detected across the two divergent sets.
    pub conflicts: Vec<Conflict>,
}

/// Compute the diff between two branches of one session.
///
/// The fork point derives from each branch's first thought's
/// `branch_from_thought`. When the branches fork from different main-chain
/// points the lower of the two wins, so `shared_thoughts` only contains
/// thoughts that are genuinely ancestors of both branches.
pub fn compute_branch_diff(
    main: &[ThoughtNode],
    branch_a: &[ThoughtNode],
    branch_b: &[ThoughtNode],
) -> BranchDiff {
    let fork_a = first_fork(branch_a);
    let fork_b = first_fork(branch_b);
    let fork_point = match (fork_a, fork_b) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => 0,
    };

    let shared_thoughts: Vec<ThoughtNode> = main
        .iter()
        .filter(|n| n.data.thought_number <= fork_point)
        .cloned()
        .collect();

    let divergent: Vec<ThoughtNode> = branch_a.iter().chain(branch_b.iter()).cloned().collect();
    let conflicts = detect_conflicts(&divergent);

    debug!(
        fork_point,
        shared = shared_thoughts.len(),
        branch_a = branch_a.len(),
        branch_b = branch_b.len(),
        conflicts = conflicts.len(),
        "Branch diff computed"
    );

    BranchDiff {
        fork_point,
        shared_thoughts,
        branch_a: branch_a.to_vec(),
        branch_b: branch_b.to_vec(),
        conflicts,
    }
}

fn first_fork(branch: &[ThoughtNode]) -> Option<u32> {
    branch.first().and_then(|n| n.data.branch_from_thought)
}

fn branch_label(branch: &[ThoughtNode], fallback: &str) -> String {
    branch
        .first()
        .and_then(|n| n.data.branch_id.clone())
        .unwrap_or_else(|| fallback.to_string())
}

fn agent_of(node: &ThoughtNode) -> &str {
    node.data.agent_id.as_deref().unwrap_or("unknown")
}

/// First line of a thought, truncated for single-line display.
fn summarize(text: &str, max: usize) -> String {
    let first_line = text.lines().next().unwrap_or("");
    if first_line.chars().count() <= max {
        return first_line.to_string();
    }
    let truncated: String = first_line.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", truncated)
}

/// Render a chronological timeline interleaving shared and divergent
/// thoughts by timestamp, annotated with agent identity and origin.
pub fn render_timeline(diff: &BranchDiff) -> String {
    let label_a = branch_label(&diff.branch_a, "branch-a");
    let label_b = branch_label(&diff.branch_b, "branch-b");

    let mut entries: Vec<(&ThoughtNode, String)> = Vec::new();
    for node in &diff.shared_thoughts {
        entries.push((node, "main".to_string()));
    }
    for node in &diff.branch_a {
        entries.push((node, label_a.clone()));
    }
    for node in &diff.branch_b {
        entries.push((node, label_b.clone()));
    }
    entries.sort_by(|(a, _), (b, _)| {
        a.data
            .timestamp
            .cmp(&b.data.timestamp)
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut out = String::new();
    out.push_str(&format!(
        "Timeline (fork point: thought {})\n",
        diff.fork_point
    ));
    for (node, origin) in entries {
        out.push_str(&format!(
            "{}  {:<12} #{:<3} [{}] {}\n",
            node.data.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            origin,
            node.data.thought_number,
            agent_of(node),
            summarize(&node.data.thought, 72)
        ));
    }
    out
}

/// Render a two-column split view of the divergent branches with a
/// conflicts section beneath.
pub fn render_split_diff(diff: &BranchDiff) -> String {
    const COL: usize = 46;
    let label_a = branch_label(&diff.branch_a, "branch-a");
    let label_b = branch_label(&diff.branch_b, "branch-b");

    let mut out = String::new();
    out.push_str(&format!(
        "Split diff (fork point: thought {}, {} shared)\n",
        diff.fork_point,
        diff.shared_thoughts.len()
    ));
    out.push_str(&format!(
        "{:<width$} | {}\n",
        format!("{} ({})", label_a, diff.branch_a.len()),
        format!("{} ({})", label_b, diff.branch_b.len()),
        width = COL
    ));
    out.push_str(&format!("{:-<width$}-+-{:-<width$}\n", "", "", width = COL));

    let rows = diff.branch_a.len().max(diff.branch_b.len());
    for i in 0..rows {
        let left = diff
            .branch_a
            .get(i)
            .map(|n| format!("#{} [{}] {}", n.data.thought_number, agent_of(n), summarize(&n.data.thought, COL - 12)))
            .unwrap_or_default();
        let right = diff
            .branch_b
            .get(i)
            .map(|n| format!("#{} [{}] {}", n.data.thought_number, agent_of(n), summarize(&n.data.thought, COL - 12)))
            .unwrap_or_default();
        out.push_str(&format!("{:<width$} | {}\n", left, right, width = COL));
    }

    out.push_str(&format!("\nConflicts ({})\n", diff.conflicts.len()));
    for conflict in &diff.conflicts {
        out.push_str(&format!(
            "  {}: {} vs {}\n    A: {}{}\n    B: {}{}\n",
            conflict.kind,
            conflict.agent_a,
            conflict.agent_b,
            if conflict.claim_a.negated { "¬ " } else { "" },
            conflict.claim_a.statement,
            if conflict.claim_b.negated { "¬ " } else { "" },
            conflict.claim_b.statement,
        ));
    }
    out
}
