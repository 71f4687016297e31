use serde::{Deserialize, Serialize};

/// The claim line marker. Matched case-insensitively at the start of a line.
const CLAIM_MARKER: &str = "CLAIM:";

/// A structured assertion extracted from thought text.
///
/// Derived on demand, never persisted independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    /// Normalized statement text (whitespace-collapsed, lowercased,
    /// trailing period stripped).
    pub statement: String,
    /// Whether the statement was asserted negated.
    pub negated: bool,
    /// Id of the thought the claim came from.
    pub source_thought_id: String,
    /// Authoring agent, `"unknown"` when the thought carried none.
    pub agent_id: String,
}

/// Extract claims from free-form thought text.
///
/// Scans for lines beginning with `CLAIM:`; a remainder wrapped in `¬( … )`
/// or `NOT( … )` is a negated claim. Text without the marker yields zero
/// claims — unmarked prose is never inferred to assert anything.
pub fn parse_claims(text: &str, source_thought_id: &str, agent_id: Option<&str>) -> Vec<Claim> {
    let agent = agent_id.unwrap_or("unknown");
    let mut claims = Vec::new();

    for line in text.lines() {
        let line = line.trim_start();
        let Some(head) = line.get(..CLAIM_MARKER.len()) else {
            continue;
        };
        if !head.eq_ignore_ascii_case(CLAIM_MARKER) {
            continue;
        }

        let body = line[CLAIM_MARKER.len()..].trim();
        let (statement_raw, negated) = strip_negation(body);
        let statement = normalize(statement_raw);
        if statement.is_empty() {
            continue;
        }

        claims.push(Claim {
            statement,
            negated,
            source_thought_id: source_thought_id.to_string(),
            agent_id: agent.to_string(),
        });
    }

    claims
}

/// Peel one wrapping negation marker: `¬( … )` or `NOT( … )`.
fn strip_negation(body: &str) -> (&str, bool) {
    for prefix in ["¬(", "NOT("] {
        if let Some(rest) = body.strip_prefix(prefix) {
            if let Some(inner) = rest.strip_suffix(')') {
                return (inner, true);
            }
        }
    }
    (body, false)
}

/// Normalize a statement for exact-match comparison: collapse whitespace,
/// lowercase, drop one trailing period.
fn normalize(statement: &str) -> String {
    let collapsed = statement.split_whitespace().collect::<Vec<_>>().join(" ");
    let lowered = collapsed.to_lowercase();
    lowered.strip_suffix('.').unwrap_or(&lowered).to_string()
}
