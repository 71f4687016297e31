//! Claim extraction and contradiction detection over thought text.
//!
//! Extraction is marker-based and deliberately conservative: only lines
//! carrying an explicit `CLAIM:` prefix produce claims, and conflict
//! matching is exact on normalized statement text. No semantic
//! understanding is attempted.

mod claims;
mod conflict;

pub use claims::{parse_claims, Claim};
pub use conflict::{detect_conflicts, Conflict, ConflictKind};
