use std::fmt;

use crate::models::{TargetState, compute_hash};

/// Outcome of comparing an observation with the last known state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// No prior state for this target.
    New,
    Unchanged,
    Changed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::New => write!(f, "NEW"),
            ChangeKind::Unchanged => write!(f, "UNCHANGED"),
            ChangeKind::Changed => write!(f, "CHANGED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: ChangeKind,
    /// SHA-256 of the canonical text.
    pub digest: String,
}

/// Classify canonical text against the previous state by digest.
pub fn classify(canonical: &str, previous: Option<&TargetState>) -> Classification {
    let digest = compute_hash(canonical);
    let kind = match previous {
        None => ChangeKind::New,
        Some(prev) if prev.hash == digest => ChangeKind::Unchanged,
        Some(_) => ChangeKind::Changed,
    };
    Classification { kind, digest }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::Utc;

    use super::*;

    fn state_for(text: &str) -> TargetState {
        TargetState {
            hash: compute_hash(text),
            last_checked_at: Utc::now(),
            last_changed_at: Utc::now(),
            last_snapshot: PathBuf::from("x.normalized.txt"),
            renderer_failed_at: None,
        }
    }

    #[test]
    fn test_first_observation_is_new() {
        let c = classify("Hello", None);
        assert_eq!(c.kind, ChangeKind::New);
        assert_eq!(c.digest, compute_hash("Hello"));
    }

    #[test]
    fn test_same_digest_is_unchanged() {
        let prev = state_for("Hello");
        assert_eq!(classify("Hello", Some(&prev)).kind, ChangeKind::Unchanged);
        assert_eq!(classify("Hello", Some(&prev)).kind, ChangeKind::Unchanged);
    }

    #[test]
    fn test_different_digest_is_changed() {
        let prev = state_for("Hello");
        let c = classify("Hello World", Some(&prev));
        assert_eq!(c.kind, ChangeKind::Changed);
        assert_eq!(c.digest, compute_hash("Hello World"));
    }
}
