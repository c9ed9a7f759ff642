use std::fmt;

/// What a successful `ensure_fresh()` had to do.
///
/// - `Unchanged`: fingerprint matched and the backend was alive; nothing ran.
/// - `Restarted`: fingerprint matched but the backend had died; it was
///   started again without a rebuild.
/// - `Rebuilt`: the tree changed (or this was the first cycle); the backend
///   was stopped, rebuilt, started and awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Unchanged,
    Restarted,
    Rebuilt,
}

impl RefreshOutcome {
    /// True when the cycle launched a new backend process.
    pub fn started_backend(self) -> bool {
        !matches!(self, RefreshOutcome::Unchanged)
    }
}

impl fmt::Display for RefreshOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RefreshOutcome::Unchanged => "unchanged",
            RefreshOutcome::Restarted => "restarted",
            RefreshOutcome::Rebuilt => "rebuilt",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unchanged_leaves_the_backend_alone() {
        assert!(!RefreshOutcome::Unchanged.started_backend());
        assert!(RefreshOutcome::Restarted.started_backend());
        assert!(RefreshOutcome::Rebuilt.started_backend());
    }

    #[test]
    fn display_is_lowercase() {
        assert_eq!(RefreshOutcome::Restarted.to_string(), "restarted");
    }
}
