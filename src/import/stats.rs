//! Import statistics tracking.

use std::fmt;

/// Outcome counts for one batch (or one kind, once merged).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    /// Entities created at the destination
    pub created: usize,
    /// Existing accounts that were annotated instead of duplicated
    pub merged: usize,
    /// Records already correlated by an earlier run
    pub skipped: usize,
    /// Comments whose reply chain never reached a topic
    pub orphaned: usize,
}

impl ImportStats {
    /// Merge another ImportStats into this one by summing all counts.
    pub fn merge(&mut self, other: ImportStats) {
        self.created += other.created;
        self.merged += other.merged;
        self.skipped += other.skipped;
        self.orphaned += other.orphaned;
    }

    pub fn processed(&self) -> usize {
        self.created + self.merged + self.skipped + self.orphaned
    }
}

impl fmt::Display for ImportStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "created {}, merged {}, skipped {}, orphaned {}",
            self.created, self.merged, self.skipped, self.orphaned
        )
    }
}

/// Totals for a whole run, per entity kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub categories: ImportStats,
    pub users: ImportStats,
    pub projects: ImportStats,
    pub posts: ImportStats,
    pub sso_records_cleared: usize,
    pub correlations_written: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_sums_counts() {
        let mut total = ImportStats {
            created: 2,
            skipped: 1,
            ..Default::default()
        };
        total.merge(ImportStats {
            created: 1,
            merged: 1,
            orphaned: 3,
            ..Default::default()
        });

        assert_eq!(total.created, 3);
        assert_eq!(total.merged, 1);
        assert_eq!(total.processed(), 8);
        assert_eq!(
            total.to_string(),
            "created 3, merged 1, skipped 1, orphaned 3"
        );
    }
}
