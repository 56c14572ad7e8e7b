//! Snapshot kind enumeration.

/// What a snapshot directory was written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotKind {
    /// Copy of the target database taken before any destructive operation.
    ///
    /// Backups are never deleted by the tool; restoring one is a manual step.
    Backup,

    /// Copy of the source database taken in full-replace mode.
    ///
    /// The export is reloaded into the target right after the target is dropped.
    Export,
}

impl SnapshotKind {
    /// Get the string representation of this kind.
    ///
    /// Used as the directory prefix, e.g. `backup-2024-01-01T00-00-00-000Z`.
    pub fn as_str(&self) -> &str {
        match self {
            SnapshotKind::Backup => "backup",
            SnapshotKind::Export => "export",
        }
    }
}

impl std::fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
