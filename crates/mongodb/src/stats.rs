//! Reconciliation counters.

/// Outcome of reconciling one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionStats {
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub deleted: u64,
    pub fields_updated: u64,
}

impl CollectionStats {
    /// Number of documents written (inserted, updated or deleted).
    pub fn writes(&self) -> u64 {
        self.created + self.updated + self.deleted
    }
}

/// Totals of a whole run. Created at run start and discarded after being logged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub collections_processed: u64,
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub deleted: u64,
    pub fields_updated: u64,
}

impl ReconcileStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one collection's counts into the run totals.
    pub fn record(&mut self, collection: &CollectionStats) {
        self.collections_processed += 1;
        self.created += collection.created;
        self.updated += collection.updated;
        self.unchanged += collection.unchanged;
        self.deleted += collection.deleted;
        self.fields_updated += collection.fields_updated;
    }

    pub fn writes(&self) -> u64 {
        self.created + self.updated + self.deleted
    }

    pub fn log_summary(&self) {
        tracing::info!(
            "Reconciled {} collections: {} created, {} updated ({} fields), {} unchanged, {} deleted",
            self.collections_processed,
            self.created,
            self.updated,
            self.fields_updated,
            self.unchanged,
            self.deleted
        );
    }
}
