//! Decides whether the published snapshot still reflects the document.

use crate::retrieval::document::SourceStamp;

/// Outcome of comparing the document's current stamp with the last build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// Nothing has been built yet
    NeverIndexed,
    /// The snapshot was built from the document as it is now
    Fresh,
    /// The document changed (or appeared, or vanished) since the last build
    Changed {
        previous: SourceStamp,
        current: SourceStamp,
    },
}

impl Staleness {
    pub fn needs_rebuild(&self) -> bool {
        !matches!(self, Staleness::Fresh)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StalenessDetector {
    last_indexed: Option<SourceStamp>,
    last_failed: Option<SourceStamp>,
}

impl StalenessDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a snapshot loaded from disk
    pub fn indexed_at(stamp: SourceStamp) -> Self {
        Self {
            last_indexed: Some(stamp),
            last_failed: None,
        }
    }

    pub fn check(&self, current: SourceStamp) -> Staleness {
        match self.last_indexed {
            None => Staleness::NeverIndexed,
            Some(previous) if previous == current => Staleness::Fresh,
            Some(previous) => Staleness::Changed { previous, current },
        }
    }

    /// True when a build for exactly this stamp already failed. While a snapshot is being
    /// served, searches skip such stamps; an explicit refresh still retries.
    pub fn failed_for(&self, current: SourceStamp) -> bool {
        self.last_failed == Some(current)
    }

    pub fn last_indexed(&self) -> Option<SourceStamp> {
        self.last_indexed
    }

    pub fn last_failed(&self) -> Option<SourceStamp> {
        self.last_failed
    }

    pub fn record_success(&mut self, stamp: SourceStamp) {
        self.last_indexed = Some(stamp);
        self.last_failed = None;
    }

    pub fn record_failure(&mut self, stamp: SourceStamp) {
        self.last_failed = Some(stamp);
    }
}
