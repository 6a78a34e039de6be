//! The init, fix and sync algorithms.
//!
//! An [`Indexer`] owns handles to the row source, the search engine and the checkpoint
//! store. It is cheap to clone, so every task gets its own copy.

mod dispatcher;
mod fix;
mod init;
mod outcome;
mod sync;

use config::shared::WatermarkPolicy;

pub use dispatcher::{BatchDispatcher, DispatchSummary, MAX_EXTENSION_PARAMETERS, Progress};
pub use fix::FixRequest;
pub use outcome::TaskOutcome;
pub use sync::SYNC_WINDOW_BACKOFF_SECS;

/// Tunables shared by every algorithm run of an [`Indexer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexerSettings {
    /// Number of rows per init bulk request.
    pub batch_size: usize,
    pub watermark_policy: WatermarkPolicy,
}

#[derive(Debug, Clone)]
pub struct Indexer<S, G, C> {
    source: S,
    gateway: G,
    store: C,
    settings: IndexerSettings,
}

impl<S, G, C> Indexer<S, G, C> {
    pub fn new(source: S, gateway: G, store: C, settings: IndexerSettings) -> Self {
        Self {
            source,
            gateway,
            store,
            settings,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn store(&self) -> &C {
        &self.store
    }

    pub fn settings(&self) -> IndexerSettings {
        self.settings
    }
}

impl From<DispatchSummary> for TaskOutcome {
    fn from(summary: DispatchSummary) -> Self {
        TaskOutcome::Completed {
            documents: summary.documents,
            batches: summary.batches,
            failed_items: summary.failed_items,
        }
    }
}
