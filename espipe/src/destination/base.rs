use std::future::Future;

use config::index::IndexConfig;
use futures::future::BoxFuture;
use serde::Serialize;

use crate::error::EtlResult;
use crate::types::Document;

/// Item error type returned when a document was already written with a newer version.
///
/// Overlapping sync windows legitimately resubmit documents, so these are expected.
pub const VERSION_CONFLICT_ERROR: &str = "version_conflict_engine_exception";

/// A prepared bulk write. The request is sent once the future is first polled.
pub type BulkFuture = BoxFuture<'static, EtlResult<BulkOutcome>>;

/// Operations the engine needs from the search engine.
///
/// [`BulkGateway::bulk_upsert`] encodes the request body and returns a lazy future. The
/// dispatcher spawns it right away, so several bulk writes can be in flight while rows
/// are still being streamed.
pub trait BulkGateway: Clone + Send + Sync + 'static {
    /// Returns whether the search engine answers. Transport errors count as unhealthy.
    fn is_healthy(&self) -> impl Future<Output = bool> + Send;

    fn index_exists(&self, index_name: &str) -> impl Future<Output = EtlResult<bool>> + Send;

    /// Drops the index if it exists and creates it from the configured settings and
    /// mapping.
    fn create_index(&self, index: &IndexConfig) -> impl Future<Output = EtlResult<()>> + Send;

    /// Disables periodic refreshes while an init bulk loads the index.
    fn relax_refresh_for_bulk_load(
        &self,
        index_name: &str,
    ) -> impl Future<Output = EtlResult<()>> + Send;

    /// Restores the configured refresh interval after a bulk load.
    fn restore_refresh_interval(
        &self,
        index_name: &str,
    ) -> impl Future<Output = EtlResult<()>> + Send;

    /// Prepares `documents` as one bulk request, upserting each by id. Nothing is sent
    /// until the returned future is polled.
    fn bulk_upsert(&self, index_name: &str, documents: Vec<Document>) -> EtlResult<BulkFuture>;
}

/// Result of one bulk request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkOutcome {
    /// Set when at least one item failed.
    pub errors: bool,
    /// Number of documents in the request.
    pub submitted: usize,
    pub failed_items: Vec<BulkItemError>,
}

impl BulkOutcome {
    pub fn succeeded(submitted: usize) -> Self {
        Self {
            errors: false,
            submitted,
            failed_items: Vec::new(),
        }
    }
}

/// A document rejected by the search engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkItemError {
    pub id: String,
    pub error_type: String,
    pub reason: String,
}

impl BulkItemError {
    pub fn is_version_conflict(&self) -> bool {
        self.error_type == VERSION_CONFLICT_ERROR
    }
}
