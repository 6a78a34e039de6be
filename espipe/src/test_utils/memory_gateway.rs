use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use config::index::IndexConfig;

use crate::destination::{BulkFuture, BulkGateway, BulkItemError, BulkOutcome};
use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::types::Document;

/// One bulk request received by a [`MemoryGateway`].
#[derive(Debug, Clone, PartialEq)]
pub struct BulkSubmission {
    pub index_name: String,
    pub documents: Vec<Document>,
}

struct Inner {
    healthy: bool,
    fail_requests: bool,
    indices: HashSet<String>,
    created: Vec<String>,
    relaxed_refresh: HashSet<String>,
    submissions: Vec<BulkSubmission>,
    item_failures: HashMap<String, String>,
}

/// Search engine double recording bulk submissions in call order.
#[derive(Clone)]
pub struct MemoryGateway {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                healthy: true,
                fail_requests: false,
                indices: HashSet::new(),
                created: Vec::new(),
                relaxed_refresh: HashSet::new(),
                submissions: Vec::new(),
                item_failures: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.lock().healthy = healthy;
    }

    /// Makes every subsequent bulk request fail as a whole.
    pub fn set_fail_requests(&self, fail_requests: bool) {
        self.lock().fail_requests = fail_requests;
    }

    /// Marks `index_name` as existing without going through init.
    pub fn add_index(&self, index_name: &str) {
        self.lock().indices.insert(index_name.to_string());
    }

    /// Rejects the document `id` in every subsequent bulk request with `error_type`.
    pub fn fail_item(&self, id: &str, error_type: &str) {
        self.lock()
            .item_failures
            .insert(id.to_string(), error_type.to_string());
    }

    pub fn submissions(&self) -> Vec<BulkSubmission> {
        self.lock().submissions.clone()
    }

    pub fn submission_sizes(&self) -> Vec<usize> {
        self.lock()
            .submissions
            .iter()
            .map(|submission| submission.documents.len())
            .collect()
    }

    /// The last written version of every document of `index_name`, keyed by id.
    pub fn documents(&self, index_name: &str) -> BTreeMap<String, Document> {
        self.lock()
            .submissions
            .iter()
            .filter(|submission| submission.index_name == index_name)
            .flat_map(|submission| submission.documents.iter())
            .map(|document| (document.id().to_string(), document.clone()))
            .collect()
    }

    /// Names of the indices created so far, in order.
    pub fn created_indices(&self) -> Vec<String> {
        self.lock().created.clone()
    }

    pub fn is_refresh_relaxed(&self, index_name: &str) -> bool {
        self.lock().relaxed_refresh.contains(index_name)
    }
}

impl BulkGateway for MemoryGateway {
    async fn is_healthy(&self) -> bool {
        self.lock().healthy
    }

    async fn index_exists(&self, index_name: &str) -> EtlResult<bool> {
        Ok(self.lock().indices.contains(index_name))
    }

    async fn create_index(&self, index: &IndexConfig) -> EtlResult<()> {
        let mut inner = self.lock();
        inner.indices.insert(index.name.clone());
        inner.created.push(index.name.clone());

        Ok(())
    }

    async fn relax_refresh_for_bulk_load(&self, index_name: &str) -> EtlResult<()> {
        self.lock().relaxed_refresh.insert(index_name.to_string());

        Ok(())
    }

    async fn restore_refresh_interval(&self, index_name: &str) -> EtlResult<()> {
        self.lock().relaxed_refresh.remove(index_name);

        Ok(())
    }

    fn bulk_upsert(&self, index_name: &str, documents: Vec<Document>) -> EtlResult<BulkFuture> {
        let mut inner = self.lock();

        if !inner.indices.contains(index_name) {
            return Err(etl_error!(
                ErrorKind::DestinationIndexMissing,
                "Index does not exist",
                index_name
            ));
        }

        let fail_request = inner.fail_requests;
        let failed_items: Vec<BulkItemError> = documents
            .iter()
            .filter_map(|document| {
                inner
                    .item_failures
                    .get(document.id())
                    .map(|error_type| BulkItemError {
                        id: document.id().to_string(),
                        error_type: error_type.clone(),
                        reason: format!("document {} rejected", document.id()),
                    })
            })
            .collect();
        let submitted = documents.len();

        inner.submissions.push(BulkSubmission {
            index_name: index_name.to_string(),
            documents,
        });

        Ok(Box::pin(async move {
            if fail_request {
                return Err(etl_error!(
                    ErrorKind::DestinationQueryFailed,
                    "Bulk request failed",
                    "request rejected by the memory gateway"
                ));
            }

            Ok(BulkOutcome {
                errors: !failed_items.is_empty(),
                submitted,
                failed_items,
            })
        }))
    }
}
