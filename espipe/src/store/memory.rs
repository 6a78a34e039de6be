use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::EtlResult;
use crate::store::CheckpointStore;

#[derive(Debug, Default)]
struct Inner {
    watermarks: HashMap<String, DateTime<Utc>>,
    /// Every saved value per index, oldest first.
    history: HashMap<String, Vec<DateTime<Utc>>>,
}

/// In-memory [`CheckpointStore`]. Watermarks are lost on restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every value saved for `index_name`, oldest first.
    pub async fn history(&self, index_name: &str) -> Vec<DateTime<Utc>> {
        let inner = self.inner.lock().await;

        inner.history.get(index_name).cloned().unwrap_or_default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, index_name: &str, last_refresh_time: DateTime<Utc>) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;

        inner
            .watermarks
            .insert(index_name.to_string(), last_refresh_time);
        inner
            .history
            .entry(index_name.to_string())
            .or_default()
            .push(last_refresh_time);

        Ok(())
    }

    async fn find(&self, index_name: &str) -> EtlResult<Option<DateTime<Utc>>> {
        let inner = self.inner.lock().await;

        Ok(inner.watermarks.get(index_name).copied())
    }

    async fn delete(&self, index_name: &str) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        inner.watermarks.remove(index_name);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[tokio::test]
    async fn save_overwrites_and_delete_is_idempotent() {
        let store = MemoryCheckpointStore::new();
        let first = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 5).unwrap();

        assert_eq!(store.find("orders").await.unwrap(), None);

        store.save("orders", first).await.unwrap();
        store.save("orders", second).await.unwrap();
        assert_eq!(store.find("orders").await.unwrap(), Some(second));
        assert_eq!(store.history("orders").await, vec![first, second]);

        store.delete("orders").await.unwrap();
        store.delete("orders").await.unwrap();
        assert_eq!(store.find("orders").await.unwrap(), None);
    }
}
