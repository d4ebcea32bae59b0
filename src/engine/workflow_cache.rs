// Workflow-scoped cache for transient execution state

use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::store::KeyValueStore;
use crate::Result;

/// Default lifetime of workflow entries.
pub const WORKFLOW_DATA_TTL: Duration = Duration::from_secs(10 * 60);

/// Short-lived cache keyed by `workflow:{id}:{data_type}`.
///
/// Independent of the project cache; shares only the store.
pub struct WorkflowCache {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl WorkflowCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_ttl(store, WORKFLOW_DATA_TTL)
    }

    pub fn with_ttl(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn key(workflow_id: &str, data_type: &str) -> String {
        format!("workflow:{}:{}", workflow_id, data_type)
    }

    pub async fn set<T: Serialize>(&self, workflow_id: &str, data_type: &str, value: &T) -> Result<()> {
        let key = Self::key(workflow_id, data_type);
        self.store
            .set(&key, serde_json::to_value(value)?, self.ttl)
            .await?;
        debug!(key = %key, "Cached workflow data");
        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(&self, workflow_id: &str, data_type: &str) -> Result<Option<T>> {
        let key = Self::key(workflow_id, data_type);
        match self.store.get(&key).await? {
            Some(raw) => Ok(Some(serde_json::from_value(raw)?)),
            None => Ok(None),
        }
    }

    /// Delete every entry of one workflow. Returns the number removed.
    pub async fn delete_workflow(&self, workflow_id: &str) -> Result<u64> {
        let removed = self
            .store
            .delete_pattern(&format!("workflow:{}:*", workflow_id))
            .await?;
        debug!(workflow_id, removed, "Cleared workflow cache");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::RecordingStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_with_workflow_ttl() {
        let store = Arc::new(RecordingStore::default());
        let cache = WorkflowCache::new(store.clone());

        cache
            .set("wf-1", "state", &json!({"step": 2}))
            .await
            .unwrap();

        let state: Option<serde_json::Value> = cache.get("wf-1", "state").await.unwrap();
        assert_eq!(state, Some(json!({"step": 2})));
        assert_eq!(
            store.sets(),
            vec![("workflow:wf-1:state".to_string(), Duration::from_secs(600))]
        );

        let missing: Option<serde_json::Value> = cache.get("wf-1", "other").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_delete_workflow_leaves_others() {
        let store = Arc::new(RecordingStore::default());
        let cache = WorkflowCache::new(store.clone());

        cache.set("wf-1", "state", &1).await.unwrap();
        cache.set("wf-1", "inputs", &2).await.unwrap();
        cache.set("wf-2", "state", &3).await.unwrap();

        assert_eq!(cache.delete_workflow("wf-1").await.unwrap(), 2);
        assert_eq!(store.inner().keys(), vec!["workflow:wf-2:state".to_string()]);
    }
}
