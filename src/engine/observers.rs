// Cache invalidation observers
// Turn write-side activity events into eager cache refreshes

//! # Cache Invalidation Observers
//!
//! Each observer is a thin adapter between one activity event and the cache:
//!
//! | Event                              | Payload key                | Refreshes                     |
//! |------------------------------------|----------------------------|-------------------------------|
//! | `project_activity`                 | `project`                  | project data, inline config   |
//! | `contentbase_activity`             | `contentbase`              | content base                  |
//! | `contentbase_agent_activity`       | `content_base_agent`       | agent personality             |
//! | `contentbase_instruction_activity` | `content_base_instruction` | instructions                  |
//!
//! Only updates (`action_type == "U"`) are handled. The observer resolves the
//! owning project, refetches fresh projections from the [`ProjectDataSource`]
//! and pushes them with [`CacheService::refresh`]. Objects with no project,
//! such as organization-level content bases, are skipped.
//!
//! Observers never fail: every error is logged with the project UUID and
//! dropped, so a caching problem cannot break the write that triggered it.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, error};

use super::cache::CacheService;
use super::events::{AsyncObserver, EventBus};
use super::source::ProjectDataSource;
use crate::models::event::{
    project_uuid_of, CONTENTBASE_ACTIVITY, CONTENTBASE_AGENT_ACTIVITY,
    CONTENTBASE_INSTRUCTION_ACTIVITY, PROJECT_ACTIVITY,
};
use crate::models::{ActionType, CachedValue, Event};
use crate::Result;

/// Project UUID an update event applies to, or `None` when the event is not
/// this observer's concern.
fn target_project(
    event: &Event,
    payload_key: &str,
    resolve: impl Fn(&Map<String, Value>) -> Option<String>,
) -> Option<String> {
    if event.action_type() != Some(ActionType::Update) {
        debug!(event = %event.name, "Ignoring non-update activity");
        return None;
    }

    let Some(object) = event.object(payload_key) else {
        debug!(event = %event.name, payload_key, "Activity without payload object");
        return None;
    };

    let project_uuid = resolve(object);
    if project_uuid.is_none() {
        debug!(event = %event.name, "Object has no project, skipping cache refresh");
    }
    project_uuid
}

fn project_object_uuid(object: &Map<String, Value>) -> Option<String> {
    object
        .get("uuid")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| project_uuid_of(object))
}

/// Refreshes project data and inline agent configuration on project updates.
pub struct ProjectCacheInvalidationObserver {
    cache: Arc<CacheService>,
    source: Arc<dyn ProjectDataSource>,
}

impl ProjectCacheInvalidationObserver {
    pub fn new(cache: Arc<CacheService>, source: Arc<dyn ProjectDataSource>) -> Self {
        Self { cache, source }
    }

    async fn refresh(&self, project_uuid: &str) -> Result<()> {
        let project = self.source.project(project_uuid).await?;
        let backend = project.agents_backend.clone();

        self.cache
            .refresh(project_uuid, CachedValue::Project(project), backend.as_deref())
            .await?;

        let inline = self.source.inline_agent_config(project_uuid).await?;
        self.cache
            .refresh(
                project_uuid,
                CachedValue::InlineAgentConfig(inline),
                backend.as_deref(),
            )
            .await
    }
}

#[async_trait::async_trait]
impl AsyncObserver for ProjectCacheInvalidationObserver {
    async fn perform(&self, event: &Event) -> Result<()> {
        let Some(project_uuid) = target_project(event, "project", project_object_uuid) else {
            return Ok(());
        };

        if let Err(e) = self.refresh(&project_uuid).await {
            error!(project_uuid = %project_uuid, error = ?e, "Failed to refresh project cache");
        }
        Ok(())
    }
}

/// Refreshes the content base identity on content base updates.
pub struct ContentBaseCacheInvalidationObserver {
    cache: Arc<CacheService>,
    source: Arc<dyn ProjectDataSource>,
}

impl ContentBaseCacheInvalidationObserver {
    pub fn new(cache: Arc<CacheService>, source: Arc<dyn ProjectDataSource>) -> Self {
        Self { cache, source }
    }
}

#[async_trait::async_trait]
impl AsyncObserver for ContentBaseCacheInvalidationObserver {
    async fn perform(&self, event: &Event) -> Result<()> {
        let Some(project_uuid) = target_project(event, "contentbase", project_uuid_of) else {
            return Ok(());
        };

        let result = async {
            let content_base = self.source.content_base(&project_uuid).await?;
            self.cache
                .refresh(&project_uuid, CachedValue::ContentBase(content_base), None)
                .await
        }
        .await;

        if let Err(e) = result {
            error!(project_uuid = %project_uuid, error = ?e, "Failed to refresh content base cache");
        }
        Ok(())
    }
}

/// Refreshes the agent personality on content base agent updates.
pub struct ContentBaseAgentCacheInvalidationObserver {
    cache: Arc<CacheService>,
    source: Arc<dyn ProjectDataSource>,
}

impl ContentBaseAgentCacheInvalidationObserver {
    pub fn new(cache: Arc<CacheService>, source: Arc<dyn ProjectDataSource>) -> Self {
        Self { cache, source }
    }
}

#[async_trait::async_trait]
impl AsyncObserver for ContentBaseAgentCacheInvalidationObserver {
    async fn perform(&self, event: &Event) -> Result<()> {
        let Some(project_uuid) = target_project(event, "content_base_agent", project_uuid_of)
        else {
            return Ok(());
        };

        let result = async {
            let agent = self.source.agent(&project_uuid).await?;
            self.cache
                .refresh(&project_uuid, CachedValue::Agent(agent), None)
                .await
        }
        .await;

        if let Err(e) = result {
            error!(project_uuid = %project_uuid, error = ?e, "Failed to refresh agent cache");
        }
        Ok(())
    }
}

/// Refreshes the instruction list on content base instruction updates.
pub struct ContentBaseInstructionCacheInvalidationObserver {
    cache: Arc<CacheService>,
    source: Arc<dyn ProjectDataSource>,
}

impl ContentBaseInstructionCacheInvalidationObserver {
    pub fn new(cache: Arc<CacheService>, source: Arc<dyn ProjectDataSource>) -> Self {
        Self { cache, source }
    }
}

#[async_trait::async_trait]
impl AsyncObserver for ContentBaseInstructionCacheInvalidationObserver {
    async fn perform(&self, event: &Event) -> Result<()> {
        let Some(project_uuid) =
            target_project(event, "content_base_instruction", project_uuid_of)
        else {
            return Ok(());
        };

        let result = async {
            let instructions = self.source.instructions(&project_uuid).await?;
            self.cache
                .refresh(&project_uuid, CachedValue::Instructions(instructions), None)
                .await
        }
        .await;

        if let Err(e) = result {
            error!(project_uuid = %project_uuid, error = ?e, "Failed to refresh instructions cache");
        }
        Ok(())
    }
}

/// Subscribe the four cache invalidation observers, errors isolated.
pub fn register_cache_observers(
    bus: &EventBus,
    cache: Arc<CacheService>,
    source: Arc<dyn ProjectDataSource>,
) {
    bus.subscribe_async(
        PROJECT_ACTIVITY,
        Arc::new(ProjectCacheInvalidationObserver::new(
            cache.clone(),
            source.clone(),
        )),
        true,
    );
    bus.subscribe_async(
        CONTENTBASE_ACTIVITY,
        Arc::new(ContentBaseCacheInvalidationObserver::new(
            cache.clone(),
            source.clone(),
        )),
        true,
    );
    bus.subscribe_async(
        CONTENTBASE_AGENT_ACTIVITY,
        Arc::new(ContentBaseAgentCacheInvalidationObserver::new(
            cache.clone(),
            source.clone(),
        )),
        true,
    );
    bus.subscribe_async(
        CONTENTBASE_INSTRUCTION_ACTIVITY,
        Arc::new(ContentBaseInstructionCacheInvalidationObserver::new(
            cache, source,
        )),
        true,
    );
}
