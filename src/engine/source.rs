// Data-layer collaborator contract
// The cache never queries the database itself; it asks a ProjectDataSource

//! # Project Data Source
//!
//! [`ProjectDataSource`] is the seam between the cache core and the data
//! layer that owns projects, content bases and teams. The cache only depends
//! on this trait; code that knows about concrete rows implements it.
//!
//! Per-call fetch closures given to the `CacheService::get_*` accessors
//! usually just forward to one of these methods.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::models::{
    AgentPersonality, CacheType, ContentBaseData, GuardrailsData, InlineAgentConfig, ProjectData,
    ResolvedProject, TeamMember,
};
use crate::{Result, RouterCacheError};

/// Fresh projections of a project's configuration.
#[async_trait::async_trait]
pub trait ProjectDataSource: Send + Sync {
    async fn project(&self, project_uuid: &str) -> Result<ProjectData>;

    async fn content_base(&self, project_uuid: &str) -> Result<ContentBaseData>;

    async fn team(&self, project_uuid: &str, agents_backend: &str) -> Result<Vec<TeamMember>>;

    async fn guardrails(&self, project_uuid: &str) -> Result<GuardrailsData>;

    /// `None` when the project has no backend-specific configuration.
    async fn inline_agent_config(&self, project_uuid: &str) -> Result<Option<InlineAgentConfig>>;

    /// Ordered instruction strings of the project's content base.
    async fn instructions(&self, project_uuid: &str) -> Result<Vec<String>>;

    async fn agent(&self, project_uuid: &str) -> Result<Option<AgentPersonality>>;

    /// Load project, content base and inline configuration in one go.
    async fn resolve(&self, project_uuid: &str) -> Result<ResolvedProject> {
        let (project, content_base, inline_agent_config) = tokio::try_join!(
            self.project(project_uuid),
            self.content_base(project_uuid),
            self.inline_agent_config(project_uuid),
        )?;

        Ok(ResolvedProject {
            project,
            content_base,
            inline_agent_config,
        })
    }
}

/// Everything the in-memory source knows about one project.
#[derive(Debug, Clone, Default)]
pub struct ProjectRecord {
    pub project: Option<ProjectData>,
    pub content_base: Option<ContentBaseData>,
    /// Team rosters keyed by agents backend
    pub teams: HashMap<String, Vec<TeamMember>>,
    pub guardrails: Option<GuardrailsData>,
    pub inline_agent_config: Option<InlineAgentConfig>,
    pub instructions: Vec<String>,
    pub agent: Option<AgentPersonality>,
}

/// In-memory data source for development and testing.
///
/// Counts every fetch so callers can assert on cache hits, and can be told
/// to fail fetches of a given type.
#[derive(Debug, Default)]
pub struct InMemoryProjectSource {
    records: RwLock<HashMap<String, ProjectRecord>>,
    failing: RwLock<HashSet<CacheType>>,
    fetches: AtomicUsize,
    fetches_by_type: DashMap<CacheType, usize>,
}

impl InMemoryProjectSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: HashMap<String, ProjectRecord>) -> Self {
        Self {
            records: RwLock::new(records),
            ..Default::default()
        }
    }

    pub async fn insert_record(&self, project_uuid: impl Into<String>, record: ProjectRecord) {
        let mut records = self.records.write().await;
        records.insert(project_uuid.into(), record);
    }

    /// Insert or replace the project projection, keeping everything else.
    pub async fn insert_project(&self, project: ProjectData) {
        let mut records = self.records.write().await;
        let uuid = project.uuid.clone();
        records.entry(uuid).or_default().project = Some(project);
    }

    /// Apply `update` to a project's record, creating an empty one if needed.
    pub async fn update<F>(&self, project_uuid: &str, update: F)
    where
        F: FnOnce(&mut ProjectRecord),
    {
        let mut records = self.records.write().await;
        update(records.entry(project_uuid.to_string()).or_default());
    }

    /// Make fetches of `cache_type` fail until cleared.
    pub async fn set_failing(&self, cache_type: CacheType, failing: bool) {
        let mut set = self.failing.write().await;
        if failing {
            set.insert(cache_type);
        } else {
            set.remove(&cache_type);
        }
    }

    /// Total number of fetches served.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn fetch_count_for(&self, cache_type: CacheType) -> usize {
        self.fetches_by_type
            .get(&cache_type)
            .map(|count| *count)
            .unwrap_or(0)
    }

    async fn begin_fetch(&self, cache_type: CacheType, project_uuid: &str) -> Result<()> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        *self.fetches_by_type.entry(cache_type).or_insert(0) += 1;

        if self.failing.read().await.contains(&cache_type) {
            return Err(RouterCacheError::Fetch {
                cache_type: cache_type.to_string(),
                message: format!("fetch failed for project {}", project_uuid),
            });
        }
        Ok(())
    }

    async fn with_record<T>(
        &self,
        project_uuid: &str,
        read: impl FnOnce(&ProjectRecord) -> T,
    ) -> Result<T> {
        let records = self.records.read().await;
        records
            .get(project_uuid)
            .map(read)
            .ok_or_else(|| RouterCacheError::NotFound(format!("Project {}", project_uuid)))
    }

    fn required<T>(value: Option<T>, what: &str, project_uuid: &str) -> Result<T> {
        value.ok_or_else(|| {
            RouterCacheError::NotFound(format!("{} for project {}", what, project_uuid))
        })
    }
}

#[async_trait::async_trait]
impl ProjectDataSource for InMemoryProjectSource {
    async fn project(&self, project_uuid: &str) -> Result<ProjectData> {
        self.begin_fetch(CacheType::Data, project_uuid).await?;
        let project = self
            .with_record(project_uuid, |record| record.project.clone())
            .await?;
        Self::required(project, "Project data", project_uuid)
    }

    async fn content_base(&self, project_uuid: &str) -> Result<ContentBaseData> {
        self.begin_fetch(CacheType::ContentBase, project_uuid).await?;
        let content_base = self
            .with_record(project_uuid, |record| record.content_base.clone())
            .await?;
        Self::required(content_base, "Content base", project_uuid)
    }

    async fn team(&self, project_uuid: &str, agents_backend: &str) -> Result<Vec<TeamMember>> {
        self.begin_fetch(CacheType::Team, project_uuid).await?;
        self.with_record(project_uuid, |record| {
            record.teams.get(agents_backend).cloned().unwrap_or_default()
        })
        .await
    }

    async fn guardrails(&self, project_uuid: &str) -> Result<GuardrailsData> {
        self.begin_fetch(CacheType::Guardrails, project_uuid).await?;
        let guardrails = self
            .with_record(project_uuid, |record| record.guardrails.clone())
            .await?;
        Self::required(guardrails, "Guardrails", project_uuid)
    }

    async fn inline_agent_config(&self, project_uuid: &str) -> Result<Option<InlineAgentConfig>> {
        self.begin_fetch(CacheType::InlineAgentConfig, project_uuid)
            .await?;
        self.with_record(project_uuid, |record| record.inline_agent_config.clone())
            .await
    }

    async fn instructions(&self, project_uuid: &str) -> Result<Vec<String>> {
        self.begin_fetch(CacheType::Instructions, project_uuid).await?;
        self.with_record(project_uuid, |record| record.instructions.clone())
            .await
    }

    async fn agent(&self, project_uuid: &str) -> Result<Option<AgentPersonality>> {
        self.begin_fetch(CacheType::Agent, project_uuid).await?;
        self.with_record(project_uuid, |record| record.agent.clone())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::sample_source;

    #[tokio::test]
    async fn test_resolve_loads_tied_projections() {
        let source = sample_source("proj-1", "BedrockBackend");

        let resolved = source.resolve("proj-1").await.unwrap();
        assert_eq!(resolved.project.uuid, "proj-1");
        assert_eq!(resolved.content_base.uuid, "cb-proj-1");
        assert!(resolved.inline_agent_config.is_none());
        assert_eq!(source.fetch_count(), 3);
    }

    #[tokio::test]
    async fn test_unknown_project_is_not_found() {
        let source = InMemoryProjectSource::new();
        let err = source.project("missing").await.unwrap_err();
        assert!(matches!(err, RouterCacheError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_team_is_per_backend() {
        let source = sample_source("proj-1", "BedrockBackend");

        assert_eq!(source.team("proj-1", "BedrockBackend").await.unwrap().len(), 2);
        assert!(source.team("proj-1", "OpenAIBackend").await.unwrap().is_empty());
        assert_eq!(source.fetch_count_for(CacheType::Team), 2);
    }

    #[tokio::test]
    async fn test_failing_fetch() {
        let source = sample_source("proj-1", "BedrockBackend");
        source.set_failing(CacheType::Guardrails, true).await;

        let err = source.guardrails("proj-1").await.unwrap_err();
        assert!(matches!(err, RouterCacheError::Fetch { .. }));

        source.set_failing(CacheType::Guardrails, false).await;
        assert!(source.guardrails("proj-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_insert_project_keeps_other_projections() {
        let source = sample_source("proj-1", "BedrockBackend");
        source
            .insert_project(ProjectData::new("proj-1", "Renamed"))
            .await;
        source.insert_project(ProjectData::new("proj-2", "Fresh")).await;

        assert_eq!(source.project("proj-1").await.unwrap().name, "Renamed");
        assert_eq!(source.instructions("proj-1").await.unwrap().len(), 2);
        assert_eq!(source.project("proj-2").await.unwrap().name, "Fresh");
    }
}
