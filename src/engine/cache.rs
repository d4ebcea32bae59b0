// Project configuration cache service
// Key naming, per-type TTLs, composite bundle and the refresh protocol

//! # Cache Service
//!
//! [`CacheService`] hides key construction, TTL selection and the
//! invalidate/refresh protocol behind one method family per [`CacheType`].
//!
//! ## Key Space
//!
//! ```text
//! project:{uuid}:{suffix}              data, content_base, guardrails, ...
//! project:{uuid}:team:{agents_backend} team roster, one per backend
//! project:{uuid}:all                   composite bundle
//! ```
//!
//! ## Reads: get-or-create
//!
//! Every `get_*` accessor looks the key up and returns the cached value on a
//! hit. On a miss it calls the supplied fetch function, stores the result with
//! the type's TTL and returns it. An empty cache behaves like a cold start,
//! never like an error.
//!
//! ## Writes: invalidate and refresh
//!
//! - `invalidate_*_cache` deletes the individual key.
//! - `refresh_*_cache` deletes the individual key and repopulates it through
//!   the fetch function, so a still-valid entry can never mask the write.
//! - [`CacheService::refresh`] stores an already-fetched [`CachedValue`].
//!
//! All three then repair the composite bundle: when every required entry is
//! present for the project and backend, the bundle is rebuilt from them and
//! stored with a fresh TTL; otherwise the composite key is deleted.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::source::ProjectDataSource;
use super::store::KeyValueStore;
use crate::models::cache_type::PROJECT_DATA_TTL;
use crate::models::{
    AgentPersonality, CacheType, CachedValue, CompositeBundle, ContentBaseData, GuardrailsData,
    InlineAgentConfig, ProjectData, TeamMember,
};
use crate::{Result, RouterCacheError};

/// Suffix of the composite bundle key.
pub const COMPOSITE_SUFFIX: &str = "all";

/// TTL per cache type, plus the composite bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheTtls {
    pub data: Duration,
    pub content_base: Duration,
    pub team: Duration,
    pub guardrails: Duration,
    pub inline_agent_config: Duration,
    pub instructions: Duration,
    pub agent: Duration,
    pub composite: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            data: CacheType::Data.default_ttl(),
            content_base: CacheType::ContentBase.default_ttl(),
            team: CacheType::Team.default_ttl(),
            guardrails: CacheType::Guardrails.default_ttl(),
            inline_agent_config: CacheType::InlineAgentConfig.default_ttl(),
            instructions: CacheType::Instructions.default_ttl(),
            agent: CacheType::Agent.default_ttl(),
            composite: PROJECT_DATA_TTL,
        }
    }
}

impl CacheTtls {
    pub fn for_type(&self, cache_type: CacheType) -> Duration {
        match cache_type {
            CacheType::Data => self.data,
            CacheType::ContentBase => self.content_base,
            CacheType::Team => self.team,
            CacheType::Guardrails => self.guardrails,
            CacheType::InlineAgentConfig => self.inline_agent_config,
            CacheType::Instructions => self.instructions,
            CacheType::Agent => self.agent,
        }
    }

    /// Longest TTL in use; sizes the NATS bucket `max_age`.
    pub fn longest(&self) -> Duration {
        CacheType::ALL
            .iter()
            .map(|cache_type| self.for_type(*cache_type))
            .chain(std::iter::once(self.composite))
            .max()
            .unwrap_or(PROJECT_DATA_TTL)
    }
}

/// Snapshot of cache usage counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub refreshes: u64,
    pub invalidations: u64,
    pub composite_rebuilds: u64,
    pub composite_drops: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    refreshes: AtomicU64,
    invalidations: AtomicU64,
    composite_rebuilds: AtomicU64,
    composite_drops: AtomicU64,
}

impl CacheCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            composite_rebuilds: self.composite_rebuilds.load(Ordering::Relaxed),
            composite_drops: self.composite_drops.load(Ordering::Relaxed),
        }
    }
}

/// Project configuration cache over a [`KeyValueStore`].
pub struct CacheService {
    store: Arc<dyn KeyValueStore>,
    ttls: CacheTtls,
    counters: CacheCounters,
}

impl CacheService {
    /// Create a cache service with the default TTLs.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_ttls(store, CacheTtls::default())
    }

    pub fn with_ttls(store: Arc<dyn KeyValueStore>, ttls: CacheTtls) -> Self {
        Self {
            store,
            ttls,
            counters: CacheCounters::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn ttls(&self) -> &CacheTtls {
        &self.ttls
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    // ------------------------------------------------------------------
    // Key naming
    // ------------------------------------------------------------------

    /// Build the key for one cache type.
    ///
    /// Backend-parameterized types require `agents_backend`; other types
    /// ignore it.
    pub fn cache_key(
        project_uuid: &str,
        cache_type: CacheType,
        agents_backend: Option<&str>,
    ) -> Result<String> {
        if cache_type.is_backend_parameterized() {
            let backend = agents_backend.ok_or_else(|| {
                RouterCacheError::Configuration(format!(
                    "Cache type '{}' requires an agents backend",
                    cache_type
                ))
            })?;
            Ok(format!(
                "project:{}:{}:{}",
                project_uuid,
                cache_type.suffix(),
                backend
            ))
        } else {
            Ok(format!("project:{}:{}", project_uuid, cache_type.suffix()))
        }
    }

    pub fn composite_key(project_uuid: &str) -> String {
        format!("project:{}:{}", project_uuid, COMPOSITE_SUFFIX)
    }

    fn team_pattern(project_uuid: &str) -> String {
        format!("project:{}:{}:*", project_uuid, CacheType::Team.suffix())
    }

    fn project_pattern(project_uuid: &str) -> String {
        format!("project:{}:*", project_uuid)
    }

    // ------------------------------------------------------------------
    // Core algorithms
    // ------------------------------------------------------------------

    /// Read and decode a cached value.
    ///
    /// A value that no longer decodes into `T` is deleted and reported as a
    /// miss, so a projection schema change heals itself on the next read.
    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };

        match serde_json::from_value::<T>(raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "Dropping cache entry that no longer decodes");
                self.store.delete(key).await?;
                Ok(None)
            }
        }
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let raw: Value = serde_json::to_value(value)?;
        self.store.set(key, raw, ttl).await
    }

    /// Return the cached value for `key`, or fetch, store and return it.
    async fn get_or_create<T, F, Fut>(
        &self,
        cache_type: CacheType,
        key: String,
        fetch: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.read::<T>(&key).await? {
            CacheCounters::bump(&self.counters.hits);
            debug!(key = %key, cache_type = %cache_type, "Cache hit");
            return Ok(value);
        }

        CacheCounters::bump(&self.counters.misses);
        debug!(key = %key, cache_type = %cache_type, "Cache miss, fetching");

        let value = fetch().await?;
        self.write(&key, &value, self.ttls.for_type(cache_type)).await?;
        Ok(value)
    }

    /// Delete `key`, then repopulate it through `fetch`.
    async fn delete_then_create<T, F, Fut>(
        &self,
        cache_type: CacheType,
        key: String,
        fetch: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.store.delete(&key).await?;
        CacheCounters::bump(&self.counters.refreshes);
        self.get_or_create(cache_type, key, fetch).await
    }

    /// Rebuild the composite bundle from individual entries.
    ///
    /// Returns `false` without touching the store when any required entry is
    /// missing for this project and backend.
    pub async fn rebuild_composite(&self, project_uuid: &str, agents_backend: &str) -> Result<bool> {
        let backend = Some(agents_backend);

        let Some(data) = self
            .read::<ProjectData>(&Self::cache_key(project_uuid, CacheType::Data, backend)?)
            .await?
        else {
            return Ok(false);
        };
        let Some(content_base) = self
            .read::<ContentBaseData>(&Self::cache_key(
                project_uuid,
                CacheType::ContentBase,
                backend,
            )?)
            .await?
        else {
            return Ok(false);
        };
        let Some(team) = self
            .read::<Vec<TeamMember>>(&Self::cache_key(project_uuid, CacheType::Team, backend)?)
            .await?
        else {
            return Ok(false);
        };
        let Some(guardrails) = self
            .read::<GuardrailsData>(&Self::cache_key(
                project_uuid,
                CacheType::Guardrails,
                backend,
            )?)
            .await?
        else {
            return Ok(false);
        };

        let inline_agent_config = self
            .read::<Option<InlineAgentConfig>>(&Self::cache_key(
                project_uuid,
                CacheType::InlineAgentConfig,
                backend,
            )?)
            .await?
            .flatten();

        let bundle = CompositeBundle::new(data, content_base, team, guardrails, inline_agent_config)
            .with_agents_backend(agents_backend);
        self.write(&Self::composite_key(project_uuid), &bundle, self.ttls.composite)
            .await?;

        CacheCounters::bump(&self.counters.composite_rebuilds);
        debug!(project_uuid, agents_backend, "Composite bundle rebuilt");
        Ok(true)
    }

    /// Rebuild the composite bundle, or delete it when it cannot be rebuilt.
    ///
    /// An unknown backend is looked up in the cached project projection.
    async fn repair_composite(&self, project_uuid: &str, agents_backend: Option<&str>) -> Result<bool> {
        let backend = match agents_backend {
            Some(backend) => Some(backend.to_string()),
            None => self
                .read::<ProjectData>(&Self::cache_key(project_uuid, CacheType::Data, None)?)
                .await?
                .and_then(|project| project.agents_backend),
        };

        if let Some(backend) = backend {
            if self.rebuild_composite(project_uuid, &backend).await? {
                return Ok(true);
            }
        }

        self.store.delete(&Self::composite_key(project_uuid)).await?;
        CacheCounters::bump(&self.counters.composite_drops);
        debug!(project_uuid, "Composite bundle dropped");
        Ok(false)
    }

    // ------------------------------------------------------------------
    // Get-or-create accessors
    // ------------------------------------------------------------------

    pub async fn get_project_data<F, Fut>(&self, project_uuid: &str, fetch: F) -> Result<ProjectData>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<ProjectData>>,
    {
        let key = Self::cache_key(project_uuid, CacheType::Data, None)?;
        self.get_or_create(CacheType::Data, key, || fetch(project_uuid.to_string()))
            .await
    }

    pub async fn get_content_base_data<F, Fut>(
        &self,
        project_uuid: &str,
        fetch: F,
    ) -> Result<ContentBaseData>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<ContentBaseData>>,
    {
        let key = Self::cache_key(project_uuid, CacheType::ContentBase, None)?;
        self.get_or_create(CacheType::ContentBase, key, || fetch(project_uuid.to_string()))
            .await
    }

    pub async fn get_team_data<F, Fut>(
        &self,
        project_uuid: &str,
        agents_backend: &str,
        fetch: F,
    ) -> Result<Vec<TeamMember>>
    where
        F: FnOnce(String, String) -> Fut,
        Fut: Future<Output = Result<Vec<TeamMember>>>,
    {
        let key = Self::cache_key(project_uuid, CacheType::Team, Some(agents_backend))?;
        self.get_or_create(CacheType::Team, key, || {
            fetch(project_uuid.to_string(), agents_backend.to_string())
        })
        .await
    }

    pub async fn get_guardrails_data<F, Fut>(
        &self,
        project_uuid: &str,
        fetch: F,
    ) -> Result<GuardrailsData>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<GuardrailsData>>,
    {
        let key = Self::cache_key(project_uuid, CacheType::Guardrails, None)?;
        self.get_or_create(CacheType::Guardrails, key, || fetch(project_uuid.to_string()))
            .await
    }

    pub async fn get_inline_agent_config<F, Fut>(
        &self,
        project_uuid: &str,
        fetch: F,
    ) -> Result<Option<InlineAgentConfig>>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<Option<InlineAgentConfig>>>,
    {
        let key = Self::cache_key(project_uuid, CacheType::InlineAgentConfig, None)?;
        self.get_or_create(CacheType::InlineAgentConfig, key, || {
            fetch(project_uuid.to_string())
        })
        .await
    }

    pub async fn get_instructions_data<F, Fut>(
        &self,
        project_uuid: &str,
        fetch: F,
    ) -> Result<Vec<String>>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<Vec<String>>>,
    {
        let key = Self::cache_key(project_uuid, CacheType::Instructions, None)?;
        self.get_or_create(CacheType::Instructions, key, || fetch(project_uuid.to_string()))
            .await
    }

    pub async fn get_agent_data<F, Fut>(
        &self,
        project_uuid: &str,
        fetch: F,
    ) -> Result<Option<AgentPersonality>>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<Option<AgentPersonality>>>,
    {
        let key = Self::cache_key(project_uuid, CacheType::Agent, None)?;
        self.get_or_create(CacheType::Agent, key, || fetch(project_uuid.to_string()))
            .await
    }

    /// Get the composite bundle, building it from the data source on a miss.
    ///
    /// On a miss the project projection is fetched first to discover the
    /// agents backend when the caller does not supply one. Nothing is stored
    /// unless every required fetch succeeds; on success the bundle and each
    /// projection are stored, the latter under their own keys and TTLs.
    pub async fn get_all_project_data(
        &self,
        project_uuid: &str,
        agents_backend: Option<&str>,
        source: &dyn ProjectDataSource,
    ) -> Result<CompositeBundle> {
        let composite_key = Self::composite_key(project_uuid);
        match self.read::<CompositeBundle>(&composite_key).await? {
            Some(bundle) if bundle.serves_backend(agents_backend) => {
                CacheCounters::bump(&self.counters.hits);
                debug!(project_uuid, "Composite cache hit");
                return Ok(bundle);
            }
            Some(bundle) => {
                debug!(
                    project_uuid,
                    cached_backend = ?bundle.agents_backend,
                    requested_backend = ?agents_backend,
                    "Composite bundle built for another backend"
                );
            }
            None => {}
        }
        CacheCounters::bump(&self.counters.misses);

        let project = source.project(project_uuid).await?;
        let backend = agents_backend
            .map(str::to_string)
            .or_else(|| project.agents_backend.clone())
            .ok_or_else(|| {
                RouterCacheError::Configuration(format!(
                    "Project {} has no agents backend and none was supplied",
                    project_uuid
                ))
            })?;

        let (content_base, team, guardrails, inline_agent_config) = tokio::try_join!(
            source.content_base(project_uuid),
            source.team(project_uuid, &backend),
            source.guardrails(project_uuid),
            source.inline_agent_config(project_uuid),
        )?;

        let bundle = CompositeBundle::new(
            project,
            content_base,
            team,
            guardrails,
            inline_agent_config,
        )
        .with_agents_backend(backend.clone());

        self.write(&composite_key, &bundle, self.ttls.composite).await?;

        let backend = Some(backend.as_str());
        self.write(
            &Self::cache_key(project_uuid, CacheType::Data, backend)?,
            &bundle.data,
            self.ttls.data,
        )
        .await?;
        self.write(
            &Self::cache_key(project_uuid, CacheType::ContentBase, backend)?,
            &bundle.content_base,
            self.ttls.content_base,
        )
        .await?;
        self.write(
            &Self::cache_key(project_uuid, CacheType::Team, backend)?,
            &bundle.team,
            self.ttls.team,
        )
        .await?;
        self.write(
            &Self::cache_key(project_uuid, CacheType::Guardrails, backend)?,
            &bundle.guardrails,
            self.ttls.guardrails,
        )
        .await?;
        if let Some(inline) = &bundle.inline_agent_config {
            self.write(
                &Self::cache_key(project_uuid, CacheType::InlineAgentConfig, backend)?,
                inline,
                self.ttls.inline_agent_config,
            )
            .await?;
        }

        info!(project_uuid, "Composite bundle populated from data source");
        Ok(bundle)
    }

    // ------------------------------------------------------------------
    // Invalidation (no fetch function)
    // ------------------------------------------------------------------

    /// Delete one cache type for a project, then repair the composite.
    ///
    /// `Team` without a backend deletes every team key of the project and
    /// drops the composite unconditionally, since the cached backends are
    /// unknown.
    pub async fn invalidate(
        &self,
        cache_type: CacheType,
        project_uuid: &str,
        agents_backend: Option<&str>,
    ) -> Result<()> {
        CacheCounters::bump(&self.counters.invalidations);

        if cache_type.is_backend_parameterized() && agents_backend.is_none() {
            let removed = self
                .store
                .delete_pattern(&Self::team_pattern(project_uuid))
                .await?;
            self.store.delete(&Self::composite_key(project_uuid)).await?;
            CacheCounters::bump(&self.counters.composite_drops);
            info!(project_uuid, removed, "Invalidated all team caches");
            return Ok(());
        }

        let key = Self::cache_key(project_uuid, cache_type, agents_backend)?;
        self.store.delete(&key).await?;
        info!(project_uuid, cache_type = %cache_type, "Invalidated cache");

        self.repair_composite(project_uuid, agents_backend).await?;
        Ok(())
    }

    pub async fn invalidate_project_cache(
        &self,
        project_uuid: &str,
        agents_backend: Option<&str>,
    ) -> Result<()> {
        self.invalidate(CacheType::Data, project_uuid, agents_backend)
            .await
    }

    pub async fn invalidate_content_base_cache(
        &self,
        project_uuid: &str,
        agents_backend: Option<&str>,
    ) -> Result<()> {
        self.invalidate(CacheType::ContentBase, project_uuid, agents_backend)
            .await
    }

    pub async fn invalidate_team_cache(
        &self,
        project_uuid: &str,
        agents_backend: Option<&str>,
    ) -> Result<()> {
        self.invalidate(CacheType::Team, project_uuid, agents_backend)
            .await
    }

    pub async fn invalidate_guardrails_cache(
        &self,
        project_uuid: &str,
        agents_backend: Option<&str>,
    ) -> Result<()> {
        self.invalidate(CacheType::Guardrails, project_uuid, agents_backend)
            .await
    }

    pub async fn invalidate_inline_agent_config_cache(
        &self,
        project_uuid: &str,
        agents_backend: Option<&str>,
    ) -> Result<()> {
        self.invalidate(CacheType::InlineAgentConfig, project_uuid, agents_backend)
            .await
    }

    pub async fn invalidate_instructions_cache(
        &self,
        project_uuid: &str,
        agents_backend: Option<&str>,
    ) -> Result<()> {
        self.invalidate(CacheType::Instructions, project_uuid, agents_backend)
            .await
    }

    pub async fn invalidate_agent_cache(
        &self,
        project_uuid: &str,
        agents_backend: Option<&str>,
    ) -> Result<()> {
        self.invalidate(CacheType::Agent, project_uuid, agents_backend)
            .await
    }

    /// Delete every key of a project, composite included.
    pub async fn invalidate_all_project_cache(&self, project_uuid: &str) -> Result<u64> {
        CacheCounters::bump(&self.counters.invalidations);
        let removed = self
            .store
            .delete_pattern(&Self::project_pattern(project_uuid))
            .await?;
        info!(project_uuid, removed, "Invalidated all project caches");
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Refresh (delete, repopulate, repair composite)
    // ------------------------------------------------------------------

    /// Store an already-fetched projection and repair the composite.
    ///
    /// A team roster needs the backend it was fetched for.
    pub async fn refresh(
        &self,
        project_uuid: &str,
        value: CachedValue,
        agents_backend: Option<&str>,
    ) -> Result<()> {
        let cache_type = value.cache_type();
        let key = Self::cache_key(project_uuid, cache_type, agents_backend)?;

        self.store
            .set(&key, value.to_json()?, self.ttls.for_type(cache_type))
            .await?;
        CacheCounters::bump(&self.counters.refreshes);
        info!(project_uuid, cache_type = %cache_type, "Refreshed cache");

        self.repair_composite(project_uuid, agents_backend).await?;
        Ok(())
    }

    pub async fn refresh_project_cache<F, Fut>(
        &self,
        project_uuid: &str,
        fetch: F,
        agents_backend: Option<&str>,
    ) -> Result<ProjectData>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<ProjectData>>,
    {
        let key = Self::cache_key(project_uuid, CacheType::Data, None)?;
        let project = self
            .delete_then_create(CacheType::Data, key, || fetch(project_uuid.to_string()))
            .await?;

        // The refreshed projection itself may name the backend
        let backend = agents_backend
            .map(str::to_string)
            .or_else(|| project.agents_backend.clone());
        self.repair_composite(project_uuid, backend.as_deref()).await?;
        Ok(project)
    }

    pub async fn refresh_content_base_cache<F, Fut>(
        &self,
        project_uuid: &str,
        fetch: F,
        agents_backend: Option<&str>,
    ) -> Result<ContentBaseData>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<ContentBaseData>>,
    {
        let key = Self::cache_key(project_uuid, CacheType::ContentBase, None)?;
        let value = self
            .delete_then_create(CacheType::ContentBase, key, || {
                fetch(project_uuid.to_string())
            })
            .await?;
        self.repair_composite(project_uuid, agents_backend).await?;
        Ok(value)
    }

    pub async fn refresh_team_cache<F, Fut>(
        &self,
        project_uuid: &str,
        agents_backend: &str,
        fetch: F,
    ) -> Result<Vec<TeamMember>>
    where
        F: FnOnce(String, String) -> Fut,
        Fut: Future<Output = Result<Vec<TeamMember>>>,
    {
        let key = Self::cache_key(project_uuid, CacheType::Team, Some(agents_backend))?;
        let value = self
            .delete_then_create(CacheType::Team, key, || {
                fetch(project_uuid.to_string(), agents_backend.to_string())
            })
            .await?;
        self.repair_composite(project_uuid, Some(agents_backend))
            .await?;
        Ok(value)
    }

    pub async fn refresh_guardrails_cache<F, Fut>(
        &self,
        project_uuid: &str,
        fetch: F,
        agents_backend: Option<&str>,
    ) -> Result<GuardrailsData>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<GuardrailsData>>,
    {
        let key = Self::cache_key(project_uuid, CacheType::Guardrails, None)?;
        let value = self
            .delete_then_create(CacheType::Guardrails, key, || {
                fetch(project_uuid.to_string())
            })
            .await?;
        self.repair_composite(project_uuid, agents_backend).await?;
        Ok(value)
    }

    pub async fn refresh_inline_agent_config_cache<F, Fut>(
        &self,
        project_uuid: &str,
        fetch: F,
        agents_backend: Option<&str>,
    ) -> Result<Option<InlineAgentConfig>>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<Option<InlineAgentConfig>>>,
    {
        let key = Self::cache_key(project_uuid, CacheType::InlineAgentConfig, None)?;
        let value = self
            .delete_then_create(CacheType::InlineAgentConfig, key, || {
                fetch(project_uuid.to_string())
            })
            .await?;
        self.repair_composite(project_uuid, agents_backend).await?;
        Ok(value)
    }

    pub async fn refresh_instructions_cache<F, Fut>(
        &self,
        project_uuid: &str,
        fetch: F,
        agents_backend: Option<&str>,
    ) -> Result<Vec<String>>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<Vec<String>>>,
    {
        let key = Self::cache_key(project_uuid, CacheType::Instructions, None)?;
        let value = self
            .delete_then_create(CacheType::Instructions, key, || {
                fetch(project_uuid.to_string())
            })
            .await?;
        self.repair_composite(project_uuid, agents_backend).await?;
        Ok(value)
    }

    pub async fn refresh_agent_cache<F, Fut>(
        &self,
        project_uuid: &str,
        fetch: F,
        agents_backend: Option<&str>,
    ) -> Result<Option<AgentPersonality>>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<Option<AgentPersonality>>>,
    {
        let key = Self::cache_key(project_uuid, CacheType::Agent, None)?;
        let value = self
            .delete_then_create(CacheType::Agent, key, || fetch(project_uuid.to_string()))
            .await?;
        self.repair_composite(project_uuid, agents_backend).await?;
        Ok(value)
    }
}
