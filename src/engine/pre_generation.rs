// Pre-generation read path
// Gathers every projection an agent turn needs, through the cache

//! # Pre-Generation Service
//!
//! Invoked once per conversational turn, before generation starts. It never
//! touches the key-value store directly: every projection goes through the
//! [`CacheService`] get-or-create accessors, with fetch closures that fall
//! back to the [`ProjectDataSource`] on a miss.
//!
//! ## Steps
//!
//! 1. Resolve project, content base and inline configuration together. This
//!    lookup is not cached; its projections are, individually.
//! 2. Project projection, then `agents_backend` from it (falling back to the
//!    freshly resolved project).
//! 3. Content base, instructions and agent personality.
//! 4. Team roster for the backend.
//! 5. Guardrails.
//! 6. Inline agent configuration, only when step 1 found one.
//!
//! Errors are logged and returned unchanged; there is no retry here.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use super::cache::CacheService;
use super::source::ProjectDataSource;
use crate::models::{
    AgentPersonality, ContentBaseData, GuardrailsData, InlineAgentConfig, ProjectData,
    ResolvedProject, TeamMember,
};
use crate::{Result, RouterCacheError};

/// Calls slower than this get an extra warning.
pub const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_secs(5);

/// Everything needed before invoking the agent runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct PreGenerationData {
    pub project: ProjectData,
    pub content_base: ContentBaseData,
    pub team: Vec<TeamMember>,
    pub guardrails: GuardrailsData,
    pub inline_agent_config: Option<InlineAgentConfig>,
    pub agents_backend: String,
    pub instructions: Vec<String>,
    pub agent: Option<AgentPersonality>,
}

pub struct PreGenerationService {
    cache: Arc<CacheService>,
    source: Arc<dyn ProjectDataSource>,
    slow_threshold: Duration,
}

impl PreGenerationService {
    pub fn new(cache: Arc<CacheService>, source: Arc<dyn ProjectDataSource>) -> Self {
        Self {
            cache,
            source,
            slow_threshold: DEFAULT_SLOW_THRESHOLD,
        }
    }

    pub fn with_slow_threshold(mut self, slow_threshold: Duration) -> Self {
        self.slow_threshold = slow_threshold;
        self
    }

    /// Gather the pre-generation data for one project.
    pub async fn fetch_pre_generation_data(&self, project_uuid: &str) -> Result<PreGenerationData> {
        let started = Instant::now();
        let result = self.load(project_uuid).await;
        self.log_outcome(project_uuid, &result, started.elapsed());
        result
    }

    async fn load(&self, project_uuid: &str) -> Result<PreGenerationData> {
        let ResolvedProject {
            project: loaded_project,
            content_base: loaded_content_base,
            inline_agent_config: loaded_inline,
        } = self.source.resolve(project_uuid).await?;
        let loaded_backend = loaded_project.agents_backend.clone();

        let project = self
            .cache
            .get_project_data(project_uuid, |_| async move { Ok(loaded_project) })
            .await?;

        let agents_backend = project
            .agents_backend
            .clone()
            .or(loaded_backend)
            .ok_or_else(|| {
                RouterCacheError::Configuration(format!(
                    "Project {} has no agents backend",
                    project_uuid
                ))
            })?;

        let content_base = self
            .cache
            .get_content_base_data(project_uuid, |_| async move { Ok(loaded_content_base) })
            .await?;

        let source = &self.source;
        let instructions = self
            .cache
            .get_instructions_data(project_uuid, move |uuid| async move {
                source.instructions(&uuid).await
            })
            .await?;

        let agent = self
            .cache
            .get_agent_data(project_uuid, move |uuid| async move { source.agent(&uuid).await })
            .await?;

        let team = self
            .cache
            .get_team_data(project_uuid, &agents_backend, move |uuid, backend| async move {
                source.team(&uuid, &backend).await
            })
            .await?;

        let guardrails = self
            .cache
            .get_guardrails_data(project_uuid, move |uuid| async move {
                source.guardrails(&uuid).await
            })
            .await?;

        let inline_agent_config = match loaded_inline {
            Some(inline) => {
                self.cache
                    .get_inline_agent_config(project_uuid, |_| async move { Ok(Some(inline)) })
                    .await?
            }
            None => None,
        };

        Ok(PreGenerationData {
            project,
            content_base,
            team,
            guardrails,
            inline_agent_config,
            agents_backend,
            instructions,
            agent,
        })
    }

    fn log_outcome(&self, project_uuid: &str, result: &Result<PreGenerationData>, elapsed: Duration) {
        // A broken subscriber must not turn the outcome into a panic
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let duration_ms = elapsed.as_millis() as u64;

            match result {
                Ok(data) => info!(
                    project_uuid,
                    duration_ms,
                    agents_backend = %data.agents_backend,
                    has_team = !data.team.is_empty(),
                    has_guardrails = data.guardrails.guardrail_identifier.is_some(),
                    has_inline_config = data.inline_agent_config.is_some(),
                    has_agent = data.agent.is_some(),
                    instructions = data.instructions.len(),
                    "Pre-generation data ready"
                ),
                Err(e) => error!(
                    project_uuid,
                    duration_ms,
                    error = %e,
                    "Pre-generation data failed"
                ),
            }

            if elapsed > self.slow_threshold {
                warn!(
                    project_uuid,
                    duration_ms,
                    threshold_ms = self.slow_threshold.as_millis() as u64,
                    "Slow pre-generation call"
                );
            }
        }));
    }
}
