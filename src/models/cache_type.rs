// Cache types and the composite bundle
// Defines which projections are cached, how long, and how they combine

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::projection::{
    AgentPersonality, ContentBaseData, GuardrailsData, InlineAgentConfig, ProjectData, TeamMember,
};
use crate::RouterCacheError;

/// TTL of the project settings projection and of the composite bundle.
pub const PROJECT_DATA_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const CONTENT_BASE_DATA_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const TEAM_DATA_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const GUARDRAILS_DATA_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const INLINE_AGENT_CONFIG_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const INSTRUCTIONS_DATA_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const AGENT_DATA_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Longest TTL accepted from configuration.
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// One of the seven cached projections of a project's configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheType {
    Data,
    ContentBase,
    Team,
    Guardrails,
    InlineAgentConfig,
    Instructions,
    Agent,
}

impl CacheType {
    /// Types that must all be present before a composite bundle can be built.
    pub const REQUIRED_FOR_COMPOSITE: [CacheType; 4] = [
        CacheType::Data,
        CacheType::ContentBase,
        CacheType::Team,
        CacheType::Guardrails,
    ];

    /// Types folded into the composite bundle only when present.
    pub const OPTIONAL_FOR_COMPOSITE: [CacheType; 1] = [CacheType::InlineAgentConfig];

    pub const ALL: [CacheType; 7] = [
        CacheType::Data,
        CacheType::ContentBase,
        CacheType::Team,
        CacheType::Guardrails,
        CacheType::InlineAgentConfig,
        CacheType::Instructions,
        CacheType::Agent,
    ];

    /// Key suffix, also used as the field name inside the composite bundle.
    pub fn suffix(&self) -> &'static str {
        match self {
            CacheType::Data => "data",
            CacheType::ContentBase => "content_base",
            CacheType::Team => "team",
            CacheType::Guardrails => "guardrails",
            CacheType::InlineAgentConfig => "inline_agent_config",
            CacheType::Instructions => "instructions",
            CacheType::Agent => "agent",
        }
    }

    /// Whether the key carries the agents backend as an extra segment.
    pub fn is_backend_parameterized(&self) -> bool {
        matches!(self, CacheType::Team)
    }

    /// Default TTL for entries of this type.
    pub fn default_ttl(&self) -> Duration {
        match self {
            CacheType::Data => PROJECT_DATA_TTL,
            CacheType::ContentBase => CONTENT_BASE_DATA_TTL,
            CacheType::Team => TEAM_DATA_TTL,
            CacheType::Guardrails => GUARDRAILS_DATA_TTL,
            CacheType::InlineAgentConfig => INLINE_AGENT_CONFIG_TTL,
            CacheType::Instructions => INSTRUCTIONS_DATA_TTL,
            CacheType::Agent => AGENT_DATA_TTL,
        }
    }
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

impl FromStr for CacheType {
    type Err = RouterCacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CacheType::ALL
            .iter()
            .copied()
            .find(|cache_type| cache_type.suffix() == s)
            .ok_or_else(|| RouterCacheError::Configuration(format!("Unknown cache type: {}", s)))
    }
}

/// An already-fetched projection, tagged with the cache type it belongs to.
///
/// Observers fetch fresh data once and hand it over as a `CachedValue`
/// instead of wrapping it in a fetch function.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Project(ProjectData),
    ContentBase(ContentBaseData),
    Team(Vec<TeamMember>),
    Guardrails(GuardrailsData),
    InlineAgentConfig(Option<InlineAgentConfig>),
    Instructions(Vec<String>),
    Agent(Option<AgentPersonality>),
}

impl CachedValue {
    pub fn cache_type(&self) -> CacheType {
        match self {
            CachedValue::Project(_) => CacheType::Data,
            CachedValue::ContentBase(_) => CacheType::ContentBase,
            CachedValue::Team(_) => CacheType::Team,
            CachedValue::Guardrails(_) => CacheType::Guardrails,
            CachedValue::InlineAgentConfig(_) => CacheType::InlineAgentConfig,
            CachedValue::Instructions(_) => CacheType::Instructions,
            CachedValue::Agent(_) => CacheType::Agent,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            CachedValue::Project(v) => serde_json::to_value(v),
            CachedValue::ContentBase(v) => serde_json::to_value(v),
            CachedValue::Team(v) => serde_json::to_value(v),
            CachedValue::Guardrails(v) => serde_json::to_value(v),
            CachedValue::InlineAgentConfig(v) => serde_json::to_value(v),
            CachedValue::Instructions(v) => serde_json::to_value(v),
            CachedValue::Agent(v) => serde_json::to_value(v),
        }
    }
}

/// Union of all cached projections for one project and agents backend.
///
/// Stored under `project:{uuid}:all`. `project` duplicates `data` for readers
/// that still look the project settings up under the older field name.
/// `agents_backend` records which backend `team` was loaded for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeBundle {
    pub data: ProjectData,
    pub project: ProjectData,
    pub content_base: ContentBaseData,
    pub team: Vec<TeamMember>,
    pub guardrails: GuardrailsData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_agent_config: Option<InlineAgentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agents_backend: Option<String>,
}

impl CompositeBundle {
    pub fn new(
        data: ProjectData,
        content_base: ContentBaseData,
        team: Vec<TeamMember>,
        guardrails: GuardrailsData,
        inline_agent_config: Option<InlineAgentConfig>,
    ) -> Self {
        Self {
            project: data.clone(),
            data,
            content_base,
            team,
            guardrails,
            inline_agent_config,
            agents_backend: None,
        }
    }

    pub fn with_agents_backend(mut self, agents_backend: impl Into<String>) -> Self {
        self.agents_backend = Some(agents_backend.into());
        self
    }

    /// Whether this bundle can answer a request for `agents_backend`.
    /// Any bundle serves a caller that leaves the backend open.
    pub fn serves_backend(&self, agents_backend: Option<&str>) -> bool {
        match agents_backend {
            Some(requested) => self.agents_backend.as_deref() == Some(requested),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_team_is_backend_parameterized() {
        let parameterized: Vec<CacheType> = CacheType::ALL
            .iter()
            .copied()
            .filter(CacheType::is_backend_parameterized)
            .collect();
        assert_eq!(parameterized, vec![CacheType::Team]);
    }

    #[test]
    fn test_cache_type_parses_from_suffix() {
        for cache_type in CacheType::ALL {
            assert_eq!(cache_type.suffix().parse::<CacheType>().unwrap(), cache_type);
        }
        assert!("all".parse::<CacheType>().is_err());
    }

    #[test]
    fn test_composite_aliases_project() {
        let bundle = CompositeBundle::new(
            ProjectData::new("proj-1", "Support"),
            ContentBaseData::new("cb-1", "Docs"),
            vec![TeamMember::new("a")],
            GuardrailsData::new("gr-1", "3"),
            None,
        );

        let value = serde_json::to_value(&bundle).unwrap();
        assert_eq!(value["project"], value["data"]);
        assert!(value.get("inline_agent_config").is_none());
    }

    #[test]
    fn test_bundle_serves_only_its_backend() {
        let bundle = CompositeBundle::new(
            ProjectData::new("proj-1", "Support"),
            ContentBaseData::new("cb-1", "Docs"),
            vec![TeamMember::new("a")],
            GuardrailsData::new("gr-1", "3"),
            None,
        );
        // Bundles written before the backend was recorded serve open requests only
        assert!(bundle.serves_backend(None));
        assert!(!bundle.serves_backend(Some("BedrockBackend")));

        let bundle = bundle.with_agents_backend("BedrockBackend");
        assert!(bundle.serves_backend(Some("BedrockBackend")));
        assert!(!bundle.serves_backend(Some("OpenAIBackend")));
    }
}
