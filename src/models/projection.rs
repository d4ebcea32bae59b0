// Projections of project configuration
// These are the plain-data views the data layer builds from its rows

//! # Projections
//!
//! Each struct here mirrors one cached document. Unknown fields are kept in a
//! flattened `extra` map so that a projection written by a newer data layer
//! survives a round trip through an older reader unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Project settings needed before generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectData {
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    /// Identifier of the agent runtime this project uses, e.g. `BedrockBackend`
    #[serde(default)]
    pub agents_backend: Option<String>,
    #[serde(default)]
    pub human_support: bool,
    #[serde(default)]
    pub human_support_prompt: Option<String>,
    #[serde(default)]
    pub rationale_switch: bool,
    #[serde(default)]
    pub use_components: bool,
    #[serde(default)]
    pub default_supervisor_foundation_model: Option<String>,
    #[serde(default)]
    pub conversation_turns_to_include: Option<u32>,
    #[serde(default)]
    pub exclude_previous_thinking_steps: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProjectData {
    pub fn new(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            agents_backend: None,
            human_support: false,
            human_support_prompt: None,
            rationale_switch: false,
            use_components: false,
            default_supervisor_foundation_model: None,
            conversation_turns_to_include: None,
            exclude_previous_thinking_steps: false,
            extra: Map::new(),
        }
    }

    pub fn with_agents_backend(mut self, backend: impl Into<String>) -> Self {
        self.agents_backend = Some(backend.into());
        self
    }
}

/// Identity of the content base attached to a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBaseData {
    pub uuid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub intelligence_uuid: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContentBaseData {
    pub fn new(uuid: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            title: title.into(),
            intelligence_uuid: None,
            extra: Map::new(),
        }
    }
}

/// Personality of the content base agent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentPersonality {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub personality: String,
    #[serde(default)]
    pub goal: String,
}

/// One collaborator in a project's team roster.
///
/// Wire keys are camelCase because the roster is handed to the agent runtime
/// as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    pub agent_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foundation_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collaboration_instructions: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TeamMember {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            agent_display_name: None,
            instruction: None,
            description: None,
            foundation_model: None,
            collaboration_instructions: None,
            extra: Map::new(),
        }
    }
}

/// Guardrail identifier and version applied to generation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GuardrailsData {
    #[serde(default)]
    pub guardrail_identifier: Option<String>,
    #[serde(default)]
    pub guardrail_version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GuardrailsData {
    pub fn new(identifier: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            guardrail_identifier: Some(identifier.into()),
            guardrail_version: Some(version.into()),
            extra: Map::new(),
        }
    }
}

/// Backend-specific inline agent configuration. Absent for most projects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineAgentConfig {
    #[serde(default)]
    pub agents_backend: Option<String>,
    #[serde(default)]
    pub default_instructions_for_collaborators: Option<String>,
    #[serde(default)]
    pub default_supervisor_instruction: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of the single combined lookup done before reading the cache.
///
/// Project, content base and inline agent configuration are relationally
/// tied, so the data layer loads them together.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProject {
    pub project: ProjectData,
    pub content_base: ContentBaseData,
    pub inline_agent_config: Option<InlineAgentConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_team_member_uses_camel_case_keys() {
        let mut member = TeamMember::new("a");
        member.foundation_model = Some("nova-pro".to_string());

        let value = serde_json::to_value(&member).unwrap();
        assert_eq!(value, json!({"agentName": "a", "foundationModel": "nova-pro"}));
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let raw = json!({
            "uuid": "proj-1",
            "name": "Support",
            "agents_backend": "BedrockBackend",
            "brain_on": true
        });

        let project: ProjectData = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(project.agents_backend.as_deref(), Some("BedrockBackend"));
        assert_eq!(project.extra.get("brain_on"), Some(&json!(true)));

        let back = serde_json::to_value(&project).unwrap();
        assert_eq!(back["brain_on"], json!(true));
        assert_eq!(back["uuid"], json!("proj-1"));
    }
}
