// Shared fixtures for engine tests

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use super::source::{InMemoryProjectSource, ProjectRecord};
use super::store::{InMemoryStore, KeyValueStore};
use crate::models::{
    AgentPersonality, ContentBaseData, GuardrailsData, ProjectData, TeamMember,
};
use crate::Result;

/// In-memory store that records every `set` call.
#[derive(Default)]
pub struct RecordingStore {
    inner: InMemoryStore,
    sets: Mutex<Vec<(String, Duration)>>,
}

impl RecordingStore {
    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    pub fn sets(&self) -> Vec<(String, Duration)> {
        self.sets.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl KeyValueStore for RecordingStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        self.sets.lock().unwrap().push((key.to_string(), ttl));
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key).await
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        self.inner.delete_pattern(pattern).await
    }
}

pub fn sample_record(project_uuid: &str, agents_backend: &str) -> ProjectRecord {
    let mut teams = HashMap::new();
    teams.insert(
        agents_backend.to_string(),
        vec![TeamMember::new("manager"), TeamMember::new("sales")],
    );

    ProjectRecord {
        project: Some(
            ProjectData::new(project_uuid, "Support").with_agents_backend(agents_backend),
        ),
        content_base: Some(ContentBaseData::new(format!("cb-{}", project_uuid), "Docs")),
        teams,
        guardrails: Some(GuardrailsData::new("gr-1", "1")),
        inline_agent_config: None,
        instructions: vec!["Be polite".to_string(), "Answer in English".to_string()],
        agent: Some(AgentPersonality {
            name: "Ana".to_string(),
            role: "Support".to_string(),
            personality: "Friendly".to_string(),
            goal: "Help customers".to_string(),
        }),
    }
}

/// A source holding one fully populated project.
pub fn sample_source(project_uuid: &str, agents_backend: &str) -> InMemoryProjectSource {
    let mut records = HashMap::new();
    records.insert(
        project_uuid.to_string(),
        sample_record(project_uuid, agents_backend),
    );
    InMemoryProjectSource::from_records(records)
}
