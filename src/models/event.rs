// Events published by writers and consumed by observers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Event name published when a project row changes.
pub const PROJECT_ACTIVITY: &str = "project_activity";
/// Event name published when a content base row changes.
pub const CONTENTBASE_ACTIVITY: &str = "contentbase_activity";
/// Event name published when a content base agent (personality) changes.
pub const CONTENTBASE_AGENT_ACTIVITY: &str = "contentbase_agent_activity";
/// Event name published when a content base instruction changes.
pub const CONTENTBASE_INSTRUCTION_ACTIVITY: &str = "contentbase_instruction_activity";

/// Single-character action code carried by activity events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    #[serde(rename = "C")]
    Create,
    #[serde(rename = "U")]
    Update,
    #[serde(rename = "D")]
    Delete,
}

impl ActionType {
    pub fn code(&self) -> &'static str {
        match self {
            ActionType::Create => "C",
            ActionType::Update => "U",
            ActionType::Delete => "D",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "C" => Some(ActionType::Create),
            "U" => Some(ActionType::Update),
            "D" => Some(ActionType::Delete),
            _ => None,
        }
    }
}

/// A named event with an arbitrary JSON payload.
///
/// Events are transient. The payload carries the changed domain object as a
/// JSON object (e.g. under `project` or `contentbase`) so observers can
/// refetch fresh projections without another lookup by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    pub occurred_at: DateTime<Utc>,
}

impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            payload: Map::new(),
            occurred_at: Utc::now(),
        }
    }

    /// Add a payload entry, builder style.
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    pub fn with_action(self, action: ActionType) -> Self {
        self.with("action_type", Value::String(action.code().to_string()))
    }

    /// Parsed `action_type`, if present and valid.
    pub fn action_type(&self) -> Option<ActionType> {
        self.payload
            .get("action_type")
            .and_then(Value::as_str)
            .and_then(ActionType::from_code)
    }

    /// Domain object stored under `key`, if it is a JSON object.
    pub fn object(&self, key: &str) -> Option<&Map<String, Value>> {
        self.payload.get(key).and_then(Value::as_object)
    }
}

/// Resolve the owning project UUID of a domain object.
///
/// Looks at `project_uuid`, then `project.uuid`, then the same two fields on a
/// nested `content_base`. Returns `None` for objects without a project, such as
/// organization-level content bases.
pub fn project_uuid_of(object: &Map<String, Value>) -> Option<String> {
    fn direct(object: &Map<String, Value>) -> Option<String> {
        if let Some(uuid) = object.get("project_uuid").and_then(Value::as_str) {
            return Some(uuid.to_string());
        }
        object
            .get("project")
            .and_then(Value::as_object)
            .and_then(|project| project.get("uuid"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    direct(object).or_else(|| {
        object
            .get("content_base")
            .and_then(Value::as_object)
            .and_then(direct)
    })
}
