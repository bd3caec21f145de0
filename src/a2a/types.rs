//! A2A wire types (camelCase JSON with `kind` discriminators).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::A2aError;

pub const MESSAGE_KIND: &str = "message";
pub const TASK_KIND: &str = "task";
pub const STATUS_UPDATE_KIND: &str = "status-update";
pub const ARTIFACT_UPDATE_KIND: &str = "artifact-update";

/// Discovery path for the agent card.
pub const AGENT_CARD_PATH: &str = "/.well-known/agent.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Part {
    Text { text: String },
    Data { data: Value },
    File { file: Value },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            _ => None,
        }
    }
}

fn message_kind() -> String {
    MESSAGE_KIND.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default = "message_kind")]
    pub kind: String,
}

impl Message {
    /// A single-text-part user message, optionally continuing a conversation.
    pub fn user_text(text: impl Into<String>, context_id: Option<&str>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::text(text)],
            message_id: new_id(),
            context_id: context_id.map(str::to_string),
            task_id: None,
            kind: message_kind(),
        }
    }

    pub fn agent_text(text: impl Into<String>, context_id: &str, task_id: Option<&str>) -> Self {
        Self {
            role: Role::Agent,
            parts: vec![Part::text(text)],
            message_id: new_id(),
            context_id: Some(context_id.to_string()),
            task_id: task_id.map(str::to_string),
            kind: message_kind(),
        }
    }

    pub fn text_parts(&self) -> Vec<&str> {
        self.parts.iter().filter_map(Part::as_text).collect()
    }

    /// All text parts joined with newlines.
    pub fn joined_text(&self) -> String {
        self.text_parts().join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Submitted,
    Working,
    InputRequired,
    Completed,
    Canceled,
    Failed,
    Rejected,
    AuthRequired,
    Unknown,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Canceled | TaskState::Failed | TaskState::Rejected
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl TaskStatus {
    pub fn now(state: TaskState, message: Option<Message>) -> Self {
        Self {
            state,
            message,
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub artifact_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub context_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusUpdateEvent {
    pub task_id: String,
    pub context_id: String,
    pub status: TaskStatus,
    #[serde(rename = "final", default)]
    pub is_final: bool,
    pub kind: String,
}

impl TaskStatusUpdateEvent {
    pub fn new(task_id: &str, context_id: &str, status: TaskStatus, is_final: bool) -> Self {
        Self {
            task_id: task_id.to_string(),
            context_id: context_id.to_string(),
            status,
            is_final,
            kind: STATUS_UPDATE_KIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskArtifactUpdateEvent {
    pub task_id: String,
    pub context_id: String,
    pub artifact: Artifact,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_chunk: Option<bool>,
    pub kind: String,
}

impl TaskArtifactUpdateEvent {
    pub fn new(task_id: &str, context_id: &str, name: &str, text: impl Into<String>) -> Self {
        Self {
            task_id: task_id.to_string(),
            context_id: context_id.to_string(),
            artifact: Artifact {
                artifact_id: new_id(),
                name: Some(name.to_string()),
                parts: vec![Part::text(text)],
            },
            last_chunk: Some(true),
            kind: ARTIFACT_UPDATE_KIND.to_string(),
        }
    }
}

/// Any result a `message/send` or `message/stream` call can yield.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Message(Message),
    Task(Task),
    StatusUpdate(TaskStatusUpdateEvent),
    ArtifactUpdate(TaskArtifactUpdateEvent),
}

impl StreamEvent {
    pub fn from_value(value: Value) -> Result<Self, A2aError> {
        let kind = value
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let event = match kind.as_str() {
            MESSAGE_KIND => StreamEvent::Message(serde_json::from_value(value)?),
            TASK_KIND => StreamEvent::Task(serde_json::from_value(value)?),
            STATUS_UPDATE_KIND => StreamEvent::StatusUpdate(serde_json::from_value(value)?),
            ARTIFACT_UPDATE_KIND => StreamEvent::ArtifactUpdate(serde_json::from_value(value)?),
            other => {
                return Err(A2aError::Protocol(format!(
                    "unknown result kind '{}'",
                    other
                )))
            }
        };
        Ok(event)
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            StreamEvent::Message(m) => serde_json::to_value(m),
            StreamEvent::Task(t) => serde_json::to_value(t),
            StreamEvent::StatusUpdate(e) => serde_json::to_value(e),
            StreamEvent::ArtifactUpdate(e) => serde_json::to_value(e),
        }
    }

    pub fn context_id(&self) -> Option<&str> {
        match self {
            StreamEvent::Message(m) => m.context_id.as_deref(),
            StreamEvent::Task(t) => Some(&t.context_id),
            StreamEvent::StatusUpdate(e) => Some(&e.context_id),
            StreamEvent::ArtifactUpdate(e) => Some(&e.context_id),
        }
    }

    /// Text fragments carried by this event, in part order.
    pub fn text_fragments(&self) -> Vec<&str> {
        match self {
            StreamEvent::Message(m) => m.text_parts(),
            StreamEvent::Task(t) => t
                .artifacts
                .iter()
                .flat_map(|a| a.parts.iter().filter_map(Part::as_text))
                .collect(),
            StreamEvent::StatusUpdate(e) => e
                .status
                .message
                .as_ref()
                .map(Message::text_parts)
                .unwrap_or_default(),
            StreamEvent::ArtifactUpdate(e) => {
                e.artifact.parts.iter().filter_map(Part::as_text).collect()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSendParams {
    pub message: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentCapabilities {
    #[serde(default)]
    pub streaming: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub examples: Vec<String>,
}

/// Self-description served at [`AGENT_CARD_PATH`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub capabilities: AgentCapabilities,
    #[serde(default)]
    pub default_input_modes: Vec<String>,
    #[serde(default)]
    pub default_output_modes: Vec<String>,
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
}

impl AgentCard {
    /// A streaming, text-in/text-out card with one skill.
    pub fn text_agent(name: &str, description: &str, skill: AgentSkill) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            url: String::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            capabilities: AgentCapabilities { streaming: true },
            default_input_modes: vec!["text/plain".to_string()],
            default_output_modes: vec!["text/plain".to_string()],
            skills: vec![skill],
        }
    }
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_wire_format() {
        let message = Message::user_text("hello", Some("ctx-1"));
        let wire = serde_json::to_value(&message).expect("serialize");
        assert_eq!(wire["role"], "user");
        assert_eq!(wire["kind"], "message");
        assert_eq!(wire["contextId"], "ctx-1");
        assert_eq!(wire["parts"], json!([{"kind": "text", "text": "hello"}]));
        assert!(wire.get("taskId").is_none());
        assert_eq!(message.message_id.len(), 32);
    }

    #[test]
    fn test_stream_event_dispatch_by_kind() {
        let value = json!({
            "kind": "status-update",
            "taskId": "t1",
            "contextId": "c1",
            "final": true,
            "status": {
                "state": "completed",
                "message": {"role": "agent", "parts": [{"kind": "text", "text": "done"}], "messageId": "m1"}
            }
        });
        let event = StreamEvent::from_value(value).expect("event");
        assert_eq!(event.context_id(), Some("c1"));
        assert_eq!(event.text_fragments(), vec!["done"]);
        match event {
            StreamEvent::StatusUpdate(update) => {
                assert!(update.is_final);
                assert_eq!(update.status.state, TaskState::Completed);
                assert!(update.status.state.is_terminal());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_is_protocol_error() {
        let err = StreamEvent::from_value(json!({"kind": "bogus"})).unwrap_err();
        assert!(matches!(err, A2aError::Protocol(_)));
    }

    #[test]
    fn test_minimal_card_parses() {
        let card: AgentCard =
            serde_json::from_value(json!({"name": "solver"})).expect("minimal card");
        assert_eq!(card.name, "solver");
        assert!(!card.capabilities.streaming);
        assert!(serde_json::from_value::<AgentCard>(json!({"status": "ok"})).is_err());
    }
}
