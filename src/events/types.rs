//! Change events pushed to WebSocket subscribers

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TaskCreated,
    TaskUpdated,
    TaskDeleted,
    ProjectCreated,
    ProjectUpdated,
    ProjectDeleted,
    TemplateChanged,
    WorkspaceSync,
}

impl EventType {
    /// Verb carried in `action`
    pub fn verb(&self) -> &'static str {
        match self {
            EventType::TaskCreated | EventType::ProjectCreated => "created",
            EventType::TaskUpdated | EventType::ProjectUpdated => "updated",
            EventType::TaskDeleted | EventType::ProjectDeleted => "deleted",
            EventType::TemplateChanged => "changed",
            EventType::WorkspaceSync => "sync",
        }
    }

    pub fn entity_type(&self) -> Option<&'static str> {
        match self {
            EventType::TaskCreated | EventType::TaskUpdated | EventType::TaskDeleted => Some("task"),
            EventType::ProjectCreated | EventType::ProjectUpdated | EventType::ProjectDeleted => {
                Some("project")
            }
            EventType::TemplateChanged => Some("template"),
            EventType::WorkspaceSync => None,
        }
    }
}

/// One mutation, scoped to a workspace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub workspace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Map<String, serde_json::Value>>,
    /// Unix seconds
    pub timestamp: i64,
}

impl ChangeEvent {
    pub fn new(event_type: EventType, workspace_id: impl Into<String>) -> Self {
        Self {
            event_type,
            workspace_id: workspace_id.into(),
            entity_id: None,
            entity_type: event_type.entity_type().map(str::to_string),
            action: event_type.verb().to_string(),
            data: None,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    /// Attach a data map; non-object values are ignored.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = data {
            self.data = Some(map);
        }
        self
    }
}

/// Sink for change events.
///
/// Handlers hold an `Arc<dyn EventEmitter>`; the daemon wires in the hub,
/// tests wire in a recorder.
#[async_trait]
pub trait EventEmitter: Send + Sync {
    async fn emit(&self, event: ChangeEvent);

    async fn emit_task(&self, event_type: EventType, workspace_id: &str, task_id: &str, data: serde_json::Value) {
        self.emit(ChangeEvent::new(event_type, workspace_id).with_entity(task_id).with_data(data))
            .await
    }

    async fn emit_project(&self, event_type: EventType, workspace_id: &str, project_id: &str) {
        self.emit(ChangeEvent::new(event_type, workspace_id).with_entity(project_id))
            .await
    }

    async fn emit_sync(&self, workspace_id: &str, action: &str, data: serde_json::Value) {
        self.emit(
            ChangeEvent::new(EventType::WorkspaceSync, workspace_id)
                .with_action(action)
                .with_data(data),
        )
        .await
    }
}
