//! Domain types shared between the scheduler and its collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::preferences::UserPreferences;

/// An active account as returned by the user directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub preferences: UserPreferences,
}

impl UserRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            display_name: None,
            preferences: UserPreferences::default(),
        }
    }

    pub fn with_preferences(mut self, preferences: UserPreferences) -> Self {
        self.preferences = preferences;
        self
    }

    /// Name used to greet the user in digests.
    pub fn greeting_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

/// Priority shared by tasks and leads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

/// A to-do item owned by the task subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            due_at: None,
            priority: Priority::Medium,
            status: TaskStatus::Pending,
            completed_at: None,
        }
    }

    pub fn due(mut self, at: DateTime<Utc>) -> Self {
        self.due_at = Some(at);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn completed(mut self, at: DateTime<Utc>) -> Self {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(at);
        self
    }

    pub fn is_open(&self) -> bool {
        self.status != TaskStatus::Completed
    }
}

/// A calendar event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meeting {
    pub id: String,
    pub title: String,
    pub start_at: DateTime<Utc>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub location: Option<String>,
}

impl Meeting {
    pub fn new(id: impl Into<String>, title: impl Into<String>, start_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            start_at,
            end_at: None,
            location: None,
        }
    }
}

/// A sales lead tracked by the CRM subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
}

impl Lead {
    pub fn new(id: impl Into<String>, name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            company: None,
            value: 0.0,
            priority: Priority::Medium,
            created_at,
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = value;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// An inbound email awaiting processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
    pub id: String,
    pub from: String,
    pub subject: String,
    #[serde(default)]
    pub body: String,
    pub received_at: DateTime<Utc>,
}

/// Options passed to the mail collaborator for one inbox pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboxOptions {
    /// Upper bound on messages processed in this pass.
    pub max_emails: usize,
    /// Message ids in the order they should be processed (highest priority first).
    pub ordered_ids: Vec<String>,
    pub auto_reply: bool,
    pub create_tasks: bool,
    pub detect_leads: bool,
    pub detect_invoices: bool,
}

/// What one inbox pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxSummary {
    pub processed: u32,
    pub replied: u32,
    pub tasks_created: u32,
    pub invoices_created: u32,
    pub leads_detected: u32,
}

/// Delivery channel families known to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Chat,
    Email,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::Chat => write!(f, "chat"),
            ChannelKind::Email => write!(f, "email"),
        }
    }
}

/// Result of a chat send as reported by the chat provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatSendResult {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl ChatSendResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_deserialize_defaults() {
        let task: Task = serde_json::from_str(r#"{"id":"t1","title":"Call Anna"}"#).unwrap();
        assert_eq!(task.priority, Priority::Medium);
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.due_at.is_none());
        assert!(task.is_open());
    }

    #[test]
    fn test_priority_wire_format() {
        let p: Priority = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(p, Priority::High);
        assert_eq!(p.to_string(), "high");
    }

    #[test]
    fn test_greeting_name_falls_back_to_id() {
        let mut user = UserRecord::new("u-42");
        assert_eq!(user.greeting_name(), "u-42");
        user.display_name = Some("Dana".into());
        assert_eq!(user.greeting_name(), "Dana");
    }
}
