//! Collaborator interfaces consumed by the scheduler.
//!
//! Concrete provider clients (Gmail, Outlook, Slack, CRM, ...) live outside
//! this workspace and implement these traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{ChatSendResult, Email, InboxOptions, InboxSummary, Lead, Meeting, Task, UserRecord};

/// Source of the accounts processed each cycle.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn list_active_users(&self) -> Result<Vec<UserRecord>>;
}

/// Mail provider: inbox reads and the processing pipeline behind them.
#[async_trait]
pub trait MailCollaborator: Send + Sync {
    /// Unprocessed messages, newest first, at most `limit`.
    async fn fetch_unprocessed(&self, user_id: &str, limit: usize) -> Result<Vec<Email>>;

    async fn process_inbox_for(&self, user_id: &str, options: &InboxOptions) -> Result<InboxSummary>;
}

#[async_trait]
pub trait CalendarCollaborator: Send + Sync {
    /// Detect meetings from mail and calendar sources. Returns the number of
    /// meetings created or updated.
    async fn run_auto_detection(&self, user_id: &str) -> Result<u32>;

    /// Meetings starting in `[from, to)`.
    async fn meetings_between(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Meeting>>;
}

#[async_trait]
pub trait TaskCollaborator: Send + Sync {
    async fn list_tasks(&self, user_id: &str) -> Result<Vec<Task>>;
}

#[async_trait]
pub trait LeadCollaborator: Send + Sync {
    async fn list_leads(&self, user_id: &str) -> Result<Vec<Lead>>;
}

/// Chat delivery (Slack-style workspace messaging).
#[async_trait]
pub trait ChatChannel: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the user has a live connection to this workspace.
    async fn is_connected(&self, user_id: &str) -> bool;

    async fn send(&self, user_id: &str, message: &str, channel_id: Option<&str>) -> Result<ChatSendResult>;
}

/// Email delivery.
#[async_trait]
pub trait EmailChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn is_available(&self, user_id: &str) -> bool;

    /// Returns `Ok(false)` when the provider accepted the call but refused the message.
    async fn send(&self, user_id: &str, subject: &str, html: &str) -> Result<bool>;
}
