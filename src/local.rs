//! File-backed collaborators for running ExecPilot standalone.
//!
//! Layout under the data directory:
//! ```text
//! users.json                    [UserRecord]
//! users/<id>/inbox.json         [Email]
//! users/<id>/processed.json     [email id]
//! users/<id>/tasks.json         [Task]
//! users/<id>/meetings.json      [Meeting]
//! users/<id>/leads.json         [Lead]
//! ```
//! Missing files read as empty. Chat goes to a webhook, email to an outbox
//! directory of HTML files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use execpilot_core::error::{ExecPilotError, Result};
use execpilot_core::traits::{
    CalendarCollaborator, ChatChannel, EmailChannel, LeadCollaborator, MailCollaborator,
    TaskCollaborator, UserDirectory,
};
use execpilot_core::types::{
    ChatSendResult, Email, InboxOptions, InboxSummary, Lead, Meeting, Priority, Task, UserRecord,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const ACTION_TERMS: &[&str] = &["deadline", "asap", "urgent", "action required", "please review"];
const LEAD_TERMS: &[&str] = &["quote", "proposal", "inquiry", "pricing"];
const INVOICE_TERMS: &[&str] = &["invoice", "receipt", "bill"];
const DEFAULT_MEETING_MINUTES: i64 = 30;

/// JSON data directory serving every data collaborator role.
pub struct LocalWorkspace {
    root: PathBuf,
    /// Serialises read-modify-write cycles on the per-user files.
    write_lock: Mutex<()>,
}

impl LocalWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn user_file(&self, user_id: &str, name: &str) -> Result<PathBuf> {
        if user_id.is_empty()
            || user_id.contains(['/', '\\'])
            || user_id.contains("..")
        {
            return Err(ExecPilotError::NotFound(format!("invalid user id '{user_id}'")));
        }
        Ok(self.root.join("users").join(user_id).join(name))
    }

    async fn read_user<T: DeserializeOwned>(&self, user_id: &str, name: &str) -> Result<Vec<T>> {
        read_list(&self.user_file(user_id, name)?).await
    }

    async fn write_user<T: Serialize>(&self, user_id: &str, name: &str, items: &[T]) -> Result<()> {
        write_list(&self.user_file(user_id, name)?, items).await
    }
}

async fn read_list<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) if content.trim().is_empty() => Ok(Vec::new()),
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

async fn write_list<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(items)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}

fn contains_any(text: &str, terms: &[&str]) -> bool {
    terms.iter().any(|t| text.contains(t))
}

#[async_trait]
impl UserDirectory for LocalWorkspace {
    async fn list_active_users(&self) -> Result<Vec<UserRecord>> {
        let path = self.root.join("users.json");
        read_list(&path)
            .await
            .map_err(|e| ExecPilotError::load(format!("{}: {e}", path.display())))
    }
}

#[async_trait]
impl MailCollaborator for LocalWorkspace {
    async fn fetch_unprocessed(&self, user_id: &str, limit: usize) -> Result<Vec<Email>> {
        let processed: HashSet<String> = self
            .read_user::<String>(user_id, "processed.json")
            .await?
            .into_iter()
            .collect();
        let mut inbox: Vec<Email> = self
            .read_user::<Email>(user_id, "inbox.json")
            .await?
            .into_iter()
            .filter(|e| !processed.contains(&e.id))
            .collect();
        inbox.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        inbox.truncate(limit);
        Ok(inbox)
    }

    /// Local pipeline: marks messages processed, files follow-up tasks for
    /// action requests, records leads from sales enquiries, and counts
    /// invoices. No replies are sent from a local inbox.
    async fn process_inbox_for(&self, user_id: &str, options: &InboxOptions) -> Result<InboxSummary> {
        let _guard = self.write_lock.lock().await;

        let inbox: Vec<Email> = self.read_user(user_id, "inbox.json").await?;
        let mut processed: Vec<String> = self.read_user(user_id, "processed.json").await?;
        let mut tasks: Vec<Task> = self.read_user(user_id, "tasks.json").await?;
        let mut leads: Vec<Lead> = self.read_user(user_id, "leads.json").await?;

        let mut summary = InboxSummary::default();
        for id in options.ordered_ids.iter().take(options.max_emails) {
            let Some(email) = inbox.iter().find(|e| &e.id == id) else {
                continue;
            };
            if processed.contains(&email.id) {
                continue;
            }
            let subject = email.subject.to_lowercase();
            let text = format!("{subject} {}", email.body.to_lowercase());

            if options.create_tasks && contains_any(&subject, ACTION_TERMS) {
                let priority = if subject.contains("urgent") || subject.contains("asap") {
                    Priority::High
                } else {
                    Priority::Medium
                };
                tasks.push(
                    Task::new(format!("task-{}", email.id), format!("Follow up: {}", email.subject))
                        .due(email.received_at + chrono::Duration::days(1))
                        .with_priority(priority),
                );
                summary.tasks_created += 1;
            }
            if options.detect_leads && contains_any(&text, LEAD_TERMS) {
                leads.push(Lead::new(format!("lead-{}", email.id), email.from.clone(), Utc::now()));
                summary.leads_detected += 1;
            }
            if options.detect_invoices && contains_any(&text, INVOICE_TERMS) {
                summary.invoices_created += 1;
            }
            processed.push(email.id.clone());
            summary.processed += 1;
        }

        if summary.processed > 0 {
            self.write_user(user_id, "processed.json", &processed).await?;
            if summary.tasks_created > 0 {
                self.write_user(user_id, "tasks.json", &tasks).await?;
            }
            if summary.leads_detected > 0 {
                self.write_user(user_id, "leads.json", &leads).await?;
            }
        }
        Ok(summary)
    }
}

#[async_trait]
impl CalendarCollaborator for LocalWorkspace {
    /// Fills in missing end times and keeps the file ordered by start.
    async fn run_auto_detection(&self, user_id: &str) -> Result<u32> {
        let _guard = self.write_lock.lock().await;
        let mut meetings: Vec<Meeting> = self.read_user(user_id, "meetings.json").await?;

        let mut updated = 0;
        for meeting in meetings.iter_mut().filter(|m| m.end_at.is_none()) {
            meeting.end_at = Some(meeting.start_at + chrono::Duration::minutes(DEFAULT_MEETING_MINUTES));
            updated += 1;
        }
        if updated > 0 {
            meetings.sort_by_key(|m| m.start_at);
            self.write_user(user_id, "meetings.json", &meetings).await?;
        }
        Ok(updated)
    }

    async fn meetings_between(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Meeting>> {
        let mut meetings: Vec<Meeting> = self
            .read_user::<Meeting>(user_id, "meetings.json")
            .await?
            .into_iter()
            .filter(|m| m.start_at >= from && m.start_at < to)
            .collect();
        meetings.sort_by_key(|m| m.start_at);
        Ok(meetings)
    }
}

#[async_trait]
impl TaskCollaborator for LocalWorkspace {
    async fn list_tasks(&self, user_id: &str) -> Result<Vec<Task>> {
        self.read_user(user_id, "tasks.json").await
    }
}

#[async_trait]
impl LeadCollaborator for LocalWorkspace {
    async fn list_leads(&self, user_id: &str) -> Result<Vec<Lead>> {
        self.read_user(user_id, "leads.json").await
    }
}

/// Chat channel that POSTs every message as JSON to one webhook URL.
pub struct WebhookChatChannel {
    url: String,
    client: reqwest::Client,
}

impl WebhookChatChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChatChannel for WebhookChatChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn is_connected(&self, _user_id: &str) -> bool {
        !self.url.is_empty()
    }

    async fn send(&self, user_id: &str, message: &str, channel_id: Option<&str>) -> Result<ChatSendResult> {
        let resp = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({
                "user_id": user_id,
                "channel": channel_id,
                "text": message,
            }))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| ExecPilotError::dispatch(format!("Webhook send failed: {e}")))?;

        if resp.status().is_success() {
            Ok(ChatSendResult::ok())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Ok(ChatSendResult::failed(format!("Webhook error {status}: {body}")))
        }
    }
}

/// Email channel that writes each message as an HTML file. File names carry
/// a per-channel sequence number and are never overwritten.
pub struct OutboxEmailChannel {
    dir: PathBuf,
    seq: AtomicU64,
}

impl OutboxEmailChannel {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seq: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl EmailChannel for OutboxEmailChannel {
    fn name(&self) -> &str {
        "outbox"
    }

    async fn is_available(&self, _user_id: &str) -> bool {
        true
    }

    async fn send(&self, user_id: &str, subject: &str, html: &str) -> Result<bool> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let safe_user: String = user_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let file = self.dir.join(format!(
            "{}-{seq:06}-{safe_user}.html",
            Utc::now().format("%Y%m%dT%H%M%S%.3f")
        ));
        let document = format!(
            "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{}</title></head><body>{html}</body></html>\n",
            execpilot_scheduler::notify::escape_html(subject)
        );
        let mut out = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&file)
            .await?;
        out.write_all(document.as_bytes()).await?;
        out.flush().await?;
        tracing::debug!("📤 Outbox: {}", file.display());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(id: &str, subject: &str, age_hours: i64) -> Email {
        Email {
            id: id.into(),
            from: format!("{id}@example.com"),
            subject: subject.into(),
            body: String::new(),
            received_at: Utc::now() - chrono::Duration::hours(age_hours),
        }
    }

    #[tokio::test]
    async fn test_missing_files_read_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ws = LocalWorkspace::new(dir.path());
        assert!(ws.list_active_users().await.unwrap().is_empty());
        assert!(ws.list_tasks("u1").await.unwrap().is_empty());
        assert!(ws.fetch_unprocessed("u1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_users_json_with_loose_preferences() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("users.json"),
            r#"[{"id":"anna","display_name":"Anna","preferences":{"pauseAI":"false","slackEnabled":false}}]"#,
        )
        .unwrap();
        let users = LocalWorkspace::new(dir.path()).list_active_users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert!(!users[0].preferences.pause_ai);
        assert!(!users[0].preferences.slack_enabled);
    }

    #[tokio::test]
    async fn test_inbox_pipeline_marks_processed_and_files_work() {
        let dir = tempfile::tempdir().unwrap();
        let ws = LocalWorkspace::new(dir.path());
        ws.write_user(
            "u1",
            "inbox.json",
            &[
                email("e1", "URGENT: contract deadline", 1),
                email("e2", "Quote request for services", 2),
                email("e3", "Invoice #42", 3),
            ],
        )
        .await
        .unwrap();

        let unprocessed = ws.fetch_unprocessed("u1", 10).await.unwrap();
        assert_eq!(unprocessed[0].id, "e1");

        let options = InboxOptions {
            max_emails: 10,
            ordered_ids: vec!["e1".into(), "e2".into(), "e3".into()],
            create_tasks: true,
            detect_leads: true,
            detect_invoices: true,
            ..InboxOptions::default()
        };
        let summary = ws.process_inbox_for("u1", &options).await.unwrap();
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.tasks_created, 1);
        assert_eq!(summary.leads_detected, 1);
        assert_eq!(summary.invoices_created, 1);

        assert!(ws.fetch_unprocessed("u1", 10).await.unwrap().is_empty());
        let tasks = ws.list_tasks("u1").await.unwrap();
        assert_eq!(tasks[0].priority, Priority::High);

        let again = ws.process_inbox_for("u1", &options).await.unwrap();
        assert_eq!(again.processed, 0);
    }

    #[tokio::test]
    async fn test_meeting_detection_fills_end_times() {
        let dir = tempfile::tempdir().unwrap();
        let ws = LocalWorkspace::new(dir.path());
        let start = Utc::now() + chrono::Duration::hours(1);
        ws.write_user("u1", "meetings.json", &[Meeting::new("m1", "Sync", start)])
            .await
            .unwrap();

        assert_eq!(ws.run_auto_detection("u1").await.unwrap(), 1);
        assert_eq!(ws.run_auto_detection("u1").await.unwrap(), 0);
        let found = ws
            .meetings_between("u1", start - chrono::Duration::minutes(1), start + chrono::Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(found[0].end_at, Some(start + chrono::Duration::minutes(30)));
    }

    #[tokio::test]
    async fn test_user_ids_cannot_escape_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ws = LocalWorkspace::new(dir.path());
        assert!(ws.list_tasks("../etc").await.is_err());
        assert!(ws.list_tasks("a/b").await.is_err());
    }

    #[tokio::test]
    async fn test_outbox_writes_html_file() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = OutboxEmailChannel::new(dir.path().join("outbox"));
        assert!(outbox.send("u1", "Your <morning> briefing", "<p>hi</p>").await.unwrap());

        let entries: Vec<_> = std::fs::read_dir(dir.path().join("outbox")).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let content = std::fs::read_to_string(entries[0].as_ref().unwrap().path()).unwrap();
        assert!(content.contains("&lt;morning&gt;"));
        assert!(content.contains("<p>hi</p>"));
    }

    #[tokio::test]
    async fn test_unreachable_webhook_is_a_dispatch_error() {
        let chat = WebhookChatChannel::new("http://127.0.0.1:1/hook");
        assert!(chat.is_connected("u1").await);
        let err = chat.send("u1", "hello", None).await.unwrap_err();
        assert!(matches!(err, ExecPilotError::Dispatch(_)));
    }

    #[tokio::test]
    async fn test_outbox_keeps_every_message() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = OutboxEmailChannel::new(dir.path());
        for i in 0..200 {
            assert!(outbox.send("u1", &format!("Alert {i}"), "<p>x</p>").await.unwrap());
        }

        let files = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 200);
    }
}
