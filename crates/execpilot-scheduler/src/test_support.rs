//! Call-counting stub collaborators for unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use execpilot_core::error::{ExecPilotError, Result};
use execpilot_core::traits::{
    CalendarCollaborator, ChatChannel, EmailChannel, LeadCollaborator, MailCollaborator,
    TaskCollaborator, UserDirectory,
};
use execpilot_core::types::{
    ChatSendResult, Email, InboxOptions, InboxSummary, Lead, Meeting, Task, UserRecord,
};

pub struct StubChat {
    connected: bool,
    failing: bool,
    /// `is_connected` never resolves.
    hanging: bool,
    attempts: AtomicUsize,
    messages: Mutex<Vec<String>>,
}

impl StubChat {
    fn build(connected: bool, failing: bool) -> Self {
        Self {
            connected,
            failing,
            hanging: false,
            attempts: AtomicUsize::new(0),
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn connected() -> Self {
        Self::build(true, false)
    }

    pub fn disconnected() -> Self {
        Self::build(false, false)
    }

    pub fn failing() -> Self {
        Self::build(true, true)
    }

    pub fn hanging() -> Self {
        Self {
            hanging: true,
            ..Self::build(true, false)
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatChannel for StubChat {
    fn name(&self) -> &str {
        "stub-chat"
    }

    async fn is_connected(&self, _user_id: &str) -> bool {
        if self.hanging {
            std::future::pending::<()>().await;
        }
        self.connected
    }

    async fn send(&self, _user_id: &str, message: &str, _channel_id: Option<&str>) -> Result<ChatSendResult> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Ok(ChatSendResult::failed("channel_not_found"));
        }
        self.messages.lock().unwrap().push(message.to_string());
        Ok(ChatSendResult::ok())
    }
}

pub struct StubEmail {
    failing: bool,
    attempts: AtomicUsize,
    sent: AtomicUsize,
}

impl StubEmail {
    pub fn working() -> Self {
        Self {
            failing: false,
            attempts: AtomicUsize::new(0),
            sent: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::working()
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmailChannel for StubEmail {
    fn name(&self) -> &str {
        "stub-email"
    }

    async fn is_available(&self, _user_id: &str) -> bool {
        true
    }

    async fn send(&self, _user_id: &str, _subject: &str, _html: &str) -> Result<bool> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(ExecPilotError::provider("smtp 451"));
        }
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

/// One in-memory backend for every data collaborator. Every call is counted.
#[derive(Default)]
pub struct StubWorkspace {
    emails: Mutex<Vec<Email>>,
    tasks: Mutex<Vec<Task>>,
    meetings: Mutex<Vec<Meeting>>,
    leads: Mutex<Vec<Lead>>,
    detected_meetings: AtomicU32,
    failing_mail: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    stall_calendar: AtomicBool,
    mail_delay_ms: AtomicU64,
    calls: AtomicUsize,
    inbox_options: Mutex<Option<InboxOptions>>,
}

impl StubWorkspace {
    pub fn set_emails(&self, emails: Vec<Email>) {
        *self.emails.lock().unwrap() = emails;
    }

    pub fn set_tasks(&self, tasks: Vec<Task>) {
        *self.tasks.lock().unwrap() = tasks;
    }

    pub fn set_meetings(&self, meetings: Vec<Meeting>) {
        *self.meetings.lock().unwrap() = meetings;
    }

    pub fn set_leads(&self, leads: Vec<Lead>) {
        *self.leads.lock().unwrap() = leads;
    }

    pub fn set_detected_meetings(&self, n: u32) {
        self.detected_meetings.store(n, Ordering::SeqCst);
    }

    pub fn fail_mail_for(&self, user_id: &str) {
        self.failing_mail.lock().unwrap().insert(user_id.to_string());
    }

    pub fn panic_for(&self, user_id: &str) {
        self.panicking.lock().unwrap().insert(user_id.to_string());
    }

    pub fn stall_calendar(&self) {
        self.stall_calendar.store(true, Ordering::SeqCst);
    }

    pub fn delay_mail(&self, delay: Duration) {
        self.mail_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_inbox_options(&self) -> Option<InboxOptions> {
        self.inbox_options.lock().unwrap().clone()
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MailCollaborator for StubWorkspace {
    async fn fetch_unprocessed(&self, user_id: &str, limit: usize) -> Result<Vec<Email>> {
        self.hit();
        let delay = self.mail_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.panicking.lock().unwrap().contains(user_id) {
            panic!("mail backend exploded for {user_id}");
        }
        if self.failing_mail.lock().unwrap().contains(user_id) {
            return Err(ExecPilotError::AuthFailed(format!("token expired for {user_id}")));
        }
        Ok(self.emails.lock().unwrap().iter().take(limit).cloned().collect())
    }

    async fn process_inbox_for(&self, _user_id: &str, options: &InboxOptions) -> Result<InboxSummary> {
        self.hit();
        *self.inbox_options.lock().unwrap() = Some(options.clone());
        Ok(InboxSummary {
            processed: options.ordered_ids.len() as u32,
            ..InboxSummary::default()
        })
    }
}

#[async_trait]
impl CalendarCollaborator for StubWorkspace {
    async fn run_auto_detection(&self, _user_id: &str) -> Result<u32> {
        self.hit();
        if self.stall_calendar.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(self.detected_meetings.load(Ordering::SeqCst))
    }

    async fn meetings_between(
        &self,
        _user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Meeting>> {
        self.hit();
        if self.stall_calendar.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(self
            .meetings
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.start_at >= from && m.start_at < to)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TaskCollaborator for StubWorkspace {
    async fn list_tasks(&self, _user_id: &str) -> Result<Vec<Task>> {
        self.hit();
        Ok(self.tasks.lock().unwrap().clone())
    }
}

#[async_trait]
impl LeadCollaborator for StubWorkspace {
    async fn list_leads(&self, _user_id: &str) -> Result<Vec<Lead>> {
        self.hit();
        Ok(self.leads.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct StubDirectory {
    users: Mutex<Vec<UserRecord>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl StubDirectory {
    pub fn with_users(users: Vec<UserRecord>) -> Self {
        Self {
            users: Mutex::new(users),
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserDirectory for StubDirectory {
    async fn list_active_users(&self) -> Result<Vec<UserRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ExecPilotError::load("directory unreachable"));
        }
        Ok(self.users.lock().unwrap().clone())
    }
}
