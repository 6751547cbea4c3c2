//! Per-user task runner: everything one cycle does for one account.
//!
//! Capabilities run concurrently and fail independently: a provider error or
//! timeout in one is logged with the user and capability, recorded in the
//! report, and never stops the others. Every external call is bounded by
//! `call_timeout`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone, Utc};
use execpilot_core::config::{DigestAnchor, ExecPilotConfig};
use execpilot_core::error::{ExecPilotError, Result};
use execpilot_core::traits::{CalendarCollaborator, LeadCollaborator, MailCollaborator, TaskCollaborator};
use execpilot_core::types::{ChannelKind, InboxOptions, Lead, Meeting, Task, UserRecord};
use serde::{Deserialize, Serialize};

use crate::dedup::{NotificationDeduplicator, NotificationKey, SuppressionWindows};
use crate::digest::{ComposedDigest, DigestComposer, DigestSnapshot, DigestTimeGate};
use crate::dispatch::{DispatchResult, NotificationDispatcher};
use crate::notify::{Notification, NotificationKind, NotifyPriority};
use crate::scoring::ScoringEngine;

/// The data-side collaborators a runner reads from.
#[derive(Clone)]
pub struct Collaborators {
    pub mail: Arc<dyn MailCollaborator>,
    pub calendar: Arc<dyn CalendarCollaborator>,
    pub tasks: Arc<dyn TaskCollaborator>,
    pub leads: Arc<dyn LeadCollaborator>,
}

impl Collaborators {
    /// One backend serving every role.
    pub fn single<T>(source: Arc<T>) -> Self
    where
        T: MailCollaborator + CalendarCollaborator + TaskCollaborator + LeadCollaborator + 'static,
    {
        Self {
            mail: source.clone(),
            calendar: source.clone(),
            tasks: source.clone(),
            leads: source,
        }
    }
}

/// Independently gated unit of per-user work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Email,
    Calendar,
    Tasks,
    Notifications,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Email => write!(f, "email"),
            Capability::Calendar => write!(f, "calendar"),
            Capability::Tasks => write!(f, "tasks"),
            Capability::Notifications => write!(f, "notifications"),
        }
    }
}

/// Work done, summed per user and per cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub emails_processed: u32,
    pub replies_sent: u32,
    pub tasks_created: u32,
    pub invoices_created: u32,
    pub leads_detected: u32,
    pub meetings_affected: u32,
    pub urgent_alerts: u32,
    pub meeting_alerts: u32,
    pub lead_alerts: u32,
    pub digests_sent: u32,
    pub notifications_suppressed: u32,
    pub notifications_failed: u32,
}

impl TaskCounts {
    pub fn merge(&mut self, other: &TaskCounts) {
        self.emails_processed += other.emails_processed;
        self.replies_sent += other.replies_sent;
        self.tasks_created += other.tasks_created;
        self.invoices_created += other.invoices_created;
        self.leads_detected += other.leads_detected;
        self.meetings_affected += other.meetings_affected;
        self.urgent_alerts += other.urgent_alerts;
        self.meeting_alerts += other.meeting_alerts;
        self.lead_alerts += other.lead_alerts;
        self.digests_sent += other.digests_sent;
        self.notifications_suppressed += other.notifications_suppressed;
        self.notifications_failed += other.notifications_failed;
    }

    pub fn is_zero(&self) -> bool {
        *self == TaskCounts::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityError {
    pub capability: Capability,
    pub message: String,
}

/// Outcome of one user's pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerUserReport {
    pub user_id: String,
    pub paused: bool,
    pub counts: TaskCounts,
    pub errors: Vec<CapabilityError>,
}

impl PerUserReport {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ..Self::default()
        }
    }

    fn absorb(&mut self, outcome: Option<std::result::Result<TaskCounts, CapabilityError>>) {
        match outcome {
            Some(Ok(counts)) => self.counts.merge(&counts),
            Some(Err(e)) => self.errors.push(e),
            None => {}
        }
    }
}

/// Result of a manual per-user trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerOutcome {
    Sent { channel: ChannelKind },
    /// Already sent inside the suppression window.
    Suppressed,
    /// Nothing worth sending.
    Empty,
    Paused,
    Disabled,
    Failed { reason: String },
}

impl TriggerOutcome {
    fn from_dispatch(result: &DispatchResult) -> Self {
        match result.channel_used {
            Some(channel) if result.success => Self::Sent { channel },
            _ => Self::Failed {
                reason: result
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "dispatch failed".into()),
            },
        }
    }

    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }
}

impl std::fmt::Display for TriggerOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sent { channel } => write!(f, "sent via {channel}"),
            Self::Suppressed => write!(f, "suppressed (already sent recently)"),
            Self::Empty => write!(f, "nothing to send"),
            Self::Paused => write!(f, "user has paused automation"),
            Self::Disabled => write!(f, "disabled by user preferences"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// Runs the enabled capabilities for one user.
pub struct PerUserTaskRunner {
    collaborators: Collaborators,
    dispatcher: Arc<NotificationDispatcher>,
    dedup: Arc<NotificationDeduplicator>,
    gate: DigestTimeGate,
    composer: DigestComposer,
    scoring: ScoringEngine,
    windows: SuppressionWindows,
    call_timeout: Duration,
    max_emails: usize,
    meeting_lookahead: chrono::Duration,
}

impl PerUserTaskRunner {
    pub fn new(
        collaborators: Collaborators,
        dispatcher: Arc<NotificationDispatcher>,
        dedup: Arc<NotificationDeduplicator>,
        config: &ExecPilotConfig,
    ) -> Self {
        Self {
            collaborators,
            dispatcher,
            dedup,
            gate: DigestTimeGate::new(&config.digest),
            composer: DigestComposer::new(&config.digest),
            scoring: ScoringEngine::new(&config.scoring),
            windows: SuppressionWindows::from_config(&config.notifications),
            call_timeout: Duration::from_secs(config.scheduler.call_timeout_secs),
            max_emails: config.inbox.max_emails,
            // meetings_between is half-open; include a meeting starting exactly at the edge.
            meeting_lookahead: chrono::Duration::minutes(config.scoring.imminent_meeting_minutes)
                + chrono::Duration::seconds(1),
        }
    }

    pub fn dedup(&self) -> &Arc<NotificationDeduplicator> {
        &self.dedup
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    /// One pass for `user` against the host's wall clock.
    pub async fn run(&self, user: &UserRecord) -> PerUserReport {
        self.run_at(user, &Local::now()).await
    }

    /// One pass for `user` at `now`. Digest windows are judged in `now`'s zone.
    pub async fn run_at<Tz>(&self, user: &UserRecord, now: &DateTime<Tz>) -> PerUserReport
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let prefs = &user.preferences;
        if prefs.pause_ai {
            tracing::debug!(user_id = %user.id, "⏸️ Automation paused, skipping");
            return PerUserReport {
                paused: true,
                ..PerUserReport::new(&user.id)
            };
        }

        let now_utc = now.with_timezone(&Utc);
        let notify = prefs.notifications_enabled;
        let (email, calendar, tasks, digest, meetings, leads) = futures::join!(
            self.guard(user, Capability::Email, prefs.auto_process_emails, self.process_email(user, now_utc)),
            self.guard(user, Capability::Calendar, prefs.auto_manage_calendar, self.detect_meetings(user)),
            self.guard(
                user,
                Capability::Tasks,
                prefs.auto_manage_tasks && prefs.urgent_task_alerts,
                self.urgent_task_pass(user, now_utc),
            ),
            self.guard(user, Capability::Notifications, notify && prefs.digest_enabled, self.digest_pass(user, now)),
            self.guard(
                user,
                Capability::Notifications,
                notify && prefs.meeting_reminders,
                self.meeting_pass(user, now_utc),
            ),
            self.guard(user, Capability::Notifications, notify && prefs.lead_alerts, self.lead_pass(user, now_utc)),
        );

        let mut report = PerUserReport::new(&user.id);
        for outcome in [email, calendar, tasks, digest, meetings, leads] {
            report.absorb(outcome);
        }
        report
    }

    /// Manual digest, deduplicated against the scheduled one.
    pub async fn send_digest(&self, user: &UserRecord) -> TriggerOutcome {
        self.send_digest_at(user, &Local::now()).await
    }

    pub async fn send_digest_at<Tz>(&self, user: &UserRecord, now: &DateTime<Tz>) -> TriggerOutcome
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let prefs = &user.preferences;
        if prefs.pause_ai {
            return TriggerOutcome::Paused;
        }
        if !(prefs.notifications_enabled && prefs.digest_enabled) {
            return TriggerOutcome::Disabled;
        }
        let anchor = self.gate.bucket_for(now);
        match self.deliver_digest(user, now, anchor).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(user_id = %user.id, "⚠️ Manual digest failed: {e}");
                TriggerOutcome::Failed { reason: e.to_string() }
            }
        }
    }

    /// Manual urgent-task alert, deduplicated per task.
    pub async fn send_urgent_task_alerts(&self, user: &UserRecord) -> TriggerOutcome {
        self.send_urgent_task_alerts_at(user, Utc::now()).await
    }

    pub async fn send_urgent_task_alerts_at(&self, user: &UserRecord, now: DateTime<Utc>) -> TriggerOutcome {
        let prefs = &user.preferences;
        if prefs.pause_ai {
            return TriggerOutcome::Paused;
        }
        if !(prefs.auto_manage_tasks && prefs.urgent_task_alerts) {
            return TriggerOutcome::Disabled;
        }
        let tasks = match self.bounded("list_tasks", self.collaborators.tasks.list_tasks(&user.id)).await {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::warn!(user_id = %user.id, "⚠️ Manual urgent-task check failed: {e}");
                return TriggerOutcome::Failed { reason: e.to_string() };
            }
        };
        self.deliver_urgent(user, tasks, now).await.0
    }

    async fn guard<F>(
        &self,
        user: &UserRecord,
        capability: Capability,
        enabled: bool,
        work: F,
    ) -> Option<std::result::Result<TaskCounts, CapabilityError>>
    where
        F: Future<Output = Result<TaskCounts>>,
    {
        if !enabled {
            return None;
        }
        match work.await {
            Ok(counts) => Some(Ok(counts)),
            Err(e) => {
                if e.is_provider_failure() {
                    tracing::warn!(user_id = %user.id, %capability, "⚠️ Capability failed, retrying next cycle: {e}");
                } else {
                    tracing::error!(user_id = %user.id, %capability, "❌ Capability failed: {e}");
                }
                Some(Err(CapabilityError {
                    capability,
                    message: e.to_string(),
                }))
            }
        }
    }

    async fn bounded<T>(&self, call: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.call_timeout, fut).await.unwrap_or_else(|_| {
            Err(ExecPilotError::timeout(format!(
                "{call} did not finish within {}s",
                self.call_timeout.as_secs()
            )))
        })
    }

    async fn process_email(&self, user: &UserRecord, now: DateTime<Utc>) -> Result<TaskCounts> {
        let mail = &self.collaborators.mail;
        let emails = self
            .bounded("fetch_unprocessed", mail.fetch_unprocessed(&user.id, self.max_emails))
            .await?;
        if emails.is_empty() {
            return Ok(TaskCounts::default());
        }

        let ordered = self.scoring.prioritize_emails(emails, now);
        if let Some(top) = ordered.first() {
            tracing::debug!(
                user_id = %user.id,
                "📬 {} unprocessed emails, top score {} ('{}')",
                ordered.len(),
                top.score,
                top.email.subject
            );
        }
        let prefs = &user.preferences;
        let options = InboxOptions {
            max_emails: self.max_emails,
            ordered_ids: ordered.into_iter().map(|s| s.email.id).collect(),
            auto_reply: prefs.auto_reply,
            create_tasks: prefs.auto_manage_tasks,
            detect_leads: true,
            detect_invoices: true,
        };
        let summary = self
            .bounded("process_inbox_for", mail.process_inbox_for(&user.id, &options))
            .await?;
        if summary.processed > 0 {
            tracing::info!(
                user_id = %user.id,
                "📧 Inbox: {} processed, {} replied, {} tasks, {} invoices, {} leads",
                summary.processed,
                summary.replied,
                summary.tasks_created,
                summary.invoices_created,
                summary.leads_detected
            );
        }
        Ok(TaskCounts {
            emails_processed: summary.processed,
            replies_sent: summary.replied,
            tasks_created: summary.tasks_created,
            invoices_created: summary.invoices_created,
            leads_detected: summary.leads_detected,
            ..TaskCounts::default()
        })
    }

    async fn detect_meetings(&self, user: &UserRecord) -> Result<TaskCounts> {
        let affected = self
            .bounded("run_auto_detection", self.collaborators.calendar.run_auto_detection(&user.id))
            .await?;
        if affected > 0 {
            tracing::info!(user_id = %user.id, "📅 Calendar: {affected} meetings detected or updated");
        }
        Ok(TaskCounts {
            meetings_affected: affected,
            ..TaskCounts::default()
        })
    }

    async fn urgent_task_pass(&self, user: &UserRecord, now: DateTime<Utc>) -> Result<TaskCounts> {
        let tasks = self
            .bounded("list_tasks", self.collaborators.tasks.list_tasks(&user.id))
            .await?;
        Ok(self.deliver_urgent(user, tasks, now).await.1)
    }

    /// One combined alert for every urgent task not alerted inside its window.
    async fn deliver_urgent(
        &self,
        user: &UserRecord,
        tasks: Vec<Task>,
        now: DateTime<Utc>,
    ) -> (TriggerOutcome, TaskCounts) {
        let horizon = user.preferences.priority_response_time;
        let mut counts = TaskCounts::default();

        let mut claimed = Vec::new();
        for task in tasks {
            if !self.scoring.is_task_urgent(&task, now, horizon) {
                continue;
            }
            let key = NotificationKey::urgent_task(&user.id, &task.id);
            match self.dedup.try_acquire_at(&key, self.windows.urgent_task, now) {
                Some(stamp) => claimed.push((task, key, stamp)),
                None => counts.notifications_suppressed += 1,
            }
        }
        if claimed.is_empty() {
            let outcome = if counts.notifications_suppressed > 0 {
                TriggerOutcome::Suppressed
            } else {
                TriggerOutcome::Empty
            };
            return (outcome, counts);
        }

        let urgent: Vec<&Task> = claimed.iter().map(|(task, _, _)| task).collect();
        let notification = urgent_tasks_notification(&urgent, now);
        let result = self.dispatcher.dispatch(user, &notification, None).await;
        if result.success {
            counts.urgent_alerts += claimed.len() as u32;
        } else {
            for (_, key, stamp) in &claimed {
                self.dedup.release(key, *stamp);
            }
            counts.notifications_failed += 1;
        }
        (TriggerOutcome::from_dispatch(&result), counts)
    }

    async fn digest_pass<Tz>(&self, user: &UserRecord, now: &DateTime<Tz>) -> Result<TaskCounts>
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let Some(anchor) = self.gate.active_anchor(now) else {
            return Ok(TaskCounts::default());
        };
        let mut counts = TaskCounts::default();
        match self.deliver_digest(user, now, anchor).await? {
            TriggerOutcome::Sent { .. } => counts.digests_sent += 1,
            TriggerOutcome::Suppressed => counts.notifications_suppressed += 1,
            TriggerOutcome::Failed { .. } => counts.notifications_failed += 1,
            _ => {}
        }
        Ok(counts)
    }

    async fn deliver_digest<Tz>(
        &self,
        user: &UserRecord,
        now: &DateTime<Tz>,
        anchor: DigestAnchor,
    ) -> Result<TriggerOutcome>
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let key = NotificationKey::digest(&user.id, now.date_naive(), anchor);
        let Some(stamp) = self
            .dedup
            .try_acquire_at(&key, self.windows.digest, now.with_timezone(&Utc))
        else {
            return Ok(TriggerOutcome::Suppressed);
        };

        let snapshot = match self.load_snapshot(user, now).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.dedup.release(&key, stamp);
                return Err(e);
            }
        };
        let message = match self.composer.compose(user, &snapshot, now) {
            ComposedDigest::Ready(message) => message,
            ComposedDigest::Empty => {
                self.dedup.release(&key, stamp);
                tracing::debug!(user_id = %user.id, "📭 Digest empty, not sending");
                return Ok(TriggerOutcome::Empty);
            }
        };

        let result = self
            .dispatcher
            .dispatch(user, &message.to_notification(), None)
            .await;
        if !result.success {
            self.dedup.release(&key, stamp);
        }
        Ok(TriggerOutcome::from_dispatch(&result))
    }

    async fn load_snapshot<Tz: TimeZone>(&self, user: &UserRecord, now: &DateTime<Tz>) -> Result<DigestSnapshot> {
        let now_utc = now.with_timezone(&Utc);
        let day = chrono::Duration::days(1);
        let (tasks, meetings, leads) = futures::try_join!(
            self.bounded("list_tasks", self.collaborators.tasks.list_tasks(&user.id)),
            self.bounded(
                "meetings_between",
                self.collaborators
                    .calendar
                    .meetings_between(&user.id, now_utc - day, now_utc + day)
            ),
            self.bounded("list_leads", self.collaborators.leads.list_leads(&user.id)),
        )?;
        Ok(DigestSnapshot::collect(
            tasks,
            meetings,
            leads,
            now,
            self.composer.new_lead_window(),
        ))
    }

    async fn meeting_pass(&self, user: &UserRecord, now: DateTime<Utc>) -> Result<TaskCounts> {
        let meetings = self
            .bounded(
                "meetings_between",
                self.collaborators
                    .calendar
                    .meetings_between(&user.id, now, now + self.meeting_lookahead),
            )
            .await?;

        let mut counts = TaskCounts::default();
        for meeting in meetings.iter().filter(|m| self.scoring.is_meeting_imminent(m, now)) {
            let key = NotificationKey::meeting(&user.id, &meeting.id);
            let Some(stamp) = self.dedup.try_acquire_at(&key, self.windows.meeting, now) else {
                counts.notifications_suppressed += 1;
                continue;
            };
            let result = self
                .dispatcher
                .dispatch(user, &meeting_notification(meeting, now), None)
                .await;
            if result.success {
                counts.meeting_alerts += 1;
            } else {
                self.dedup.release(&key, stamp);
                counts.notifications_failed += 1;
            }
        }
        Ok(counts)
    }

    async fn lead_pass(&self, user: &UserRecord, now: DateTime<Utc>) -> Result<TaskCounts> {
        let leads = self
            .bounded("list_leads", self.collaborators.leads.list_leads(&user.id))
            .await?;

        let mut counts = TaskCounts::default();
        for lead in leads.iter().filter(|l| self.scoring.is_high_priority_lead(l, now)) {
            let key = NotificationKey::lead(&user.id, &lead.id);
            if !self.dedup.try_mark_once_at(&key, now) {
                counts.notifications_suppressed += 1;
                continue;
            }
            let result = self.dispatcher.dispatch(user, &lead_notification(lead), None).await;
            if result.success {
                counts.lead_alerts += 1;
            } else {
                self.dedup.release_once(&key);
                counts.notifications_failed += 1;
            }
        }
        Ok(counts)
    }
}

fn urgent_tasks_notification(tasks: &[&Task], now: DateTime<Utc>) -> Notification {
    let title = match tasks {
        [only] => format!("Task needs attention: {}", only.title),
        _ => format!("{} tasks need attention", tasks.len()),
    };
    let body = tasks
        .iter()
        .map(|task| match task.due_at {
            Some(due) if due >= now => {
                format!("• {} (due in {} min, {})", task.title, (due - now).num_minutes(), task.priority)
            }
            Some(_) => format!("• {} (overdue, {})", task.title, task.priority),
            None => format!("• {} ({} priority)", task.title, task.priority),
        })
        .collect::<Vec<_>>()
        .join("\n");
    Notification::new(NotificationKind::UrgentTask, NotifyPriority::Urgent, &title, &body)
}

fn meeting_notification(meeting: &Meeting, now: DateTime<Utc>) -> Notification {
    let minutes = (meeting.start_at - now).num_minutes();
    let title = format!("Meeting in {minutes} min: {}", meeting.title);
    let mut body = format!("{} starts in {minutes} minutes.", meeting.title);
    if let Some(location) = &meeting.location {
        body.push_str(&format!("\nLocation: {location}"));
    }
    Notification::new(NotificationKind::MeetingReminder, NotifyPriority::High, &title, &body)
}

fn lead_notification(lead: &Lead) -> Notification {
    let title = format!("New high-priority lead: {}", lead.name);
    let mut body = match &lead.company {
        Some(company) => format!("{} ({company})", lead.name),
        None => lead.name.clone(),
    };
    if lead.value > 0.0 {
        body.push_str(&format!("\nEstimated value: {:.0}", lead.value));
    }
    body.push_str(&format!("\nPriority: {}", lead.priority));
    Notification::new(NotificationKind::LeadAlert, NotifyPriority::High, &title, &body)
}
