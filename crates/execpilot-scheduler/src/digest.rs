//! Digests. The periodic multi-section summary.
//!
//! [`DigestTimeGate`] decides whether a digest window is open right now.
//! [`DigestSnapshot`] is an ephemeral read of the user's tasks, meetings and
//! leads. [`DigestComposer`] turns a snapshot into a [`DigestMessage`], or
//! [`ComposedDigest::Empty`] when there is nothing to say. Callers must not
//! send an empty digest.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};
use execpilot_core::config::{DigestAnchor, DigestConfig};
use execpilot_core::types::{Lead, Meeting, Priority, Task, UserRecord};
use serde::{Deserialize, Serialize};

use crate::notify::{escape_html, Notification, NotificationKind, NotifyPriority};

/// Wall-clock gate: open for `window_minutes` after each anchor.
#[derive(Debug, Clone)]
pub struct DigestTimeGate {
    anchors: Vec<DigestAnchor>,
    window_minutes: u32,
}

impl DigestTimeGate {
    pub fn new(config: &DigestConfig) -> Self {
        Self {
            anchors: config.anchors.clone(),
            window_minutes: config.window_minutes,
        }
    }

    /// The anchor whose window contains `now`, if any.
    pub fn active_anchor<T: Timelike>(&self, now: &T) -> Option<DigestAnchor> {
        let (hour, minute) = (now.hour(), now.minute());
        self.anchors.iter().copied().find(|a| {
            hour == a.hour && minute >= a.minute && minute < a.minute + self.window_minutes
        })
    }

    pub fn is_digest_window<T: Timelike>(&self, now: &T) -> bool {
        self.active_anchor(now).is_some()
    }

    /// Dedup bucket for a digest sent at `now`: the latest anchor at or before
    /// it, or midnight before the first anchor of the day.
    pub fn bucket_for<T: Timelike>(&self, now: &T) -> DigestAnchor {
        let minute_of_day = |hour: u32, minute: u32| hour * 60 + minute;
        let current = minute_of_day(now.hour(), now.minute());
        self.anchors
            .iter()
            .copied()
            .filter(|a| minute_of_day(a.hour, a.minute) <= current)
            .max_by_key(|a| minute_of_day(a.hour, a.minute))
            .unwrap_or(DigestAnchor::new(0, 0))
    }
}

impl Default for DigestTimeGate {
    fn default() -> Self {
        Self::new(&DigestConfig::default())
    }
}

/// Label derived from the local hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    Morning,
    Midday,
    Evening,
}

impl TimeOfDay {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => TimeOfDay::Morning,
            12..=16 => TimeOfDay::Midday,
            _ => TimeOfDay::Evening,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TimeOfDay::Morning => "morning",
            TimeOfDay::Midday => "midday",
            TimeOfDay::Evening => "evening",
        }
    }
}

/// Point-in-time view of what a digest summarises.
#[derive(Debug, Clone, Default)]
pub struct DigestSnapshot {
    pub pending_tasks: Vec<Task>,
    pub overdue_tasks: Vec<Task>,
    pub completed_tasks: Vec<Task>,
    pub today_meetings: Vec<Meeting>,
    pub new_leads: Vec<Lead>,
}

impl DigestSnapshot {
    /// Partition raw collaborator reads. "Today" is the calendar date of `now`
    /// in its own time zone.
    pub fn collect<Tz: TimeZone>(
        tasks: Vec<Task>,
        meetings: Vec<Meeting>,
        leads: Vec<Lead>,
        now: &DateTime<Tz>,
        new_lead_window: Duration,
    ) -> Self {
        let tz = now.timezone();
        let today = now.date_naive();
        let now_utc = now.with_timezone(&Utc);
        let local_date = |at: DateTime<Utc>| at.with_timezone(&tz).date_naive();

        let mut snapshot = Self::default();
        for task in tasks {
            if !task.is_open() {
                if task.completed_at.is_some_and(|at| local_date(at) == today) {
                    snapshot.completed_tasks.push(task);
                }
            } else if task.due_at.is_some_and(|due| due < now_utc) {
                snapshot.overdue_tasks.push(task);
            } else {
                snapshot.pending_tasks.push(task);
            }
        }
        snapshot.today_meetings = meetings
            .into_iter()
            .filter(|m| local_date(m.start_at) == today)
            .collect();
        snapshot.today_meetings.sort_by_key(|m| m.start_at);
        snapshot.new_leads = leads
            .into_iter()
            .filter(|l| now_utc - l.created_at <= new_lead_window)
            .collect();
        snapshot
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestCounts {
    pub completed: usize,
    pub due_today: usize,
    pub overdue: usize,
    pub meetings_today: usize,
    pub new_leads: usize,
}

impl DigestCounts {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A composed, ready-to-send digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestMessage {
    pub user_id: String,
    pub greeting_name: String,
    pub time_of_day: TimeOfDay,
    pub counts: DigestCounts,
    /// Pre-rendered inline task lines (at most `max_tasks`).
    pub task_lines: Vec<String>,
    /// Pre-rendered inline meeting lines (at most `max_meetings`).
    pub meeting_lines: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum ComposedDigest {
    /// Nothing to report. Intentional; the caller suppresses the send.
    Empty,
    Ready(DigestMessage),
}

impl ComposedDigest {
    pub fn is_empty(&self) -> bool {
        matches!(self, ComposedDigest::Empty)
    }
}

/// Builds digests from snapshots.
#[derive(Debug, Clone)]
pub struct DigestComposer {
    max_tasks: usize,
    max_meetings: usize,
    new_lead_window: Duration,
}

impl DigestComposer {
    pub fn new(config: &DigestConfig) -> Self {
        Self {
            max_tasks: config.max_tasks,
            max_meetings: config.max_meetings,
            new_lead_window: Duration::hours(config.new_lead_hours),
        }
    }

    pub fn new_lead_window(&self) -> Duration {
        self.new_lead_window
    }

    pub fn compose<Tz: TimeZone>(
        &self,
        user: &UserRecord,
        snapshot: &DigestSnapshot,
        now: &DateTime<Tz>,
    ) -> ComposedDigest
    where
        Tz::Offset: std::fmt::Display,
    {
        let tz = now.timezone();
        let today = now.date_naive();
        let now_utc = now.with_timezone(&Utc);

        let due_today: Vec<&Task> = snapshot
            .pending_tasks
            .iter()
            .filter(|t| {
                t.due_at
                    .is_some_and(|due| due.with_timezone(&tz).date_naive() == today)
            })
            .collect();

        let counts = DigestCounts {
            completed: snapshot.completed_tasks.len(),
            due_today: due_today.len(),
            overdue: snapshot.overdue_tasks.len(),
            meetings_today: snapshot.today_meetings.len(),
            new_leads: snapshot
                .new_leads
                .iter()
                .filter(|l| now_utc - l.created_at <= self.new_lead_window)
                .count(),
        };

        if counts.is_empty() {
            return ComposedDigest::Empty;
        }

        let task_lines = self.inline_tasks(snapshot, &due_today, &tz, today);
        let meeting_lines = snapshot
            .today_meetings
            .iter()
            .filter(|m| m.start_at >= now_utc)
            .take(self.max_meetings)
            .map(|m| {
                let mut line = format!("{} {}", m.start_at.with_timezone(&tz).format("%H:%M"), m.title);
                if let Some(loc) = &m.location {
                    line.push_str(&format!(" ({loc})"));
                }
                line
            })
            .collect();

        ComposedDigest::Ready(DigestMessage {
            user_id: user.id.clone(),
            greeting_name: user.greeting_name().to_string(),
            time_of_day: TimeOfDay::from_hour(now.hour()),
            counts,
            task_lines,
            meeting_lines,
        })
    }

    /// Overdue first, then due today, then other high-priority pending work.
    fn inline_tasks<Tz: TimeZone>(
        &self,
        snapshot: &DigestSnapshot,
        due_today: &[&Task],
        tz: &Tz,
        today: NaiveDate,
    ) -> Vec<String>
    where
        Tz::Offset: std::fmt::Display,
    {
        let mut overdue: Vec<&Task> = snapshot.overdue_tasks.iter().collect();
        overdue.sort_by_key(|t| t.due_at);
        let mut today_list: Vec<&Task> = due_today.to_vec();
        today_list.sort_by_key(|t| t.due_at);
        let high = snapshot.pending_tasks.iter().filter(|t| {
            t.priority == Priority::High
                && !t.due_at.is_some_and(|d| d.with_timezone(tz).date_naive() == today)
        });

        let overdue_lines = overdue.into_iter().map(|t| format!("⏰ {} (overdue)", t.title));
        let today_lines = today_list.into_iter().map(|t| match t.due_at {
            Some(due) => format!("📌 {} (due {})", t.title, due.with_timezone(tz).format("%H:%M")),
            None => format!("📌 {}", t.title),
        });
        let high_lines = high.map(|t| format!("🔺 {}", t.title));

        overdue_lines
            .chain(today_lines)
            .chain(high_lines)
            .take(self.max_tasks)
            .collect()
    }
}

impl Default for DigestComposer {
    fn default() -> Self {
        Self::new(&DigestConfig::default())
    }
}

impl DigestMessage {
    pub fn title(&self) -> String {
        format!("Your {} briefing", self.time_of_day.label())
    }

    fn summary_lines(&self) -> Vec<String> {
        let c = &self.counts;
        let mut lines = Vec::new();
        if c.completed > 0 {
            lines.push(format!("✅ {} task(s) completed today", c.completed));
        }
        if c.due_today > 0 {
            lines.push(format!("📌 {} task(s) due today", c.due_today));
        }
        if c.overdue > 0 {
            lines.push(format!("⏰ {} overdue task(s)", c.overdue));
        }
        if c.meetings_today > 0 {
            lines.push(format!("📅 {} meeting(s) today", c.meetings_today));
        }
        if c.new_leads > 0 {
            lines.push(format!("💼 {} new lead(s) in the last 24h", c.new_leads));
        }
        lines
    }

    /// Plain/markdown text for chat.
    pub fn text(&self) -> String {
        let mut out = format!("Good {}, {}!\n\n", self.time_of_day.label(), self.greeting_name);
        out.push_str(&self.summary_lines().join("\n"));
        if !self.task_lines.is_empty() {
            out.push_str("\n\n*Tasks*\n");
            out.push_str(&self.task_lines.join("\n"));
        }
        if !self.meeting_lines.is_empty() {
            out.push_str("\n\n*Upcoming meetings*\n");
            out.push_str(&self.meeting_lines.join("\n"));
        }
        out
    }

    pub fn html(&self) -> String {
        let list = |items: &[String]| -> String {
            let lis: String = items
                .iter()
                .map(|i| format!("<li>{}</li>", escape_html(i)))
                .collect();
            format!("<ul>{lis}</ul>")
        };
        let mut out = format!(
            "<h2>Good {}, {}!</h2>",
            self.time_of_day.label(),
            escape_html(&self.greeting_name)
        );
        out.push_str(&list(&self.summary_lines()));
        if !self.task_lines.is_empty() {
            out.push_str("<h3>Tasks</h3>");
            out.push_str(&list(&self.task_lines));
        }
        if !self.meeting_lines.is_empty() {
            out.push_str("<h3>Upcoming meetings</h3>");
            out.push_str(&list(&self.meeting_lines));
        }
        out
    }

    pub fn to_notification(&self) -> Notification {
        Notification::new(
            NotificationKind::Digest,
            NotifyPriority::Normal,
            &self.title(),
            &self.text(),
        )
        .with_html(self.html())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_gate_default_windows() {
        let gate = DigestTimeGate::default();
        assert!(gate.is_digest_window(&at(7, 0)));
        assert!(gate.is_digest_window(&at(7, 4)));
        assert!(!gate.is_digest_window(&at(7, 5)));
        assert!(gate.is_digest_window(&at(12, 3)));
        assert!(gate.is_digest_window(&at(17, 0)));
        assert!(!gate.is_digest_window(&at(6, 59)));
        assert!(!gate.is_digest_window(&at(8, 0)));
    }

    #[test]
    fn test_bucket_is_latest_passed_anchor() {
        let gate = DigestTimeGate::default();
        assert_eq!(gate.bucket_for(&at(7, 2)), DigestAnchor::new(7, 0));
        assert_eq!(gate.bucket_for(&at(9, 45)), DigestAnchor::new(7, 0));
        assert_eq!(gate.bucket_for(&at(23, 10)), DigestAnchor::new(17, 0));
        assert_eq!(gate.bucket_for(&at(3, 0)), DigestAnchor::new(0, 0));
    }

    #[test]
    fn test_gate_custom_anchor_with_minutes() {
        let config = DigestConfig {
            anchors: vec![DigestAnchor::new(9, 30)],
            ..DigestConfig::default()
        };
        let gate = DigestTimeGate::new(&config);
        assert!(!gate.is_digest_window(&at(9, 29)));
        assert_eq!(gate.active_anchor(&at(9, 32)), Some(DigestAnchor::new(9, 30)));
        assert!(!gate.is_digest_window(&at(9, 35)));
    }

    #[test]
    fn test_time_of_day_labels() {
        assert_eq!(TimeOfDay::from_hour(4), TimeOfDay::Evening);
        assert_eq!(TimeOfDay::from_hour(5), TimeOfDay::Morning);
        assert_eq!(TimeOfDay::from_hour(11), TimeOfDay::Morning);
        assert_eq!(TimeOfDay::from_hour(12), TimeOfDay::Midday);
        assert_eq!(TimeOfDay::from_hour(16), TimeOfDay::Midday);
        assert_eq!(TimeOfDay::from_hour(17), TimeOfDay::Evening);
    }

    #[test]
    fn test_empty_snapshot_is_sentinel() {
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 7, 1, 0).unwrap();
        let user = UserRecord::new("u1");
        let composed = DigestComposer::default().compose(&user, &DigestSnapshot::default(), &now);
        assert!(composed.is_empty());
    }

    #[test]
    fn test_pending_tasks_not_due_today_are_empty() {
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 7, 1, 0).unwrap();
        let tasks = vec![Task::new("t1", "someday").due(now + Duration::days(3))];
        let snapshot = DigestSnapshot::collect(tasks, vec![], vec![], &now, Duration::hours(24));
        let composed = DigestComposer::default().compose(&UserRecord::new("u1"), &snapshot, &now);
        assert!(composed.is_empty());
    }

    #[test]
    fn test_compose_counts_and_inlining() {
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 7, 2, 0).unwrap();
        let mut tasks: Vec<Task> = (0..6)
            .map(|i| Task::new(format!("d{i}"), format!("due {i}")).due(now + Duration::hours(i + 1)))
            .collect();
        tasks.push(Task::new("o1", "late report").due(now - Duration::hours(20)));
        tasks.push(Task::new("c1", "sent deck").completed(now - Duration::hours(1)));
        tasks.push(Task::new("c2", "old done").completed(now - Duration::days(2)));

        let meetings: Vec<Meeting> = (0..4)
            .map(|i| Meeting::new(format!("m{i}"), format!("meeting {i}"), now + Duration::hours(i + 1)))
            .collect();
        let leads = vec![
            Lead::new("l1", "Acme", now - Duration::hours(3)),
            Lead::new("l2", "Stale", now - Duration::hours(30)),
        ];

        let snapshot = DigestSnapshot::collect(tasks, meetings, leads, &now, Duration::hours(24));
        let mut user = UserRecord::new("u1");
        user.display_name = Some("Dana".into());

        let ComposedDigest::Ready(msg) = DigestComposer::default().compose(&user, &snapshot, &now) else {
            panic!("expected a digest");
        };
        assert_eq!(msg.counts.completed, 1);
        assert_eq!(msg.counts.due_today, 6);
        assert_eq!(msg.counts.overdue, 1);
        assert_eq!(msg.counts.meetings_today, 4);
        assert_eq!(msg.counts.new_leads, 1);
        assert_eq!(msg.task_lines.len(), 5);
        assert!(msg.task_lines[0].contains("late report"));
        assert_eq!(msg.meeting_lines.len(), 3);
        assert_eq!(msg.time_of_day, TimeOfDay::Morning);
        assert!(msg.text().starts_with("Good morning, Dana!"));

        let n = msg.to_notification();
        assert_eq!(n.title, "Your morning briefing");
        assert!(n.html.unwrap().contains("<h3>Tasks</h3>"));
    }

    #[test]
    fn test_evening_label() {
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 17, 0, 0).unwrap();
        let snapshot = DigestSnapshot {
            completed_tasks: vec![Task::new("c1", "done").completed(now)],
            ..DigestSnapshot::default()
        };
        let ComposedDigest::Ready(msg) = DigestComposer::default().compose(&UserRecord::new("u1"), &snapshot, &now) else {
            panic!("expected a digest");
        };
        assert_eq!(msg.time_of_day, TimeOfDay::Evening);
    }
}
