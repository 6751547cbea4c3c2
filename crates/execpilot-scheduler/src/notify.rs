//! Notification model: what gets sent, and a short history of what was.
//! Lightweight: no queues, no persistence. A ring buffer of recent deliveries.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use execpilot_core::types::ChannelKind;
use serde::{Deserialize, Serialize};

/// A notification to send to the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Title/summary. Used as the email subject.
    pub title: String,
    /// Plain/markdown body for chat.
    pub body: String,
    /// Rich body for email. Rendered from `body` when absent.
    pub html: Option<String>,
    pub priority: NotifyPriority,
    pub kind: NotificationKind,
    pub timestamp: DateTime<Utc>,
}

/// Notification priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotifyPriority {
    Low,
    Normal,
    High,
    Urgent,
}

/// Which subsystem produced the notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Digest,
    UrgentTask,
    MeetingReminder,
    LeadAlert,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationKind::Digest => write!(f, "digest"),
            NotificationKind::UrgentTask => write!(f, "urgent_task"),
            NotificationKind::MeetingReminder => write!(f, "meeting_reminder"),
            NotificationKind::LeadAlert => write!(f, "lead_alert"),
        }
    }
}

impl Notification {
    pub fn new(kind: NotificationKind, priority: NotifyPriority, title: &str, body: &str) -> Self {
        Self {
            title: title.to_string(),
            body: body.to_string(),
            html: None,
            priority,
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn with_html(mut self, html: String) -> Self {
        self.html = Some(html);
        self
    }

    /// Chat rendering: priority marker, bold title, body.
    pub fn chat_text(&self) -> String {
        let priority_emoji = match self.priority {
            NotifyPriority::Urgent => "🚨",
            NotifyPriority::High => "⚠️",
            NotifyPriority::Normal => "📢",
            NotifyPriority::Low => "ℹ️",
        };
        format!("{} *{}*\n\n{}", priority_emoji, self.title, self.body)
    }

    /// Email rendering.
    pub fn email_html(&self) -> String {
        match &self.html {
            Some(html) => html.clone(),
            None => {
                let paragraphs: String = self
                    .body
                    .split("\n\n")
                    .filter(|p| !p.trim().is_empty())
                    .map(|p| format!("<p>{}</p>", escape_html(p).replace('\n', "<br>")))
                    .collect();
                format!("<h2>{}</h2>{}", escape_html(&self.title), paragraphs)
            }
        }
    }
}

/// Minimal HTML escaping for user-supplied text.
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// One entry in the delivery history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub user_id: String,
    pub title: String,
    pub kind: NotificationKind,
    pub channel: Option<ChannelKind>,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// Ring buffer of recent deliveries.
pub struct DeliveryLog {
    records: VecDeque<DeliveryRecord>,
    limit: usize,
}

impl DeliveryLog {
    pub fn new(limit: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(limit.min(128)),
            limit: limit.max(1),
        }
    }

    pub fn record(&mut self, record: DeliveryRecord) {
        self.records.push_back(record);
        while self.records.len() > self.limit {
            self.records.pop_front();
        }
    }

    /// Oldest first.
    pub fn recent(&self) -> Vec<DeliveryRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for DeliveryLog {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(n: usize) -> DeliveryRecord {
        DeliveryRecord {
            user_id: "u1".into(),
            title: format!("n{n}"),
            kind: NotificationKind::UrgentTask,
            channel: Some(ChannelKind::Chat),
            success: true,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_ring_buffer_keeps_last_entries() {
        let mut log = DeliveryLog::new(3);
        for n in 0..5 {
            log.record(record(n));
        }
        let titles: Vec<_> = log.recent().into_iter().map(|r| r.title).collect();
        assert_eq!(titles, vec!["n2", "n3", "n4"]);
    }

    #[test]
    fn test_chat_text_has_priority_marker() {
        let n = Notification::new(
            NotificationKind::UrgentTask,
            NotifyPriority::Urgent,
            "Task due soon",
            "Send contract",
        );
        assert!(n.chat_text().starts_with("🚨 *Task due soon*"));
    }

    #[test]
    fn test_email_html_escapes_body() {
        let n = Notification::new(
            NotificationKind::LeadAlert,
            NotifyPriority::High,
            "New lead",
            "<script>x</script>\n\nsecond",
        );
        let html = n.email_html();
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("<p>second</p>"));
    }
}
