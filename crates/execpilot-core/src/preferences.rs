//! Typed per-user automation preferences.
//!
//! The account subsystem stores preferences as a loose JSON blob. They are
//! parsed once per user per cycle into [`UserPreferences`]. Every recognised
//! flag is enabled unless the blob sets it to an explicit `false`; `pause_ai`
//! is the one exception and defaults to off. Both `snake_case` and the
//! account service's `camelCase` keys are accepted.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::ChannelKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Value")]
pub struct UserPreferences {
    /// Skip the user entirely, before any external call.
    pub pause_ai: bool,
    pub auto_process_emails: bool,
    pub auto_reply: bool,
    pub auto_manage_tasks: bool,
    pub auto_manage_calendar: bool,
    pub notifications_enabled: bool,
    pub digest_enabled: bool,
    pub urgent_task_alerts: bool,
    pub meeting_reminders: bool,
    pub lead_alerts: bool,
    pub slack_enabled: bool,
    pub slack_channel_id: Option<String>,
    /// Minutes before a due date at which a task becomes urgent.
    pub priority_response_time: Option<u32>,
    pub preferred_channel: Option<ChannelKind>,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            pause_ai: false,
            auto_process_emails: true,
            auto_reply: true,
            auto_manage_tasks: true,
            auto_manage_calendar: true,
            notifications_enabled: true,
            digest_enabled: true,
            urgent_task_alerts: true,
            meeting_reminders: true,
            lead_alerts: true,
            slack_enabled: true,
            slack_channel_id: None,
            priority_response_time: None,
            preferred_channel: None,
        }
    }
}

impl UserPreferences {
    /// Parse a preference blob. Never fails: unknown keys are ignored and
    /// malformed values keep their default.
    pub fn parse(value: &Value) -> Self {
        let defaults = Self::default();
        let Some(obj) = value.as_object() else {
            if !value.is_null() {
                tracing::warn!("⚠️ Preferences blob is not an object, using defaults");
            }
            return defaults;
        };

        Self {
            pause_ai: flag(obj, &["pause_ai", "pauseAI", "pauseAi"], false),
            auto_process_emails: flag(
                obj,
                &["auto_process_emails", "autoProcessEmails"],
                defaults.auto_process_emails,
            ),
            auto_reply: flag(obj, &["auto_reply", "autoReply"], defaults.auto_reply),
            auto_manage_tasks: flag(
                obj,
                &["auto_manage_tasks", "autoManageTasks"],
                defaults.auto_manage_tasks,
            ),
            auto_manage_calendar: flag(
                obj,
                &["auto_manage_calendar", "autoManageCalendar"],
                defaults.auto_manage_calendar,
            ),
            notifications_enabled: flag(
                obj,
                &["notifications_enabled", "notificationsEnabled"],
                defaults.notifications_enabled,
            ),
            digest_enabled: flag(obj, &["digest_enabled", "digestEnabled"], defaults.digest_enabled),
            urgent_task_alerts: flag(
                obj,
                &["urgent_task_alerts", "urgentTaskAlerts"],
                defaults.urgent_task_alerts,
            ),
            meeting_reminders: flag(
                obj,
                &["meeting_reminders", "meetingReminders"],
                defaults.meeting_reminders,
            ),
            lead_alerts: flag(obj, &["lead_alerts", "leadAlerts"], defaults.lead_alerts),
            slack_enabled: flag(obj, &["slack_enabled", "slackEnabled"], defaults.slack_enabled),
            slack_channel_id: lookup(obj, &["slack_channel_id", "slackChannelId"])
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(String::from),
            priority_response_time: lookup(obj, &["priority_response_time", "priorityResponseTime"])
                .and_then(|v| match v.as_u64() {
                    Some(n) => u32::try_from(n).ok(),
                    None => {
                        tracing::warn!("⚠️ Ignoring non-numeric priority_response_time: {v}");
                        None
                    }
                }),
            preferred_channel: lookup(obj, &["preferred_channel", "preferredChannel"])
                .and_then(Value::as_str)
                .and_then(|s| match s.to_ascii_lowercase().as_str() {
                    "chat" | "slack" => Some(ChannelKind::Chat),
                    "email" => Some(ChannelKind::Email),
                    other => {
                        tracing::warn!("⚠️ Unknown preferred channel '{other}'");
                        None
                    }
                }),
        }
    }

    /// Preferences for a user who has paused automation.
    pub fn paused() -> Self {
        Self {
            pause_ai: true,
            ..Self::default()
        }
    }
}

impl From<Value> for UserPreferences {
    fn from(value: Value) -> Self {
        Self::parse(&value)
    }
}

fn lookup<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k)).filter(|v| !v.is_null())
}

fn flag(obj: &Map<String, Value>, keys: &[&str], default: bool) -> bool {
    match lookup(obj, keys) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => false,
        Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => true,
        Some(other) => {
            tracing::warn!("⚠️ Ignoring malformed preference {}: {other}", keys[0]);
            default
        }
        None => default,
    }
}
