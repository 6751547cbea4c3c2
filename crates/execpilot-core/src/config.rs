//! ExecPilot configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ExecPilotError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecPilotConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub digest: DigestConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub inbox: InboxConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub local: LocalConfig,
}

impl ExecPilotConfig {
    /// Load config from the default path (~/.execpilot/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ExecPilotError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| ExecPilotError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = self.to_toml()?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ExecPilotError::Config(format!("Failed to serialize config: {e}")))
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the ExecPilot home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".execpilot")
    }

    /// Reject configurations the scheduler cannot honour.
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        self.digest.validate()?;
        if self.notifications.retention_hours <= 0 {
            return Err(ExecPilotError::config("notifications.retention_hours must be > 0"));
        }
        // Swept lead marks must outlive the window in which a lead can fire.
        if self.notifications.retention_hours < self.scoring.fresh_lead_hours {
            return Err(ExecPilotError::config(
                "notifications.retention_hours must be >= scoring.fresh_lead_hours",
            ));
        }
        Ok(())
    }
}

/// Adaptive scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default = "default_min_interval_minutes")]
    pub min_interval_minutes: u64,
    #[serde(default = "default_max_interval_minutes")]
    pub max_interval_minutes: u64,
    /// Run the first cycle as soon as the scheduler starts.
    #[serde(default = "bool_true")]
    pub run_on_start: bool,
    /// Worker pool size for per-user processing. 1 = sequential.
    #[serde(default = "default_max_concurrent_users")]
    pub max_concurrent_users: usize,
    /// Per external call timeout inside a user's processing.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_load_timeout_secs")]
    pub load_timeout_secs: u64,
    /// Sweep the notification deduplicator every N scheduled cycles.
    #[serde(default = "default_sweep_every_cycles")]
    pub sweep_every_cycles: u64,
    #[serde(default)]
    pub retune: RetunePolicy,
}

fn bool_true() -> bool { true }
fn default_interval_minutes() -> u64 { 5 }
fn default_min_interval_minutes() -> u64 { 1 }
fn default_max_interval_minutes() -> u64 { 60 }
fn default_max_concurrent_users() -> usize { 5 }
fn default_call_timeout_secs() -> u64 { 30 }
fn default_load_timeout_secs() -> u64 { 30 }
fn default_sweep_every_cycles() -> u64 { 60 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            min_interval_minutes: default_min_interval_minutes(),
            max_interval_minutes: default_max_interval_minutes(),
            run_on_start: true,
            max_concurrent_users: default_max_concurrent_users(),
            call_timeout_secs: default_call_timeout_secs(),
            load_timeout_secs: default_load_timeout_secs(),
            sweep_every_cycles: default_sweep_every_cycles(),
            retune: RetunePolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub const MS_PER_MINUTE: u64 = 60_000;

    pub fn min_interval_ms(&self) -> u64 {
        self.min_interval_minutes * Self::MS_PER_MINUTE
    }

    pub fn max_interval_ms(&self) -> u64 {
        self.max_interval_minutes * Self::MS_PER_MINUTE
    }

    pub fn initial_interval_ms(&self) -> u64 {
        self.interval_minutes * Self::MS_PER_MINUTE
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_interval_minutes == 0 {
            return Err(ExecPilotError::config("scheduler.min_interval_minutes must be > 0"));
        }
        if self.min_interval_minutes > self.max_interval_minutes {
            return Err(ExecPilotError::Config(format!(
                "scheduler interval bounds inverted: min {} > max {}",
                self.min_interval_minutes, self.max_interval_minutes
            )));
        }
        if !(self.min_interval_minutes..=self.max_interval_minutes).contains(&self.interval_minutes) {
            return Err(ExecPilotError::Config(format!(
                "scheduler.interval_minutes {} outside [{}, {}]",
                self.interval_minutes, self.min_interval_minutes, self.max_interval_minutes
            )));
        }
        if self.max_concurrent_users == 0 {
            return Err(ExecPilotError::config("scheduler.max_concurrent_users must be >= 1"));
        }
        if self.call_timeout_secs == 0 || self.load_timeout_secs == 0 {
            return Err(ExecPilotError::config("scheduler timeouts must be > 0"));
        }
        self.retune.validate()
    }
}

/// Interval retuning policy. The constants are policy, not protocol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetunePolicy {
    /// Cycle/interval ratio above which the interval grows.
    #[serde(default = "default_grow_threshold")]
    pub grow_threshold: f64,
    /// Cycle/interval ratio below which the interval shrinks.
    #[serde(default = "default_shrink_threshold")]
    pub shrink_threshold: f64,
    #[serde(default = "default_grow_factor")]
    pub grow_factor: f64,
    #[serde(default = "default_shrink_factor")]
    pub shrink_factor: f64,
}

fn default_grow_threshold() -> f64 { 0.2 }
fn default_shrink_threshold() -> f64 { 0.05 }
fn default_grow_factor() -> f64 { 1.5 }
fn default_shrink_factor() -> f64 { 0.8 }

impl Default for RetunePolicy {
    fn default() -> Self {
        Self {
            grow_threshold: default_grow_threshold(),
            shrink_threshold: default_shrink_threshold(),
            grow_factor: default_grow_factor(),
            shrink_factor: default_shrink_factor(),
        }
    }
}

impl RetunePolicy {
    pub fn validate(&self) -> Result<()> {
        if !(self.shrink_threshold >= 0.0 && self.shrink_threshold <= self.grow_threshold) {
            return Err(ExecPilotError::config(
                "scheduler.retune thresholds must satisfy 0 <= shrink <= grow",
            ));
        }
        if self.grow_factor <= 1.0 {
            return Err(ExecPilotError::config("scheduler.retune.grow_factor must be > 1"));
        }
        if !(self.shrink_factor > 0.0 && self.shrink_factor < 1.0) {
            return Err(ExecPilotError::config("scheduler.retune.shrink_factor must be in (0, 1)"));
        }
        Ok(())
    }
}

/// A wall-clock time at which a digest window opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestAnchor {
    pub hour: u32,
    #[serde(default)]
    pub minute: u32,
}

impl DigestAnchor {
    pub const fn new(hour: u32, minute: u32) -> Self {
        Self { hour, minute }
    }
}

/// Digest configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestConfig {
    #[serde(default = "default_anchors")]
    pub anchors: Vec<DigestAnchor>,
    #[serde(default = "default_digest_window_minutes")]
    pub window_minutes: u32,
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,
    #[serde(default = "default_max_meetings")]
    pub max_meetings: usize,
    /// Leads created within this many hours count as new.
    #[serde(default = "default_new_lead_hours")]
    pub new_lead_hours: i64,
}

fn default_anchors() -> Vec<DigestAnchor> {
    vec![DigestAnchor::new(7, 0), DigestAnchor::new(12, 0), DigestAnchor::new(17, 0)]
}
fn default_digest_window_minutes() -> u32 { 5 }
fn default_max_tasks() -> usize { 5 }
fn default_max_meetings() -> usize { 3 }
fn default_new_lead_hours() -> i64 { 24 }

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            anchors: default_anchors(),
            window_minutes: default_digest_window_minutes(),
            max_tasks: default_max_tasks(),
            max_meetings: default_max_meetings(),
            new_lead_hours: default_new_lead_hours(),
        }
    }
}

impl DigestConfig {
    pub fn validate(&self) -> Result<()> {
        for anchor in &self.anchors {
            if anchor.hour > 23 || anchor.minute > 59 {
                return Err(ExecPilotError::Config(format!(
                    "invalid digest anchor {:02}:{:02}",
                    anchor.hour, anchor.minute
                )));
            }
        }
        if self.window_minutes == 0 {
            return Err(ExecPilotError::config("digest.window_minutes must be > 0"));
        }
        Ok(())
    }
}

/// Suppression windows per notification class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_digest_suppress")]
    pub digest_window_minutes: i64,
    #[serde(default = "default_urgent_task_suppress")]
    pub urgent_task_window_minutes: i64,
    #[serde(default = "default_meeting_suppress")]
    pub meeting_window_minutes: i64,
    /// Records older than this are dropped by the periodic sweep.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: i64,
}

fn default_digest_suppress() -> i64 { 60 }
fn default_urgent_task_suppress() -> i64 { 30 }
fn default_meeting_suppress() -> i64 { 5 }
fn default_retention_hours() -> i64 { 24 }

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            digest_window_minutes: default_digest_suppress(),
            urgent_task_window_minutes: default_urgent_task_suppress(),
            meeting_window_minutes: default_meeting_suppress(),
            retention_hours: default_retention_hours(),
        }
    }
}

/// Priority scoring heuristics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Case-insensitive substrings matched against the sender.
    #[serde(default)]
    pub important_contacts: Vec<String>,
    #[serde(default = "default_important_keywords")]
    pub important_keywords: Vec<String>,
    #[serde(default = "default_lead_terms")]
    pub lead_terms: Vec<String>,
    #[serde(default = "default_payment_terms")]
    pub payment_terms: Vec<String>,
    #[serde(default = "default_urgent_due_minutes")]
    pub urgent_due_minutes: i64,
    #[serde(default = "default_imminent_meeting_minutes")]
    pub imminent_meeting_minutes: i64,
    #[serde(default = "default_lead_value_threshold")]
    pub lead_value_threshold: f64,
    #[serde(default = "default_fresh_lead_hours")]
    pub fresh_lead_hours: i64,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}
fn default_important_keywords() -> Vec<String> {
    words(&["urgent", "important", "deadline", "asap", "payment"])
}
fn default_lead_terms() -> Vec<String> {
    words(&["project", "inquiry", "service", "quote", "proposal"])
}
fn default_payment_terms() -> Vec<String> {
    words(&["invoice", "payment", "bill", "receipt"])
}
fn default_urgent_due_minutes() -> i64 { 30 }
fn default_imminent_meeting_minutes() -> i64 { 15 }
fn default_lead_value_threshold() -> f64 { 10_000.0 }
fn default_fresh_lead_hours() -> i64 { 2 }

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            important_contacts: Vec::new(),
            important_keywords: default_important_keywords(),
            lead_terms: default_lead_terms(),
            payment_terms: default_payment_terms(),
            urgent_due_minutes: default_urgent_due_minutes(),
            imminent_meeting_minutes: default_imminent_meeting_minutes(),
            lead_value_threshold: default_lead_value_threshold(),
            fresh_lead_hours: default_fresh_lead_hours(),
        }
    }
}

/// Inbox processing limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxConfig {
    #[serde(default = "default_max_emails")]
    pub max_emails: usize,
}

fn default_max_emails() -> usize { 20 }

impl Default for InboxConfig {
    fn default() -> Self {
        Self { max_emails: default_max_emails() }
    }
}

/// Notification dispatch tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    /// Consecutive failures before a channel is treated as unhealthy.
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_send_timeout_secs() -> u64 { 15 }
fn default_max_failures() -> u32 { 3 }
fn default_cooldown_secs() -> u64 { 60 }
fn default_history_limit() -> usize { 100 }

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            send_timeout_secs: default_send_timeout_secs(),
            max_failures: default_max_failures(),
            cooldown_secs: default_cooldown_secs(),
            history_limit: default_history_limit(),
        }
    }
}

/// File-backed collaborators used by the standalone binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Chat notifications are POSTed here when set.
    #[serde(default)]
    pub chat_webhook_url: Option<String>,
    /// Email notifications are written as HTML files under this directory.
    #[serde(default = "default_outbox_dir")]
    pub outbox_dir: String,
}

fn default_data_dir() -> String { "~/.execpilot/data".into() }
fn default_outbox_dir() -> String { "~/.execpilot/outbox".into() }

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            chat_webhook_url: None,
            outbox_dir: default_outbox_dir(),
        }
    }
}
