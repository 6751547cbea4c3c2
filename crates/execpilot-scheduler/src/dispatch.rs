//! Notification dispatch: sends a notification through the best available
//! channel, with a single fallback.
//!
//! Order: caller hint (or the user's preferred channel) if available, then
//! chat if configured, enabled for the user, connected and healthy, then
//! email. A failure on the first channel triggers exactly one attempt on the
//! next; the same channel is never tried twice in one call.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use execpilot_core::config::DispatchConfig;
use execpilot_core::traits::{ChatChannel, EmailChannel};
use execpilot_core::types::{ChannelKind, UserRecord};
use serde::{Deserialize, Serialize};

use crate::notify::{DeliveryLog, DeliveryRecord, Notification};

/// Classified dispatch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchErrorKind {
    NoChannelAvailable,
    ChannelFailed,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchError {
    pub kind: DispatchErrorKind,
    pub message: String,
}

impl DispatchError {
    fn new(kind: DispatchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Outcome of one `dispatch` call. Never an `Err`: failures are data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResult {
    pub success: bool,
    pub channel_used: Option<ChannelKind>,
    /// Channels tried, in order.
    pub attempts: Vec<ChannelKind>,
    pub error: Option<DispatchError>,
}

impl DispatchResult {
    fn delivered(channel: ChannelKind, attempts: Vec<ChannelKind>) -> Self {
        Self {
            success: true,
            channel_used: Some(channel),
            attempts,
            error: None,
        }
    }

    fn failed(attempts: Vec<ChannelKind>, error: DispatchError) -> Self {
        Self {
            success: false,
            channel_used: None,
            attempts,
            error: Some(error),
        }
    }
}

/// Per-channel health tracking: unhealthy after `max_failures` consecutive
/// failures, until `cooldown_secs` have passed since the last one.
struct ChannelHealth {
    failures: AtomicU32,
    /// Unix secs of the last failure, 0 = never failed.
    last_failure: AtomicU64,
    max_failures: u32,
    cooldown_secs: u64,
}

impl ChannelHealth {
    fn new(config: &DispatchConfig) -> Self {
        Self {
            failures: AtomicU32::new(0),
            last_failure: AtomicU64::new(0),
            max_failures: config.max_failures.max(1),
            cooldown_secs: config.cooldown_secs,
        }
    }

    fn is_healthy(&self) -> bool {
        if self.failures.load(Ordering::Relaxed) < self.max_failures {
            return true;
        }
        let last = self.last_failure.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) > self.cooldown_secs
    }

    fn record_success(&self) {
        self.failures.store(0, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.last_failure.store(now_secs(), Ordering::Relaxed);
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Sends notifications through chat and email with fallback.
pub struct NotificationDispatcher {
    chat: Option<Arc<dyn ChatChannel>>,
    email: Option<Arc<dyn EmailChannel>>,
    chat_health: ChannelHealth,
    email_health: ChannelHealth,
    send_timeout: Duration,
    log: Mutex<DeliveryLog>,
}

impl NotificationDispatcher {
    pub fn new(config: &DispatchConfig) -> Self {
        Self {
            chat: None,
            email: None,
            chat_health: ChannelHealth::new(config),
            email_health: ChannelHealth::new(config),
            send_timeout: Duration::from_secs(config.send_timeout_secs),
            log: Mutex::new(DeliveryLog::new(config.history_limit)),
        }
    }

    pub fn with_chat(mut self, chat: Arc<dyn ChatChannel>) -> Self {
        tracing::info!("💬 Chat channel registered: {}", chat.name());
        self.chat = Some(chat);
        self
    }

    pub fn with_email(mut self, email: Arc<dyn EmailChannel>) -> Self {
        tracing::info!("📧 Email channel registered: {}", email.name());
        self.email = Some(email);
        self
    }

    fn health(&self, kind: ChannelKind) -> &ChannelHealth {
        match kind {
            ChannelKind::Chat => &self.chat_health,
            ChannelKind::Email => &self.email_health,
        }
    }

    /// Health of each configured channel: (kind, healthy, consecutive failures).
    pub fn health_status(&self) -> Vec<(ChannelKind, bool, u32)> {
        let mut out = Vec::new();
        if self.chat.is_some() {
            out.push((
                ChannelKind::Chat,
                self.chat_health.is_healthy(),
                self.chat_health.failures.load(Ordering::Relaxed),
            ));
        }
        if self.email.is_some() {
            out.push((
                ChannelKind::Email,
                self.email_health.is_healthy(),
                self.email_health.failures.load(Ordering::Relaxed),
            ));
        }
        out
    }

    /// Recent deliveries, oldest first.
    pub fn recent_deliveries(&self) -> Vec<DeliveryRecord> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).recent()
    }

    async fn is_available(&self, kind: ChannelKind, user: &UserRecord) -> bool {
        if !self.health(kind).is_healthy() {
            tracing::debug!("⏭️ Skipping unhealthy {kind} channel for {}", user.id);
            return false;
        }
        let check = match kind {
            ChannelKind::Chat => match &self.chat {
                Some(chat) if user.preferences.slack_enabled => {
                    tokio::time::timeout(self.send_timeout, chat.is_connected(&user.id)).await
                }
                _ => return false,
            },
            ChannelKind::Email => match &self.email {
                Some(email) => tokio::time::timeout(self.send_timeout, email.is_available(&user.id)).await,
                None => return false,
            },
        };
        check.unwrap_or_else(|_| {
            tracing::warn!(
                "⏱️ {kind} availability check for {} timed out after {}s",
                user.id,
                self.send_timeout.as_secs()
            );
            false
        })
    }

    /// Channels to try, in order. At most one fallback is ever used.
    async fn plan(&self, user: &UserRecord, hint: Option<ChannelKind>) -> Vec<ChannelKind> {
        let mut order = Vec::with_capacity(2);
        let hint = hint.or(user.preferences.preferred_channel);
        if let Some(h) = hint {
            if self.is_available(h, user).await {
                order.push(h);
            }
        }
        for kind in [ChannelKind::Chat, ChannelKind::Email] {
            if !order.contains(&kind) && self.is_available(kind, user).await {
                order.push(kind);
            }
        }
        order.truncate(2);
        order
    }

    async fn send_via(
        &self,
        kind: ChannelKind,
        user: &UserRecord,
        notification: &Notification,
    ) -> Result<(), DispatchError> {
        let outcome = match kind {
            ChannelKind::Chat => {
                let Some(chat) = &self.chat else {
                    return Err(DispatchError::new(DispatchErrorKind::ChannelFailed, "chat not configured"));
                };
                let text = notification.chat_text();
                let channel_id = user.preferences.slack_channel_id.as_deref();
                tokio::time::timeout(self.send_timeout, chat.send(&user.id, &text, channel_id))
                    .await
                    .map(|r| match r {
                        Ok(res) if res.success => Ok(()),
                        Ok(res) => Err(res.error.unwrap_or_else(|| "chat send rejected".into())),
                        Err(e) => Err(e.to_string()),
                    })
            }
            ChannelKind::Email => {
                let Some(email) = &self.email else {
                    return Err(DispatchError::new(DispatchErrorKind::ChannelFailed, "email not configured"));
                };
                let html = notification.email_html();
                tokio::time::timeout(self.send_timeout, email.send(&user.id, &notification.title, &html))
                    .await
                    .map(|r| match r {
                        Ok(true) => Ok(()),
                        Ok(false) => Err("email provider refused the message".to_string()),
                        Err(e) => Err(e.to_string()),
                    })
            }
        };

        match outcome {
            Ok(Ok(())) => {
                self.health(kind).record_success();
                Ok(())
            }
            Ok(Err(msg)) => {
                self.health(kind).record_failure();
                Err(DispatchError::new(DispatchErrorKind::ChannelFailed, format!("{kind}: {msg}")))
            }
            Err(_) => {
                self.health(kind).record_failure();
                Err(DispatchError::new(
                    DispatchErrorKind::Timeout,
                    format!("{kind}: no response after {}s", self.send_timeout.as_secs()),
                ))
            }
        }
    }

    /// Send `notification` to `user`. Never retries within the call beyond the
    /// single fallback.
    pub async fn dispatch(
        &self,
        user: &UserRecord,
        notification: &Notification,
        hint: Option<ChannelKind>,
    ) -> DispatchResult {
        let plan = self.plan(user, hint).await;
        if plan.is_empty() {
            tracing::warn!("📭 No channel available for {} ({})", user.id, notification.kind);
            let result = DispatchResult::failed(
                Vec::new(),
                DispatchError::new(
                    DispatchErrorKind::NoChannelAvailable,
                    format!("no delivery channel available for user {}", user.id),
                ),
            );
            self.record(user, notification, &result);
            return result;
        }

        let mut attempts = Vec::with_capacity(plan.len());
        let mut last_error = None;
        for (idx, kind) in plan.into_iter().enumerate() {
            attempts.push(kind);
            match self.send_via(kind, user, notification).await {
                Ok(()) => {
                    if idx > 0 {
                        tracing::info!("🔄 Fallback to {kind} succeeded for {}", user.id);
                    }
                    tracing::info!("✅ {} sent to {} via {kind}", notification.kind, user.id);
                    let result = DispatchResult::delivered(kind, attempts);
                    self.record(user, notification, &result);
                    return result;
                }
                Err(e) => {
                    tracing::warn!("⚠️ {} delivery to {} failed: {e}", notification.kind, user.id);
                    last_error = Some(e);
                }
            }
        }

        let error = last_error.unwrap_or_else(|| {
            DispatchError::new(DispatchErrorKind::ChannelFailed, "all channels failed")
        });
        let result = DispatchResult::failed(attempts, error);
        self.record(user, notification, &result);
        result
    }

    fn record(&self, user: &UserRecord, notification: &Notification, result: &DispatchResult) {
        let record = DeliveryRecord {
            user_id: user.id.clone(),
            title: notification.title.clone(),
            kind: notification.kind,
            channel: result.channel_used,
            success: result.success,
            timestamp: Utc::now(),
        };
        self.log.lock().unwrap_or_else(|e| e.into_inner()).record(record);
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new(&DispatchConfig::default())
    }
}
