//! Notification deduplication: suppresses repeats of the same alert.
//!
//! In-memory only; nothing survives a restart. Time-bounded records are
//! evicted by [`NotificationDeduplicator::sweep`]. One-shot keys (new
//! high-priority leads) live in a separate map and are swept on the same
//! retention. A lead only qualifies while it is fresh, so a swept one-shot
//! key cannot fire again as long as retention outlasts freshness.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use execpilot_core::config::{DigestAnchor, NotificationConfig};

/// Deterministic identity of "this notification for this entity in this bucket".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NotificationKey(String);

impl NotificationKey {
    pub fn digest(user_id: &str, date: NaiveDate, anchor: DigestAnchor) -> Self {
        Self(format!(
            "digest:{user_id}:{date}:{:02}{:02}",
            anchor.hour, anchor.minute
        ))
    }

    pub fn urgent_task(user_id: &str, task_id: &str) -> Self {
        Self(format!("urgent-task:{user_id}:{task_id}"))
    }

    pub fn meeting(user_id: &str, meeting_id: &str) -> Self {
        Self(format!("meeting:{user_id}:{meeting_id}"))
    }

    pub fn lead(user_id: &str, lead_id: &str) -> Self {
        Self(format!("lead:{user_id}:{lead_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NotificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Suppression window per notification class.
#[derive(Debug, Clone, Copy)]
pub struct SuppressionWindows {
    pub digest: Duration,
    pub urgent_task: Duration,
    pub meeting: Duration,
}

impl SuppressionWindows {
    pub fn from_config(config: &NotificationConfig) -> Self {
        Self {
            digest: Duration::minutes(config.digest_window_minutes),
            urgent_task: Duration::minutes(config.urgent_task_window_minutes),
            meeting: Duration::minutes(config.meeting_window_minutes),
        }
    }
}

impl Default for SuppressionWindows {
    fn default() -> Self {
        Self::from_config(&NotificationConfig::default())
    }
}

#[derive(Default)]
struct DedupState {
    /// key → last sent timestamp.
    sent: HashMap<NotificationKey, DateTime<Utc>>,
    /// One-shot keys → when they were marked.
    once: HashMap<NotificationKey, DateTime<Utc>>,
}

impl DedupState {
    fn is_suppressed(&self, key: &NotificationKey, window: Duration, now: DateTime<Utc>) -> bool {
        self.sent
            .get(key)
            .is_some_and(|last| now - *last < window)
    }
}

/// Tracks recently sent notification keys. Safe to share across workers.
pub struct NotificationDeduplicator {
    state: Mutex<DedupState>,
    retention: Duration,
}

impl NotificationDeduplicator {
    pub fn new(retention: Duration) -> Self {
        Self {
            state: Mutex::new(DedupState::default()),
            retention,
        }
    }

    pub fn from_config(config: &NotificationConfig) -> Self {
        Self::new(Duration::hours(config.retention_hours))
    }

    fn lock(&self) -> MutexGuard<'_, DedupState> {
        // A poisoned map is still a valid map.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// False while a record younger than `window` exists.
    pub fn should_send(&self, key: &NotificationKey, window: Duration) -> bool {
        self.should_send_at(key, window, Utc::now())
    }

    pub fn should_send_at(&self, key: &NotificationKey, window: Duration, now: DateTime<Utc>) -> bool {
        !self.lock().is_suppressed(key, window, now)
    }

    pub fn mark_sent(&self, key: &NotificationKey) {
        self.mark_sent_at(key, Utc::now());
    }

    pub fn mark_sent_at(&self, key: &NotificationKey, now: DateTime<Utc>) {
        self.lock().sent.insert(key.clone(), now);
    }

    /// Atomic `should_send` + `mark_sent`. Returns the stamp recorded for the
    /// caller, or `None` if the key is suppressed.
    pub fn try_acquire(&self, key: &NotificationKey, window: Duration) -> Option<DateTime<Utc>> {
        self.try_acquire_at(key, window, Utc::now())
    }

    pub fn try_acquire_at(
        &self,
        key: &NotificationKey,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let mut state = self.lock();
        if state.is_suppressed(key, window, now) {
            return None;
        }
        state.sent.insert(key.clone(), now);
        Some(now)
    }

    /// Undo an acquisition whose send failed, so the next cycle can retry.
    /// A newer mark by someone else is left alone.
    pub fn release(&self, key: &NotificationKey, stamp: DateTime<Utc>) {
        let mut state = self.lock();
        if state.sent.get(key) == Some(&stamp) {
            state.sent.remove(key);
        }
    }

    /// Mark a one-shot key. True only the first time it is seen.
    pub fn try_mark_once(&self, key: &NotificationKey) -> bool {
        self.try_mark_once_at(key, Utc::now())
    }

    pub fn try_mark_once_at(&self, key: &NotificationKey, now: DateTime<Utc>) -> bool {
        let mut state = self.lock();
        if state.once.contains_key(key) {
            return false;
        }
        state.once.insert(key.clone(), now);
        true
    }

    /// Undo a one-shot mark whose send failed.
    pub fn release_once(&self, key: &NotificationKey) {
        self.lock().once.remove(key);
    }

    pub fn was_notified_once(&self, key: &NotificationKey) -> bool {
        self.lock().once.contains_key(key)
    }

    /// Drop records and one-shot marks older than the retention period.
    /// Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.lock();
        let before = state.sent.len() + state.once.len();
        let retention = self.retention;
        state.sent.retain(|_, last| now - *last < retention);
        state.once.retain(|_, marked| now - *marked < retention);
        let removed = before - state.sent.len() - state.once.len();
        if removed > 0 {
            tracing::debug!("🧹 Dedup sweep removed {removed} expired records");
        }
        removed
    }

    /// Number of time-bounded records currently held.
    pub fn len(&self) -> usize {
        self.lock().sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NotificationDeduplicator {
    fn default() -> Self {
        Self::from_config(&NotificationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn key() -> NotificationKey {
        NotificationKey::urgent_task("u1", "t1")
    }

    #[test]
    fn test_window_boundaries() {
        let dedup = NotificationDeduplicator::default();
        let t = Utc::now();
        let w = Duration::minutes(30);
        assert!(dedup.should_send_at(&key(), w, t));

        dedup.mark_sent_at(&key(), t);
        assert!(!dedup.should_send_at(&key(), w, t));
        assert!(!dedup.should_send_at(&key(), w, t + Duration::minutes(29)));
        assert!(!dedup.should_send_at(&key(), w, t + w - Duration::milliseconds(1)));
        assert!(dedup.should_send_at(&key(), w, t + w));
        assert!(dedup.should_send_at(&key(), w, t + Duration::hours(2)));
    }

    #[test]
    fn test_keys_are_independent() {
        let dedup = NotificationDeduplicator::default();
        let t = Utc::now();
        dedup.mark_sent_at(&NotificationKey::meeting("u1", "m1"), t);
        assert!(dedup.should_send_at(&NotificationKey::meeting("u1", "m2"), Duration::minutes(5), t));
        assert!(dedup.should_send_at(&NotificationKey::meeting("u2", "m1"), Duration::minutes(5), t));
    }

    #[test]
    fn test_try_acquire_is_check_and_set() {
        let dedup = NotificationDeduplicator::default();
        let t = Utc::now();
        let w = Duration::minutes(5);
        assert!(dedup.try_acquire_at(&key(), w, t).is_some());
        assert!(dedup.try_acquire_at(&key(), w, t + Duration::minutes(1)).is_none());
        assert!(dedup.try_acquire_at(&key(), w, t + w).is_some());
    }

    #[test]
    fn test_concurrent_acquire_single_winner() {
        let dedup = Arc::new(NotificationDeduplicator::default());
        let now = Utc::now();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dedup = dedup.clone();
                std::thread::spawn(move || {
                    dedup
                        .try_acquire_at(&NotificationKey::digest("u1", now.date_naive(), DigestAnchor::new(7, 0)), Duration::hours(1), now)
                        .is_some()
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .filter_map(|h| h.join().ok())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_release_only_own_stamp() {
        let dedup = NotificationDeduplicator::default();
        let t = Utc::now();
        let w = Duration::minutes(30);
        let stamp = dedup.try_acquire_at(&key(), w, t).unwrap();
        dedup.release(&key(), stamp);
        assert!(dedup.should_send_at(&key(), w, t));

        let first = dedup.try_acquire_at(&key(), w, t).unwrap();
        dedup.mark_sent_at(&key(), t + Duration::seconds(1));
        dedup.release(&key(), first);
        assert!(!dedup.should_send_at(&key(), w, t + Duration::seconds(2)));
    }

    #[test]
    fn test_once_keys_hold_until_retention() {
        let dedup = NotificationDeduplicator::default();
        let t = Utc::now();
        let lead = NotificationKey::lead("u1", "l1");
        assert!(dedup.try_mark_once_at(&lead, t));
        assert!(!dedup.try_mark_once_at(&lead, t + Duration::hours(3)));
        assert!(dedup.was_notified_once(&lead));

        assert_eq!(dedup.sweep_at(t + Duration::hours(23)), 0);
        assert!(dedup.was_notified_once(&lead));

        assert_eq!(dedup.sweep_at(t + Duration::hours(25)), 1);
        assert!(!dedup.was_notified_once(&lead));
    }

    #[test]
    fn test_release_once_allows_retry() {
        let dedup = NotificationDeduplicator::default();
        let lead = NotificationKey::lead("u1", "l1");
        assert!(dedup.try_mark_once(&lead));
        dedup.release_once(&lead);
        assert!(dedup.try_mark_once(&lead));
    }

    #[test]
    fn test_sweep_drops_records_older_than_retention() {
        let dedup = NotificationDeduplicator::default();
        let t = Utc::now();
        dedup.mark_sent_at(&NotificationKey::urgent_task("u1", "old"), t - Duration::hours(25));
        dedup.mark_sent_at(&NotificationKey::urgent_task("u1", "new"), t - Duration::hours(1));

        assert_eq!(dedup.sweep_at(t), 1);
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_digest_key_format() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        let k = NotificationKey::digest("u1", date, DigestAnchor::new(7, 0));
        assert_eq!(k.as_str(), "digest:u1:2026-03-09:0700");
    }
}
