//! Priority scoring: decides what is urgent enough to interrupt a user.
//!
//! All functions are pure: they take `now` explicitly and never touch a
//! collaborator. Email scores only order processing; they are never a filter.

use chrono::{DateTime, Duration, Utc};
use execpilot_core::config::ScoringConfig;
use execpilot_core::types::{Email, Lead, Meeting, Priority, Task};

const BASE_EMAIL_SCORE: i64 = 50;
const AGE_PENALTY_PER_HOUR: i64 = 10;
const IMPORTANT_CONTACT_BONUS: i64 = 40;
const IMPORTANT_KEYWORD_BONUS: i64 = 30;
const LEAD_TERM_BONUS: i64 = 25;
const PAYMENT_TERM_BONUS: i64 = 20;

/// An email paired with its computed priority.
#[derive(Debug, Clone)]
pub struct ScoredEmail {
    pub email: Email,
    pub score: i64,
}

/// Heuristic scorer built from [`ScoringConfig`]. Term lists are lowercased once.
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    important_contacts: Vec<String>,
    important_keywords: Vec<String>,
    lead_terms: Vec<String>,
    payment_terms: Vec<String>,
    urgent_due: Duration,
    imminent_meeting: Duration,
    lead_value_threshold: f64,
    fresh_lead: Duration,
}

impl ScoringEngine {
    pub fn new(config: &ScoringConfig) -> Self {
        let lower = |list: &[String]| -> Vec<String> {
            list.iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        };
        Self {
            important_contacts: lower(&config.important_contacts),
            important_keywords: lower(&config.important_keywords),
            lead_terms: lower(&config.lead_terms),
            payment_terms: lower(&config.payment_terms),
            urgent_due: Duration::minutes(config.urgent_due_minutes),
            imminent_meeting: Duration::minutes(config.imminent_meeting_minutes),
            lead_value_threshold: config.lead_value_threshold,
            fresh_lead: Duration::hours(config.fresh_lead_hours),
        }
    }

    /// Email priority. Never negative.
    pub fn email_score(&self, email: &Email, now: DateTime<Utc>) -> i64 {
        let age_hours = (now - email.received_at).num_hours().max(0);
        let mut score = (BASE_EMAIL_SCORE - age_hours * AGE_PENALTY_PER_HOUR).max(0);

        let sender = email.from.to_lowercase();
        if self.important_contacts.iter().any(|c| sender.contains(c.as_str())) {
            score += IMPORTANT_CONTACT_BONUS;
        }

        let subject = email.subject.to_lowercase();
        if contains_any(&subject, &self.important_keywords) {
            score += IMPORTANT_KEYWORD_BONUS;
        }

        let text = format!("{subject} {}", email.body.to_lowercase());
        if contains_any(&text, &self.lead_terms) {
            score += LEAD_TERM_BONUS;
        }
        if contains_any(&text, &self.payment_terms) {
            score += PAYMENT_TERM_BONUS;
        }

        score
    }

    /// Sort emails by descending score. Ties keep their input order.
    pub fn prioritize_emails(&self, emails: Vec<Email>, now: DateTime<Utc>) -> Vec<ScoredEmail> {
        let mut scored: Vec<ScoredEmail> = emails
            .into_iter()
            .map(|email| {
                let score = self.email_score(&email, now);
                ScoredEmail { email, score }
            })
            .collect();
        // Vec::sort_by is stable.
        scored.sort_by(|a, b| b.score.cmp(&a.score));
        scored
    }

    /// Urgent iff due within the horizon (and not already overdue) or high priority.
    /// `horizon_minutes` overrides the configured horizon for users who set
    /// their own response time.
    pub fn is_task_urgent(&self, task: &Task, now: DateTime<Utc>, horizon_minutes: Option<u32>) -> bool {
        if !task.is_open() {
            return false;
        }
        if task.priority == Priority::High {
            return true;
        }
        let horizon = horizon_minutes
            .map(|m| Duration::minutes(i64::from(m)))
            .unwrap_or(self.urgent_due);
        match task.due_at {
            Some(due) => {
                let until = due - now;
                until >= Duration::zero() && until <= horizon
            }
            None => false,
        }
    }

    /// Imminent iff starting within the window. Started meetings never are.
    pub fn is_meeting_imminent(&self, meeting: &Meeting, now: DateTime<Utc>) -> bool {
        let until = meeting.start_at - now;
        until >= Duration::zero() && until <= self.imminent_meeting
    }

    /// High-value or high-priority lead created within the freshness window.
    pub fn is_high_priority_lead(&self, lead: &Lead, now: DateTime<Utc>) -> bool {
        let important = lead.priority == Priority::High || lead.value > self.lead_value_threshold;
        important && now - lead.created_at <= self.fresh_lead
    }
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self::new(&ScoringConfig::default())
    }
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles.iter().any(|n| haystack.contains(n.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(from: &str, subject: &str, body: &str, age: Duration, now: DateTime<Utc>) -> Email {
        Email {
            id: format!("{from}-{subject}"),
            from: from.into(),
            subject: subject.into(),
            body: body.into(),
            received_at: now - age,
        }
    }

    fn engine_with_contact(contact: &str) -> ScoringEngine {
        let config = ScoringConfig {
            important_contacts: vec![contact.to_string()],
            ..ScoringConfig::default()
        };
        ScoringEngine::new(&config)
    }

    #[test]
    fn test_fresh_important_email_scores_at_least_120() {
        let now = Utc::now();
        let engine = engine_with_contact("ceo@acme.com");
        let e = email("CEO@Acme.com", "URGENT: board deck", "see attached", Duration::zero(), now);
        assert!(engine.email_score(&e, now) >= 120);
    }

    #[test]
    fn test_old_email_clamps_to_zero() {
        let now = Utc::now();
        let engine = ScoringEngine::default();
        let e = email("someone@x.com", "hello", "just saying hi", Duration::hours(10), now);
        assert_eq!(engine.email_score(&e, now), 0);
    }

    #[test]
    fn test_lead_and_payment_bonuses() {
        let now = Utc::now();
        let engine = ScoringEngine::default();
        let e = email("a@b.com", "Quote request", "please send the invoice", Duration::hours(5), now);
        // base 0 + lead 25 + payment 20
        assert_eq!(engine.email_score(&e, now), 45);
    }

    #[test]
    fn test_prioritize_is_descending_and_stable() {
        let now = Utc::now();
        let engine = ScoringEngine::default();
        let emails = vec![
            email("a@x.com", "first", "", Duration::hours(3), now),
            email("b@x.com", "deadline tomorrow", "", Duration::hours(3), now),
            email("c@x.com", "second", "", Duration::hours(3), now),
        ];
        let ordered = engine.prioritize_emails(emails, now);
        let subjects: Vec<_> = ordered.iter().map(|s| s.email.subject.as_str()).collect();
        assert_eq!(subjects, vec!["deadline tomorrow", "first", "second"]);
    }

    #[test]
    fn test_task_urgency_rules() {
        let now = Utc::now();
        let engine = ScoringEngine::default();

        let soon = Task::new("t1", "file taxes").due(now + Duration::minutes(10));
        assert!(engine.is_task_urgent(&soon, now, None));

        let high_later = Task::new("t2", "renewal")
            .due(now + Duration::days(5))
            .with_priority(Priority::High);
        assert!(engine.is_task_urgent(&high_later, now, None));

        let medium_later = Task::new("t3", "tidy crm").due(now + Duration::days(5));
        assert!(!engine.is_task_urgent(&medium_later, now, None));

        let overdue = Task::new("t4", "missed").due(now - Duration::minutes(5));
        assert!(!engine.is_task_urgent(&overdue, now, None));
    }

    #[test]
    fn test_user_response_time_widens_horizon() {
        let now = Utc::now();
        let engine = ScoringEngine::default();
        let task = Task::new("t1", "prep").due(now + Duration::minutes(50));
        assert!(!engine.is_task_urgent(&task, now, None));
        assert!(engine.is_task_urgent(&task, now, Some(60)));
    }

    #[test]
    fn test_completed_task_never_urgent() {
        let now = Utc::now();
        let engine = ScoringEngine::default();
        let task = Task::new("t1", "done")
            .with_priority(Priority::High)
            .completed(now);
        assert!(!engine.is_task_urgent(&task, now, None));
    }

    #[test]
    fn test_meeting_imminence() {
        let now = Utc::now();
        let engine = ScoringEngine::default();
        let at = |mins: i64| Meeting::new("m", "sync", now + Duration::minutes(mins));
        assert!(!engine.is_meeting_imminent(&at(20), now));
        assert!(engine.is_meeting_imminent(&at(10), now));
        assert!(!engine.is_meeting_imminent(&at(-2), now));
    }

    #[test]
    fn test_high_priority_lead_freshness() {
        let now = Utc::now();
        let engine = ScoringEngine::default();

        let big = Lead::new("l1", "Globex", now - Duration::minutes(30)).with_value(25_000.0);
        assert!(engine.is_high_priority_lead(&big, now));

        let flagged = Lead::new("l2", "Initech", now - Duration::minutes(90)).with_priority(Priority::High);
        assert!(engine.is_high_priority_lead(&flagged, now));

        let stale = Lead::new("l3", "Umbrella", now - Duration::hours(3)).with_value(50_000.0);
        assert!(!engine.is_high_priority_lead(&stale, now));

        let small = Lead::new("l4", "Hooli", now).with_value(500.0);
        assert!(!engine.is_high_priority_lead(&small, now));
    }
}
