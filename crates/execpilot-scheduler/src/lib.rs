//! # ExecPilot Scheduler
//!
//! Adaptive processing loop, per-user task fan-out, and de-duplicated
//! notification delivery.
//!
//! ## Design Principles
//! - In-memory only: nothing survives a restart, one active scheduler
//! - Tokio timers: sleeps between cycles, zero work when idle
//! - Failures stay local: one user or capability never sinks a cycle
//! - Next cycle is the retry: no same-cycle retries of providers or channels
//!
//! ## Architecture
//! ```text
//! AdaptiveScheduler (loop + CancellationToken)
//!   ├── load users → sort by id
//!   ├── per user (bounded concurrency, in-flight guard, panic isolation)
//!   │     └── PerUserTaskRunner
//!   │           ├── Email         → ScoringEngine orders inbox → MailCollaborator
//!   │           ├── Calendar      → run_auto_detection
//!   │           ├── Tasks         → urgent tasks → Dedup → Dispatcher
//!   │           └── Notifications → DigestTimeGate → DigestComposer
//!   │                               imminent meetings, new high-value leads
//!   │                               → Dedup → Dispatcher
//!   │                                            ├── Chat  (preferred)
//!   │                                            └── Email (fallback)
//!   └── CycleReport → retune interval → sleep
//! ```

pub mod dedup;
pub mod digest;
pub mod dispatch;
pub mod engine;
pub mod notify;
pub mod runner;
pub mod scoring;

#[cfg(test)]
pub(crate) mod test_support;

pub use dedup::{NotificationDeduplicator, NotificationKey, SuppressionWindows};
pub use digest::{ComposedDigest, DigestComposer, DigestMessage, DigestSnapshot, DigestTimeGate};
pub use dispatch::{DispatchError, DispatchErrorKind, DispatchResult, NotificationDispatcher};
pub use engine::{AdaptiveScheduler, CycleReport, CycleTrigger, SchedulerStatus};
pub use notify::{DeliveryRecord, Notification, NotificationKind, NotifyPriority};
pub use runner::{
    Capability, CapabilityError, Collaborators, PerUserReport, PerUserTaskRunner, TaskCounts,
    TriggerOutcome,
};
pub use scoring::{ScoredEmail, ScoringEngine};
